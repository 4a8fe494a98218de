//! End-to-end reconciliation tests
//!
//! Drives the full credit lifecycle through the engines, replays the
//! emitted event stream into the reconciler, and checks that the mirror
//! converges to the engines' state, including under full redelivery of
//! the stream.

use chrono::Utc;
use credit_ledger::{
    AccountId, Actor, CreditLedger, EnergySource, ListingStatus, MemorySink, Role,
    SubmissionStatus,
};
use escrow_market::{MarketConfig, MarketplaceEngine};
use mirror_sync::{
    ChainSnapshot, ChannelEventSource, EventHandler, EventSource, MirrorConfig, MirrorStore,
    Reconciler,
};
use std::sync::Arc;
use tempfile::TempDir;
use verification_engine::{VerificationConfig, VerificationEngine};

fn actor(id: &str, role: Role) -> Actor {
    Actor {
        account: AccountId::new(id),
        role,
        active: true,
        kyc_verified: true,
    }
}

struct Scenario {
    sink: Arc<MemorySink>,
    ledger: Arc<CreditLedger>,
    producer: Actor,
    verifier: Actor,
    buyer: Actor,
}

/// Run the whole lifecycle: verified issuance, a listing sold across two
/// purchases with a price update in between, a cancelled listing, and a
/// retirement.
fn run_lifecycle() -> Scenario {
    let sink = Arc::new(MemorySink::new());
    let ledger = Arc::new(CreditLedger::new(sink.clone()));
    let verification = VerificationEngine::new(
        ledger.clone(),
        sink.clone(),
        VerificationConfig::default(),
    );
    let market = MarketplaceEngine::new(ledger.clone(), sink.clone(), MarketConfig::default());

    let producer = actor("producer-1", Role::Producer);
    let verifier = actor("verifier-1", Role::Verifier);
    let buyer = actor("buyer-1", Role::Buyer);
    let now = Utc::now();

    ledger
        .register_producer(
            producer.account.clone(),
            "plant-1",
            EnergySource::Wind,
            10_000,
            now,
        )
        .unwrap();

    // Two verified submissions.
    let first = verification
        .submit(
            &producer,
            300,
            now - chrono::Duration::hours(2),
            "evidence://jan-a",
            now,
        )
        .unwrap();
    let second = verification
        .submit(
            &producer,
            200,
            now - chrono::Duration::hours(1),
            "evidence://jan-b",
            now,
        )
        .unwrap();
    verification.resolve(first, &verifier, true, None, now).unwrap();
    let second_resolution = verification.resolve(second, &verifier, true, None, now).unwrap();

    // Sell 100 of the first batch's units: 60, reprice, then the rest.
    let listing = market.create_listing(&producer, 100, 5, now).unwrap();
    market.purchase(listing.listing_id, &buyer, 60, now).unwrap();
    market
        .update_price(listing.listing_id, &producer, 7, now)
        .unwrap();
    market.purchase(listing.listing_id, &buyer, 40, now).unwrap();

    // A second listing is withdrawn.
    let withdrawn = market.create_listing(&producer, 50, 9, now).unwrap();
    market
        .cancel_listing(withdrawn.listing_id, &producer, now)
        .unwrap();

    // Retire the second batch outright.
    ledger
        .retire(
            &producer.account,
            &[second_resolution.batch_id.unwrap()],
            "corporate offset",
            now,
        )
        .unwrap();

    Scenario {
        sink,
        ledger,
        producer,
        verifier,
        buyer,
    }
}

fn mirror() -> (Arc<Reconciler>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let config = MirrorConfig {
        data_dir: temp_dir.path().to_path_buf(),
        resync_interval_secs: 3600,
        ..Default::default()
    };
    let store = Arc::new(MirrorStore::open(&config).unwrap());
    (Arc::new(Reconciler::new(store, config)), temp_dir)
}

async fn deliver(reconciler: &Arc<Reconciler>, events: Vec<credit_ledger::ChainEvent>) {
    let (sender, source) = ChannelEventSource::new(64);
    for event in events {
        sender.send(event).await.unwrap();
    }
    drop(sender);
    let handler: Arc<dyn EventHandler> = reconciler.clone();
    source.subscribe(handler).await.unwrap();
}

#[tokio::test]
async fn test_mirror_converges_to_engine_state() {
    let scenario = run_lifecycle();
    let (reconciler, _temp) = mirror();

    deliver(&reconciler, scenario.sink.events()).await;
    let store = reconciler.store();

    // Submissions: both verified, by the verifier.
    let verified = store
        .list_submissions(
            Some(&scenario.producer.account),
            Some(SubmissionStatus::Verified),
            Default::default(),
        )
        .unwrap();
    assert_eq!(verified.len(), 2);
    assert!(verified
        .iter()
        .all(|row| row.verifier == Some(scenario.verifier.account.clone())));

    // Batches: mirror agrees with the ledger, including retirement flags.
    let batches = store
        .list_batches(Some(&scenario.producer.account), false, Default::default())
        .unwrap();
    assert_eq!(batches.len(), 2);
    for row in &batches {
        let authoritative = scenario.ledger.batch(&row.batch_id).unwrap();
        assert_eq!(row.amount, authoritative.amount);
        assert_eq!(row.retired, authoritative.retired);
    }
    let circulating = store
        .list_batches(Some(&scenario.producer.account), true, Default::default())
        .unwrap();
    assert_eq!(circulating.len(), 1);
    assert_eq!(circulating[0].amount, 300);

    // Listings: one sold out, one cancelled.
    let sold = store
        .list_listings(
            Some(&scenario.producer.account),
            Some(ListingStatus::Sold),
            Default::default(),
        )
        .unwrap();
    assert_eq!(sold.len(), 1);
    assert_eq!(sold[0].remaining, 0);
    assert_eq!(sold[0].price_per_unit, 7);
    let cancelled = store
        .list_listings(
            Some(&scenario.producer.account),
            Some(ListingStatus::Cancelled),
            Default::default(),
        )
        .unwrap();
    assert_eq!(cancelled.len(), 1);

    // Settlements: two, with the repriced second purchase.
    let settlements = store
        .list_settlements(Some(sold[0].listing_id), Default::default())
        .unwrap();
    assert_eq!(settlements.len(), 2);
    let total: u64 = settlements.iter().map(|row| row.total_price).sum();
    assert_eq!(total, 60 * 5 + 40 * 7);
    assert!(settlements
        .iter()
        .all(|row| row.buyer == scenario.buyer.account));
}

#[tokio::test]
async fn test_full_redelivery_is_idempotent() {
    let scenario = run_lifecycle();
    let (reconciler, _temp) = mirror();

    deliver(&reconciler, scenario.sink.events()).await;
    let store = reconciler.store();
    let batches_once = store.list_batches(None, false, Default::default()).unwrap();
    let listings_once = store.list_listings(None, None, Default::default()).unwrap();
    let settlements_once = store.list_settlements(None, Default::default()).unwrap();

    // Redeliver the whole stream.
    deliver(&reconciler, scenario.sink.events()).await;

    let batches_twice = store.list_batches(None, false, Default::default()).unwrap();
    let listings_twice = store.list_listings(None, None, Default::default()).unwrap();
    let settlements_twice = store.list_settlements(None, Default::default()).unwrap();

    assert_eq!(batches_once.len(), batches_twice.len());
    assert_eq!(settlements_once, settlements_twice);
    assert_eq!(listings_once.len(), listings_twice.len());
    for (once, twice) in listings_once.iter().zip(&listings_twice) {
        assert_eq!(once.listing_id, twice.listing_id);
        assert_eq!(once.remaining, twice.remaining);
        assert_eq!(once.status, twice.status);
    }
}

#[tokio::test]
async fn test_run_performs_startup_resync_and_live_apply() {
    let scenario = run_lifecycle();
    let (reconciler, _temp) = mirror();

    let events = scenario.sink.events();
    let (sender, source) = ChannelEventSource::new(64);

    // The startup snapshot already knows both batches; the live stream
    // then replays the full history over it.
    source.set_snapshot(ChainSnapshot {
        as_of_sequence: 0,
        batches: scenario
            .ledger
            .producer_batches(&scenario.producer.account),
        listings: vec![],
    });

    let source: Arc<dyn EventSource> = Arc::new(source);
    let run_handle = tokio::spawn(reconciler.clone().run(source));

    for event in events {
        sender.send(event).await.unwrap();
    }
    drop(sender);

    tokio::time::timeout(std::time::Duration::from_secs(10), run_handle)
        .await
        .expect("run did not finish after stream end")
        .unwrap()
        .unwrap();

    let store = reconciler.store();
    assert_eq!(
        store
            .list_batches(None, false, Default::default())
            .unwrap()
            .len(),
        2
    );
    assert_eq!(
        store
            .list_settlements(None, Default::default())
            .unwrap()
            .len(),
        2
    );
}
