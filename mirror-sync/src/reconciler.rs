//! Exactly-once event application and drift healing
//!
//! Events arrive at-least-once and per-topic ordered. Each payload is
//! identified by its idempotency key and a BLAKE3 content hash: an equal
//! redelivery is a no-op, a diverging one is a data-integrity conflict.
//! Mutating events carry absolute post-state (a purchase carries the
//! listing's remaining amount, not a delta), so live application commutes
//! with resynchronization.

use crate::{
    config::MirrorConfig,
    error::{Error, Result},
    metrics,
    source::{ChainSnapshot, EventHandler, EventSource},
    store::MirrorStore,
};
use async_trait::async_trait;
use backoff::ExponentialBackoff;
use credit_ledger::{ChainEvent, ChainEventKind, ListingStatus};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Reconciles the authoritative event stream into the mirror store
pub struct Reconciler {
    /// The mirror store; this reconciler is its only writer
    store: Arc<MirrorStore>,

    /// Configuration
    config: MirrorConfig,

    /// Highest sequence seen on the stream
    last_sequence: AtomicU64,

    /// A gap or out-of-band miss was observed; cleared by resync
    gap_detected: AtomicBool,
}

impl Reconciler {
    /// Create a reconciler owning the given store
    pub fn new(store: Arc<MirrorStore>, config: MirrorConfig) -> Self {
        Self {
            store,
            config,
            last_sequence: AtomicU64::new(0),
            gap_detected: AtomicBool::new(false),
        }
    }

    /// The mirror store (read access for query collaborators)
    pub fn store(&self) -> &Arc<MirrorStore> {
        &self.store
    }

    /// Whether a stream gap has been observed since the last resync
    pub fn gap_detected(&self) -> bool {
        self.gap_detected.load(Ordering::SeqCst)
    }

    fn track_sequence(&self, event: &ChainEvent) {
        let last = self.last_sequence.load(Ordering::SeqCst);
        if last != 0 && event.sequence > last + 1 {
            metrics::SEQUENCE_GAPS_TOTAL.inc();
            self.gap_detected.store(true, Ordering::SeqCst);
            tracing::warn!(
                last,
                sequence = event.sequence,
                "Sequence gap detected on event stream"
            );
        }
        self.last_sequence.fetch_max(event.sequence, Ordering::SeqCst);
    }

    fn note_missing_row(&self, key: &str, entity: &str) {
        // The base row was never mirrored: an earlier event was missed.
        self.gap_detected.store(true, Ordering::SeqCst);
        tracing::warn!(key, entity, "Event for unmirrored entity; resync will heal");
    }

    /// Apply one event exactly once.
    ///
    /// Row writes precede the applied marker; a crash in between makes the
    /// redelivery re-upsert equal content, which is harmless.
    pub fn apply(&self, event: &ChainEvent) -> Result<()> {
        let kind_name = event.kind.name();
        let timer = metrics::APPLY_DURATION
            .with_label_values(&[kind_name])
            .start_timer();

        self.track_sequence(event);

        let key = event.idempotency_key();
        let payload_hash: [u8; 32] = blake3::hash(&bincode::serialize(&event.kind)?).into();

        match self.store.applied_hash(&key)? {
            Some(applied) if applied == payload_hash => {
                metrics::EVENTS_PROCESSED_TOTAL
                    .with_label_values(&[kind_name, "duplicate"])
                    .inc();
                tracing::debug!(key = %key, "Duplicate delivery, already applied");
                timer.observe_duration();
                return Ok(());
            }
            Some(_) => {
                metrics::EVENTS_PROCESSED_TOTAL
                    .with_label_values(&[kind_name, "conflict"])
                    .inc();
                timer.observe_duration();
                return Err(Error::DataIntegrityConflict {
                    key,
                    detail: "redelivered payload diverges from the applied one".to_string(),
                });
            }
            None => {}
        }

        self.apply_rows(event, &key)?;
        self.store.mark_applied(&key, payload_hash)?;

        metrics::EVENTS_PROCESSED_TOTAL
            .with_label_values(&[kind_name, "applied"])
            .inc();
        timer.observe_duration();
        Ok(())
    }

    fn apply_rows(&self, event: &ChainEvent, key: &str) -> Result<()> {
        match &event.kind {
            ChainEventKind::BatchIssued { batch } => {
                self.store.put_batch(batch)?;
            }

            ChainEventKind::BatchRetired { retirement } => {
                self.store.put_retirement(retirement)?;
                for batch_id in &retirement.batch_ids {
                    match self.store.get_batch(*batch_id)? {
                        Some(mut batch) => {
                            batch.retired = true;
                            batch.retirement_reason = Some(retirement.reason.clone());
                            batch.retired_at = Some(retirement.retired_at);
                            self.store.put_batch(&batch)?;
                        }
                        None => self.note_missing_row(key, "batch"),
                    }
                }
            }

            ChainEventKind::CreditsTransferred { to, batch_ids, .. } => {
                for batch_id in batch_ids {
                    match self.store.get_batch(*batch_id)? {
                        Some(mut batch) => {
                            batch.holder = to.clone();
                            self.store.put_batch(&batch)?;
                        }
                        None => self.note_missing_row(key, "batch"),
                    }
                }
            }

            ChainEventKind::SubmissionResolved { submission } => {
                self.store.put_submission(submission)?;
            }

            ChainEventKind::ListingCreated { listing } => {
                self.store.put_listing(listing)?;
            }

            ChainEventKind::ListingPriceUpdated {
                listing_id,
                price_per_unit,
            } => match self.store.get_listing(*listing_id)? {
                Some(mut listing) => {
                    listing.price_per_unit = *price_per_unit;
                    listing.updated_at = event.emitted_at;
                    self.store.put_listing(&listing)?;
                }
                None => self.note_missing_row(key, "listing"),
            },

            ChainEventKind::ListingPurchased {
                settlement,
                remaining,
                status,
            } => {
                self.store.put_settlement(settlement)?;
                match self.store.get_listing(settlement.listing_id)? {
                    Some(mut listing) => {
                        listing.remaining = *remaining;
                        listing.status = *status;
                        listing.updated_at = event.emitted_at;
                        self.store.put_listing(&listing)?;
                    }
                    None => self.note_missing_row(key, "listing"),
                }
            }

            ChainEventKind::ListingCancelled { listing_id, .. } => {
                match self.store.get_listing(*listing_id)? {
                    Some(mut listing) => {
                        listing.remaining = 0;
                        listing.status = ListingStatus::Cancelled;
                        listing.updated_at = event.emitted_at;
                        self.store.put_listing(&listing)?;
                    }
                    None => self.note_missing_row(key, "listing"),
                }
            }
        }

        Ok(())
    }

    /// Full resynchronization against the source's current state.
    ///
    /// Inserts rows the mirror missed and corrects drift in mutable
    /// fields. A mismatch in a field that is immutable on the source is a
    /// data-integrity conflict and stops the pass.
    pub fn resync(&self, snapshot: &ChainSnapshot) -> Result<()> {
        metrics::RESYNC_RUNS_TOTAL.inc();
        let mut corrections = 0u64;

        for batch in &snapshot.batches {
            match self.store.get_batch(batch.batch_id)? {
                None => {
                    self.store.put_batch(batch)?;
                    corrections += 1;
                }
                Some(existing) => {
                    if existing.amount != batch.amount
                        || existing.producer != batch.producer
                        || existing.submission_id != batch.submission_id
                    {
                        return Err(Error::DataIntegrityConflict {
                            key: format!("batch:{}", batch.batch_id),
                            detail: "mirror disagrees with the source on immutable batch fields"
                                .to_string(),
                        });
                    }
                    if existing.retired != batch.retired || existing.holder != batch.holder {
                        self.store.put_batch(batch)?;
                        corrections += 1;
                    }
                }
            }
        }

        for listing in &snapshot.listings {
            match self.store.get_listing(listing.listing_id)? {
                None => {
                    self.store.put_listing(listing)?;
                    corrections += 1;
                }
                Some(existing) => {
                    if existing.seller != listing.seller {
                        return Err(Error::DataIntegrityConflict {
                            key: format!("listing:{}", listing.listing_id),
                            detail: "mirror disagrees with the source on the listing seller"
                                .to_string(),
                        });
                    }
                    if existing.remaining != listing.remaining
                        || existing.status != listing.status
                        || existing.price_per_unit != listing.price_per_unit
                    {
                        self.store.put_listing(listing)?;
                        corrections += 1;
                    }
                }
            }
        }

        metrics::RESYNC_CORRECTIONS_TOTAL.inc_by(corrections);
        self.last_sequence
            .fetch_max(snapshot.as_of_sequence, Ordering::SeqCst);
        self.gap_detected.store(false, Ordering::SeqCst);

        tracing::info!(
            corrections,
            as_of_sequence = snapshot.as_of_sequence,
            "Resynchronization pass complete"
        );

        Ok(())
    }

    fn backoff_policy(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_millis(self.config.retry.initial_delay_ms),
            max_interval: Duration::from_millis(self.config.retry.max_delay_ms),
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    async fn pull_snapshot(&self, source: &Arc<dyn EventSource>) -> Result<ChainSnapshot> {
        backoff::future::retry(self.backoff_policy(), || {
            let source = source.clone();
            async move {
                source.snapshot().await.map_err(|err| {
                    tracing::warn!(error = %err, "Snapshot pull failed, backing off");
                    backoff::Error::transient(err)
                })
            }
        })
        .await
    }

    /// Run the reconciler: resync once on startup, then consume the live
    /// stream (reconnecting with backoff) while resyncing periodically and
    /// on detected gaps.
    ///
    /// Returns when the stream ends, or with the first integrity error a
    /// resync pass surfaces; live-apply conflicts are escalated by the
    /// source's delivery loop.
    pub async fn run(self: Arc<Self>, source: Arc<dyn EventSource>) -> Result<()> {
        let snapshot = self.pull_snapshot(&source).await?;
        self.resync(&snapshot)?;

        let subscription = {
            let source = source.clone();
            let handler: Arc<dyn EventHandler> = self.clone();
            let policy = self.backoff_policy();
            async move {
                backoff::future::retry(policy, || {
                    let source = source.clone();
                    let handler = handler.clone();
                    async move {
                        source.subscribe(handler).await.map_err(|err| {
                            tracing::warn!(error = %err, "Subscription lost, backing off");
                            backoff::Error::transient(err)
                        })
                    }
                })
                .await
            }
        };
        tokio::pin!(subscription);

        let mut resync_timer =
            tokio::time::interval(Duration::from_secs(self.config.resync_interval_secs));
        resync_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        resync_timer.tick().await; // first tick fires immediately

        let mut gap_check = tokio::time::interval(Duration::from_secs(1));
        gap_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                result = &mut subscription => {
                    tracing::info!("Event stream ended");
                    return result;
                }

                _ = resync_timer.tick() => {
                    match source.snapshot().await {
                        Ok(snapshot) => self.resync(&snapshot)?,
                        // Transient: the next tick retries; live application
                        // continues meanwhile.
                        Err(err) => tracing::warn!(error = %err, "Periodic snapshot unavailable"),
                    }
                }

                // A detected gap heals ahead of the periodic cadence.
                _ = gap_check.tick(), if self.gap_detected() => {
                    match source.snapshot().await {
                        Ok(snapshot) => self.resync(&snapshot)?,
                        Err(err) => tracing::warn!(error = %err, "Gap resync snapshot unavailable"),
                    }
                }
            }
        }
    }
}

#[async_trait]
impl EventHandler for Reconciler {
    async fn handle(&self, event: ChainEvent) -> Result<()> {
        self.apply(&event)
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("last_sequence", &self.last_sequence.load(Ordering::SeqCst))
            .field("gap_detected", &self.gap_detected())
            .finish()
    }
}
