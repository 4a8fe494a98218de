//! Listing lifecycle and atomic purchase settlement
//!
//! A listing's remaining amount is the canonical contention point: each
//! listing carries its own mutex, and a purchase decides and commits its
//! decomposition of the remaining amount entirely inside that critical
//! section, so concurrently approved purchases can never oversell. Policy:
//! a purchase asking for more than the remaining amount is rejected, never
//! partial-filled.

use crate::{
    config::MarketConfig,
    error::{Error, Result},
    fees::settlement_split,
};
use chrono::{DateTime, Utc};
use credit_ledger::{
    Actor, ChainEventKind, CreditLedger, EventSink, ListingStatus, MarketplaceListing,
    SettlementRecord,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

/// Escrow marketplace engine
pub struct MarketplaceEngine {
    /// Credit ledger holding custody balances
    ledger: Arc<CreditLedger>,

    /// Domain event sink
    sink: Arc<dyn EventSink>,

    /// Fee configuration
    config: MarketConfig,

    /// Listings by id
    listings: DashMap<Uuid, Arc<Mutex<MarketplaceListing>>>,

    /// Append-only settlement log
    settlements: Mutex<Vec<SettlementRecord>>,
}

impl MarketplaceEngine {
    /// Create an engine over the given ledger
    pub fn new(ledger: Arc<CreditLedger>, sink: Arc<dyn EventSink>, config: MarketConfig) -> Self {
        Self {
            ledger,
            sink,
            config,
            listings: DashMap::new(),
            settlements: Mutex::new(Vec::new()),
        }
    }

    fn listing_cell(&self, listing_id: &Uuid) -> Result<Arc<Mutex<MarketplaceListing>>> {
        self.listings
            .get(listing_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::ListingNotFound(listing_id.to_string()))
    }

    fn require_active_actor(&self, actor: &Actor) -> Result<()> {
        if !actor.active || !actor.kyc_verified {
            return Err(Error::NotAuthorized(actor.account.to_string()));
        }
        Ok(())
    }

    /// Create a listing, moving `amount` of the seller's spendable credits
    /// into marketplace escrow.
    pub fn create_listing(
        &self,
        seller: &Actor,
        amount: u64,
        price_per_unit: u64,
        now: DateTime<Utc>,
    ) -> Result<MarketplaceListing> {
        self.require_active_actor(seller)?;
        if amount == 0 {
            return Err(Error::InvalidAmount(
                "listing amount must be positive".to_string(),
            ));
        }
        if price_per_unit == 0 {
            return Err(Error::InvalidPrice(
                "price per unit must be positive".to_string(),
            ));
        }

        // Surfaces InsufficientBalance when spendable credits cannot cover
        // the listing; escrowed credits do not count.
        self.ledger.escrow_hold(&seller.account, amount)?;

        let listing = MarketplaceListing {
            listing_id: Uuid::now_v7(),
            seller: seller.account.clone(),
            remaining: amount,
            price_per_unit,
            status: ListingStatus::Active,
            created_at: now,
            updated_at: now,
        };

        self.listings
            .insert(listing.listing_id, Arc::new(Mutex::new(listing.clone())));
        self.sink.publish(ChainEventKind::ListingCreated {
            listing: listing.clone(),
        });

        tracing::info!(
            listing_id = %listing.listing_id,
            seller = %seller.account,
            amount,
            price_per_unit,
            "Listing created"
        );

        Ok(listing)
    }

    /// Purchase `amount` units from an active listing.
    ///
    /// Applied as a single atomic unit under the listing lock: decrement
    /// remaining (marking the listing sold at zero), settle escrow to the
    /// buyer's spendable balance, and append one settlement record.
    pub fn purchase(
        &self,
        listing_id: Uuid,
        buyer: &Actor,
        amount: u64,
        now: DateTime<Utc>,
    ) -> Result<SettlementRecord> {
        self.require_active_actor(buyer)?;
        if amount == 0 {
            return Err(Error::InvalidAmount(
                "purchase amount must be positive".to_string(),
            ));
        }

        let cell = self.listing_cell(&listing_id)?;
        let mut listing = cell.lock();

        if listing.status != ListingStatus::Active {
            return Err(Error::ListingInactive(listing_id.to_string()));
        }
        if listing.seller == buyer.account {
            return Err(Error::SelfPurchase(buyer.account.to_string()));
        }
        if amount > listing.remaining {
            return Err(Error::InsufficientListingAmount {
                requested: amount,
                remaining: listing.remaining,
            });
        }

        let split = settlement_split(amount, listing.price_per_unit, self.config.fee_rate_bps)?;

        self.ledger
            .escrow_settle(&listing.seller, &buyer.account, amount)?;

        listing.remaining -= amount;
        listing.updated_at = now;
        if listing.remaining == 0 {
            listing.status = ListingStatus::Sold;
        }

        let record = SettlementRecord {
            settlement_ref: Uuid::now_v7(),
            listing_id,
            buyer: buyer.account.clone(),
            seller: listing.seller.clone(),
            amount,
            total_price: split.total,
            fee: split.fee,
            settled_at: now,
        };

        self.settlements.lock().push(record.clone());
        self.sink.publish(ChainEventKind::ListingPurchased {
            settlement: record.clone(),
            remaining: listing.remaining,
            status: listing.status,
        });

        tracing::info!(
            settlement_ref = %record.settlement_ref,
            listing_id = %listing_id,
            buyer = %buyer.account,
            amount,
            total = split.total,
            fee = split.fee,
            "Purchase settled"
        );

        Ok(record)
    }

    /// Cancel an active listing, returning the full remaining escrowed
    /// amount to the seller. Terminal.
    pub fn cancel_listing(&self, listing_id: Uuid, seller: &Actor, now: DateTime<Utc>) -> Result<()> {
        let cell = self.listing_cell(&listing_id)?;
        let mut listing = cell.lock();

        if listing.seller != seller.account {
            return Err(Error::NotSeller(seller.account.to_string()));
        }
        if listing.status != ListingStatus::Active {
            return Err(Error::ListingInactive(listing_id.to_string()));
        }

        let returned = listing.remaining;
        self.ledger.escrow_release(&listing.seller, returned)?;

        listing.remaining = 0;
        listing.status = ListingStatus::Cancelled;
        listing.updated_at = now;

        self.sink.publish(ChainEventKind::ListingCancelled {
            listing_id,
            returned,
        });

        tracing::info!(listing_id = %listing_id, returned, "Listing cancelled");

        Ok(())
    }

    /// Reprice an active listing. Escrow and remaining amount are unaffected.
    pub fn update_price(
        &self,
        listing_id: Uuid,
        seller: &Actor,
        new_price: u64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let cell = self.listing_cell(&listing_id)?;
        let mut listing = cell.lock();

        if listing.seller != seller.account {
            return Err(Error::NotSeller(seller.account.to_string()));
        }
        if listing.status != ListingStatus::Active {
            return Err(Error::ListingInactive(listing_id.to_string()));
        }
        if new_price == 0 {
            return Err(Error::InvalidPrice(
                "price per unit must be positive".to_string(),
            ));
        }

        listing.price_per_unit = new_price;
        listing.updated_at = now;

        self.sink.publish(ChainEventKind::ListingPriceUpdated {
            listing_id,
            price_per_unit: new_price,
        });

        Ok(())
    }

    /// Get a listing snapshot
    pub fn listing(&self, listing_id: Uuid) -> Result<MarketplaceListing> {
        self.listing_cell(&listing_id)
            .map(|cell| cell.lock().clone())
    }

    /// Settlement log snapshot, in settlement order
    pub fn settlements(&self) -> Vec<SettlementRecord> {
        self.settlements.lock().clone()
    }

    /// Sum of remaining amounts across active listings.
    ///
    /// Equals the ledger's total escrowed supply at every consistent
    /// observation point (escrow custody invariant).
    pub fn active_listing_supply(&self) -> u64 {
        self.listings
            .iter()
            .map(|entry| {
                let listing = entry.value().lock();
                if listing.status == ListingStatus::Active {
                    listing.remaining
                } else {
                    0
                }
            })
            .sum()
    }
}

impl std::fmt::Debug for MarketplaceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketplaceEngine")
            .field("listings", &self.listings.len())
            .finish()
    }
}
