//! Domain event vocabulary
//!
//! One event per committed ledger/engine mutation. The authoritative chain
//! emits the same vocabulary; the reconciliation layer applies it to the
//! mirror store exactly once, keyed by [`ChainEvent::idempotency_key`].

use crate::types::{
    AccountId, CreditBatch, ListingStatus, MarketplaceListing, ProductionSubmission,
    RetirementRecord, SettlementRecord,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Event payload (state transition on the authoritative source)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ChainEventKind {
    /// A credit batch was issued for a verified submission
    BatchIssued {
        /// The issued batch
        batch: CreditBatch,
    },

    /// A batch set was retired all-or-nothing
    BatchRetired {
        /// The append-only retirement record
        retirement: RetirementRecord,
    },

    /// Custody of a batch set moved between accounts
    CreditsTransferred {
        /// Unique transfer ID
        transfer_id: Uuid,
        /// Previous holder
        from: AccountId,
        /// New holder
        to: AccountId,
        /// Moved batches
        batch_ids: Vec<Uuid>,
        /// Total units moved
        amount: u64,
    },

    /// A production submission reached a terminal status
    SubmissionResolved {
        /// The resolved submission
        submission: ProductionSubmission,
    },

    /// A seller escrowed credits into a new listing
    ListingCreated {
        /// The new listing
        listing: MarketplaceListing,
    },

    /// A seller repriced an active listing
    ListingPriceUpdated {
        /// Repriced listing
        listing_id: Uuid,
        /// New price per unit
        price_per_unit: u64,
    },

    /// A purchase settled against a listing
    ListingPurchased {
        /// The append-only settlement record
        settlement: SettlementRecord,
        /// Listing units remaining after this purchase
        remaining: u64,
        /// Listing status after this purchase
        status: ListingStatus,
    },

    /// A seller withdrew a listing; escrow returned
    ListingCancelled {
        /// Cancelled listing
        listing_id: Uuid,
        /// Escrowed units returned to the seller
        returned: u64,
    },
}

impl ChainEventKind {
    /// Stable idempotency key derived from immutable identifying fields.
    ///
    /// Re-delivery of the same underlying event always yields the same key;
    /// the mirror applies each key at most once.
    pub fn idempotency_key(&self) -> String {
        match self {
            ChainEventKind::BatchIssued { batch } => format!("batch:{}", batch.batch_id),
            ChainEventKind::BatchRetired { retirement } => {
                format!("retirement:{}", retirement.retirement_id)
            }
            ChainEventKind::CreditsTransferred { transfer_id, .. } => {
                format!("transfer:{transfer_id}")
            }
            ChainEventKind::SubmissionResolved { submission } => {
                format!("submission:{}", submission.submission_id)
            }
            ChainEventKind::ListingCreated { listing } => {
                format!("listing:{}", listing.listing_id)
            }
            ChainEventKind::ListingPriceUpdated {
                listing_id,
                price_per_unit,
            } => format!("listing-price:{listing_id}:{price_per_unit}"),
            ChainEventKind::ListingPurchased { settlement, .. } => {
                format!("settlement:{}", settlement.settlement_ref)
            }
            ChainEventKind::ListingCancelled { listing_id, .. } => {
                format!("listing-cancelled:{listing_id}")
            }
        }
    }

    /// Stable kind name (metrics and log labels)
    pub fn name(&self) -> &'static str {
        match self {
            ChainEventKind::BatchIssued { .. } => "batch_issued",
            ChainEventKind::BatchRetired { .. } => "batch_retired",
            ChainEventKind::CreditsTransferred { .. } => "credits_transferred",
            ChainEventKind::SubmissionResolved { .. } => "submission_resolved",
            ChainEventKind::ListingCreated { .. } => "listing_created",
            ChainEventKind::ListingPriceUpdated { .. } => "listing_price_updated",
            ChainEventKind::ListingPurchased { .. } => "listing_purchased",
            ChainEventKind::ListingCancelled { .. } => "listing_cancelled",
        }
    }

    /// Topic for per-entity ordering guarantees
    pub fn topic(&self) -> &'static str {
        match self {
            ChainEventKind::BatchIssued { .. }
            | ChainEventKind::BatchRetired { .. }
            | ChainEventKind::CreditsTransferred { .. } => "gh2.batch",
            ChainEventKind::SubmissionResolved { .. } => "gh2.submission",
            ChainEventKind::ListingCreated { .. }
            | ChainEventKind::ListingPriceUpdated { .. }
            | ChainEventKind::ListingPurchased { .. }
            | ChainEventKind::ListingCancelled { .. } => "gh2.listing",
        }
    }
}

/// Ordered event envelope as delivered by the authoritative source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainEvent {
    /// Source-assigned sequence number; strictly increasing per topic
    pub sequence: u64,

    /// Emission timestamp
    pub emitted_at: DateTime<Utc>,

    /// Payload
    pub kind: ChainEventKind,
}

impl ChainEvent {
    /// Idempotency key of the payload
    pub fn idempotency_key(&self) -> String {
        self.kind.idempotency_key()
    }

    /// Topic of the payload
    pub fn topic(&self) -> &'static str {
        self.kind.topic()
    }
}

/// Sink for domain events emitted by the engines.
///
/// Notification and audit-log collaborators subscribe behind this seam;
/// the reconciliation layer bridges the authoritative stream through the
/// same vocabulary. Publishing must be cheap: it is called inside
/// per-entity critical sections to preserve per-entity ordering.
pub trait EventSink: Send + Sync {
    /// Publish one committed event
    fn publish(&self, kind: ChainEventKind);
}

/// Sink that drops all events (standalone ledger use)
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _kind: ChainEventKind) {}
}

/// In-memory sink that stamps envelopes and buffers them in order.
///
/// Used by tests and by the in-process event source feeding the mirror.
#[derive(Debug, Default)]
pub struct MemorySink {
    sequence: AtomicU64,
    buffer: Mutex<Vec<ChainEvent>>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain all buffered events in publication order
    pub fn drain(&self) -> Vec<ChainEvent> {
        std::mem::take(&mut *self.buffer.lock())
    }

    /// Snapshot of buffered events without draining
    pub fn events(&self) -> Vec<ChainEvent> {
        self.buffer.lock().clone()
    }
}

impl EventSink for MemorySink {
    fn publish(&self, kind: ChainEventKind) {
        let event = ChainEvent {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            emitted_at: Utc::now(),
            kind,
        };
        self.buffer.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing_id() -> Uuid {
        Uuid::now_v7()
    }

    #[test]
    fn test_idempotency_key_stability() {
        let id = listing_id();
        let kind = ChainEventKind::ListingCancelled {
            listing_id: id,
            returned: 40,
        };
        assert_eq!(kind.idempotency_key(), format!("listing-cancelled:{id}"));
        // Same identifying fields, same key
        let redelivered = ChainEventKind::ListingCancelled {
            listing_id: id,
            returned: 40,
        };
        assert_eq!(kind.idempotency_key(), redelivered.idempotency_key());
    }

    #[test]
    fn test_memory_sink_orders_sequences() {
        let sink = MemorySink::new();
        for price in [5u64, 6, 7] {
            sink.publish(ChainEventKind::ListingPriceUpdated {
                listing_id: listing_id(),
                price_per_unit: price,
            });
        }

        let events = sink.drain();
        assert_eq!(events.len(), 3);
        assert!(events.windows(2).all(|w| w[0].sequence < w[1].sequence));
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_topics() {
        let transfer = ChainEventKind::CreditsTransferred {
            transfer_id: Uuid::now_v7(),
            from: AccountId::new("a"),
            to: AccountId::new("b"),
            batch_ids: vec![],
            amount: 0,
        };
        assert_eq!(transfer.topic(), "gh2.batch");
    }
}
