//! GH2 Credit Ledger
//!
//! Conservation-respecting bookkeeping for renewable-hydrogen production
//! credits: producers, credit batches, custody balances, and retirement.
//!
//! # Architecture
//!
//! - **Entity-scoped locking**: every mutation serializes on the single
//!   entity it touches (producer, account, batch set); there is no global
//!   lock.
//! - **Integer units**: credit amounts and prices are plain integer units,
//!   never floating point.
//! - **Event emission**: every committed mutation publishes one domain
//!   event through an [`events::EventSink`].
//!
//! # Invariants
//!
//! - Conservation: Σ(batch.amount) == total_produced for every producer
//! - Retirement: a batch retires at most once, as part of an all-or-nothing set
//! - Custody: escrowed units are excluded from spendable balance and
//!   returned intact on release

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod error;
pub mod events;
pub mod ledger;
pub mod types;

// Re-exports
pub use error::{Error, Result};
pub use events::{ChainEvent, ChainEventKind, EventSink, MemorySink, NullSink};
pub use ledger::CreditLedger;
pub use types::{
    AccountBalance, AccountId, Actor, CreditBatch, EnergySource, ListingStatus,
    MarketplaceListing, Page, Producer, ProductionSubmission, RetirementRecord, Role,
    SettlementRecord, SubmissionStatus,
};
