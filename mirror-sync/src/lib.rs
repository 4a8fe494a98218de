//! Mirror Sync
//!
//! Event reconciliation between the authoritative on-chain source and the
//! queryable off-chain mirror store.
//!
//! # Architecture
//!
//! - **At-least-once in, exactly-once out**: the source may redeliver or
//!   gap; every event is applied to the mirror at most once, keyed by its
//!   content-derived idempotency key.
//! - **Conflicts escalate**: a redelivered key with a diverging payload is
//!   a data-integrity conflict, surfaced and never silently overwritten.
//! - **Resync heals**: a periodic full pass reconciles the source's
//!   current state against the mirror, correcting drift from missed
//!   events. Resync is idempotent and commutes with in-order live
//!   application.
//! - **Exclusive ownership**: the reconciler is the only writer of the
//!   mirror store; every other component reads.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod config;
pub mod error;
pub mod metrics;
pub mod reconciler;
pub mod source;
pub mod store;

pub use config::MirrorConfig;
pub use error::{Error, Result};
pub use reconciler::Reconciler;
pub use source::{ChainSnapshot, ChannelEventSource, EventHandler, EventSource};
pub use store::MirrorStore;
