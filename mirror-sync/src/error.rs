//! Error types for mirror synchronization

use thiserror::Error;

/// Result type for mirror operations
pub type Result<T> = std::result::Result<T, Error>;

/// Mirror synchronization errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// An already-applied idempotency key re-delivered with a diverging
    /// payload; always escalated, never auto-resolved
    #[error("Data integrity conflict for {key}: {detail}")]
    DataIntegrityConflict {
        /// Idempotency key in conflict
        key: String,
        /// What diverged
        detail: String,
    },

    /// Authoritative source unreachable (transient; retried with backoff)
    #[error("Source error: {0}")]
    Source(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl Error {
    /// Stable kind identifier, for mapping to user-facing messages
    /// without string matching.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Storage(_) => "storage",
            Error::Serialization(_) => "serialization",
            Error::DataIntegrityConflict { .. } => "data_integrity_conflict",
            Error::Source(_) => "source",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
        }
    }
}
