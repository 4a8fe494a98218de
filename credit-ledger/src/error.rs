//! Error types for the credit ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Credit ledger errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Amount must be a positive number of credit units
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Producer not registered
    #[error("Producer not found: {0}")]
    ProducerNotFound(String),

    /// Plant identifier already registered to another producer
    #[error("Duplicate plant: {0}")]
    DuplicatePlant(String),

    /// Producer account already registered
    #[error("Producer already registered: {0}")]
    DuplicateProducer(String),

    /// Account has no balance entry
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// Batch does not exist
    #[error("Batch not found: {0}")]
    BatchNotFound(String),

    /// Batch retirement flag already set
    #[error("Batch already retired: {0}")]
    AlreadyRetired(String),

    /// Caller is not the current holder of a referenced batch
    #[error("Ownership mismatch: {0}")]
    OwnershipMismatch(String),

    /// Balance cannot cover the requested units
    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance {
        /// Units requested by the operation
        requested: u64,
        /// Units actually available
        available: u64,
    },

    /// Accumulator would overflow u64
    #[error("Amount overflow: {0}")]
    AmountOverflow(String),

    /// Bookkeeping invariant violated (conservation, custody)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl Error {
    /// Stable kind identifier, for mapping to user-facing messages
    /// without string matching.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidAmount(_) => "invalid_amount",
            Error::ProducerNotFound(_) => "producer_not_found",
            Error::DuplicatePlant(_) => "duplicate_plant",
            Error::DuplicateProducer(_) => "duplicate_producer",
            Error::AccountNotFound(_) => "account_not_found",
            Error::BatchNotFound(_) => "batch_not_found",
            Error::AlreadyRetired(_) => "already_retired",
            Error::OwnershipMismatch(_) => "ownership_mismatch",
            Error::InsufficientBalance { .. } => "insufficient_balance",
            Error::AmountOverflow(_) => "amount_overflow",
            Error::InvariantViolation(_) => "invariant_violation",
        }
    }
}
