//! Error types for the verification engine

use thiserror::Error;

/// Result type for verification operations
pub type Result<T> = std::result::Result<T, Error>;

/// Verification errors
#[derive(Debug, Error)]
pub enum Error {
    /// Claimed amount must be positive
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Claimed production time lies after the decision time
    #[error("Future production time: {0}")]
    FutureProductionTime(String),

    /// Claimed production time is older than the retention window
    #[error("Stale production time: {0}")]
    StaleProductionTime(String),

    /// A submission with the same content hash already exists
    #[error("Duplicate submission: {0}")]
    DuplicateSubmission(String),

    /// Accepting would push the producer past its monthly cap
    #[error(
        "Monthly cap exceeded: requested {requested}, already verified {verified}, limit {limit}"
    )]
    MonthlyCapExceeded {
        /// Units in the submission under decision
        requested: u64,
        /// Units already verified for the month
        verified: u64,
        /// Producer's monthly production limit
        limit: u64,
    },

    /// Submission does not exist
    #[error("Submission not found: {0}")]
    NotFound(String),

    /// Submission already reached a terminal status
    #[error("Submission already resolved: {0}")]
    AlreadyResolved(String),

    /// Actor fails the gates for submitting claims
    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    /// Verifier is inactive, unverified, or identical to the producer
    #[error("Verifier not authorized: {0}")]
    VerifierNotAuthorized(String),

    /// Resolution attempted after the verification window closed
    #[error("Verification window expired: {0}")]
    VerificationWindowExpired(String),

    /// Ledger error
    #[error("Ledger error: {0}")]
    Ledger(#[from] credit_ledger::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable kind identifier, for mapping to user-facing messages
    /// without string matching.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidAmount(_) => "invalid_amount",
            Error::FutureProductionTime(_) => "future_production_time",
            Error::StaleProductionTime(_) => "stale_production_time",
            Error::DuplicateSubmission(_) => "duplicate_submission",
            Error::MonthlyCapExceeded { .. } => "monthly_cap_exceeded",
            Error::NotFound(_) => "not_found",
            Error::AlreadyResolved(_) => "already_resolved",
            Error::NotAuthorized(_) => "not_authorized",
            Error::VerifierNotAuthorized(_) => "verifier_not_authorized",
            Error::VerificationWindowExpired(_) => "verification_window_expired",
            Error::Ledger(inner) => inner.kind(),
            Error::Config(_) => "config",
            Error::Io(_) => "io",
        }
    }
}
