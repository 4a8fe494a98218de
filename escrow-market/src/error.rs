//! Error types for the marketplace engine

use thiserror::Error;

/// Result type for marketplace operations
pub type Result<T> = std::result::Result<T, Error>;

/// Marketplace errors
#[derive(Debug, Error)]
pub enum Error {
    /// Listing does not exist
    #[error("Listing not found: {0}")]
    ListingNotFound(String),

    /// Listing already reached a terminal status
    #[error("Listing inactive: {0}")]
    ListingInactive(String),

    /// Buyer and seller are the same account
    #[error("Self purchase: {0}")]
    SelfPurchase(String),

    /// Requested more units than the listing has left
    #[error("Insufficient listing amount: requested {requested}, remaining {remaining}")]
    InsufficientListingAmount {
        /// Units requested by the buyer
        requested: u64,
        /// Units actually remaining
        remaining: u64,
    },

    /// Caller is not the listing's seller
    #[error("Not the seller: {0}")]
    NotSeller(String),

    /// Listing or purchase amount must be positive
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Price per unit must be positive
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    /// Actor fails the active/KYC gates
    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    /// Total price would overflow u64
    #[error("Price overflow: {0}")]
    PriceOverflow(String),

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
            Error::ListingNotFound(_) => "listing_not_found",
            Error::ListingInactive(_) => "listing_inactive",
            Error::SelfPurchase(_) => "self_purchase",
            Error::InsufficientListingAmount { .. } => "insufficient_listing_amount",
            Error::NotSeller(_) => "not_seller",
            Error::InvalidAmount(_) => "invalid_amount",
            Error::InvalidPrice(_) => "invalid_price",
            Error::NotAuthorized(_) => "not_authorized",
            Error::PriceOverflow(_) => "price_overflow",
            Error::Ledger(inner) => inner.kind(),
            Error::Config(_) => "config",
            Error::Io(_) => "io",
        }
    }
}
