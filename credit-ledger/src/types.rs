//! Core types for the credit ledger
//!
//! All types are designed for:
//! - Deterministic serialization (serde)
//! - Integer-only arithmetic (credit units and minor-unit prices as u64)
//! - Memory safety (no unsafe code)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Account identifier (producer, buyer, or platform account)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    /// Create new account ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Renewable energy source powering a hydrogen plant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum EnergySource {
    /// Photovoltaic or concentrated solar
    Solar,
    /// Onshore or offshore wind
    Wind,
    /// Run-of-river or reservoir hydro
    Hydro,
    /// Geothermal
    Geothermal,
    /// Certified biomass
    Biomass,
}

impl EnergySource {
    /// Registry code
    pub fn code(&self) -> &'static str {
        match self {
            EnergySource::Solar => "SOLAR",
            EnergySource::Wind => "WIND",
            EnergySource::Hydro => "HYDRO",
            EnergySource::Geothermal => "GEOTHERMAL",
            EnergySource::Biomass => "BIOMASS",
        }
    }

    /// Parse from registry code
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SOLAR" => Some(EnergySource::Solar),
            "WIND" => Some(EnergySource::Wind),
            "HYDRO" => Some(EnergySource::Hydro),
            "GEOTHERMAL" => Some(EnergySource::Geothermal),
            "BIOMASS" => Some(EnergySource::Biomass),
            _ => None,
        }
    }
}

impl fmt::Display for EnergySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Role assigned by the identity/KYC collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Registered hydrogen producer
    Producer,
    /// Accredited production verifier
    Verifier,
    /// Credit buyer
    Buyer,
    /// Platform administrator
    Admin,
}

/// Authenticated actor identity, consumed from the auth collaborator.
///
/// Every mutating engine call receives one of these; the engines never
/// authenticate, they only enforce role and status gates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Account identity
    pub account: AccountId,

    /// Assigned role
    pub role: Role,

    /// Account is active (not suspended)
    pub active: bool,

    /// KYC verification passed
    pub kyc_verified: bool,
}

impl Actor {
    /// Actor passes the gates for submitting production claims
    pub fn can_submit(&self) -> bool {
        self.role == Role::Producer && self.active && self.kyc_verified
    }

    /// Actor passes the gates for resolving submissions
    pub fn can_verify(&self) -> bool {
        self.role == Role::Verifier && self.active && self.kyc_verified
    }
}

/// Registered hydrogen producer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Producer {
    /// Producer account
    pub account: AccountId,

    /// Unique plant identifier
    pub plant_id: String,

    /// Renewable source category
    pub source: EnergySource,

    /// Maximum verifiable production per calendar month (credit units)
    pub monthly_production_limit: u64,

    /// Lifetime issued credits; monotonic, mutated only by issuance
    pub total_produced: u64,

    /// Producer is active
    pub active: bool,

    /// Registration timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

/// Production submission status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SubmissionStatus {
    /// Awaiting verification
    Pending = 1,
    /// Accepted; exactly one credit batch issued (terminal)
    Verified = 2,
    /// Rejected or expired (terminal)
    Rejected = 3,
}

impl SubmissionStatus {
    /// Both resolution states are terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubmissionStatus::Verified | SubmissionStatus::Rejected)
    }
}

/// A producer's claim of verified renewable-hydrogen production
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionSubmission {
    /// Unique submission ID (UUIDv7 for time-ordering)
    pub submission_id: Uuid,

    /// Claiming producer
    pub producer: AccountId,

    /// Content hash over producer | plant | amount | claimed time |
    /// evidence reference; the submission idempotency key (hex)
    pub content_hash: String,

    /// Claimed production amount (credit units)
    pub amount: u64,

    /// Reference to off-platform production evidence
    pub evidence_ref: String,

    /// When the hydrogen was claimed to have been produced
    pub claimed_at: DateTime<Utc>,

    /// When the claim was submitted
    pub submitted_at: DateTime<Utc>,

    /// Current status
    pub status: SubmissionStatus,

    /// Resolving verifier (null until resolved; null for expiry sweeps)
    pub verifier: Option<AccountId>,

    /// Resolution timestamp (null while pending)
    pub resolved_at: Option<DateTime<Utc>>,

    /// Verifier notes
    pub notes: Option<String>,
}

impl ProductionSubmission {
    /// Submission still awaits resolution
    pub fn is_pending(&self) -> bool {
        self.status == SubmissionStatus::Pending
    }
}

/// An immutable unit of issued, conserved production credit.
///
/// Amount never changes after creation; the retirement flag is the only
/// mutable field and transitions false→true exactly once. The holder moves
/// through custody transfers without changing batch identity or amount.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditBatch {
    /// Unique batch ID (UUIDv7)
    pub batch_id: Uuid,

    /// Issuing producer
    pub producer: AccountId,

    /// Current holder (custody ledger)
    pub holder: AccountId,

    /// Credit units in this batch; immutable after creation
    pub amount: u64,

    /// Source submission (one-to-one)
    pub submission_id: Uuid,

    /// Issuance timestamp
    pub issued_at: DateTime<Utc>,

    /// Retirement flag; transitions false→true at most once
    pub retired: bool,

    /// Retirement reason (null until retired)
    pub retirement_reason: Option<String>,

    /// Retirement timestamp (null until retired)
    pub retired_at: Option<DateTime<Utc>>,
}

/// Marketplace listing status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ListingStatus {
    /// Open for purchase and price updates
    Active = 1,
    /// Remaining amount reached zero (terminal)
    Sold = 2,
    /// Withdrawn by the seller (terminal)
    Cancelled = 3,
}

impl ListingStatus {
    /// Sold and cancelled listings never reactivate
    pub fn is_terminal(&self) -> bool {
        matches!(self, ListingStatus::Sold | ListingStatus::Cancelled)
    }
}

/// A seller's escrowed credit listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketplaceListing {
    /// Unique listing ID (UUIDv7)
    pub listing_id: Uuid,

    /// Selling account
    pub seller: AccountId,

    /// Remaining escrowed units; decreases monotonically via purchases
    pub remaining: u64,

    /// Price per credit unit (minor currency units)
    pub price_per_unit: u64,

    /// Current status
    pub status: ListingStatus,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

/// Append-only purchase settlement record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRecord {
    /// Unique settlement reference; the purchase idempotency key
    pub settlement_ref: Uuid,

    /// Listing purchased against
    pub listing_id: Uuid,

    /// Buying account
    pub buyer: AccountId,

    /// Selling account
    pub seller: AccountId,

    /// Units purchased
    pub amount: u64,

    /// Total price (minor currency units)
    pub total_price: u64,

    /// Platform fee; total_price - fee went to the seller
    pub fee: u64,

    /// Settlement timestamp
    pub settled_at: DateTime<Utc>,
}

/// Append-only retirement record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetirementRecord {
    /// Unique retirement ID (UUIDv7)
    pub retirement_id: Uuid,

    /// Retiring holder
    pub holder: AccountId,

    /// Total units retired across the batch set
    pub amount: u64,

    /// Stated retirement reason
    pub reason: String,

    /// Affected batch ids (all-or-nothing set)
    pub batch_ids: Vec<Uuid>,

    /// Retirement timestamp
    pub retired_at: DateTime<Utc>,
}

/// Per-account custody balances (credit units).
///
/// Escrowed units belong economically to the account but cannot be spent,
/// transferred, or retired until released from escrow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    /// Freely spendable units
    pub spendable: u64,

    /// Units held in marketplace escrow
    pub escrowed: u64,
}

impl AccountBalance {
    /// Spendable plus escrowed
    pub fn total(&self) -> u64 {
        self.spendable + self.escrowed
    }
}

/// Pagination window for mirror queries
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Page {
    /// Rows to skip
    pub offset: usize,

    /// Maximum rows to return
    pub limit: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}
