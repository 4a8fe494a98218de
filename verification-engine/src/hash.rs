//! Submission content hashing
//!
//! The content hash is the submission idempotency key: derived
//! deterministically from the identifying claim fields, so re-submitting
//! the same claim always collides.

use chrono::{DateTime, Utc};
use credit_ledger::AccountId;
use sha2::{Digest, Sha256};
use std::fmt::Write;

/// Compute the content hash for a production claim (lowercase hex).
pub fn content_hash(
    producer: &AccountId,
    plant_id: &str,
    amount: u64,
    claimed_at: DateTime<Utc>,
    evidence_ref: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(producer.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(plant_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(amount.to_be_bytes());
    hasher.update(claimed_at.timestamp_millis().to_be_bytes());
    hasher.update([0u8]);
    hasher.update(evidence_ref.as_bytes());

    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        let producer = AccountId::new("producer-1");
        let claimed_at = Utc::now();

        let a = content_hash(&producer, "plant-1", 500, claimed_at, "evidence://a");
        let b = content_hash(&producer, "plant-1", 500, claimed_at, "evidence://a");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_hash_separates_fields() {
        let producer = AccountId::new("producer-1");
        let claimed_at = Utc::now();

        let base = content_hash(&producer, "plant-1", 500, claimed_at, "evidence://a");
        assert_ne!(
            base,
            content_hash(&producer, "plant-1", 501, claimed_at, "evidence://a")
        );
        assert_ne!(
            base,
            content_hash(&producer, "plant-2", 500, claimed_at, "evidence://a")
        );
        assert_ne!(
            base,
            content_hash(&producer, "plant-1", 500, claimed_at, "evidence://b")
        );
    }
}
