//! Types for the verification engine

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Calendar month bucket the monthly cap is accounted against.
///
/// Derived from the *claimed* production time, not the submission time:
/// the cap bounds what a plant can have produced in a month, regardless of
/// when the claim arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductionMonth {
    /// Calendar year
    pub year: i32,
    /// Calendar month (1-12)
    pub month: u32,
}

impl ProductionMonth {
    /// Bucket a production timestamp
    pub fn of(timestamp: DateTime<Utc>) -> Self {
        Self {
            year: timestamp.year(),
            month: timestamp.month(),
        }
    }
}

/// Outcome of a resolution call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// Resolved submission
    pub submission_id: Uuid,

    /// Whether the claim was accepted
    pub accepted: bool,

    /// The issued batch, present iff accepted
    pub batch_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_month_bucketing() {
        let end_of_march = Utc.with_ymd_and_hms(2026, 3, 31, 23, 59, 59).unwrap();
        let start_of_april = Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap();

        assert_eq!(
            ProductionMonth::of(end_of_march),
            ProductionMonth {
                year: 2026,
                month: 3
            }
        );
        assert_ne!(
            ProductionMonth::of(end_of_march),
            ProductionMonth::of(start_of_april)
        );
    }
}
