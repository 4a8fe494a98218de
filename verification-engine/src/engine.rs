//! Submission lifecycle and cap enforcement
//!
//! The monthly cap is checked twice: pessimistically at submission time
//! against already-verified totals, and again at resolution time under the
//! per-producer lock, because concurrent submissions race for the same
//! month's headroom. A resolution that loses the race is a hard rejection:
//! the claimed window has fixed capacity, so there is nothing to retry.

use crate::{
    config::VerificationConfig,
    error::{Error, Result},
    hash::content_hash,
    types::{ProductionMonth, Resolution},
};
use chrono::{DateTime, Duration, Utc};
use credit_ledger::{
    Actor, AccountId, ChainEventKind, CreditLedger, EventSink, ProductionSubmission,
    SubmissionStatus,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

/// Production verification engine
pub struct VerificationEngine {
    /// Credit ledger the engine issues into
    ledger: Arc<CreditLedger>,

    /// Domain event sink
    sink: Arc<dyn EventSink>,

    /// Policy configuration
    config: VerificationConfig,

    /// Submissions by id
    submissions: DashMap<Uuid, Arc<Mutex<ProductionSubmission>>>,

    /// Idempotency index: content hash -> submission id
    by_content_hash: DashMap<String, Uuid>,

    /// Verified units per producer and production month
    verified_totals: DashMap<(AccountId, ProductionMonth), u64>,

    /// Per-producer locks serializing cap check-then-commit
    producer_locks: DashMap<AccountId, Arc<Mutex<()>>>,
}

impl VerificationEngine {
    /// Create an engine over the given ledger
    pub fn new(
        ledger: Arc<CreditLedger>,
        sink: Arc<dyn EventSink>,
        config: VerificationConfig,
    ) -> Self {
        Self {
            ledger,
            sink,
            config,
            submissions: DashMap::new(),
            by_content_hash: DashMap::new(),
            verified_totals: DashMap::new(),
            producer_locks: DashMap::new(),
        }
    }

    fn producer_lock(&self, producer: &AccountId) -> Arc<Mutex<()>> {
        self.producer_locks
            .entry(producer.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    fn verified_total(&self, producer: &AccountId, month: ProductionMonth) -> u64 {
        self.verified_totals
            .get(&(producer.clone(), month))
            .map(|entry| *entry.value())
            .unwrap_or(0)
    }

    /// Submit a production claim.
    ///
    /// Validation is caller-fault and never retried: positive amount,
    /// production time neither in the future nor past the retention window,
    /// no duplicate content hash, and headroom under the monthly cap
    /// assuming eventual verification.
    pub fn submit(
        &self,
        actor: &Actor,
        amount: u64,
        claimed_at: DateTime<Utc>,
        evidence_ref: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Uuid> {
        if !actor.can_submit() {
            return Err(Error::NotAuthorized(format!(
                "{} cannot submit production claims",
                actor.account
            )));
        }

        let producer = self.ledger.producer(&actor.account)?;
        if !producer.active {
            return Err(Error::NotAuthorized(format!(
                "producer {} is suspended",
                actor.account
            )));
        }

        if amount == 0 {
            return Err(Error::InvalidAmount(
                "claimed amount must be positive".to_string(),
            ));
        }
        if claimed_at > now {
            return Err(Error::FutureProductionTime(format!(
                "claimed {claimed_at}, decided {now}"
            )));
        }
        if claimed_at < now - Duration::days(self.config.retention_days) {
            return Err(Error::StaleProductionTime(format!(
                "claimed {claimed_at} is past the {}-day retention window",
                self.config.retention_days
            )));
        }

        let month = ProductionMonth::of(claimed_at);
        let verified = self.verified_total(&actor.account, month);
        if verified.saturating_add(amount) > producer.monthly_production_limit {
            return Err(Error::MonthlyCapExceeded {
                requested: amount,
                verified,
                limit: producer.monthly_production_limit,
            });
        }

        let evidence_ref = evidence_ref.into();
        let hash = content_hash(
            &actor.account,
            &producer.plant_id,
            amount,
            claimed_at,
            &evidence_ref,
        );

        let submission_id = Uuid::now_v7();
        match self.by_content_hash.entry(hash.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(Error::DuplicateSubmission(hash));
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(submission_id);
            }
        }

        let submission = ProductionSubmission {
            submission_id,
            producer: actor.account.clone(),
            content_hash: hash,
            amount,
            evidence_ref,
            claimed_at,
            submitted_at: now,
            status: SubmissionStatus::Pending,
            verifier: None,
            resolved_at: None,
            notes: None,
        };

        self.submissions
            .insert(submission_id, Arc::new(Mutex::new(submission)));

        tracing::info!(
            submission_id = %submission_id,
            producer = %actor.account,
            amount,
            "Production claim submitted"
        );

        Ok(submission_id)
    }

    /// Resolve a pending submission.
    ///
    /// On accept, re-validates the monthly cap against the current verified
    /// total under the per-producer lock, then atomically issues exactly one
    /// credit batch and marks the submission verified. A cap failure at this
    /// point marks the submission rejected and surfaces the error.
    pub fn resolve(
        &self,
        submission_id: Uuid,
        verifier: &Actor,
        accept: bool,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Resolution> {
        let cell = self
            .submissions
            .get(&submission_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::NotFound(submission_id.to_string()))?;

        let mut submission = cell.lock();

        if !verifier.can_verify() || verifier.account == submission.producer {
            return Err(Error::VerifierNotAuthorized(verifier.account.to_string()));
        }
        if !submission.is_pending() {
            return Err(Error::AlreadyResolved(submission_id.to_string()));
        }

        let window = Duration::hours(self.config.verification_window_hours);
        if now > submission.submitted_at + window {
            // Left pending; the expiry sweep owns the timeout transition.
            return Err(Error::VerificationWindowExpired(submission_id.to_string()));
        }

        if !accept {
            submission.status = SubmissionStatus::Rejected;
            submission.verifier = Some(verifier.account.clone());
            submission.resolved_at = Some(now);
            submission.notes = notes;
            self.sink.publish(ChainEventKind::SubmissionResolved {
                submission: submission.clone(),
            });

            tracing::info!(submission_id = %submission_id, verifier = %verifier.account, "Submission rejected");

            return Ok(Resolution {
                submission_id,
                accepted: false,
                batch_id: None,
            });
        }

        let producer = submission.producer.clone();
        let lock = self.producer_lock(&producer);
        let _guard = lock.lock();

        let limit = self.ledger.producer(&producer)?.monthly_production_limit;
        let month = ProductionMonth::of(submission.claimed_at);
        let verified = self.verified_total(&producer, month);

        if verified.saturating_add(submission.amount) > limit {
            // Losing the race against a concurrent verification is a hard
            // rejection: the month's capacity is spent.
            submission.status = SubmissionStatus::Rejected;
            submission.verifier = Some(verifier.account.clone());
            submission.resolved_at = Some(now);
            submission.notes = Some("monthly production cap exceeded".to_string());
            self.sink.publish(ChainEventKind::SubmissionResolved {
                submission: submission.clone(),
            });

            tracing::warn!(
                submission_id = %submission_id,
                producer = %producer,
                requested = submission.amount,
                verified,
                limit,
                "Verification lost the monthly cap race"
            );

            return Err(Error::MonthlyCapExceeded {
                requested: submission.amount,
                verified,
                limit,
            });
        }

        let batch = self
            .ledger
            .issue_batch(&producer, submission.amount, submission_id, now)?;

        self.verified_totals
            .insert((producer.clone(), month), verified + submission.amount);

        submission.status = SubmissionStatus::Verified;
        submission.verifier = Some(verifier.account.clone());
        submission.resolved_at = Some(now);
        submission.notes = notes;
        self.sink.publish(ChainEventKind::SubmissionResolved {
            submission: submission.clone(),
        });

        tracing::info!(
            submission_id = %submission_id,
            batch_id = %batch.batch_id,
            verifier = %verifier.account,
            "Submission verified, batch issued"
        );

        Ok(Resolution {
            submission_id,
            accepted: true,
            batch_id: Some(batch.batch_id),
        })
    }

    /// Reject all pending submissions past the verification window.
    ///
    /// Idempotent and monotonic: already-resolved submissions are skipped,
    /// and repeated sweeps of the same instant return an empty list.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let window = Duration::hours(self.config.verification_window_hours);

        let cells: Vec<(Uuid, Arc<Mutex<ProductionSubmission>>)> = self
            .submissions
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut expired = Vec::new();
        for (submission_id, cell) in cells {
            let mut submission = cell.lock();
            if submission.is_pending() && now > submission.submitted_at + window {
                submission.status = SubmissionStatus::Rejected;
                submission.resolved_at = Some(now);
                submission.notes = Some("verification window expired".to_string());
                self.sink.publish(ChainEventKind::SubmissionResolved {
                    submission: submission.clone(),
                });
                expired.push(submission_id);
            }
        }

        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Expired pending submissions swept");
        }

        expired
    }

    /// Get a submission snapshot
    pub fn submission(&self, submission_id: Uuid) -> Result<ProductionSubmission> {
        self.submissions
            .get(&submission_id)
            .map(|entry| entry.value().lock().clone())
            .ok_or_else(|| Error::NotFound(submission_id.to_string()))
    }

    /// Verified units for a producer in a production month
    pub fn verified_month_total(&self, producer: &AccountId, month: ProductionMonth) -> u64 {
        self.verified_total(producer, month)
    }
}

impl std::fmt::Debug for VerificationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationEngine")
            .field("submissions", &self.submissions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use credit_ledger::{EnergySource, NullSink, Role};
    use std::thread;

    fn setup(limit: u64) -> (Arc<CreditLedger>, VerificationEngine, Actor, Actor) {
        let ledger = Arc::new(CreditLedger::new(Arc::new(NullSink)));
        let producer_account = AccountId::new("producer-1");
        ledger
            .register_producer(
                producer_account.clone(),
                "plant-1",
                EnergySource::Wind,
                limit,
                Utc::now(),
            )
            .unwrap();

        let engine = VerificationEngine::new(
            ledger.clone(),
            Arc::new(NullSink),
            VerificationConfig::default(),
        );

        let producer = Actor {
            account: producer_account,
            role: Role::Producer,
            active: true,
            kyc_verified: true,
        };
        let verifier = Actor {
            account: AccountId::new("verifier-1"),
            role: Role::Verifier,
            active: true,
            kyc_verified: true,
        };

        (ledger, engine, producer, verifier)
    }

    #[test]
    fn test_submit_validations() {
        let (_ledger, engine, producer, _verifier) = setup(1000);
        let now = Utc::now();

        let err = engine
            .submit(&producer, 0, now, "evidence://x", now)
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_amount");

        let err = engine
            .submit(&producer, 10, now + Duration::hours(1), "evidence://x", now)
            .unwrap_err();
        assert_eq!(err.kind(), "future_production_time");

        let err = engine
            .submit(&producer, 10, now - Duration::days(31), "evidence://x", now)
            .unwrap_err();
        assert_eq!(err.kind(), "stale_production_time");
    }

    #[test]
    fn test_duplicate_submission_rejected() {
        let (_ledger, engine, producer, _verifier) = setup(1000);
        let now = Utc::now();
        let claimed = now - Duration::hours(2);

        engine
            .submit(&producer, 100, claimed, "evidence://a", now)
            .unwrap();
        let err = engine
            .submit(&producer, 100, claimed, "evidence://a", now)
            .unwrap_err();
        assert_eq!(err.kind(), "duplicate_submission");

        // Different evidence is a different claim.
        engine
            .submit(&producer, 100, claimed, "evidence://b", now)
            .unwrap();
    }

    #[test]
    fn test_unverified_actor_cannot_submit() {
        let (_ledger, engine, producer, _verifier) = setup(1000);
        let now = Utc::now();

        let unverified = Actor {
            kyc_verified: false,
            ..producer
        };
        let err = engine
            .submit(&unverified, 10, now, "evidence://x", now)
            .unwrap_err();
        assert_eq!(err.kind(), "not_authorized");
    }

    #[test]
    fn test_accept_issues_exactly_one_batch() {
        let (ledger, engine, producer, verifier) = setup(1000);
        let now = Utc::now();

        let submission_id = engine
            .submit(&producer, 700, now - Duration::hours(1), "evidence://a", now)
            .unwrap();
        let resolution = engine
            .resolve(submission_id, &verifier, true, None, now)
            .unwrap();

        assert!(resolution.accepted);
        let batch = ledger.batch(&resolution.batch_id.unwrap()).unwrap();
        assert_eq!(batch.amount, 700);
        assert_eq!(batch.submission_id, submission_id);
        assert_eq!(ledger.producer(&producer.account).unwrap().total_produced, 700);

        let submission = engine.submission(submission_id).unwrap();
        assert_eq!(submission.status, SubmissionStatus::Verified);
        assert_eq!(submission.verifier, Some(verifier.account.clone()));

        // Terminal: a second resolution of either polarity fails.
        let err = engine
            .resolve(submission_id, &verifier, false, None, now)
            .unwrap_err();
        assert_eq!(err.kind(), "already_resolved");
    }

    #[test]
    fn test_monthly_cap_rejects_breaching_submission() {
        // limit 1000: 700 verifies, then 400 must be rejected, after which
        // the month's verified total is still 700.
        let (_ledger, engine, producer, verifier) = setup(1000);
        let now = Utc::now();
        let claimed = now - Duration::hours(1);

        let first = engine
            .submit(&producer, 700, claimed, "evidence://a", now)
            .unwrap();
        engine.resolve(first, &verifier, true, None, now).unwrap();

        let err = engine
            .submit(&producer, 400, claimed, "evidence://b", now)
            .unwrap_err();
        assert_eq!(err.kind(), "monthly_cap_exceeded");

        assert_eq!(
            engine.verified_month_total(&producer.account, ProductionMonth::of(claimed)),
            700
        );
    }

    #[test]
    fn test_producer_cannot_verify_own_claim() {
        let (_ledger, engine, producer, _verifier) = setup(1000);
        let now = Utc::now();

        let submission_id = engine
            .submit(&producer, 100, now - Duration::hours(1), "evidence://a", now)
            .unwrap();

        let self_verifier = Actor {
            role: Role::Verifier,
            ..producer.clone()
        };
        let err = engine
            .resolve(submission_id, &self_verifier, true, None, now)
            .unwrap_err();
        assert_eq!(err.kind(), "verifier_not_authorized");
    }

    #[test]
    fn test_resolution_after_window_fails() {
        let (_ledger, engine, producer, verifier) = setup(1000);
        let now = Utc::now();

        let submission_id = engine
            .submit(&producer, 100, now - Duration::hours(1), "evidence://a", now)
            .unwrap();

        let late = now + Duration::hours(25);
        let err = engine
            .resolve(submission_id, &verifier, true, None, late)
            .unwrap_err();
        assert_eq!(err.kind(), "verification_window_expired");

        // Still pending until the sweep runs.
        assert!(engine.submission(submission_id).unwrap().is_pending());
    }

    #[test]
    fn test_sweep_is_idempotent() {
        let (_ledger, engine, producer, verifier) = setup(1000);
        let now = Utc::now();

        let expiring = engine
            .submit(&producer, 100, now - Duration::hours(1), "evidence://a", now)
            .unwrap();
        let fresh_time = now + Duration::hours(23);
        let fresh = engine
            .submit(
                &producer,
                50,
                fresh_time - Duration::hours(1),
                "evidence://b",
                fresh_time,
            )
            .unwrap();

        let late = now + Duration::hours(25);
        let swept = engine.sweep_expired(late);
        assert_eq!(swept, vec![expiring]);
        assert_eq!(
            engine.submission(expiring).unwrap().status,
            SubmissionStatus::Rejected
        );
        assert!(engine.submission(fresh).unwrap().is_pending());

        // Second sweep finds nothing new; rejected stays rejected.
        assert!(engine.sweep_expired(late).is_empty());

        // An expired-then-swept submission never produces a batch.
        let err = engine
            .resolve(expiring, &verifier, true, None, late)
            .unwrap_err();
        assert_eq!(err.kind(), "already_resolved");
    }

    #[test]
    fn test_concurrent_verification_cap_race() {
        // Two claims of 600 against a 1000 cap, verified concurrently:
        // exactly one wins, the loser is left rejected.
        let (ledger, engine, producer, verifier) = setup(1000);
        let now = Utc::now();
        let claimed = now - Duration::hours(1);

        let first = engine
            .submit(&producer, 600, claimed, "evidence://a", now)
            .unwrap();
        let second = engine
            .submit(&producer, 600, claimed, "evidence://b", now)
            .unwrap();

        let engine = Arc::new(engine);
        let handles: Vec<_> = [first, second]
            .into_iter()
            .map(|submission_id| {
                let engine = engine.clone();
                let verifier = verifier.clone();
                thread::spawn(move || {
                    engine
                        .resolve(submission_id, &verifier, true, None, now)
                        .is_ok()
                })
            })
            .collect();

        let wins: usize = handles
            .into_iter()
            .map(|handle| handle.join().unwrap() as usize)
            .sum();
        assert_eq!(wins, 1);

        assert_eq!(
            engine.verified_month_total(&producer.account, ProductionMonth::of(claimed)),
            600
        );
        assert_eq!(ledger.producer(&producer.account).unwrap().total_produced, 600);
        assert!(ledger.check_conservation(&producer.account).unwrap());

        // Both submissions are terminal; one Verified, one Rejected.
        let statuses = [
            engine.submission(first).unwrap().status,
            engine.submission(second).unwrap().status,
        ];
        assert!(statuses.contains(&SubmissionStatus::Verified));
        assert!(statuses.contains(&SubmissionStatus::Rejected));
    }
}
