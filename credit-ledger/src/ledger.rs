//! Conservation-respecting credit bookkeeping
//!
//! Pure in-memory state with entity-scoped locking. The ledger performs
//! arithmetic and structural checks only; policy checks (caps, windows,
//! authorization) belong to the engines wrapping it.
//!
//! # Locking discipline
//!
//! Lock order is producer → account → batch, with multi-account operations
//! taking account locks in ascending account-id order. A batch is mutated
//! only while its current holder's account lock is held, which makes
//! validate-then-commit over a batch set race-free without a global lock.

use crate::{
    error::{Error, Result},
    events::{ChainEventKind, EventSink},
    types::{AccountBalance, AccountId, CreditBatch, EnergySource, Producer, RetirementRecord},
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// Credit ledger core
pub struct CreditLedger {
    /// Registered producers
    producers: DashMap<AccountId, Arc<Mutex<Producer>>>,

    /// Plant uniqueness index: plant_id -> producer account
    plants: DashMap<String, AccountId>,

    /// Custody balances, created on first touch
    accounts: DashMap<AccountId, Arc<Mutex<AccountBalance>>>,

    /// Issued batches
    batches: DashMap<Uuid, Arc<Mutex<CreditBatch>>>,

    /// Issuance index: producer -> batch ids
    batches_by_producer: DashMap<AccountId, Vec<Uuid>>,

    /// Domain event sink
    sink: Arc<dyn EventSink>,
}

impl CreditLedger {
    /// Create an empty ledger publishing to the given sink
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            producers: DashMap::new(),
            plants: DashMap::new(),
            accounts: DashMap::new(),
            batches: DashMap::new(),
            batches_by_producer: DashMap::new(),
            sink,
        }
    }

    fn account_cell(&self, account: &AccountId) -> Arc<Mutex<AccountBalance>> {
        self.accounts
            .entry(account.clone())
            .or_insert_with(|| Arc::new(Mutex::new(AccountBalance::default())))
            .value()
            .clone()
    }

    fn batch_cell(&self, batch_id: &Uuid) -> Result<Arc<Mutex<CreditBatch>>> {
        self.batches
            .get(batch_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::BatchNotFound(batch_id.to_string()))
    }

    // Producer registry

    /// Register a producer with a unique plant identifier
    pub fn register_producer(
        &self,
        account: AccountId,
        plant_id: impl Into<String>,
        source: EnergySource,
        monthly_production_limit: u64,
        now: DateTime<Utc>,
    ) -> Result<Producer> {
        let plant_id = plant_id.into();

        match self.plants.entry(plant_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(Error::DuplicatePlant(plant_id));
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                if self.producers.contains_key(&account) {
                    return Err(Error::DuplicateProducer(account.to_string()));
                }
                vacant.insert(account.clone());
            }
        }

        let producer = Producer {
            account: account.clone(),
            plant_id,
            source,
            monthly_production_limit,
            total_produced: 0,
            active: true,
            created_at: now,
            updated_at: now,
        };

        self.producers
            .insert(account.clone(), Arc::new(Mutex::new(producer.clone())));
        self.account_cell(&account);

        tracing::info!(producer = %account, plant = %producer.plant_id, "Producer registered");

        Ok(producer)
    }

    /// Get a producer snapshot
    pub fn producer(&self, account: &AccountId) -> Result<Producer> {
        self.producers
            .get(account)
            .map(|entry| entry.value().lock().clone())
            .ok_or_else(|| Error::ProducerNotFound(account.to_string()))
    }

    /// Activate or suspend a producer
    pub fn set_producer_active(
        &self,
        account: &AccountId,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let cell = self
            .producers
            .get(account)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::ProducerNotFound(account.to_string()))?;

        let mut producer = cell.lock();
        producer.active = active;
        producer.updated_at = now;
        Ok(())
    }

    // Issuance

    /// Issue a credit batch for a verified submission.
    ///
    /// Increments the producer's monotonic `total_produced` accumulator and
    /// credits the producer's spendable balance. Policy preconditions
    /// (verification, caps) are the caller's responsibility; this function
    /// enforces only arithmetic and structural invariants.
    pub fn issue_batch(
        &self,
        producer: &AccountId,
        amount: u64,
        submission_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<CreditBatch> {
        if amount == 0 {
            return Err(Error::InvalidAmount(
                "batch amount must be positive".to_string(),
            ));
        }

        let producer_cell = self
            .producers
            .get(producer)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::ProducerNotFound(producer.to_string()))?;

        let mut producer_state = producer_cell.lock();
        let account = self.account_cell(producer);
        let mut balance = account.lock();

        let new_total = producer_state
            .total_produced
            .checked_add(amount)
            .ok_or_else(|| Error::AmountOverflow("total_produced".to_string()))?;
        let new_spendable = balance
            .spendable
            .checked_add(amount)
            .ok_or_else(|| Error::AmountOverflow("spendable balance".to_string()))?;

        let batch = CreditBatch {
            batch_id: Uuid::now_v7(),
            producer: producer.clone(),
            holder: producer.clone(),
            amount,
            submission_id,
            issued_at: now,
            retired: false,
            retirement_reason: None,
            retired_at: None,
        };

        producer_state.total_produced = new_total;
        producer_state.updated_at = now;
        balance.spendable = new_spendable;

        self.batches
            .insert(batch.batch_id, Arc::new(Mutex::new(batch.clone())));
        self.batches_by_producer
            .entry(producer.clone())
            .or_default()
            .push(batch.batch_id);

        self.sink.publish(ChainEventKind::BatchIssued {
            batch: batch.clone(),
        });

        drop(balance);
        drop(producer_state);

        tracing::info!(
            batch_id = %batch.batch_id,
            producer = %producer,
            amount,
            "Credit batch issued"
        );

        Ok(batch)
    }

    // Retirement

    /// Retire a batch set all-or-nothing.
    ///
    /// Fails without side effects unless every referenced batch exists, is
    /// unretired, and is held by `holder`, and the holder's spendable
    /// balance covers the set. Retired units leave circulating supply but
    /// never leave `total_produced`.
    pub fn retire(
        &self,
        holder: &AccountId,
        batch_ids: &[Uuid],
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<RetirementRecord> {
        if batch_ids.is_empty() {
            return Err(Error::InvalidAmount(
                "retirement requires at least one batch".to_string(),
            ));
        }

        let mut distinct = HashSet::with_capacity(batch_ids.len());
        for batch_id in batch_ids {
            if !distinct.insert(*batch_id) {
                return Err(Error::InvalidAmount(format!(
                    "duplicate batch in retirement set: {batch_id}"
                )));
            }
        }

        let account = self.account_cell(holder);
        let mut balance = account.lock();

        // Validate phase. Holding the holder's account lock excludes any
        // competing retire/transfer of these batches, so the commit below
        // cannot observe different state.
        let mut cells = Vec::with_capacity(batch_ids.len());
        let mut total: u64 = 0;
        for batch_id in batch_ids {
            let cell = self.batch_cell(batch_id)?;
            {
                let batch = cell.lock();
                if batch.retired {
                    return Err(Error::AlreadyRetired(batch_id.to_string()));
                }
                if &batch.holder != holder {
                    return Err(Error::OwnershipMismatch(format!(
                        "batch {batch_id} is held by {}",
                        batch.holder
                    )));
                }
                total = total
                    .checked_add(batch.amount)
                    .ok_or_else(|| Error::AmountOverflow("retirement total".to_string()))?;
            }
            cells.push(cell);
        }

        if balance.spendable < total {
            return Err(Error::InsufficientBalance {
                requested: total,
                available: balance.spendable,
            });
        }

        // Commit phase
        let reason = reason.into();
        for cell in &cells {
            let mut batch = cell.lock();
            batch.retired = true;
            batch.retirement_reason = Some(reason.clone());
            batch.retired_at = Some(now);
        }
        balance.spendable -= total;

        let record = RetirementRecord {
            retirement_id: Uuid::now_v7(),
            holder: holder.clone(),
            amount: total,
            reason,
            batch_ids: batch_ids.to_vec(),
            retired_at: now,
        };

        self.sink.publish(ChainEventKind::BatchRetired {
            retirement: record.clone(),
        });

        tracing::info!(
            retirement_id = %record.retirement_id,
            holder = %holder,
            amount = total,
            batches = batch_ids.len(),
            "Batch set retired"
        );

        Ok(record)
    }

    // Custody transfer

    /// Move custody of a batch set between accounts.
    ///
    /// Moves the holder of every batch and the matching spendable units;
    /// batch identity and amount never change.
    pub fn transfer_batches(
        &self,
        from: &AccountId,
        to: &AccountId,
        batch_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> Result<()> {
        if batch_ids.is_empty() {
            return Err(Error::InvalidAmount(
                "transfer requires at least one batch".to_string(),
            ));
        }
        if from == to {
            return Err(Error::InvalidAmount(
                "transfer endpoints must differ".to_string(),
            ));
        }

        let from_cell = self.account_cell(from);
        let to_cell = self.account_cell(to);

        // Ascending account-id order prevents lock cycles.
        let (mut from_balance, mut to_balance) = if from < to {
            let f = from_cell.lock();
            let t = to_cell.lock();
            (f, t)
        } else {
            let t = to_cell.lock();
            let f = from_cell.lock();
            (f, t)
        };

        let mut cells = Vec::with_capacity(batch_ids.len());
        let mut total: u64 = 0;
        for batch_id in batch_ids {
            let cell = self.batch_cell(batch_id)?;
            {
                let batch = cell.lock();
                if batch.retired {
                    return Err(Error::AlreadyRetired(batch_id.to_string()));
                }
                if &batch.holder != from {
                    return Err(Error::OwnershipMismatch(format!(
                        "batch {batch_id} is held by {}",
                        batch.holder
                    )));
                }
                total = total
                    .checked_add(batch.amount)
                    .ok_or_else(|| Error::AmountOverflow("transfer total".to_string()))?;
            }
            cells.push(cell);
        }

        if from_balance.spendable < total {
            return Err(Error::InsufficientBalance {
                requested: total,
                available: from_balance.spendable,
            });
        }
        let new_to_spendable = to_balance
            .spendable
            .checked_add(total)
            .ok_or_else(|| Error::AmountOverflow("spendable balance".to_string()))?;

        for cell in &cells {
            cell.lock().holder = to.clone();
        }
        from_balance.spendable -= total;
        to_balance.spendable = new_to_spendable;

        self.sink.publish(ChainEventKind::CreditsTransferred {
            transfer_id: Uuid::now_v7(),
            from: from.clone(),
            to: to.clone(),
            batch_ids: batch_ids.to_vec(),
            amount: total,
        });

        tracing::debug!(from = %from, to = %to, amount = total, at = %now, "Custody transferred");

        Ok(())
    }

    // Escrow custody

    /// Move units from spendable into marketplace escrow
    pub fn escrow_hold(&self, account: &AccountId, amount: u64) -> Result<()> {
        if amount == 0 {
            return Err(Error::InvalidAmount(
                "escrow amount must be positive".to_string(),
            ));
        }
        let cell = self.account_cell(account);
        let mut balance = cell.lock();
        if balance.spendable < amount {
            return Err(Error::InsufficientBalance {
                requested: amount,
                available: balance.spendable,
            });
        }
        balance.spendable -= amount;
        balance.escrowed += amount;
        Ok(())
    }

    /// Return escrowed units to the same account's spendable balance
    pub fn escrow_release(&self, account: &AccountId, amount: u64) -> Result<()> {
        let cell = self.account_cell(account);
        let mut balance = cell.lock();
        if balance.escrowed < amount {
            return Err(Error::InsufficientBalance {
                requested: amount,
                available: balance.escrowed,
            });
        }
        balance.escrowed -= amount;
        balance.spendable += amount;
        Ok(())
    }

    /// Settle escrowed units from a seller to a buyer's spendable balance
    pub fn escrow_settle(&self, seller: &AccountId, buyer: &AccountId, amount: u64) -> Result<()> {
        if seller == buyer {
            return Err(Error::InvalidAmount(
                "settlement endpoints must differ".to_string(),
            ));
        }
        let seller_cell = self.account_cell(seller);
        let buyer_cell = self.account_cell(buyer);

        let (mut seller_balance, mut buyer_balance) = if seller < buyer {
            let s = seller_cell.lock();
            let b = buyer_cell.lock();
            (s, b)
        } else {
            let b = buyer_cell.lock();
            let s = seller_cell.lock();
            (s, b)
        };

        if seller_balance.escrowed < amount {
            return Err(Error::InsufficientBalance {
                requested: amount,
                available: seller_balance.escrowed,
            });
        }
        let new_buyer_spendable = buyer_balance
            .spendable
            .checked_add(amount)
            .ok_or_else(|| Error::AmountOverflow("spendable balance".to_string()))?;

        seller_balance.escrowed -= amount;
        buyer_balance.spendable = new_buyer_spendable;
        Ok(())
    }

    // Queries

    /// Custody balance of an account (zero if never touched)
    pub fn balance(&self, account: &AccountId) -> AccountBalance {
        self.accounts
            .get(account)
            .map(|entry| *entry.value().lock())
            .unwrap_or_default()
    }

    /// Get a batch snapshot
    pub fn batch(&self, batch_id: &Uuid) -> Result<CreditBatch> {
        self.batch_cell(batch_id).map(|cell| cell.lock().clone())
    }

    /// All batches issued for a producer, in issuance order
    pub fn producer_batches(&self, producer: &AccountId) -> Vec<CreditBatch> {
        let ids = self
            .batches_by_producer
            .get(producer)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();

        ids.iter()
            .filter_map(|id| self.batches.get(id).map(|cell| cell.value().lock().clone()))
            .collect()
    }

    /// Total units currently held in escrow across all accounts
    pub fn escrowed_supply(&self) -> u64 {
        self.accounts
            .iter()
            .map(|entry| entry.value().lock().escrowed)
            .sum()
    }

    /// Verify the conservation invariant for one producer:
    /// Σ(batch.amount) == total_produced.
    pub fn check_conservation(&self, producer: &AccountId) -> Result<bool> {
        let expected = self.producer(producer)?.total_produced;
        let actual: u64 = self
            .producer_batches(producer)
            .iter()
            .map(|batch| batch.amount)
            .sum();
        Ok(expected == actual)
    }
}

impl std::fmt::Debug for CreditLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreditLedger")
            .field("producers", &self.producers.len())
            .field("batches", &self.batches.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{MemorySink, NullSink};

    fn ledger() -> CreditLedger {
        CreditLedger::new(Arc::new(NullSink))
    }

    fn register(ledger: &CreditLedger, id: &str, limit: u64) -> AccountId {
        let account = AccountId::new(id);
        ledger
            .register_producer(
                account.clone(),
                format!("plant-{id}"),
                EnergySource::Wind,
                limit,
                Utc::now(),
            )
            .unwrap();
        account
    }

    #[test]
    fn test_duplicate_plant_rejected() {
        let ledger = ledger();
        ledger
            .register_producer(
                AccountId::new("p1"),
                "plant-x",
                EnergySource::Solar,
                1000,
                Utc::now(),
            )
            .unwrap();

        let err = ledger
            .register_producer(
                AccountId::new("p2"),
                "plant-x",
                EnergySource::Wind,
                1000,
                Utc::now(),
            )
            .unwrap_err();
        assert_eq!(err.kind(), "duplicate_plant");
    }

    #[test]
    fn test_issuance_updates_totals_and_conserves() {
        let ledger = ledger();
        let producer = register(&ledger, "p1", 10_000);

        ledger
            .issue_batch(&producer, 700, Uuid::now_v7(), Utc::now())
            .unwrap();
        ledger
            .issue_batch(&producer, 300, Uuid::now_v7(), Utc::now())
            .unwrap();

        let state = ledger.producer(&producer).unwrap();
        assert_eq!(state.total_produced, 1000);
        assert_eq!(ledger.balance(&producer).spendable, 1000);
        assert!(ledger.check_conservation(&producer).unwrap());
    }

    #[test]
    fn test_issue_zero_amount_rejected() {
        let ledger = ledger();
        let producer = register(&ledger, "p1", 1000);
        let err = ledger
            .issue_batch(&producer, 0, Uuid::now_v7(), Utc::now())
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_amount");
    }

    #[test]
    fn test_retirement_is_all_or_nothing() {
        let ledger = ledger();
        let producer = register(&ledger, "p1", 10_000);

        let b1 = ledger
            .issue_batch(&producer, 100, Uuid::now_v7(), Utc::now())
            .unwrap();
        let b2 = ledger
            .issue_batch(&producer, 200, Uuid::now_v7(), Utc::now())
            .unwrap();
        let b3 = ledger
            .issue_batch(&producer, 300, Uuid::now_v7(), Utc::now())
            .unwrap();

        // Retire b1 alone, then attempt the full set: must fail entirely.
        ledger
            .retire(&producer, &[b1.batch_id], "audit", Utc::now())
            .unwrap();

        let err = ledger
            .retire(
                &producer,
                &[b1.batch_id, b2.batch_id, b3.batch_id],
                "audit",
                Utc::now(),
            )
            .unwrap_err();
        assert_eq!(err.kind(), "already_retired");

        // No partial effect on the other two.
        assert!(!ledger.batch(&b2.batch_id).unwrap().retired);
        assert!(!ledger.batch(&b3.batch_id).unwrap().retired);
        // Conservation unaffected by retirement.
        assert_eq!(ledger.producer(&producer).unwrap().total_produced, 600);
        assert!(ledger.check_conservation(&producer).unwrap());
    }

    #[test]
    fn test_retire_requires_ownership() {
        let ledger = ledger();
        let producer = register(&ledger, "p1", 10_000);
        let stranger = AccountId::new("someone-else");

        let batch = ledger
            .issue_batch(&producer, 100, Uuid::now_v7(), Utc::now())
            .unwrap();

        let err = ledger
            .retire(&stranger, &[batch.batch_id], "attempt", Utc::now())
            .unwrap_err();
        assert_eq!(err.kind(), "ownership_mismatch");
        assert!(!ledger.batch(&batch.batch_id).unwrap().retired);
    }

    #[test]
    fn test_transfer_moves_holder_and_units() {
        let ledger = ledger();
        let producer = register(&ledger, "p1", 10_000);
        let buyer = AccountId::new("buyer-1");

        let batch = ledger
            .issue_batch(&producer, 250, Uuid::now_v7(), Utc::now())
            .unwrap();

        ledger
            .transfer_batches(&producer, &buyer, &[batch.batch_id], Utc::now())
            .unwrap();

        let moved = ledger.batch(&batch.batch_id).unwrap();
        assert_eq!(moved.holder, buyer);
        assert_eq!(moved.producer, producer);
        assert_eq!(moved.amount, 250);
        assert_eq!(ledger.balance(&producer).spendable, 0);
        assert_eq!(ledger.balance(&buyer).spendable, 250);

        // New holder can retire, original producer cannot.
        assert!(ledger
            .retire(&producer, &[batch.batch_id], "wrong holder", Utc::now())
            .is_err());
        ledger
            .retire(&buyer, &[batch.batch_id], "compliance", Utc::now())
            .unwrap();
    }

    #[test]
    fn test_escrow_roundtrip_returns_exact_amount() {
        let ledger = ledger();
        let producer = register(&ledger, "p1", 10_000);
        ledger
            .issue_batch(&producer, 500, Uuid::now_v7(), Utc::now())
            .unwrap();

        ledger.escrow_hold(&producer, 200).unwrap();
        let held = ledger.balance(&producer);
        assert_eq!(held.spendable, 300);
        assert_eq!(held.escrowed, 200);
        assert_eq!(ledger.escrowed_supply(), 200);

        ledger.escrow_release(&producer, 200).unwrap();
        let released = ledger.balance(&producer);
        assert_eq!(released.spendable, 500);
        assert_eq!(released.escrowed, 0);
    }

    #[test]
    fn test_escrow_hold_checks_spendable_only() {
        let ledger = ledger();
        let producer = register(&ledger, "p1", 10_000);
        ledger
            .issue_batch(&producer, 100, Uuid::now_v7(), Utc::now())
            .unwrap();
        ledger.escrow_hold(&producer, 80).unwrap();

        // 20 spendable left; escrowed units are not spendable.
        let err = ledger.escrow_hold(&producer, 50).unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientBalance {
                requested: 50,
                available: 20
            }
        ));
    }

    #[test]
    fn test_escrow_settle_moves_units_to_buyer() {
        let ledger = ledger();
        let seller = register(&ledger, "p1", 10_000);
        let buyer = AccountId::new("buyer-1");
        ledger
            .issue_batch(&seller, 100, Uuid::now_v7(), Utc::now())
            .unwrap();
        ledger.escrow_hold(&seller, 100).unwrap();

        ledger.escrow_settle(&seller, &buyer, 60).unwrap();
        assert_eq!(ledger.balance(&seller).escrowed, 40);
        assert_eq!(ledger.balance(&buyer).spendable, 60);
    }

    #[test]
    fn test_issuance_emits_event() {
        let sink = Arc::new(MemorySink::new());
        let ledger = CreditLedger::new(sink.clone());
        let producer = AccountId::new("p1");
        ledger
            .register_producer(
                producer.clone(),
                "plant-p1",
                EnergySource::Hydro,
                1000,
                Utc::now(),
            )
            .unwrap();

        let batch = ledger
            .issue_batch(&producer, 42, Uuid::now_v7(), Utc::now())
            .unwrap();

        let events = sink.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].idempotency_key(),
            format!("batch:{}", batch.batch_id)
        );
    }
}
