//! Mirror store on RocksDB
//!
//! The durable, queryable projection of the authoritative source. Owned
//! exclusively by the reconciler; reporting/API collaborators only read.
//!
//! # Column Families
//!
//! - `submissions` - production submissions (key: submission_id)
//! - `batches` - credit batches (key: batch_id)
//! - `listings` - marketplace listings (key: listing_id)
//! - `settlements` - append-only settlement records (key: settlement_ref)
//! - `retirements` - append-only retirement records (key: retirement_id)
//! - `applied` - applied idempotency keys with payload hash
//! - `indices` - secondary indices for filtered queries

use crate::{
    config::MirrorConfig,
    error::{Error, Result},
};
use credit_ledger::{
    AccountId, CreditBatch, ListingStatus, MarketplaceListing, Page, ProductionSubmission,
    RetirementRecord, SettlementRecord, SubmissionStatus,
};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

/// Column family names
const CF_SUBMISSIONS: &str = "submissions";
const CF_BATCHES: &str = "batches";
const CF_LISTINGS: &str = "listings";
const CF_SETTLEMENTS: &str = "settlements";
const CF_RETIREMENTS: &str = "retirements";
const CF_APPLIED: &str = "applied";
const CF_INDICES: &str = "indices";

/// Mirror store wrapper for RocksDB
pub struct MirrorStore {
    db: DB,
}

impl MirrorStore {
    /// Open or create the mirror database
    pub fn open(config: &MirrorConfig) -> Result<Self> {
        let path = &config.data_dir;
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_SUBMISSIONS, Self::cf_options_rows()),
            ColumnFamilyDescriptor::new(CF_BATCHES, Self::cf_options_rows()),
            ColumnFamilyDescriptor::new(CF_LISTINGS, Self::cf_options_rows()),
            ColumnFamilyDescriptor::new(CF_SETTLEMENTS, Self::cf_options_rows()),
            ColumnFamilyDescriptor::new(CF_RETIREMENTS, Self::cf_options_rows()),
            ColumnFamilyDescriptor::new(CF_APPLIED, Self::cf_options_applied()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened mirror store");

        Ok(Self { db })
    }

    fn cf_options_rows() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_applied() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn get_row<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf_handle(cf_name)?;
        match self.db.get_cf(cf, key)? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    fn scan_rows<T: DeserializeOwned>(
        &self,
        cf_name: &str,
        filter: impl Fn(&T) -> bool,
        page: Page,
    ) -> Result<Vec<T>> {
        let cf = self.cf_handle(cf_name)?;
        let iter = self.db.iterator_cf(cf, IteratorMode::Start);

        let mut rows = Vec::new();
        let mut skipped = 0usize;
        for item in iter {
            let (_, value) = item?;
            let row: T = bincode::deserialize(&value)?;
            if !filter(&row) {
                continue;
            }
            if skipped < page.offset {
                skipped += 1;
                continue;
            }
            rows.push(row);
            if rows.len() >= page.limit {
                break;
            }
        }

        Ok(rows)
    }

    // Index key helpers

    fn index_key_producer_batch(producer: &AccountId, batch_id: Option<Uuid>) -> Vec<u8> {
        let mut key = b"b|".to_vec();
        key.extend_from_slice(producer.as_str().as_bytes());
        key.push(b'|');
        if let Some(id) = batch_id {
            key.extend_from_slice(id.as_bytes());
        }
        key
    }

    fn index_key_seller_listing(seller: &AccountId, listing_id: Option<Uuid>) -> Vec<u8> {
        let mut key = b"l|".to_vec();
        key.extend_from_slice(seller.as_str().as_bytes());
        key.push(b'|');
        if let Some(id) = listing_id {
            key.extend_from_slice(id.as_bytes());
        }
        key
    }

    fn index_key_listing_settlement(listing_id: &Uuid, settlement_ref: Option<Uuid>) -> Vec<u8> {
        let mut key = b"s|".to_vec();
        key.extend_from_slice(listing_id.as_bytes());
        if let Some(id) = settlement_ref {
            key.extend_from_slice(id.as_bytes());
        }
        key
    }

    /// Scan an index prefix and load the referenced rows from `cf_name`,
    /// using the trailing 16 key bytes as the row key.
    fn rows_via_index<T: DeserializeOwned>(
        &self,
        prefix: &[u8],
        cf_name: &str,
        filter: impl Fn(&T) -> bool,
        page: Page,
    ) -> Result<Vec<T>> {
        let cf_indices = self.cf_handle(CF_INDICES)?;
        let iter = self.db.prefix_iterator_cf(cf_indices, prefix);

        let mut rows = Vec::new();
        let mut skipped = 0usize;
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            if key.len() < prefix.len() + 16 {
                continue;
            }
            let id_bytes: [u8; 16] = key[key.len() - 16..].try_into().unwrap();
            let row_key = Uuid::from_bytes(id_bytes);

            if let Some(row) = self.get_row::<T>(cf_name, row_key.as_bytes())? {
                if !filter(&row) {
                    continue;
                }
                if skipped < page.offset {
                    skipped += 1;
                    continue;
                }
                rows.push(row);
                if rows.len() >= page.limit {
                    break;
                }
            }
        }

        Ok(rows)
    }

    fn put_with_index<T: Serialize>(
        &self,
        cf_name: &str,
        key: &[u8],
        row: &T,
        index_key: Option<Vec<u8>>,
    ) -> Result<()> {
        let mut batch = WriteBatch::default();

        let cf = self.cf_handle(cf_name)?;
        batch.put_cf(cf, key, bincode::serialize(row)?);

        if let Some(index_key) = index_key {
            let cf_indices = self.cf_handle(CF_INDICES)?;
            batch.put_cf(cf_indices, &index_key, []);
        }

        self.db.write(batch)?;
        Ok(())
    }

    // Submissions

    /// Upsert a submission row
    pub fn put_submission(&self, submission: &ProductionSubmission) -> Result<()> {
        self.put_with_index(
            CF_SUBMISSIONS,
            submission.submission_id.as_bytes(),
            submission,
            None,
        )
    }

    /// Get a submission row
    pub fn get_submission(&self, submission_id: Uuid) -> Result<Option<ProductionSubmission>> {
        self.get_row(CF_SUBMISSIONS, submission_id.as_bytes())
    }

    /// List submissions, optionally filtered by producer and status
    pub fn list_submissions(
        &self,
        producer: Option<&AccountId>,
        status: Option<SubmissionStatus>,
        page: Page,
    ) -> Result<Vec<ProductionSubmission>> {
        self.scan_rows(
            CF_SUBMISSIONS,
            |row: &ProductionSubmission| {
                producer.map_or(true, |p| &row.producer == p)
                    && status.map_or(true, |s| row.status == s)
            },
            page,
        )
    }

    // Batches

    /// Upsert a batch row and its producer index
    pub fn put_batch(&self, batch: &CreditBatch) -> Result<()> {
        self.put_with_index(
            CF_BATCHES,
            batch.batch_id.as_bytes(),
            batch,
            Some(Self::index_key_producer_batch(
                &batch.producer,
                Some(batch.batch_id),
            )),
        )
    }

    /// Get a batch row
    pub fn get_batch(&self, batch_id: Uuid) -> Result<Option<CreditBatch>> {
        self.get_row(CF_BATCHES, batch_id.as_bytes())
    }

    /// List batches, optionally filtered by producer; retired batches are
    /// included unless `exclude_retired` is set
    pub fn list_batches(
        &self,
        producer: Option<&AccountId>,
        exclude_retired: bool,
        page: Page,
    ) -> Result<Vec<CreditBatch>> {
        let filter = |row: &CreditBatch| !(exclude_retired && row.retired);
        match producer {
            Some(producer) => self.rows_via_index(
                &Self::index_key_producer_batch(producer, None),
                CF_BATCHES,
                filter,
                page,
            ),
            None => self.scan_rows(CF_BATCHES, filter, page),
        }
    }

    // Listings

    /// Upsert a listing row and its seller index
    pub fn put_listing(&self, listing: &MarketplaceListing) -> Result<()> {
        self.put_with_index(
            CF_LISTINGS,
            listing.listing_id.as_bytes(),
            listing,
            Some(Self::index_key_seller_listing(
                &listing.seller,
                Some(listing.listing_id),
            )),
        )
    }

    /// Get a listing row
    pub fn get_listing(&self, listing_id: Uuid) -> Result<Option<MarketplaceListing>> {
        self.get_row(CF_LISTINGS, listing_id.as_bytes())
    }

    /// List listings, optionally filtered by seller and status
    pub fn list_listings(
        &self,
        seller: Option<&AccountId>,
        status: Option<ListingStatus>,
        page: Page,
    ) -> Result<Vec<MarketplaceListing>> {
        let filter =
            |row: &MarketplaceListing| status.map_or(true, |wanted| row.status == wanted);
        match seller {
            Some(seller) => self.rows_via_index(
                &Self::index_key_seller_listing(seller, None),
                CF_LISTINGS,
                filter,
                page,
            ),
            None => self.scan_rows(CF_LISTINGS, filter, page),
        }
    }

    // Settlements

    /// Append a settlement row and its listing index
    pub fn put_settlement(&self, settlement: &SettlementRecord) -> Result<()> {
        self.put_with_index(
            CF_SETTLEMENTS,
            settlement.settlement_ref.as_bytes(),
            settlement,
            Some(Self::index_key_listing_settlement(
                &settlement.listing_id,
                Some(settlement.settlement_ref),
            )),
        )
    }

    /// Get a settlement row
    pub fn get_settlement(&self, settlement_ref: Uuid) -> Result<Option<SettlementRecord>> {
        self.get_row(CF_SETTLEMENTS, settlement_ref.as_bytes())
    }

    /// List settlements, optionally filtered by listing
    pub fn list_settlements(
        &self,
        listing_id: Option<Uuid>,
        page: Page,
    ) -> Result<Vec<SettlementRecord>> {
        match listing_id {
            Some(listing_id) => self.rows_via_index(
                &Self::index_key_listing_settlement(&listing_id, None),
                CF_SETTLEMENTS,
                |_: &SettlementRecord| true,
                page,
            ),
            None => self.scan_rows(CF_SETTLEMENTS, |_: &SettlementRecord| true, page),
        }
    }

    // Retirements

    /// Append a retirement row
    pub fn put_retirement(&self, retirement: &RetirementRecord) -> Result<()> {
        self.put_with_index(
            CF_RETIREMENTS,
            retirement.retirement_id.as_bytes(),
            retirement,
            None,
        )
    }

    /// Get a retirement row
    pub fn get_retirement(&self, retirement_id: Uuid) -> Result<Option<RetirementRecord>> {
        self.get_row(CF_RETIREMENTS, retirement_id.as_bytes())
    }

    // Applied-event ledger

    /// Payload hash recorded for an applied idempotency key
    pub fn applied_hash(&self, key: &str) -> Result<Option<[u8; 32]>> {
        let cf = self.cf_handle(CF_APPLIED)?;
        match self.db.get_cf(cf, key.as_bytes())? {
            Some(value) => {
                let hash: [u8; 32] = value
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Storage(format!("corrupt applied hash for {key}")))?;
                Ok(Some(hash))
            }
            None => Ok(None),
        }
    }

    /// Record an idempotency key as applied with its payload hash.
    ///
    /// Written after the row writes: a crash in between re-applies an
    /// equal payload on redelivery, which the upserts absorb.
    pub fn mark_applied(&self, key: &str, payload_hash: [u8; 32]) -> Result<()> {
        let cf = self.cf_handle(CF_APPLIED)?;
        self.db.put_cf(cf, key.as_bytes(), payload_hash)?;
        Ok(())
    }

    /// Approximate row counts for observability
    pub fn stats(&self) -> Result<MirrorStats> {
        Ok(MirrorStats {
            submissions: self.approximate_count(CF_SUBMISSIONS)?,
            batches: self.approximate_count(CF_BATCHES)?,
            listings: self.approximate_count(CF_LISTINGS)?,
            settlements: self.approximate_count(CF_SETTLEMENTS)?,
            retirements: self.approximate_count(CF_RETIREMENTS)?,
        })
    }

    fn approximate_count(&self, cf_name: &str) -> Result<u64> {
        let cf = self.cf_handle(cf_name)?;
        let count = self
            .db
            .property_int_value_cf(cf, "rocksdb.estimate-num-keys")?
            .unwrap_or(0);
        Ok(count)
    }
}

impl std::fmt::Debug for MirrorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorStore").finish()
    }
}

/// Approximate mirror row counts
#[derive(Debug, Clone)]
pub struct MirrorStats {
    /// Submission rows
    pub submissions: u64,
    /// Batch rows
    pub batches: u64,
    /// Listing rows
    pub listings: u64,
    /// Settlement rows
    pub settlements: u64,
    /// Retirement rows
    pub retirements: u64,
}
