//! RocksDB wrapper for enrichment storage.
//!
//! Provides:
//! - Database open with column family setup
//! - Contact reads, writes and filtered keyset scans
//! - Thesis upserts
//! - Checkpoint slot entries
//! - Pipeline records with lease compare-and-swap

use chrono::{Duration, Utc};
use rocksdb::{ColumnFamily, Direction, IteratorMode, Options, DB};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::column_families::{
    build_cf_descriptors, CF_CHECKPOINTS, CF_CONTACTS, CF_PIPELINE_RECORDS, CF_THESES,
};
use crate::error::StorageError;
use crate::keys::{CheckpointKey, ContactKey, RecordKey, ThesisKey};
use enrich_types::{Contact, ContactFilter, ContactUpdate, Lease, Page, PipelineRecord, Thesis};

/// Main storage interface for the enrichment pipeline
pub struct Storage {
    db: DB,
    /// Serializes lease read-modify-write cycles
    lease_lock: Mutex<()>,
}

impl Storage {
    /// Open storage at the given path, creating if necessary
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        info!("Opening storage at {:?}", path);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_background_jobs(4);

        let cf_descriptors = build_cf_descriptors();
        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        Ok(Self {
            db,
            lease_lock: Mutex::new(()),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(name.to_string()))
    }

    // ==================== Contacts ====================

    /// Insert or replace a contact
    pub fn put_contact(&self, contact: &Contact) -> Result<(), StorageError> {
        let cf = self.cf(CF_CONTACTS)?;
        let key = ContactKey::new(&contact.owner_id, &contact.id)?;
        self.db.put_cf(cf, key.to_bytes(), contact.to_bytes()?)?;
        debug!(owner = %contact.owner_id, contact = %contact.id, "Stored contact");
        Ok(())
    }

    pub fn get_contact(&self, owner_id: &str, contact_id: &str) -> Result<Option<Contact>, StorageError> {
        let cf = self.cf(CF_CONTACTS)?;
        let key = ContactKey::new(owner_id, contact_id)?;
        match self.db.get_cf(cf, key.to_bytes())? {
            Some(bytes) => Ok(Some(Contact::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Apply a partial update and return the updated contact
    pub fn update_contact_fields(
        &self,
        owner_id: &str,
        contact_id: &str,
        update: &ContactUpdate,
    ) -> Result<Contact, StorageError> {
        let mut contact = self
            .get_contact(owner_id, contact_id)?
            .ok_or_else(|| StorageError::NotFound(format!("contact {}/{}", owner_id, contact_id)))?;
        contact.apply(update);
        self.put_contact(&contact)?;
        Ok(contact)
    }

    /// Contacts matching `filter`, ordered by id, strictly after `page.after`,
    /// at most `page.limit` of them.
    pub fn query_contacts(&self, filter: &ContactFilter, page: &Page) -> Result<Vec<Contact>, StorageError> {
        if page.limit == 0 {
            return Ok(Vec::new());
        }
        if let Some(ids) = filter.ids() {
            return self.query_contacts_by_id(filter, ids, page);
        }

        let cf = self.cf(CF_CONTACTS)?;
        let prefix = ContactKey::owner_prefix(&filter.owner_id)?;
        let start = match &page.after {
            Some(after) => ContactKey::new(&filter.owner_id, after)?.to_bytes(),
            None => prefix.clone(),
        };

        let mut results = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&start, Direction::Forward));

        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            if page.after.is_some() && key.as_ref() == start.as_slice() {
                continue;
            }
            let contact = Contact::from_bytes(&value)?;
            if self.contact_matches(filter, &contact)? {
                results.push(contact);
                if results.len() >= page.limit {
                    break;
                }
            }
        }

        debug!(
            owner = %filter.owner_id,
            after = ?page.after,
            count = results.len(),
            "Queried contacts"
        );
        Ok(results)
    }

    fn query_contacts_by_id(
        &self,
        filter: &ContactFilter,
        ids: &[String],
        page: &Page,
    ) -> Result<Vec<Contact>, StorageError> {
        let mut wanted: Vec<&String> = ids
            .iter()
            .filter(|id| page.after.as_ref().map_or(true, |after| id.as_str() > after.as_str()))
            .collect();
        wanted.sort();
        wanted.dedup();

        let mut results = Vec::new();
        for id in wanted {
            if let Some(contact) = self.get_contact(&filter.owner_id, id)? {
                if self.contact_matches(filter, &contact)? {
                    results.push(contact);
                    if results.len() >= page.limit {
                        break;
                    }
                }
            }
        }
        Ok(results)
    }

    fn contact_matches(&self, filter: &ContactFilter, contact: &Contact) -> Result<bool, StorageError> {
        let has_thesis = if filter.needs_thesis_lookup() {
            self.has_thesis(&contact.owner_id, &contact.id)?
        } else {
            false
        };
        Ok(filter.matches(contact, has_thesis))
    }

    // ==================== Theses ====================

    /// Store a thesis, replacing any previous one for the contact
    pub fn put_thesis(&self, thesis: &Thesis) -> Result<(), StorageError> {
        let cf = self.cf(CF_THESES)?;
        let key = ThesisKey::new(&thesis.owner_id, &thesis.contact_id)?;
        self.db.put_cf(cf, key.to_bytes(), thesis.to_bytes()?)?;
        Ok(())
    }

    pub fn get_thesis(&self, owner_id: &str, contact_id: &str) -> Result<Option<Thesis>, StorageError> {
        let cf = self.cf(CF_THESES)?;
        let key = ThesisKey::new(owner_id, contact_id)?;
        match self.db.get_cf(cf, key.to_bytes())? {
            Some(bytes) => Ok(Some(Thesis::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn has_thesis(&self, owner_id: &str, contact_id: &str) -> Result<bool, StorageError> {
        let cf = self.cf(CF_THESES)?;
        let key = ThesisKey::new(owner_id, contact_id)?;
        Ok(self.db.get_pinned_cf(cf, key.to_bytes())?.is_some())
    }

    // ==================== Checkpoints ====================

    /// Store a checkpoint value under a slot name
    pub fn put_checkpoint(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let cf = self.cf(CF_CHECKPOINTS)?;
        self.db.put_cf(cf, CheckpointKey::new(name).to_bytes(), bytes)?;
        Ok(())
    }

    pub fn get_checkpoint(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let cf = self.cf(CF_CHECKPOINTS)?;
        Ok(self.db.get_cf(cf, CheckpointKey::new(name).to_bytes())?)
    }

    pub fn delete_checkpoint(&self, name: &str) -> Result<(), StorageError> {
        let cf = self.cf(CF_CHECKPOINTS)?;
        self.db.delete_cf(cf, CheckpointKey::new(name).to_bytes())?;
        Ok(())
    }

    // ==================== Pipeline records ====================

    pub fn put_pipeline_record(&self, record: &PipelineRecord) -> Result<(), StorageError> {
        let cf = self.cf(CF_PIPELINE_RECORDS)?;
        let key = RecordKey::new(&record.owner_id)?;
        self.db.put_cf(cf, key.to_bytes(), record.to_bytes()?)?;
        Ok(())
    }

    pub fn get_pipeline_record(&self, owner_id: &str) -> Result<Option<PipelineRecord>, StorageError> {
        let cf = self.cf(CF_PIPELINE_RECORDS)?;
        let key = RecordKey::new(owner_id)?;
        match self.db.get_cf(cf, key.to_bytes())? {
            Some(bytes) => Ok(Some(PipelineRecord::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All pipeline records, ordered by owner id
    pub fn list_pipeline_records(&self) -> Result<Vec<PipelineRecord>, StorageError> {
        let cf = self.cf(CF_PIPELINE_RECORDS)?;
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(RecordKey::PREFIX, Direction::Forward));

        let mut records = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(RecordKey::PREFIX) {
                break;
            }
            records.push(PipelineRecord::from_bytes(&value)?);
        }
        Ok(records)
    }

    /// Take the owner's lease for `holder` if it is free, expired or already
    /// held by `holder`. Creates the record when the owner has none.
    pub fn acquire_lease(&self, owner_id: &str, holder: &str, ttl: Duration) -> Result<bool, StorageError> {
        let _guard = self
            .lease_lock
            .lock()
            .map_err(|_| StorageError::Lease("lease lock poisoned".to_string()))?;

        let mut record = self
            .get_pipeline_record(owner_id)?
            .unwrap_or_else(|| PipelineRecord::new(owner_id));

        if !record.lease_available(holder, Utc::now()) {
            debug!(owner = %owner_id, holder, "Lease held by another holder");
            return Ok(false);
        }

        record.lease = Some(Lease::new(holder, ttl));
        record.updated_at = Utc::now();
        self.put_pipeline_record(&record)?;
        Ok(true)
    }

    /// Drop the owner's lease if `holder` still owns it
    pub fn clear_lease(&self, owner_id: &str, holder: &str) -> Result<(), StorageError> {
        let _guard = self
            .lease_lock
            .lock()
            .map_err(|_| StorageError::Lease("lease lock poisoned".to_string()))?;

        if let Some(mut record) = self.get_pipeline_record(owner_id)? {
            if record.lease.as_ref().is_some_and(|l| l.holder == holder) {
                record.lease = None;
                record.updated_at = Utc::now();
                self.put_pipeline_record(&record)?;
            }
        }
        Ok(())
    }

    // ==================== Maintenance ====================

    /// Flush all memtables to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    /// Get database statistics.
    pub fn get_stats(&self) -> Result<StorageStats, StorageError> {
        Ok(StorageStats {
            contact_count: self.count_cf_entries(self.cf(CF_CONTACTS)?)?,
            thesis_count: self.count_cf_entries(self.cf(CF_THESES)?)?,
            checkpoint_count: self.count_cf_entries(self.cf(CF_CHECKPOINTS)?)?,
            pipeline_record_count: self.count_cf_entries(self.cf(CF_PIPELINE_RECORDS)?)?,
            disk_usage_bytes: self.get_disk_usage(),
        })
    }

    fn count_cf_entries(&self, cf: &ColumnFamily) -> Result<u64, StorageError> {
        let mut count = 0u64;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    fn get_disk_usage(&self) -> u64 {
        let mut total_size = 0u64;
        if let Ok(entries) = std::fs::read_dir(self.db.path()) {
            for entry in entries.flatten() {
                if let Ok(metadata) = entry.metadata() {
                    total_size += metadata.len();
                }
            }
        }
        total_size
    }
}

/// Statistics about the storage.
#[derive(Debug, Default)]
pub struct StorageStats {
    pub contact_count: u64,
    pub thesis_count: u64,
    pub checkpoint_count: u64,
    pub pipeline_record_count: u64,
    /// Total disk usage in bytes
    pub disk_usage_bytes: u64,
}
