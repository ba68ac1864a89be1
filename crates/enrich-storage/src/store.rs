//! Storage capabilities the pipeline depends on.
//!
//! The pipeline never talks to RocksDB directly. It sees durable storage as
//! three narrow async capabilities so that a remote data store can stand in
//! for the embedded one.

use async_trait::async_trait;
use chrono::Duration;

use crate::db::Storage;
use crate::error::StorageError;
use enrich_types::{Contact, ContactFilter, ContactUpdate, Page, PipelineRecord, Thesis};

/// Keyed contact storage with filtered reads.
#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Contacts matching `filter`, ordered by id, keyset-paged.
    async fn select_contacts(&self, filter: &ContactFilter, page: Page) -> Result<Vec<Contact>, StorageError>;

    /// Write the `Some` fields of `update` onto an existing contact.
    async fn update_contact(
        &self,
        owner_id: &str,
        contact_id: &str,
        update: &ContactUpdate,
    ) -> Result<(), StorageError>;

    /// Replace the thesis of a contact.
    async fn upsert_thesis(&self, thesis: &Thesis) -> Result<(), StorageError>;
}

/// Single string value per key, e.g. a client-local checkpoint slot.
#[async_trait]
pub trait KeyValueSlot: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    async fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

/// Durable per-owner pipeline rows.
#[async_trait]
pub trait PipelineRecordStore: Send + Sync {
    async fn load_record(&self, owner_id: &str) -> Result<Option<PipelineRecord>, StorageError>;
    async fn save_record(&self, record: &PipelineRecord) -> Result<(), StorageError>;
    async fn list_records(&self) -> Result<Vec<PipelineRecord>, StorageError>;

    /// Compare-and-swap the lease. Returns false when another holder owns an
    /// unexpired lease.
    async fn try_acquire_lease(&self, owner_id: &str, holder: &str, ttl: Duration) -> Result<bool, StorageError>;

    async fn release_lease(&self, owner_id: &str, holder: &str) -> Result<(), StorageError>;
}

#[async_trait]
impl ContactStore for Storage {
    async fn select_contacts(&self, filter: &ContactFilter, page: Page) -> Result<Vec<Contact>, StorageError> {
        self.query_contacts(filter, &page)
    }

    async fn update_contact(
        &self,
        owner_id: &str,
        contact_id: &str,
        update: &ContactUpdate,
    ) -> Result<(), StorageError> {
        self.update_contact_fields(owner_id, contact_id, update).map(|_| ())
    }

    async fn upsert_thesis(&self, thesis: &Thesis) -> Result<(), StorageError> {
        self.put_thesis(thesis)
    }
}

#[async_trait]
impl KeyValueSlot for Storage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self.get_checkpoint(key)? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| StorageError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.put_checkpoint(key, value.as_bytes())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.delete_checkpoint(key)
    }
}

#[async_trait]
impl PipelineRecordStore for Storage {
    async fn load_record(&self, owner_id: &str) -> Result<Option<PipelineRecord>, StorageError> {
        self.get_pipeline_record(owner_id)
    }

    async fn save_record(&self, record: &PipelineRecord) -> Result<(), StorageError> {
        self.put_pipeline_record(record)
    }

    async fn list_records(&self) -> Result<Vec<PipelineRecord>, StorageError> {
        self.list_pipeline_records()
    }

    async fn try_acquire_lease(&self, owner_id: &str, holder: &str, ttl: Duration) -> Result<bool, StorageError> {
        self.acquire_lease(owner_id, holder, ttl)
    }

    async fn release_lease(&self, owner_id: &str, holder: &str) -> Result<(), StorageError> {
        self.clear_lease(owner_id, holder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_slot_roundtrip_through_trait() {
        let temp = TempDir::new().unwrap();
        let slot: Arc<dyn KeyValueSlot> = Arc::new(Storage::open(temp.path()).unwrap());

        assert!(slot.get_item("k").await.unwrap().is_none());
        slot.set_item("k", "{\"a\":1}").await.unwrap();
        assert_eq!(slot.get_item("k").await.unwrap().as_deref(), Some("{\"a\":1}"));
        slot.remove_item("k").await.unwrap();
        assert!(slot.get_item("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_contact_store_updates_and_selects() {
        let temp = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(temp.path()).unwrap());
        storage.put_contact(&Contact::new("o", "c-1", "Ada")).unwrap();
        let store: Arc<dyn ContactStore> = storage.clone();

        store
            .update_contact("o", "c-1", &ContactUpdate::bio("Angel investor."))
            .await
            .unwrap();
        let rows = store
            .select_contacts(&ContactFilter::owner("o"), Page::first(5))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].bio.as_deref(), Some("Angel investor."));
    }
}
