//! Durable pipeline checkpoint.
//!
//! `save(None)` clears the checkpoint. A checkpoint that fails to decode or
//! validate loads as `None`: an unreadable checkpoint behaves like no
//! interrupted run at all.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

use enrich_storage::{KeyValueSlot, PipelineRecordStore, StorageError};
use enrich_types::{PipelineRecord, PipelineState};

use crate::error::PipelineError;

#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn save(&self, state: Option<&PipelineState>) -> Result<(), PipelineError>;
    async fn load(&self) -> Result<Option<PipelineState>, PipelineError>;
}

/// Drop a loaded state that belongs to another owner or breaks its
/// invariants.
fn accept(owner_id: &str, state: PipelineState) -> Option<PipelineState> {
    if state.owner_id != owner_id {
        warn!(
            owner_id = %owner_id,
            found = %state.owner_id,
            "Checkpoint belongs to another owner, ignoring"
        );
        return None;
    }
    if let Err(reason) = state.validate() {
        warn!(owner_id = %owner_id, reason = %reason, "Invalid checkpoint, ignoring");
        return None;
    }
    Some(state)
}

/// Checkpoint stored as one JSON string in a key/value slot.
pub struct SlotProgressStore {
    slot: Arc<dyn KeyValueSlot>,
    owner_id: String,
    key: String,
}

impl SlotProgressStore {
    pub fn new(slot: Arc<dyn KeyValueSlot>, owner_id: impl Into<String>) -> Self {
        let owner_id = owner_id.into();
        let key = format!("pipeline_state:{}", owner_id);
        Self { slot, owner_id, key }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl ProgressStore for SlotProgressStore {
    async fn save(&self, state: Option<&PipelineState>) -> Result<(), PipelineError> {
        match state {
            Some(state) => {
                self.slot.set_item(&self.key, &state.to_json()?).await?;
                debug!(
                    owner_id = %self.owner_id,
                    processed = state.processed_ids.len(),
                    total = state.total,
                    "Checkpoint saved"
                );
            }
            None => {
                self.slot.remove_item(&self.key).await?;
                debug!(owner_id = %self.owner_id, "Checkpoint cleared");
            }
        }
        Ok(())
    }

    async fn load(&self) -> Result<Option<PipelineState>, PipelineError> {
        let raw = match self.slot.get_item(&self.key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(None),
            Err(StorageError::Serialization(e)) => {
                warn!(owner_id = %self.owner_id, error = %e, "Undecodable checkpoint, ignoring");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        match PipelineState::from_json(&raw) {
            Ok(state) => Ok(accept(&self.owner_id, state)),
            Err(e) => {
                warn!(owner_id = %self.owner_id, error = %e, "Unparsable checkpoint, ignoring");
                Ok(None)
            }
        }
    }
}

/// Checkpoint stored on the owner's pipeline record.
pub struct RecordProgressStore {
    records: Arc<dyn PipelineRecordStore>,
    owner_id: String,
}

impl RecordProgressStore {
    pub fn new(records: Arc<dyn PipelineRecordStore>, owner_id: impl Into<String>) -> Self {
        Self {
            records,
            owner_id: owner_id.into(),
        }
    }
}

#[async_trait]
impl ProgressStore for RecordProgressStore {
    async fn save(&self, state: Option<&PipelineState>) -> Result<(), PipelineError> {
        let mut record = self
            .records
            .load_record(&self.owner_id)
            .await?
            .unwrap_or_else(|| PipelineRecord::new(&self.owner_id));
        record.progress = state.cloned();
        record.updated_at = Utc::now();
        self.records.save_record(&record).await?;
        Ok(())
    }

    async fn load(&self) -> Result<Option<PipelineState>, PipelineError> {
        let progress = self
            .records
            .load_record(&self.owner_id)
            .await?
            .and_then(|record| record.progress);
        Ok(progress.and_then(|state| accept(&self.owner_id, state)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enrich_storage::Storage;
    use tempfile::TempDir;

    fn sample(owner: &str) -> PipelineState {
        let mut state = PipelineState::enroll(owner, vec!["a".into(), "b".into(), "c".into()]);
        state.mark_processed(&["a".to_string()]);
        state.enrichment.record_success();
        state
    }

    #[tokio::test]
    async fn test_slot_roundtrip_and_clear() {
        let temp = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(temp.path()).unwrap());
        let store = SlotProgressStore::new(storage.clone(), "o");

        assert!(store.load().await.unwrap().is_none());

        let state = sample("o");
        store.save(Some(&state)).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(state));

        store.save(None).await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_slot_survives_reopen() {
        let temp = TempDir::new().unwrap();
        let state = sample("o");
        {
            let storage = Arc::new(Storage::open(temp.path()).unwrap());
            SlotProgressStore::new(storage, "o").save(Some(&state)).await.unwrap();
        }
        let storage = Arc::new(Storage::open(temp.path()).unwrap());
        let loaded = SlotProgressStore::new(storage, "o").load().await.unwrap().unwrap();
        assert_eq!(loaded.processed_ids, vec!["a"]);
    }

    #[tokio::test]
    async fn test_corrupt_checkpoint_loads_as_none() {
        let temp = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(temp.path()).unwrap());
        let store = SlotProgressStore::new(storage.clone(), "o");

        storage.set_item(store.key(), "{not json").await.unwrap();
        assert!(store.load().await.unwrap().is_none());

        let mut broken = sample("o");
        broken.processed_ids.push("stranger".to_string());
        storage.set_item(store.key(), &broken.to_json().unwrap()).await.unwrap();
        assert!(store.load().await.unwrap().is_none());

        // Not even UTF-8
        storage.put_checkpoint(store.key(), &[0xff, 0xfe]).unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_foreign_owner_ignored() {
        let temp = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(temp.path()).unwrap());
        let store = SlotProgressStore::new(storage.clone(), "o");
        storage
            .set_item(store.key(), &sample("someone-else").to_json().unwrap())
            .await
            .unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_store_keeps_other_columns() {
        let temp = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(temp.path()).unwrap());

        let mut record = PipelineRecord::new("o");
        record.completed_runs = 4;
        storage.put_pipeline_record(&record).unwrap();

        let store = RecordProgressStore::new(storage.clone(), "o");
        let state = sample("o");
        store.save(Some(&state)).await.unwrap();

        assert_eq!(store.load().await.unwrap(), Some(state));
        let saved = storage.get_pipeline_record("o").unwrap().unwrap();
        assert_eq!(saved.completed_runs, 4);

        store.save(None).await.unwrap();
        assert!(store.load().await.unwrap().is_none());
        assert!(storage.get_pipeline_record("o").unwrap().is_some());
    }
}
