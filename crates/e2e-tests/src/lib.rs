//! End-to-end test infrastructure for the enrichment pipeline.
//!
//! Provides a shared TestHarness (real RocksDB in a temp dir, mock AI
//! services shared across drivers) and helpers for building contacts,
//! controllers and steppers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use enrich_ai::{MockBioGenerator, MockEmbedder, MockThesisExtractor};
use enrich_pipeline::{
    PipelineConfig, PipelineController, PipelineError, PipelineStepper, ProgressStore, SlotProgressStore,
    StageRunner, UnitProcessor,
};
use enrich_storage::{ContactStore, Storage, StorageError};
use enrich_types::{Contact, ContactFilter, ContactUpdate, Page, PipelineState, Thesis};

/// Embedding dimension used by the harness embedder.
pub const EMBEDDING_DIM: usize = 8;

/// Shared test harness for E2E tests.
///
/// The mocks are shared by every driver built from the harness, so call
/// counts span "process restarts" within one test.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    pub storage: Arc<Storage>,
    pub bio: Arc<MockBioGenerator>,
    pub thesis: Arc<MockThesisExtractor>,
    pub embedder: Arc<MockEmbedder>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_bio(MockBioGenerator::new())
    }

    /// Harness with a custom bio generator (e.g. one failing for some names).
    pub fn with_bio(bio: MockBioGenerator) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let storage = Arc::new(Storage::open(temp_dir.path()).expect("Failed to open test storage"));

        Self {
            _temp_dir: temp_dir,
            storage,
            bio: Arc::new(bio),
            thesis: Arc::new(MockThesisExtractor::new()),
            embedder: Arc::new(MockEmbedder::new(EMBEDDING_DIM)),
        }
    }

    pub fn processor(&self) -> Arc<UnitProcessor> {
        Arc::new(UnitProcessor::new(
            self.bio.clone(),
            self.thesis.clone(),
            self.embedder.clone(),
        ))
    }

    pub fn runner(&self, config: PipelineConfig) -> Arc<StageRunner> {
        Arc::new(StageRunner::new(self.storage.clone(), self.processor(), config))
    }

    /// A client-driven controller checkpointing to the key/value slot and
    /// holding the owner's lease, like one browser session would.
    pub fn controller(&self, owner_id: &str, config: PipelineConfig) -> Arc<PipelineController> {
        let progress = Arc::new(SlotProgressStore::new(self.storage.clone(), owner_id));
        self.controller_with_progress(owner_id, config, progress)
    }

    pub fn controller_with_progress(
        &self,
        owner_id: &str,
        config: PipelineConfig,
        progress: Arc<dyn ProgressStore>,
    ) -> Arc<PipelineController> {
        Arc::new(PipelineController::new(owner_id, self.runner(config), progress).with_lease(self.storage.clone()))
    }

    pub fn slot_progress(&self, owner_id: &str) -> SlotProgressStore {
        SlotProgressStore::new(self.storage.clone(), owner_id)
    }

    pub fn stepper(&self, config: PipelineConfig) -> PipelineStepper {
        PipelineStepper::new(self.runner(config), self.storage.clone())
    }

    /// Store `count` contacts with ids `c-00`, `c-01`, ... and names
    /// `Person 0`, `Person 1`, ... Returns the ids.
    pub fn seed_contacts(&self, owner_id: &str, count: usize) -> Vec<String> {
        create_test_contacts(owner_id, count)
            .into_iter()
            .map(|contact| {
                self.storage.put_contact(&contact).expect("Failed to put contact");
                contact.id
            })
            .collect()
    }

    pub fn contact(&self, owner_id: &str, id: &str) -> Contact {
        self.storage
            .get_contact(owner_id, id)
            .expect("Failed to read contact")
            .expect("Contact missing")
    }

    /// Whether every seeded contact went through all three stages.
    pub fn fully_enriched(&self, owner_id: &str, ids: &[String]) -> bool {
        ids.iter().all(|id| {
            let contact = self.contact(owner_id, id);
            let has_thesis = self
                .storage
                .get_thesis(owner_id, id)
                .expect("Failed to read thesis")
                .is_some();
            contact.has_bio() && contact.has_embedding() && has_thesis
        })
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Pipeline config without pacing delays.
pub fn fast_config() -> PipelineConfig {
    PipelineConfig::default().without_delays()
}

/// N contacts with zero-padded ids so id order matches creation order.
pub fn create_test_contacts(owner_id: &str, count: usize) -> Vec<Contact> {
    (0..count)
        .map(|i| Contact::new(owner_id, format!("c-{:02}", i), format!("Person {}", i)))
        .collect()
}

/// Progress store that records every saved checkpoint before delegating.
pub struct RecordingProgress {
    inner: SlotProgressStore,
    saved: Mutex<Vec<PipelineState>>,
}

impl RecordingProgress {
    pub fn new(inner: SlotProgressStore) -> Self {
        Self {
            inner,
            saved: Mutex::new(Vec::new()),
        }
    }

    /// Every non-empty checkpoint written so far, in order.
    pub fn saved(&self) -> Vec<PipelineState> {
        self.saved.lock().expect("progress log poisoned").clone()
    }
}

#[async_trait]
impl ProgressStore for RecordingProgress {
    async fn save(&self, state: Option<&PipelineState>) -> Result<(), PipelineError> {
        if let Some(state) = state {
            self.saved.lock().expect("progress log poisoned").push(state.clone());
        }
        self.inner.save(state).await
    }

    async fn load(&self) -> Result<Option<PipelineState>, PipelineError> {
        self.inner.load().await
    }
}

/// Contact store that can be switched off to simulate an outage.
pub struct FlakyStore {
    inner: Arc<Storage>,
    down: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: Arc<Storage>) -> Self {
        Self {
            inner,
            down: AtomicBool::new(false),
        }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ContactStore for FlakyStore {
    async fn select_contacts(&self, filter: &ContactFilter, page: Page) -> Result<Vec<Contact>, StorageError> {
        self.check()?;
        self.inner.select_contacts(filter, page).await
    }

    async fn update_contact(&self, owner_id: &str, id: &str, update: &ContactUpdate) -> Result<(), StorageError> {
        self.check()?;
        self.inner.update_contact(owner_id, id, update).await
    }

    async fn upsert_thesis(&self, thesis: &Thesis) -> Result<(), StorageError> {
        self.check()?;
        self.inner.upsert_thesis(thesis).await
    }
}
