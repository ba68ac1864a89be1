//! One enrichment operation for one contact.
//!
//! `produce` is a pure function of the contact plus one remote call; `apply`
//! writes the result back. Every error is returned as a [`UnitError`] and the
//! runner turns it into a failure count, so one contact can never take down
//! its batch.

use std::sync::Arc;
use thiserror::Error;

use enrich_ai::{truncate_chars, AiError, BioGenerator, BioRequest, Embedder, ThesisExtractor};
use enrich_storage::{ContactStore, StorageError};
use enrich_types::{Contact, ContactUpdate, Stage, Thesis};

/// Partial update produced by one stage.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitUpdate {
    Contact(ContactUpdate),
    Thesis(Thesis),
}

#[derive(Debug, Error)]
pub enum UnitError {
    #[error("AI call failed: {0}")]
    Ai(#[from] AiError),

    #[error("Profile text too short to embed ({len} < {min} chars)")]
    InsufficientProfile { len: usize, min: usize },

    #[error("Failed to store result: {0}")]
    Storage(#[from] StorageError),
}

pub struct UnitProcessor {
    bio: Arc<dyn BioGenerator>,
    thesis: Arc<dyn ThesisExtractor>,
    embedder: Arc<dyn Embedder>,
    embedding_max_chars: usize,
    min_profile_chars: usize,
}

impl UnitProcessor {
    pub fn new(
        bio: Arc<dyn BioGenerator>,
        thesis: Arc<dyn ThesisExtractor>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            bio,
            thesis,
            embedder,
            embedding_max_chars: 8000,
            min_profile_chars: 20,
        }
    }

    pub fn with_embedding_max_chars(mut self, max: usize) -> Self {
        self.embedding_max_chars = max;
        self
    }

    pub fn with_min_profile_chars(mut self, min: usize) -> Self {
        self.min_profile_chars = min;
        self
    }

    /// Run the remote operation of `stage` for `contact`.
    pub async fn produce(&self, stage: Stage, contact: &Contact) -> Result<UnitUpdate, UnitError> {
        match stage {
            Stage::Enrichment => {
                let profile = self.bio.generate_bio(&BioRequest::from_contact(contact)).await?;
                let mut update = ContactUpdate::bio(profile.bio);
                if let Some(title) = profile.title {
                    update = update.with_title(title);
                }
                if let Some(company) = profile.company {
                    update = update.with_company(company);
                }
                Ok(UnitUpdate::Contact(update))
            }
            Stage::Extraction => {
                let fields = self.thesis.extract_thesis(&contact.profile_text()).await?;
                Ok(UnitUpdate::Thesis(Thesis::from_fields(
                    &contact.owner_id,
                    &contact.id,
                    fields,
                )))
            }
            Stage::Embedding => {
                let text = contact.profile_text();
                let len = text.chars().count();
                if len < self.min_profile_chars {
                    return Err(UnitError::InsufficientProfile {
                        len,
                        min: self.min_profile_chars,
                    });
                }
                let vector = self
                    .embedder
                    .embed(truncate_chars(&text, self.embedding_max_chars))
                    .await?;
                Ok(UnitUpdate::Contact(ContactUpdate::embedding(vector)))
            }
        }
    }

    /// Write a produced update back to storage.
    pub async fn apply(
        &self,
        store: &dyn ContactStore,
        contact: &Contact,
        update: &UnitUpdate,
    ) -> Result<(), UnitError> {
        match update {
            UnitUpdate::Contact(fields) => {
                store
                    .update_contact(&contact.owner_id, &contact.id, fields)
                    .await?
            }
            UnitUpdate::Thesis(thesis) => store.upsert_thesis(thesis).await?,
        }
        Ok(())
    }

    /// Produce and apply.
    pub async fn process(
        &self,
        store: &dyn ContactStore,
        stage: Stage,
        contact: &Contact,
    ) -> Result<(), UnitError> {
        let update = self.produce(stage, contact).await?;
        self.apply(store, contact, &update).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enrich_ai::{MockBioGenerator, MockEmbedder, MockThesisExtractor};
    use enrich_storage::Storage;
    use tempfile::TempDir;

    fn processor(bio: MockBioGenerator) -> UnitProcessor {
        UnitProcessor::new(
            Arc::new(bio),
            Arc::new(MockThesisExtractor::new()),
            Arc::new(MockEmbedder::new(4)),
        )
    }

    #[tokio::test]
    async fn test_enrichment_produces_bio() {
        let contact = Contact::new("o", "c", "Ada").with_company("Engines");
        let update = processor(MockBioGenerator::new())
            .produce(Stage::Enrichment, &contact)
            .await
            .unwrap();

        match update {
            UnitUpdate::Contact(fields) => {
                assert!(fields.bio.unwrap().starts_with("Ada at Engines"));
                assert!(fields.embedding.is_none());
            }
            other => panic!("unexpected update {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_enrichment_failure_is_typed() {
        let contact = Contact::new("o", "c", "Ada");
        let err = processor(MockBioGenerator::failing_for(["Ada"]))
            .produce(Stage::Enrichment, &contact)
            .await
            .unwrap_err();
        assert!(matches!(err, UnitError::Ai(_)));
    }

    #[tokio::test]
    async fn test_extraction_produces_thesis_for_contact() {
        let contact = Contact::new("o", "c-7", "Ada").with_bio("Backs developer tooling startups.");
        let update = processor(MockBioGenerator::new())
            .produce(Stage::Extraction, &contact)
            .await
            .unwrap();

        match update {
            UnitUpdate::Thesis(thesis) => {
                assert_eq!(thesis.contact_id, "c-7");
                assert_eq!(thesis.owner_id, "o");
            }
            other => panic!("unexpected update {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_embedding_requires_profile_text() {
        let contact = Contact::new("o", "c", "Ada").with_bio("short");
        let err = processor(MockBioGenerator::new())
            .produce(Stage::Embedding, &contact)
            .await
            .unwrap_err();
        assert!(matches!(err, UnitError::InsufficientProfile { len: 5, min: 20 }));
    }

    #[tokio::test]
    async fn test_embedding_input_is_truncated() {
        let embedder = Arc::new(MockEmbedder::new(4));
        let processor = UnitProcessor::new(
            Arc::new(MockBioGenerator::new()),
            Arc::new(MockThesisExtractor::new()),
            embedder.clone(),
        )
        .with_embedding_max_chars(30);

        let contact = Contact::new("o", "c", "Ada").with_bio("x".repeat(100));
        processor.produce(Stage::Embedding, &contact).await.unwrap();

        assert_eq!(embedder.calls()[0].chars().count(), 30);
    }

    #[tokio::test]
    async fn test_process_writes_back() {
        let temp = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(temp.path()).unwrap());
        let contact = Contact::new("o", "c", "Ada");
        storage.put_contact(&contact).unwrap();

        let processor = processor(MockBioGenerator::new());
        processor
            .process(storage.as_ref(), Stage::Enrichment, &contact)
            .await
            .unwrap();
        let enriched = storage.get_contact("o", "c").unwrap().unwrap();
        assert!(enriched.has_bio());

        processor
            .process(storage.as_ref(), Stage::Extraction, &enriched)
            .await
            .unwrap();
        assert!(storage.get_thesis("o", "c").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_apply_to_missing_contact_fails() {
        let temp = TempDir::new().unwrap();
        let storage = Storage::open(temp.path()).unwrap();
        let ghost = Contact::new("o", "ghost", "Nobody");

        let err = processor(MockBioGenerator::new())
            .process(&storage, Stage::Enrichment, &ghost)
            .await
            .unwrap_err();
        assert!(matches!(err, UnitError::Storage(_)));
    }
}
