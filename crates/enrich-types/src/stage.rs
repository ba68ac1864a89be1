//! Enrichment stages and pipeline phases.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::contact::Contact;
use crate::filter::{ContactField, ContactFilter};

/// One AI-driven enrichment step applied to a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Generate a biography from name, company and title
    Enrichment,
    /// Extract a structured thesis from the profile text
    Extraction,
    /// Compute the profile embedding
    Embedding,
}

impl Stage {
    /// Stages in execution order.
    pub const ALL: [Stage; 3] = [Stage::Enrichment, Stage::Extraction, Stage::Embedding];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Enrichment => "enrichment",
            Stage::Extraction => "extraction",
            Stage::Embedding => "embedding",
        }
    }

    /// Selection predicate for contacts that still need this stage.
    ///
    /// - enrichment: has a name, no biography
    /// - extraction: has a biography, no thesis
    /// - embedding: has a biography, no embedding
    pub fn filter(&self, owner_id: &str) -> ContactFilter {
        let filter = ContactFilter::owner(owner_id);
        match self {
            Stage::Enrichment => filter
                .not_null(ContactField::Name)
                .is_null(ContactField::Bio),
            Stage::Extraction => filter.not_null(ContactField::Bio).thesis_missing(),
            Stage::Embedding => filter
                .not_null(ContactField::Bio)
                .is_null(ContactField::Embedding),
        }
    }

    pub fn is_eligible(&self, contact: &Contact, has_thesis: bool) -> bool {
        self.filter(&contact.owner_id).matches(contact, has_thesis)
    }

    /// Default number of contacts processed concurrently.
    pub fn default_group_size(&self) -> usize {
        match self {
            Stage::Enrichment => 3,
            Stage::Extraction | Stage::Embedding => 5,
        }
    }

    /// Default pause between concurrency groups, in milliseconds.
    pub fn default_delay_ms(&self) -> u64 {
        match self {
            Stage::Enrichment => 3000,
            Stage::Extraction | Stage::Embedding => 2000,
        }
    }

    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Enrichment => Some(Stage::Extraction),
            Stage::Extraction => Some(Stage::Embedding),
            Stage::Embedding => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase of a scheduled pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    Enrichment,
    Extraction,
    Embedding,
    #[default]
    Idle,
    Failed,
}

impl PipelinePhase {
    /// The stage executed in this phase, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelinePhase::Enrichment => Some(Stage::Enrichment),
            PipelinePhase::Extraction => Some(Stage::Extraction),
            PipelinePhase::Embedding => Some(Stage::Embedding),
            PipelinePhase::Idle | PipelinePhase::Failed => None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.stage().is_some()
    }
}

impl From<Stage> for PipelinePhase {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Enrichment => PipelinePhase::Enrichment,
            Stage::Extraction => PipelinePhase::Extraction,
            Stage::Embedding => PipelinePhase::Embedding,
        }
    }
}

impl fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelinePhase::Idle => write!(f, "idle"),
            PipelinePhase::Failed => write!(f, "failed"),
            active => match active.stage() {
                Some(stage) => write!(f, "{}", stage),
                None => Ok(()),
            },
        }
    }
}
