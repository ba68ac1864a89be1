//! Contact records.
//!
//! Contacts are created outside the pipeline (import, manual entry) and are
//! mutated in place by each enrichment stage. The pipeline never deletes them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A person or organization in an owner's contact database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    /// Identifier, unique within the owner scope
    pub id: String,

    /// Owner scope the contact belongs to
    pub owner_id: String,

    /// Display name
    pub name: String,

    #[serde(default)]
    pub company: Option<String>,

    #[serde(default)]
    pub title: Option<String>,

    /// Generated or imported biography
    #[serde(default)]
    pub bio: Option<String>,

    /// Free-text notes about the contact's investing activity
    #[serde(default)]
    pub investor_notes: Option<String>,

    /// Embedding of the profile text, absent until the embedding stage ran
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

/// Returns the value when it holds more than whitespace.
fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl Contact {
    /// Create a contact with only the required fields set.
    pub fn new(owner_id: impl Into<String>, id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            name: name.into(),
            company: None,
            title: None,
            bio: None,
            investor_notes: None,
            embedding: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = Some(company.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_bio(mut self, bio: impl Into<String>) -> Self {
        self.bio = Some(bio.into());
        self
    }

    pub fn with_investor_notes(mut self, notes: impl Into<String>) -> Self {
        self.investor_notes = Some(notes.into());
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn has_name(&self) -> bool {
        !self.name.trim().is_empty()
    }

    /// Blank biographies count as missing.
    pub fn has_bio(&self) -> bool {
        present(&self.bio).is_some()
    }

    pub fn has_title(&self) -> bool {
        present(&self.title).is_some()
    }

    pub fn has_company(&self) -> bool {
        present(&self.company).is_some()
    }

    pub fn has_investor_notes(&self) -> bool {
        present(&self.investor_notes).is_some()
    }

    /// Empty vectors count as missing.
    pub fn has_embedding(&self) -> bool {
        self.embedding.as_ref().is_some_and(|e| !e.is_empty())
    }

    /// Text used for thesis extraction and embedding: biography, title and
    /// investor notes, skipping the ones that are missing.
    pub fn profile_text(&self) -> String {
        let mut parts = Vec::with_capacity(3);
        if let Some(bio) = present(&self.bio) {
            parts.push(bio.to_string());
        }
        if let Some(title) = present(&self.title) {
            parts.push(format!("Title: {}", title));
        }
        if let Some(notes) = present(&self.investor_notes) {
            parts.push(format!("Investor notes: {}", notes));
        }
        parts.join("\n")
    }

    /// Apply a partial update produced by one stage.
    pub fn apply(&mut self, update: &ContactUpdate) {
        if let Some(bio) = &update.bio {
            self.bio = Some(bio.clone());
        }
        if let Some(title) = &update.title {
            self.title = Some(title.clone());
        }
        if let Some(company) = &update.company {
            self.company = Some(company.clone());
        }
        if let Some(embedding) = &update.embedding {
            self.embedding = Some(embedding.clone());
        }
        self.updated_at = Utc::now();
    }

    /// Serialize contact to JSON bytes for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize contact from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Partial contact update. Only the `Some` fields are written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl ContactUpdate {
    pub fn bio(bio: impl Into<String>) -> Self {
        Self {
            bio: Some(bio.into()),
            ..Default::default()
        }
    }

    pub fn embedding(embedding: Vec<f32>) -> Self {
        Self {
            embedding: Some(embedding),
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = Some(company.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.bio.is_none() && self.title.is_none() && self.company.is_none() && self.embedding.is_none()
    }
}
