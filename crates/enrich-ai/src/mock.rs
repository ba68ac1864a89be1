//! Deterministic AI collaborators for testing.
//!
//! Each mock records the inputs it was called with so tests can assert that
//! no contact was sent twice, and can be told to fail for chosen inputs.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;

use enrich_types::ThesisFields;

use crate::bio::{BioGenerator, BioProfile, BioRequest};
use crate::embedding::{normalize, Embedder};
use crate::error::AiError;
use crate::thesis::ThesisExtractor;

#[derive(Default)]
struct CallLog(Mutex<Vec<String>>);

impl CallLog {
    fn push(&self, input: &str) {
        if let Ok(mut calls) = self.0.lock() {
            calls.push(input.to_string());
        }
    }

    fn snapshot(&self) -> Vec<String> {
        self.0.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

/// Mock bio generator. Fails for contacts whose name is in the failure set.
#[derive(Default)]
pub struct MockBioGenerator {
    failing: HashSet<String>,
    calls: CallLog,
}

impl MockBioGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every request for the given contact names.
    pub fn failing_for<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            failing: names.into_iter().map(Into::into).collect(),
            calls: CallLog::default(),
        }
    }

    /// Names requested so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.snapshot()
    }

    pub fn call_count(&self) -> usize {
        self.calls().len()
    }
}

#[async_trait]
impl BioGenerator for MockBioGenerator {
    async fn generate_bio(&self, request: &BioRequest) -> Result<BioProfile, AiError> {
        self.calls.push(&request.name);
        if self.failing.contains(&request.name) {
            return Err(AiError::ApiError(format!("mock failure for {}", request.name)));
        }

        let at = request
            .company
            .as_deref()
            .map(|c| format!(" at {}", c))
            .unwrap_or_default();
        Ok(BioProfile {
            bio: format!(
                "{}{} is an early-stage investor focused on software companies.",
                request.name, at
            ),
            title: None,
            company: None,
        })
    }
}

/// Mock thesis extractor. Fails when the text contains a marker.
#[derive(Default)]
pub struct MockThesisExtractor {
    fail_marker: Option<String>,
    calls: CallLog,
}

impl MockThesisExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(marker: impl Into<String>) -> Self {
        Self {
            fail_marker: Some(marker.into()),
            calls: CallLog::default(),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.snapshot()
    }

    pub fn call_count(&self) -> usize {
        self.calls().len()
    }
}

#[async_trait]
impl ThesisExtractor for MockThesisExtractor {
    async fn extract_thesis(&self, profile_text: &str) -> Result<ThesisFields, AiError> {
        self.calls.push(profile_text);
        if let Some(marker) = &self.fail_marker {
            if profile_text.contains(marker.as_str()) {
                return Err(AiError::ParseError("mock shape mismatch".to_string()));
            }
        }

        let keywords: Vec<String> = profile_text
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
            .filter(|w| w.len() > 6)
            .take(5)
            .collect();

        Ok(ThesisFields {
            sectors: vec!["software".to_string()],
            stages: vec!["seed".to_string()],
            check_sizes: Vec::new(),
            geographies: Vec::new(),
            keywords,
            summary: "Invests in early-stage software companies.".to_string(),
        })
    }
}

/// Mock embedder producing hash-derived unit vectors.
pub struct MockEmbedder {
    dimension: usize,
    fail_marker: Option<String>,
    calls: CallLog,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            fail_marker: None,
            calls: CallLog::default(),
        }
    }

    pub fn failing_on(dimension: usize, marker: impl Into<String>) -> Self {
        Self {
            fail_marker: Some(marker.into()),
            ..Self::new(dimension)
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.snapshot()
    }

    pub fn call_count(&self) -> usize {
        self.calls().len()
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(8)
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, AiError> {
        self.calls.push(text);
        if let Some(marker) = &self.fail_marker {
            if text.contains(marker.as_str()) {
                return Err(AiError::Timeout);
            }
        }

        // FNV-1a seeded per component
        let values = (0..self.dimension)
            .map(|i| {
                let mut hash: u32 = 0x811c_9dc5 ^ i as u32;
                for byte in text.bytes() {
                    hash ^= byte as u32;
                    hash = hash.wrapping_mul(0x0100_0193);
                }
                (hash % 1000) as f32 / 1000.0 + 0.001
            })
            .collect();
        Ok(normalize(values))
    }
}
