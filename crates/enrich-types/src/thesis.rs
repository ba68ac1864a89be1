//! Investment thesis extracted from a contact's profile text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Structured fields returned by the thesis extractor.
///
/// Deserialization is strict: unknown keys or wrongly typed values are
/// rejected instead of being coerced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThesisFields {
    pub sectors: Vec<String>,
    pub stages: Vec<String>,
    pub check_sizes: Vec<String>,
    pub geographies: Vec<String>,
    pub keywords: Vec<String>,
    /// One-sentence summary of what the contact invests in
    pub summary: String,
}

/// Thesis stored for one contact. Written wholesale, never merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thesis {
    pub contact_id: String,
    pub owner_id: String,
    pub sectors: Vec<String>,
    pub stages: Vec<String>,
    pub check_sizes: Vec<String>,
    pub geographies: Vec<String>,
    pub keywords: Vec<String>,
    pub summary: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl Thesis {
    pub fn from_fields(owner_id: impl Into<String>, contact_id: impl Into<String>, fields: ThesisFields) -> Self {
        Self {
            contact_id: contact_id.into(),
            owner_id: owner_id.into(),
            sectors: fields.sectors,
            stages: fields.stages,
            check_sizes: fields.check_sizes,
            geographies: fields.geographies,
            keywords: fields.keywords,
            summary: fields.summary,
            updated_at: Utc::now(),
        }
    }

    /// Serialize thesis to JSON bytes for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize thesis from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_reject_unknown_keys() {
        let json = r#"{"sectors":[],"stages":[],"check_sizes":[],"geographies":[],"keywords":[],"summary":"x","extra":1}"#;
        assert!(serde_json::from_str::<ThesisFields>(json).is_err());
    }

    #[test]
    fn test_fields_reject_wrong_types() {
        let json = r#"{"sectors":"fintech","stages":[],"check_sizes":[],"geographies":[],"keywords":[],"summary":"x"}"#;
        assert!(serde_json::from_str::<ThesisFields>(json).is_err());
    }

    #[test]
    fn test_from_fields_copies_everything() {
        let fields = ThesisFields {
            sectors: vec!["fintech".into()],
            stages: vec!["seed".into()],
            check_sizes: vec!["$100k-$500k".into()],
            geographies: vec!["US".into()],
            keywords: vec!["payments".into()],
            summary: "Seed-stage fintech investor.".into(),
        };
        let thesis = Thesis::from_fields("o", "c-1", fields);

        assert_eq!(thesis.contact_id, "c-1");
        assert_eq!(thesis.sectors, vec!["fintech"]);
        assert_eq!(thesis.summary, "Seed-stage fintech investor.");

        let decoded = Thesis::from_bytes(&thesis.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.keywords, vec!["payments"]);
    }
}
