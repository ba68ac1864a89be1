//! Contact seeding from a JSON file.
//!
//! The file holds an array of objects with `id` and `name` and optional
//! `company`, `title`, `bio` and `investor_notes`. Enrichment output
//! (embeddings, theses) is never imported.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use enrich_types::Contact;

#[derive(Error, Debug)]
pub enum SeedError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid contact file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Contact #{0} has an empty id")]
    EmptyId(usize),

    #[error("Duplicate contact id: {0}")]
    DuplicateId(String),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SeedContact {
    id: String,
    name: String,
    #[serde(default)]
    company: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    bio: Option<String>,
    #[serde(default)]
    investor_notes: Option<String>,
}

impl SeedContact {
    fn into_contact(self, owner_id: &str) -> Contact {
        let mut contact = Contact::new(owner_id, self.id.trim(), self.name);
        contact.company = self.company;
        contact.title = self.title;
        contact.bio = self.bio;
        contact.investor_notes = self.investor_notes;
        contact
    }
}

/// Parse seed JSON into contacts owned by `owner_id`.
pub fn parse_contacts(json: &str, owner_id: &str) -> Result<Vec<Contact>, SeedError> {
    let seeds: Vec<SeedContact> = serde_json::from_str(json)?;
    let mut seen = HashSet::new();
    let mut contacts = Vec::with_capacity(seeds.len());

    for (index, seed) in seeds.into_iter().enumerate() {
        if seed.id.trim().is_empty() {
            return Err(SeedError::EmptyId(index));
        }
        if !seen.insert(seed.id.trim().to_string()) {
            return Err(SeedError::DuplicateId(seed.id));
        }
        contacts.push(seed.into_contact(owner_id));
    }
    Ok(contacts)
}

/// Read and parse a seed file. `~` in the path is expanded.
pub fn load_contacts(path: &str, owner_id: &str) -> Result<Vec<Contact>, SeedError> {
    let path = PathBuf::from(shellexpand::tilde(path).as_ref());
    let json = std::fs::read_to_string(&path).map_err(|source| SeedError::Io {
        path: path.clone(),
        source,
    })?;
    parse_contacts(&json, owner_id)
}

/// Whether `path` looks like a seed file (used for friendlier errors).
pub fn is_json_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}
