//! Key encoding and decoding for storage layer.
//!
//! Key format: `{prefix}:{owner_id}:{id}`
//! - prefix: identifies the key type (contact, thesis, ...)
//! - owner_id: owner scope, must not contain `:`
//! - id: record identifier, may contain any character
//!
//! Putting the owner first means one owner's rows form a contiguous range
//! ordered by id, which is what keyset pagination scans.

use crate::error::StorageError;

fn check_owner(owner_id: &str) -> Result<(), StorageError> {
    if owner_id.is_empty() {
        return Err(StorageError::Key("owner id is empty".to_string()));
    }
    if owner_id.contains(':') {
        return Err(StorageError::Key(format!(
            "owner id must not contain ':': {}",
            owner_id
        )));
    }
    Ok(())
}

/// Key for contact storage
/// Format: contact:{owner_id}:{contact_id}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactKey {
    pub owner_id: String,
    pub contact_id: String,
}

impl ContactKey {
    pub fn new(owner_id: &str, contact_id: &str) -> Result<Self, StorageError> {
        check_owner(owner_id)?;
        if contact_id.is_empty() {
            return Err(StorageError::Key("contact id is empty".to_string()));
        }
        Ok(Self {
            owner_id: owner_id.to_string(),
            contact_id: contact_id.to_string(),
        })
    }

    /// Prefix shared by every contact of an owner
    pub fn owner_prefix(owner_id: &str) -> Result<Vec<u8>, StorageError> {
        check_owner(owner_id)?;
        Ok(format!("contact:{}:", owner_id).into_bytes())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("contact:{}:{}", self.owner_id, self.contact_id).into_bytes()
    }

    /// Decode key from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;
        let mut parts = s.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some("contact"), Some(owner), Some(id)) => Self::new(owner, id),
            _ => Err(StorageError::Key(format!("Invalid contact key format: {}", s))),
        }
    }
}

/// Key for thesis storage
/// Format: thesis:{owner_id}:{contact_id}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThesisKey {
    pub owner_id: String,
    pub contact_id: String,
}

impl ThesisKey {
    pub fn new(owner_id: &str, contact_id: &str) -> Result<Self, StorageError> {
        check_owner(owner_id)?;
        Ok(Self {
            owner_id: owner_id.to_string(),
            contact_id: contact_id.to_string(),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("thesis:{}:{}", self.owner_id, self.contact_id).into_bytes()
    }
}

/// Key for checkpoint slot entries
/// Format: checkpoint:{name}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointKey {
    /// Slot name (e.g., "pipeline_state:owner-1")
    pub name: String,
}

impl CheckpointKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("checkpoint:{}", self.name).into_bytes()
    }
}

/// Key for per-owner pipeline records
/// Format: record:{owner_id}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordKey {
    pub owner_id: String,
}

impl RecordKey {
    pub const PREFIX: &'static [u8] = b"record:";

    pub fn new(owner_id: &str) -> Result<Self, StorageError> {
        check_owner(owner_id)?;
        Ok(Self {
            owner_id: owner_id.to_string(),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("record:{}", self.owner_id).into_bytes()
    }
}
