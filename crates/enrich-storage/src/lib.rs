//! Storage layer for the contact enrichment pipeline.
//!
//! Provides RocksDB-backed storage with:
//! - Column family isolation for contacts, theses, checkpoints and pipeline records
//! - Owner-prefixed keys so one owner's contacts scan in id order
//! - Keyset pagination with AND-combined null/not-null filters
//! - Lease compare-and-swap on per-owner pipeline records
//!
//! The pipeline only depends on the traits in [`store`]; [`Storage`] is the
//! embedded implementation.

pub mod column_families;
pub mod db;
pub mod error;
pub mod keys;
pub mod store;

pub use db::{Storage, StorageStats};
pub use error::StorageError;
pub use keys::{CheckpointKey, ContactKey, RecordKey, ThesisKey};
pub use store::{ContactStore, KeyValueSlot, PipelineRecordStore};
