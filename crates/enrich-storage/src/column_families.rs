//! Column family definitions for RocksDB.
//!
//! Each column family isolates data with different access patterns:
//! - contacts: Contact records, mutated in place by the stages
//! - theses: One thesis per contact, upserted wholesale
//! - checkpoints: Key/value slot for client-driven run checkpoints
//! - pipeline_records: Per-owner status, lease and progress of scheduled runs

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Column family name for contact records
pub const CF_CONTACTS: &str = "contacts";

/// Column family name for extracted theses
pub const CF_THESES: &str = "theses";

/// Column family name for run checkpoints
pub const CF_CHECKPOINTS: &str = "checkpoints";

/// Column family name for per-owner pipeline records
pub const CF_PIPELINE_RECORDS: &str = "pipeline_records";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[CF_CONTACTS, CF_THESES, CF_CHECKPOINTS, CF_PIPELINE_RECORDS];

/// Contacts carry embeddings, so compress them
fn contacts_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
    opts
}

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_CONTACTS, contacts_options()),
        ColumnFamilyDescriptor::new(CF_THESES, Options::default()),
        ColumnFamilyDescriptor::new(CF_CHECKPOINTS, Options::default()),
        ColumnFamilyDescriptor::new(CF_PIPELINE_RECORDS, Options::default()),
    ]
}
