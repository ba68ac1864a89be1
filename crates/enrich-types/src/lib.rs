//! # enrich-types
//!
//! Shared domain types for the contact enrichment pipeline.
//!
//! This crate defines the core data structures used throughout the system:
//! - Contacts: person/organization records owned by a user scope
//! - Theses: structured investment profiles extracted from a contact's text
//! - Stages and phases: the enrichment sequence and its state machine labels
//! - Pipeline state: the resumable checkpoint persisted between batches
//! - Pipeline records: durable per-owner rows used by scheduled runs
//! - Settings: layered configuration
//!
//! ## Usage
//!
//! ```rust
//! use enrich_types::{Contact, Stage};
//!
//! let contact = Contact::new("owner-1", "c-001", "Ada Lovelace");
//! assert!(Stage::Enrichment.is_eligible(&contact, false));
//! ```

pub mod config;
pub mod contact;
pub mod error;
pub mod filter;
pub mod record;
pub mod stage;
pub mod state;
pub mod thesis;

pub use config::{AiSettings, PipelineSettings, ScheduleSettings, Settings};
pub use contact::{Contact, ContactUpdate};
pub use error::EnrichError;
pub use filter::{Condition, ContactField, ContactFilter, Page};
pub use record::{Lease, PipelineRecord, RunStatus};
pub use stage::{PipelinePhase, Stage};
pub use state::{PipelineState, StageCounters};
pub use thesis::{Thesis, ThesisFields};
