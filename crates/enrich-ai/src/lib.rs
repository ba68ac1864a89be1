//! Remote AI collaborators of the enrichment pipeline.
//!
//! Three narrow async traits, one per stage:
//! - [`BioGenerator`]: name/company/title in, biography out
//! - [`ThesisExtractor`]: profile text in, typed [`ThesisFields`] out
//! - [`Embedder`]: bounded text in, fixed-length vector out
//!
//! The `Api*` implementations talk to OpenAI-compatible or Anthropic
//! endpoints with retry and exponential backoff. The `Mock*` ones are
//! deterministic and used by tests and `provider = "mock"`.
//!
//! [`ThesisFields`]: enrich_types::ThesisFields

mod bio;
mod client;
mod embedding;
mod error;
mod mock;
mod thesis;

pub use bio::{ApiBioGenerator, BioGenerator, BioProfile, BioRequest};
pub use client::{ApiClient, ApiClientConfig};
pub use embedding::{normalize, truncate_chars, ApiEmbedder, Embedder};
pub use error::AiError;
pub use mock::{MockBioGenerator, MockEmbedder, MockThesisExtractor};
pub use thesis::{parse_thesis, ApiThesisExtractor, ThesisExtractor};
