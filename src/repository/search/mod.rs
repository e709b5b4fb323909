//! Search index backend.
//!
//! Records are indexed as JSON documents in their wire shape. Queries compile
//! into structured boolean query bodies; sorting and `search_after`
//! pagination run in the index.

mod client;
mod memory;
pub mod query;
mod repository;

pub use client::{Hit, IndexCondition, SearchClient, SearchError, SearchResponse};
pub use memory::MemoryIndex;
pub use query::{compile_filter, search_body};
pub use repository::{document_id, SearchRepository};

use serde::Deserialize;

/// Configuration for [`SearchRepository`].
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Index holding every record type.
    pub index_name: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            index_name: "records".to_string(),
        }
    }
}
