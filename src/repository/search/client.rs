//! Native search index interface.

use crate::types::Version;
use serde_json::Value as Json;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    /// A conditional index request found a different stored document.
    #[error("document {id} changed concurrently")]
    VersionConflict { id: String },

    #[error("malformed query: {0}")]
    Query(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Precondition for an index request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexCondition {
    Any,
    /// Create only.
    MustNotExist,
    /// The stored document's `Version` field must equal this.
    IfStoredVersion(Version),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Hit {
    pub id: String,
    pub source: Json,
    /// Sort values of this hit, usable as `search_after`.
    pub sort: Vec<Json>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SearchResponse {
    pub hits: Vec<Hit>,
}

/// Operations the search repository needs from a search service.
pub trait SearchClient: Send + Sync {
    fn get(&self, index: &str, id: &str) -> Result<Option<Json>, SearchError>;

    fn index(
        &self,
        index: &str,
        id: &str,
        document: Json,
        condition: IndexCondition,
    ) -> Result<(), SearchError>;

    /// Deleting a missing document succeeds.
    fn delete(&self, index: &str, id: &str) -> Result<(), SearchError>;

    fn search(&self, index: &str, body: &Json) -> Result<SearchResponse, SearchError>;
}

impl<C: SearchClient + ?Sized> SearchClient for Arc<C> {
    fn get(&self, index: &str, id: &str) -> Result<Option<Json>, SearchError> {
        (**self).get(index, id)
    }

    fn index(
        &self,
        index: &str,
        id: &str,
        document: Json,
        condition: IndexCondition,
    ) -> Result<(), SearchError> {
        (**self).index(index, id, document, condition)
    }

    fn delete(&self, index: &str, id: &str) -> Result<(), SearchError> {
        (**self).delete(index, id)
    }

    fn search(&self, index: &str, body: &Json) -> Result<SearchResponse, SearchError> {
        (**self).search(index, body)
    }
}
