//! Error types for the document store.

use crate::types::RecordKey;
use thiserror::Error;

/// Boxed cause carried by backend failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(RecordKey),

    #[error("empty command: nothing to save or delete")]
    EmptyCommand,

    #[error("invalid type: expected {expected}, got {got}")]
    InvalidType { expected: String, got: String },

    #[error("version conflict in {operation} for {key}")]
    VersionConflict {
        operation: &'static str,
        key: RecordKey,
    },

    #[error("internal error in {operation}{}: {source}", .key.as_ref().map(|k| format!(" for {k}")).unwrap_or_default())]
    Internal {
        operation: &'static str,
        key: Option<RecordKey>,
        #[source]
        source: BoxError,
    },

    #[error("syntax error at {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("bind mismatch: missing [{}], extra [{}]", .missing.join(", "), .extra.join(", "))]
    BindMismatch {
        missing: Vec<String>,
        extra: Vec<String>,
    },

    #[error("offset not found: {0}")]
    OffsetNotFound(i64),

    #[error("shape not found: {0}")]
    ShapeNotFound(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Closed classification of [`StoreError`] variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    EmptyCommand,
    InvalidType,
    VersionConflict,
    Internal,
    Syntax,
    BindMismatch,
    OffsetNotFound,
    ShapeNotFound,
    Cancelled,
    Serialization,
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::EmptyCommand => ErrorKind::EmptyCommand,
            StoreError::InvalidType { .. } => ErrorKind::InvalidType,
            StoreError::VersionConflict { .. } => ErrorKind::VersionConflict,
            StoreError::Internal { .. } => ErrorKind::Internal,
            StoreError::Syntax { .. } => ErrorKind::Syntax,
            StoreError::BindMismatch { .. } => ErrorKind::BindMismatch,
            StoreError::OffsetNotFound(_) => ErrorKind::OffsetNotFound,
            StoreError::ShapeNotFound(_) => ErrorKind::ShapeNotFound,
            StoreError::Cancelled => ErrorKind::Cancelled,
            StoreError::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Only version conflicts are expected to be retried by callers.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::VersionConflict
    }

    /// Wrap a backend failure with operation context.
    pub fn internal(
        operation: &'static str,
        key: Option<RecordKey>,
        source: impl Into<BoxError>,
    ) -> Self {
        StoreError::Internal {
            operation,
            key,
            source: source.into(),
        }
    }

    pub(crate) fn invalid_type(expected: impl Into<String>, got: impl Into<String>) -> Self {
        StoreError::InvalidType {
            expected: expected.into(),
            got: got.into(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
