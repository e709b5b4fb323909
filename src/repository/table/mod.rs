//! Column-family table backend.
//!
//! Records are stored as attribute-value items. Queries compile into
//! conditional-expression filters with `#name` / `:value` placeholders and
//! run as paged scans; sorting and cursor pagination happen client side.

pub mod attribute;
mod client;
pub mod expression;
mod memory;
mod repository;

pub use attribute::{AttributeValue, Item};
pub use client::{
    ScanOutput, ScanRequest, TableClient, TableError, WriteOp, CONDITIONAL_CHECK_FAILED,
};
pub use expression::{compile, Expression};
pub use memory::MemoryTable;
pub use repository::TableRepository;

use serde::Deserialize;

/// Configuration for [`TableRepository`].
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    /// Table holding every record type.
    pub table_name: String,

    /// Rows examined per scan request.
    pub scan_page_size: usize,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            table_name: "records".to_string(),
            scan_page_size: 100,
        }
    }
}
