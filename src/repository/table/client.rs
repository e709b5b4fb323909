//! Native column-family table interface.

use super::attribute::Item;
use super::expression::Expression;
use std::sync::Arc;
use thiserror::Error;

/// Failures reported by a table client.
#[derive(Debug, Error)]
pub enum TableError {
    /// A transaction was rejected. One entry per write, in request order;
    /// `Some(code)` for the writes that caused the rejection.
    #[error("transaction canceled: {reasons:?}")]
    TransactionCanceled { reasons: Vec<Option<String>> },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Cancellation code of a failed write condition.
pub const CONDITIONAL_CHECK_FAILED: &str = "ConditionalCheckFailed";

#[derive(Clone, Debug, Default)]
pub struct ScanRequest {
    pub table: String,
    pub filter: Option<Expression>,
    pub exclusive_start_key: Option<Item>,
    /// Rows examined per call; 0 for the backend default.
    pub limit: usize,
}

#[derive(Clone, Debug, Default)]
pub struct ScanOutput {
    pub items: Vec<Item>,
    /// Present when more rows remain after this page.
    pub last_evaluated_key: Option<Item>,
}

#[derive(Clone, Debug)]
pub enum WriteOp {
    Put {
        item: Item,
        condition: Option<Expression>,
    },
    Delete {
        key: Item,
        condition: Option<Expression>,
    },
}

/// Operations the table repository needs from a table service.
pub trait TableClient: Send + Sync {
    fn get_item(&self, table: &str, key: &Item) -> Result<Option<Item>, TableError>;

    fn scan(&self, request: &ScanRequest) -> Result<ScanOutput, TableError>;

    /// Apply every write or none of them.
    fn transact_write(&self, table: &str, ops: Vec<WriteOp>) -> Result<(), TableError>;
}

impl<C: TableClient + ?Sized> TableClient for Arc<C> {
    fn get_item(&self, table: &str, key: &Item) -> Result<Option<Item>, TableError> {
        (**self).get_item(table, key)
    }

    fn scan(&self, request: &ScanRequest) -> Result<ScanOutput, TableError> {
        (**self).scan(request)
    }

    fn transact_write(&self, table: &str, ops: Vec<WriteOp>) -> Result<(), TableError> {
        (**self).transact_write(table, ops)
    }
}
