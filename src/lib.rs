//! # Document Store
//!
//! A schema-less document store core: records of arbitrary shape, a portable
//! predicate language, optimistic concurrency, and change capture.
//!
//! ## Core Concepts
//!
//! - **Records**: `(ID, Type)`-keyed documents with a version counter
//! - **Predicates**: one query language compiled to every backend's filters
//! - **Repositories**: in-process, column-family table and search index backends
//! - **Change log**: ordered change stream with independent subscribers
//! - **Aggregators**: keyed secondary indices folded from base-record writes
//!
//! ## Example
//!
//! ```ignore
//! use docstore::{where_, FindingRecords, MemoryRepository, ParamBinds, Record, Repository,
//!     UpdateRecords, Value};
//!
//! let repo = MemoryRepository::new();
//! repo.update_records(UpdateRecords::save(vec![Record::new(
//!     "o1",
//!     "orders",
//!     Value::map([("status", Value::from("pending"))]),
//! )]))?;
//!
//! let mut params = ParamBinds::new();
//! params.insert("status".into(), Value::from("pending"));
//! let page = repo.find_records(
//!     &FindingRecords::of_type("orders").filter(where_("Data.status = :status", params)?),
//! )?;
//! ```

pub mod aggregate;
pub mod changelog;
pub mod error;
pub mod predicate;
pub mod repository;
pub mod shape;
pub mod types;
pub mod value;

// Re-exports
pub use aggregate::{AggregatingRepository, AggregationBatch, Aggregator};
pub use changelog::{AppendLog, CancelToken, Puller, PullerConfig, FROM_EARLIEST, FROM_LATEST};
pub use error::{ErrorKind, Result, StoreError};
pub use predicate::{evaluate, optimize, parse, where_, ParamBinds, Predicate, WherePredicates};
pub use repository::{
    find_all, Cursor, MemoryRepository, Repository, SearchRepository, TableRepository,
    TypedRepository,
};
pub use shape::{location_for, predicate_for, Shape, Shaped, TypedPath};
pub use types::*;
pub use value::{Location, Value};
