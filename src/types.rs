//! Core types for the document store.

use crate::predicate::{optimize, ParamBinds, Predicate, WherePredicates};
use crate::value::{Location, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Record version; incremented by exactly one on every successful write.
pub type Version = u16;

/// Primary key of a record: `(ID, Type)`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub id: String,
    pub record_type: String,
}

impl RecordKey {
    pub fn new(id: impl Into<String>, record_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            record_type: record_type.into(),
        }
    }
}

impl fmt::Debug for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordKey({}/{})", self.record_type, self.id)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.record_type, self.id)
    }
}

/// A versioned, typed, identified unit of stored data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record<T> {
    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "Type")]
    pub record_type: String,

    #[serde(rename = "Data")]
    pub data: T,

    #[serde(rename = "Version")]
    pub version: Version,
}

impl<T> Record<T> {
    /// New record at version 0.
    pub fn new(id: impl Into<String>, record_type: impl Into<String>, data: T) -> Self {
        Self {
            id: id.into(),
            record_type: record_type.into(),
            data,
            version: 0,
        }
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.id.clone(), self.record_type.clone())
    }

    /// Replace the payload, keeping identity and version.
    pub fn map_data<U>(self, f: impl FnOnce(T) -> U) -> Record<U> {
        Record {
            id: self.id,
            record_type: self.record_type,
            data: f(self.data),
            version: self.version,
        }
    }
}

impl Record<Value> {
    /// The record as a document, the shape predicates and sort fields address:
    /// `{"ID": .., "Type": .., "Data": .., "Version": ..}`.
    pub fn to_document(&self) -> Value {
        Value::map([
            ("ID", Value::from(self.id.as_str())),
            ("Type", Value::from(self.record_type.as_str())),
            ("Data", self.data.clone()),
            ("Version", Value::from(self.version)),
        ])
    }
}

/// A single mutation observed on a record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Change<T> {
    /// Absent on pure insert.
    pub before: Option<Record<T>>,
    /// Absent on pure delete.
    pub after: Option<Record<T>>,
    pub deleted: bool,
    /// Position in the log the change was appended to.
    pub offset: i64,
}

impl<T> Change<T> {
    pub fn key(&self) -> Option<RecordKey> {
        self.after
            .as_ref()
            .or(self.before.as_ref())
            .map(Record::key)
    }
}

/// How `update_records` treats the versions supplied by the caller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdatingPolicy {
    /// Every saved record's version must equal the stored version.
    #[default]
    IfServerUnchanged,
    /// Supplied versions are ignored; last writer wins.
    OverwriteServerChanges,
}

/// A batch of saves and deletes applied as one unit.
#[derive(Clone, Debug, PartialEq)]
pub struct UpdateRecords<T> {
    pub saving: Vec<Record<T>>,
    pub deleting: Vec<Record<T>>,
    pub policy: UpdatingPolicy,
    /// Saved keys that must not exist when the batch commits, under either
    /// policy. A create stores version 0 just like the record it would
    /// replace, so the declared version alone cannot tell the two apart.
    pub creating: BTreeSet<RecordKey>,
}

impl<T> Default for UpdateRecords<T> {
    fn default() -> Self {
        Self {
            saving: Vec::new(),
            deleting: Vec::new(),
            policy: UpdatingPolicy::default(),
            creating: BTreeSet::new(),
        }
    }
}

impl<T> UpdateRecords<T> {
    pub fn save(records: Vec<Record<T>>) -> Self {
        Self {
            saving: records,
            ..Default::default()
        }
    }

    pub fn delete(records: Vec<Record<T>>) -> Self {
        Self {
            deleting: records,
            ..Default::default()
        }
    }

    /// Batch saving records that must not exist yet.
    pub fn create(records: Vec<Record<T>>) -> Self {
        let creating = records.iter().map(Record::key).collect();
        Self {
            saving: records,
            creating,
            ..Default::default()
        }
    }

    pub fn with_policy(mut self, policy: UpdatingPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Require `key` to be absent when the batch commits.
    pub fn expecting_absent(mut self, key: RecordKey) -> Self {
        self.creating.insert(key);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.saving.is_empty() && self.deleting.is_empty()
    }
}

/// Outcome of a committed batch.
#[derive(Clone, Debug, PartialEq)]
pub struct UpdateRecordsResult<T> {
    /// Saved records with their new stored versions.
    pub saved: Vec<Record<T>>,
    pub deleted: Vec<RecordKey>,
}

/// One sort key of a query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SortField {
    pub location: Location,
    pub descending: bool,
}

impl SortField {
    pub fn asc(location: Location) -> Self {
        Self {
            location,
            descending: false,
        }
    }

    pub fn desc(location: Location) -> Self {
        Self {
            location,
            descending: true,
        }
    }
}

/// Query over stored records.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FindingRecords {
    pub record_type: Option<String>,
    pub where_: Option<WherePredicates>,
    pub sort: Vec<SortField>,
    /// Page size; 0 means unlimited.
    pub limit: usize,
    /// Opaque continuation token from a previous page.
    pub after: Option<String>,
}

impl FindingRecords {
    pub fn of_type(record_type: impl Into<String>) -> Self {
        Self {
            record_type: Some(record_type.into()),
            ..Default::default()
        }
    }

    pub fn filter(mut self, where_: WherePredicates) -> Self {
        self.where_ = Some(where_);
        self
    }

    pub fn sort_by(mut self, field: SortField) -> Self {
        self.sort.push(field);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn after(mut self, cursor: impl Into<String>) -> Self {
        self.after = Some(cursor.into());
        self
    }

    /// The caller's predicate ANDed with the type filter, optimized, plus
    /// its bindings. `None` when nothing filters.
    pub fn effective_predicate(&self) -> Option<(Predicate, ParamBinds)> {
        let mut parts = Vec::new();
        if let Some(record_type) = &self.record_type {
            parts.push(Predicate::literal(
                Location::fields(["Type"]),
                crate::predicate::Operator::Eq,
                record_type.as_str(),
            ));
        }
        let mut params = ParamBinds::new();
        if let Some(where_) = &self.where_ {
            parts.push(where_.predicate.clone());
            params = where_.params.clone();
        }
        if parts.is_empty() {
            return None;
        }
        Some((optimize(&Predicate::And(parts)), params))
    }
}

/// One page of query results.
#[derive(Clone, Debug, PartialEq)]
pub struct PageResult<T> {
    pub items: Vec<Record<T>>,
    /// Query for the following page, if any records remain.
    pub next: Option<FindingRecords>,
}

impl<T> PageResult<T> {
    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }
}
