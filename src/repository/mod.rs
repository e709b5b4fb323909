//! Repository contract and its backends.
//!
//! Every backend stores [`Record<Value>`]s keyed by `(ID, Type)` and honors
//! the same optimistic concurrency and query semantics:
//!
//! - [`MemoryRepository`]: in-process reference store.
//! - [`TableRepository`]: compiles predicates into conditional-expression
//!   filters for a column-family table.
//! - [`SearchRepository`]: compiles predicates into structured boolean query
//!   bodies for a search index.

mod cursor;
mod memory;
pub mod search;
pub mod table;

pub use cursor::Cursor;
pub use memory::MemoryRepository;
pub use search::SearchRepository;
pub use table::TableRepository;

use crate::error::{Result, StoreError};
use crate::types::{
    FindingRecords, PageResult, Record, RecordKey, SortField, UpdateRecords, UpdateRecordsResult,
    UpdatingPolicy, Version,
};
use crate::value::{from_value, to_value, Value};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::warn;

/// CRUD and query surface shared by every backend.
pub trait Repository: Send + Sync {
    /// Fetch one record; `NotFound` if absent.
    fn get(&self, id: &str, record_type: &str) -> Result<Record<Value>>;

    /// Apply a batch of saves and deletes.
    ///
    /// Under `IfServerUnchanged` any version mismatch fails the whole batch
    /// with `VersionConflict`. Saved records come back with their new
    /// versions.
    fn update_records(&self, command: UpdateRecords<Value>) -> Result<UpdateRecordsResult<Value>>;

    /// Query one page of records.
    fn find_records(&self, query: &FindingRecords) -> Result<PageResult<Value>>;
}

impl<R: Repository + ?Sized> Repository for Arc<R> {
    fn get(&self, id: &str, record_type: &str) -> Result<Record<Value>> {
        (**self).get(id, record_type)
    }

    fn update_records(&self, command: UpdateRecords<Value>) -> Result<UpdateRecordsResult<Value>> {
        (**self).update_records(command)
    }

    fn find_records(&self, query: &FindingRecords) -> Result<PageResult<Value>> {
        (**self).find_records(query)
    }
}

impl<R: Repository + ?Sized> Repository for Box<R> {
    fn get(&self, id: &str, record_type: &str) -> Result<Record<Value>> {
        (**self).get(id, record_type)
    }

    fn update_records(&self, command: UpdateRecords<Value>) -> Result<UpdateRecordsResult<Value>> {
        (**self).update_records(command)
    }

    fn find_records(&self, query: &FindingRecords) -> Result<PageResult<Value>> {
        (**self).find_records(query)
    }
}

/// Follow `next` until exhausted, collecting every record.
pub fn find_all<R: Repository + ?Sized>(
    repository: &R,
    query: FindingRecords,
) -> Result<Vec<Record<Value>>> {
    let mut items = Vec::new();
    let mut next = Some(query);
    while let Some(query) = next {
        let page = repository.find_records(&query)?;
        items.extend(page.items);
        next = page.next;
    }
    Ok(items)
}

/// Typed view over a schemaless repository.
///
/// Payloads are converted through serde; a stored payload that does not
/// decode into `T` is reported as `InvalidType`.
pub struct TypedRepository<T, R> {
    inner: R,
    _marker: PhantomData<fn() -> T>,
}

impl<T, R> TypedRepository<T, R>
where
    T: Serialize + DeserializeOwned,
    R: Repository,
{
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub fn get(&self, id: &str, record_type: &str) -> Result<Record<T>> {
        decode_record(self.inner.get(id, record_type)?)
    }

    pub fn update_records(&self, command: UpdateRecords<T>) -> Result<UpdateRecordsResult<T>> {
        let encoded = UpdateRecords {
            saving: encode_records(command.saving)?,
            deleting: encode_records(command.deleting)?,
            policy: command.policy,
            creating: command.creating,
        };
        let result = self.inner.update_records(encoded)?;
        Ok(UpdateRecordsResult {
            saved: result
                .saved
                .into_iter()
                .map(decode_record)
                .collect::<Result<_>>()?,
            deleted: result.deleted,
        })
    }

    pub fn find_records(&self, query: &FindingRecords) -> Result<PageResult<T>> {
        let page = self.inner.find_records(query)?;
        Ok(PageResult {
            items: page
                .items
                .into_iter()
                .map(decode_record)
                .collect::<Result<_>>()?,
            next: page.next,
        })
    }
}

fn encode_records<T: Serialize>(records: Vec<Record<T>>) -> Result<Vec<Record<Value>>> {
    records
        .into_iter()
        .map(|r| {
            let data = to_value(&r.data)?;
            Ok(r.map_data(|_| data))
        })
        .collect()
}

fn decode_record<T: DeserializeOwned>(record: Record<Value>) -> Result<Record<T>> {
    let Record {
        id,
        record_type,
        data,
        version,
    } = record;
    Ok(Record {
        id,
        record_type,
        data: from_value(data)?,
        version,
    })
}

// ============================================================================
// Optimistic concurrency shared by every backend
// ============================================================================

/// Version a write stores: 0 for a new record, otherwise stored + 1.
pub(crate) fn next_version(stored: Option<Version>, key: &RecordKey) -> Result<Version> {
    match stored {
        None => Ok(0),
        Some(v) => v.checked_add(1).ok_or_else(|| {
            StoreError::internal("update_records", Some(key.clone()), "version space exhausted")
        }),
    }
}

/// Check saves against the stored versions and stamp their new versions.
///
/// `stored` holds the current version of every saved key that exists. A key
/// in `creating` conflicts whenever it is stored, whatever the policy.
/// Returns each record paired with the version it replaces. Nothing is
/// mutated, so a conflict leaves the caller free to abort the whole batch.
pub(crate) fn plan_saves(
    saving: Vec<Record<Value>>,
    policy: UpdatingPolicy,
    creating: &BTreeSet<RecordKey>,
    stored: &HashMap<RecordKey, Version>,
) -> Result<Vec<(Option<Version>, Record<Value>)>> {
    for record in &saving {
        let key = record.key();
        let Some(&current) = stored.get(&key) else {
            continue;
        };
        if creating.contains(&key) {
            warn!(%key, stored = current, "record already exists");
            return Err(StoreError::VersionConflict {
                operation: "update_records",
                key,
            });
        }
        if policy == UpdatingPolicy::IfServerUnchanged && current != record.version {
            warn!(%key, declared = record.version, stored = current, "version conflict");
            return Err(StoreError::VersionConflict {
                operation: "update_records",
                key,
            });
        }
    }
    saving
        .into_iter()
        .map(|record| {
            let key = record.key();
            let base = stored.get(&key).copied();
            let version = next_version(base, &key)?;
            Ok((base, record.with_version(version)))
        })
        .collect()
}

/// Records a planned batch leaves stored: the last save of each key, minus
/// keys the batch also deletes. Keys keep the order of their first save.
pub(crate) fn surviving_saves(
    planned: &[(Option<Version>, Record<Value>)],
    deleting: &[Record<Value>],
) -> Vec<Record<Value>> {
    let deleted: HashSet<RecordKey> = deleting.iter().map(Record::key).collect();
    let mut position: HashMap<RecordKey, usize> = HashMap::new();
    let mut saved: Vec<Record<Value>> = Vec::with_capacity(planned.len());
    for (_, record) in planned {
        let key = record.key();
        if deleted.contains(&key) {
            continue;
        }
        match position.get(&key) {
            Some(&i) => saved[i] = record.clone(),
            None => {
                position.insert(key, saved.len());
                saved.push(record.clone());
            }
        }
    }
    saved
}

// ============================================================================
// Sorting and keyset pagination shared by backends without native paging
// ============================================================================

/// Sort key values of a record; a missing path sorts as `None`.
pub(crate) fn sort_keys(sort: &[SortField], record: &Record<Value>) -> Vec<Value> {
    let document = record.to_document();
    sort.iter()
        .map(|field| field.location.get(&document).cloned().unwrap_or_default())
        .collect()
}

/// Order two positions: sort keys (honoring direction), then ID, then Type.
pub(crate) fn compare_positions(
    sort: &[SortField],
    a: (&[Value], &str, &str),
    b: (&[Value], &str, &str),
) -> Ordering {
    for (i, field) in sort.iter().enumerate() {
        let (Some(x), Some(y)) = (a.0.get(i), b.0.get(i)) else {
            break;
        };
        let ord = x.compare(y);
        let ord = if field.descending { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.1.cmp(b.1).then_with(|| a.2.cmp(b.2))
}

/// Sort already-filtered records and cut the page the query asks for.
pub(crate) fn sort_and_page(
    records: Vec<Record<Value>>,
    query: &FindingRecords,
) -> Result<PageResult<Value>> {
    let mut keyed: Vec<(Vec<Value>, Record<Value>)> = records
        .into_iter()
        .map(|r| (sort_keys(&query.sort, &r), r))
        .collect();
    keyed.sort_by(|(ka, a), (kb, b)| {
        compare_positions(
            &query.sort,
            (ka, &a.id, &a.record_type),
            (kb, &b.id, &b.record_type),
        )
    });

    if let Some(token) = &query.after {
        let cursor = Cursor::decode(token)?;
        let position = (
            cursor.keys.as_slice(),
            cursor.id.as_str(),
            cursor.record_type.as_str(),
        );
        keyed.retain(|(k, r)| {
            compare_positions(&query.sort, (k, &r.id, &r.record_type), position)
                == Ordering::Greater
        });
    }

    cut_page(keyed, query)
}

/// Cut one page from records already in query order and positioned after
/// the query's cursor. Each record travels with its sort key values.
pub(crate) fn cut_page(
    mut keyed: Vec<(Vec<Value>, Record<Value>)>,
    query: &FindingRecords,
) -> Result<PageResult<Value>> {
    let has_more = query.limit > 0 && keyed.len() > query.limit;
    if query.limit > 0 {
        keyed.truncate(query.limit);
    }

    let next = match (has_more, keyed.last()) {
        (true, Some((keys, last))) => {
            let cursor = Cursor {
                keys: keys.clone(),
                id: last.id.clone(),
                record_type: last.record_type.clone(),
            };
            Some(FindingRecords {
                after: Some(cursor.encode()?),
                ..query.clone()
            })
        }
        _ => None,
    };

    Ok(PageResult {
        items: keyed.into_iter().map(|(_, r)| r).collect(),
        next,
    })
}
