//! Keyed secondary indices derived from base-record writes.
//!
//! An [`Aggregator`] projects each record of its source type onto a grouping
//! key and a partial value, and folds partials into one index record per key
//! with a caller-supplied `combine`. Index records are ordinary records whose
//! ID is the grouping key and whose Type is the aggregator's name, so they
//! are written with the same optimistic concurrency as base records.
//!
//! State lives in an [`AggregationBatch`], one per write batch. The first
//! touch of a key hydrates it from the repository, so the accumulator is
//! always the stored baseline combined with every partial seen in the batch.
//!
//! `combine` must be commutative and associative for the result to be
//! independent of write order.

use crate::error::{Result, StoreError};
use crate::repository::Repository;
use crate::types::{
    FindingRecords, PageResult, Record, RecordKey, UpdateRecords, UpdateRecordsResult, Version,
};
use crate::value::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Maps a base record to `(grouping key, partial value)`; `None` skips it.
pub type GroupBy = Arc<dyn Fn(&Record<Value>) -> Option<(String, Value)> + Send + Sync>;

/// Folds a partial value into an accumulator.
pub type Combine = Arc<dyn Fn(&Value, &Value) -> Value + Send + Sync>;

/// Declarative description of one derived index.
#[derive(Clone)]
pub struct Aggregator {
    name: String,
    source_type: String,
    group_by: GroupBy,
    combine: Combine,
    uncombine: Option<Combine>,
}

impl Aggregator {
    /// Index of type `name` over records of type `source_type`.
    pub fn new<G, C>(
        name: impl Into<String>,
        source_type: impl Into<String>,
        group_by: G,
        combine: C,
    ) -> Self
    where
        G: Fn(&Record<Value>) -> Option<(String, Value)> + Send + Sync + 'static,
        C: Fn(&Value, &Value) -> Value + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            source_type: source_type.into(),
            group_by: Arc::new(group_by),
            combine: Arc::new(combine),
            uncombine: None,
        }
    }

    /// Inverse of `combine`, applied when a contributing record is deleted.
    /// Without one, deletes leave the index untouched.
    pub fn with_uncombine<U>(mut self, uncombine: U) -> Self
    where
        U: Fn(&Value, &Value) -> Value + Send + Sync + 'static,
    {
        self.uncombine = Some(Arc::new(uncombine));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source_type(&self) -> &str {
        &self.source_type
    }

    /// Start per-batch state reading baselines from `repository`.
    pub fn begin<'a, R>(&'a self, repository: &'a R) -> AggregationBatch<'a, R>
    where
        R: Repository + ?Sized,
    {
        AggregationBatch {
            aggregator: self,
            repository,
            touched: BTreeMap::new(),
        }
    }

    fn project(&self, record: &Record<Value>) -> Option<(String, Value)> {
        if record.record_type != self.source_type {
            return None;
        }
        (self.group_by)(record)
    }
}

impl fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregator")
            .field("name", &self.name)
            .field("source_type", &self.source_type)
            .field("uncombine", &self.uncombine.is_some())
            .finish()
    }
}

struct Accumulator {
    /// Version read at hydration; `None` if no index record was stored.
    version: Option<Version>,
    value: Value,
}

/// In-flight accumulators of one aggregator for one write batch.
pub struct AggregationBatch<'a, R: ?Sized> {
    aggregator: &'a Aggregator,
    repository: &'a R,
    touched: BTreeMap<String, Accumulator>,
}

impl<'a, R: Repository + ?Sized> AggregationBatch<'a, R> {
    /// Fold a saved record in. Records of other types are ignored.
    pub fn append(&mut self, record: &Record<Value>) -> Result<()> {
        let aggregator = self.aggregator;
        let Some((key, partial)) = aggregator.project(record) else {
            return Ok(());
        };
        let combine = &aggregator.combine;
        if let Some(acc) = self.touched.get_mut(&key) {
            acc.value = combine(&acc.value, &partial);
            return Ok(());
        }
        let acc = match self.hydrate(&key)? {
            Some(stored) => Accumulator {
                version: Some(stored.version),
                value: combine(&stored.data, &partial),
            },
            None => Accumulator {
                version: None,
                value: partial,
            },
        };
        self.touched.insert(key, acc);
        Ok(())
    }

    /// Retract a deleted record using `uncombine`, if the aggregator has one.
    pub fn delete(&mut self, record: &Record<Value>) -> Result<()> {
        let Some((key, partial)) = self.aggregator.project(record) else {
            return Ok(());
        };
        let aggregator = self.aggregator;
        let Some(uncombine) = &aggregator.uncombine else {
            debug!(
                index = %aggregator.name,
                %key,
                "no uncombine; delete leaves index unchanged"
            );
            return Ok(());
        };
        if !self.touched.contains_key(&key) {
            match self.hydrate(&key)? {
                Some(stored) => {
                    self.touched.insert(
                        key.clone(),
                        Accumulator {
                            version: Some(stored.version),
                            value: stored.data,
                        },
                    );
                }
                None => {
                    trace!(index = %aggregator.name, %key, "nothing to retract");
                    return Ok(());
                }
            }
        }
        if let Some(acc) = self.touched.get_mut(&key) {
            acc.value = uncombine(&acc.value, &partial);
        }
        Ok(())
    }

    /// Every touched accumulator as an index record carrying the version
    /// read at hydration.
    pub fn get_versioned_indices(&self) -> Vec<Record<Value>> {
        self.touched
            .iter()
            .map(|(key, acc)| Record {
                id: key.clone(),
                record_type: self.aggregator.name.clone(),
                data: acc.value.clone(),
                version: acc.version.unwrap_or(0),
            })
            .collect()
    }

    /// Keys of index records that did not exist at hydration. Submitting
    /// them as creates makes a concurrent first writer surface as a
    /// conflict instead of being overwritten.
    pub fn created_keys(&self) -> Vec<RecordKey> {
        self.touched
            .iter()
            .filter(|(_, acc)| acc.version.is_none())
            .map(|(key, _)| RecordKey::new(key.clone(), self.aggregator.name.clone()))
            .collect()
    }

    /// Add the index records to `command`, marking new ones as creates.
    pub fn stage(&self, command: &mut UpdateRecords<Value>) {
        command.creating.extend(self.created_keys());
        command.saving.extend(self.get_versioned_indices());
    }

    fn hydrate(&self, key: &str) -> Result<Option<Record<Value>>> {
        match self.repository.get(key, &self.aggregator.name) {
            Ok(record) => Ok(Some(record)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Repository decorator maintaining derived indices.
///
/// Each `update_records` call runs every aggregator over the batch and
/// submits base and index records together, so a conflicting index write
/// rejects the whole batch. Callers retry on `VersionConflict`.
pub struct AggregatingRepository<R> {
    inner: R,
    aggregators: Vec<Aggregator>,
}

impl<R: Repository> AggregatingRepository<R> {
    pub fn new(inner: R, aggregators: Vec<Aggregator>) -> Self {
        Self { inner, aggregators }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }
}

impl<R: Repository> Repository for AggregatingRepository<R> {
    fn get(&self, id: &str, record_type: &str) -> Result<Record<Value>> {
        self.inner.get(id, record_type)
    }

    fn update_records(&self, mut command: UpdateRecords<Value>) -> Result<UpdateRecordsResult<Value>> {
        if command.is_empty() {
            return Err(StoreError::EmptyCommand);
        }
        let mut staged = UpdateRecords::default();
        for aggregator in &self.aggregators {
            let mut batch = aggregator.begin(&self.inner);
            for record in &command.saving {
                batch.append(record)?;
            }
            for record in &command.deleting {
                batch.delete(record)?;
            }
            batch.stage(&mut staged);
        }
        debug!(
            indices = staged.saving.len(),
            created = staged.creating.len(),
            "aggregated batch"
        );
        command.saving.append(&mut staged.saving);
        command.creating.append(&mut staged.creating);
        self.inner.update_records(command)
    }

    fn find_records(&self, query: &FindingRecords) -> Result<PageResult<Value>> {
        self.inner.find_records(query)
    }
}
