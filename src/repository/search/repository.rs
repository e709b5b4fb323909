//! Repository over a search index.

use super::client::{IndexCondition, SearchClient, SearchError};
use super::query::search_body;
use super::SearchConfig;
use crate::error::{Result, StoreError};
use crate::predicate::{ParamBinds, Predicate};
use crate::repository::{cut_page, plan_saves, sort_keys, surviving_saves, Cursor, Repository};
use crate::types::{
    FindingRecords, PageResult, Record, RecordKey, UpdateRecords, UpdateRecordsResult,
};
use crate::value::Value;
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace, warn};

/// Request size used to drain an unlimited query.
const DRAIN_PAGE_SIZE: usize = 500;

/// Stores each record as one document.
///
/// The index has no multi-document transactions. Every version precondition
/// of a batch is checked before the first write and each write is itself
/// conditional, but a conflict discovered mid-batch leaves the writes already
/// made in place.
pub struct SearchRepository<C> {
    client: C,
    config: SearchConfig,
}

/// Document id of a record: the JSON array `[Type, ID]`.
pub fn document_id(key: &RecordKey) -> String {
    serde_json::Value::from(vec![key.record_type.clone(), key.id.clone()]).to_string()
}

impl<C: SearchClient> SearchRepository<C> {
    pub fn new(client: C, config: SearchConfig) -> Self {
        Self { client, config }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    fn fetch(&self, operation: &'static str, key: &RecordKey) -> Result<Option<Record<Value>>> {
        let document = self
            .client
            .get(&self.config.index_name, &document_id(key))
            .map_err(|e| StoreError::internal(operation, Some(key.clone()), e))?;
        match document {
            Some(document) => Ok(Some(serde_json::from_value(document)?)),
            None => Ok(None),
        }
    }

    fn search_page(
        &self,
        query: &FindingRecords,
        filter: Option<&(Predicate, ParamBinds)>,
        size: usize,
        after: Option<&Cursor>,
    ) -> Result<Vec<Record<Value>>> {
        let body = search_body(filter, &query.sort, size, after)?;
        trace!(body = %body, "search request");
        let response = self
            .client
            .search(&self.config.index_name, &body)
            .map_err(|e| StoreError::internal("find_records", None, e))?;
        response
            .hits
            .into_iter()
            .map(|hit| Ok(serde_json::from_value(hit.source)?))
            .collect()
    }
}

fn write_error(error: SearchError, key: &RecordKey) -> StoreError {
    match error {
        SearchError::VersionConflict { .. } => {
            warn!(%key, "conditional index rejected");
            StoreError::VersionConflict {
                operation: "update_records",
                key: key.clone(),
            }
        }
        other => StoreError::internal("update_records", Some(key.clone()), other),
    }
}

impl<C: SearchClient> Repository for SearchRepository<C> {
    fn get(&self, id: &str, record_type: &str) -> Result<Record<Value>> {
        let key = RecordKey::new(id, record_type);
        self.fetch("get", &key)?.ok_or(StoreError::NotFound(key))
    }

    fn update_records(&self, command: UpdateRecords<Value>) -> Result<UpdateRecordsResult<Value>> {
        if command.is_empty() {
            return Err(StoreError::EmptyCommand);
        }
        debug!(
            index = %self.config.index_name,
            saving = command.saving.len(),
            deleting = command.deleting.len(),
            policy = ?command.policy,
            "updating records"
        );

        let mut stored = HashMap::new();
        for record in &command.saving {
            let key = record.key();
            if stored.contains_key(&key) {
                continue;
            }
            if let Some(current) = self.fetch("update_records", &key)? {
                stored.insert(key, current.version);
            }
        }
        let planned = plan_saves(command.saving, command.policy, &command.creating, &stored)?;
        let saved = surviving_saves(&planned, &command.deleting);

        let mut written = HashSet::new();
        for (base, record) in &planned {
            let key = record.key();
            // A repeated key in one batch overwrites its own earlier write.
            let condition = match (written.contains(&key), base) {
                (true, _) => IndexCondition::Any,
                (false, Some(version)) => IndexCondition::IfStoredVersion(*version),
                (false, None) => IndexCondition::MustNotExist,
            };
            let document = serde_json::to_value(record)?;
            self.client
                .index(&self.config.index_name, &document_id(&key), document, condition)
                .map_err(|e| write_error(e, &key))?;
            written.insert(key);
        }

        let mut deleted = Vec::with_capacity(command.deleting.len());
        for record in command.deleting {
            let key = record.key();
            self.client
                .delete(&self.config.index_name, &document_id(&key))
                .map_err(|e| write_error(e, &key))?;
            deleted.push(key);
        }

        Ok(UpdateRecordsResult { saved, deleted })
    }

    fn find_records(&self, query: &FindingRecords) -> Result<PageResult<Value>> {
        let filter = query.effective_predicate();
        let mut after = match &query.after {
            Some(token) => Some(Cursor::decode(token)?),
            None => None,
        };

        let records = if query.limit > 0 {
            self.search_page(query, filter.as_ref(), query.limit + 1, after.as_ref())?
        } else {
            let mut records = Vec::new();
            loop {
                let batch =
                    self.search_page(query, filter.as_ref(), DRAIN_PAGE_SIZE, after.as_ref())?;
                let done = batch.len() < DRAIN_PAGE_SIZE;
                if let Some(last) = batch.last() {
                    after = Some(Cursor {
                        keys: sort_keys(&query.sort, last),
                        id: last.id.clone(),
                        record_type: last.record_type.clone(),
                    });
                }
                records.extend(batch);
                if done {
                    break records;
                }
            }
        };

        let keyed = records
            .into_iter()
            .map(|r| (sort_keys(&query.sort, &r), r))
            .collect();
        cut_page(keyed, query)
    }
}
