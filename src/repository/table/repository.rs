//! Repository over a column-family table.

use super::attribute::{
    item_to_record, key_item, record_to_item, AttributeValue, ID_ATTR, VERSION_ATTR,
};
use super::client::{ScanRequest, TableClient, TableError, WriteOp, CONDITIONAL_CHECK_FAILED};
use super::expression::{compile, Condition, Expression, ExpressionBuilder, Operand};
use super::TableConfig;
use crate::error::{Result, StoreError};
use crate::predicate::Operator;
use crate::repository::{plan_saves, sort_and_page, surviving_saves, Repository};
use crate::types::{
    FindingRecords, PageResult, Record, RecordKey, UpdateRecords, UpdateRecordsResult, Version,
};
use crate::value::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, trace, warn};

/// Stores each record as one item keyed by `(ID, Type)`.
///
/// A batch is submitted as a single transaction. Every put is guarded by the
/// version read while planning it (or by the item's absence), so a concurrent
/// writer between read and commit surfaces as `VersionConflict`, under either
/// policy.
pub struct TableRepository<C> {
    client: C,
    config: TableConfig,
}

impl<C: TableClient> TableRepository<C> {
    pub fn new(client: C, config: TableConfig) -> Self {
        Self { client, config }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    fn stored_version(&self, key: &RecordKey) -> Result<Option<Version>> {
        let item = self
            .client
            .get_item(&self.config.table_name, &key_item(&key.id, &key.record_type))
            .map_err(|e| StoreError::internal("update_records", Some(key.clone()), e))?;
        match item {
            Some(item) => Ok(Some(item_to_record(&item)?.version)),
            None => Ok(None),
        }
    }
}

/// Write condition pinning the state a put was planned against.
fn guard(base: Option<Version>) -> Expression {
    let mut builder = ExpressionBuilder::new();
    let condition = match base {
        Some(version) => Condition::Compare {
            left: builder.attribute(VERSION_ATTR),
            operator: Operator::Eq,
            right: Operand::Value(builder.value(AttributeValue::N(version.to_string()))),
        },
        None => Condition::AttributeNotExists(builder.attribute(ID_ATTR)),
    };
    builder.finish(condition)
}

fn write_error(error: TableError, keys: &[RecordKey]) -> StoreError {
    if let TableError::TransactionCanceled { reasons } = &error {
        let rejected = reasons
            .iter()
            .position(|r| r.as_deref() == Some(CONDITIONAL_CHECK_FAILED))
            .and_then(|i| keys.get(i));
        if let Some(key) = rejected {
            warn!(%key, "conditional write rejected");
            return StoreError::VersionConflict {
                operation: "update_records",
                key: key.clone(),
            };
        }
    }
    StoreError::internal("update_records", None, error)
}

impl<C: TableClient> Repository for TableRepository<C> {
    fn get(&self, id: &str, record_type: &str) -> Result<Record<Value>> {
        let key = RecordKey::new(id, record_type);
        let item = self
            .client
            .get_item(&self.config.table_name, &key_item(id, record_type))
            .map_err(|e| StoreError::internal("get", Some(key.clone()), e))?;
        match item {
            Some(item) => item_to_record(&item),
            None => Err(StoreError::NotFound(key)),
        }
    }

    fn update_records(&self, command: UpdateRecords<Value>) -> Result<UpdateRecordsResult<Value>> {
        if command.is_empty() {
            return Err(StoreError::EmptyCommand);
        }
        debug!(
            table = %self.config.table_name,
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
            if let Some(version) = self.stored_version(&key)? {
                stored.insert(key, version);
            }
        }
        let planned = plan_saves(command.saving, command.policy, &command.creating, &stored)?;
        let saved = surviving_saves(&planned, &command.deleting);

        // One write per key; later entries win and deletes win over saves.
        let mut ops = BTreeMap::new();
        for (base, record) in planned {
            let item = record_to_item(&record)?;
            ops.insert(
                record.key(),
                WriteOp::Put {
                    item,
                    condition: Some(guard(base)),
                },
            );
        }
        let mut deleted = Vec::with_capacity(command.deleting.len());
        for record in command.deleting {
            let key = record.key();
            ops.insert(
                key.clone(),
                WriteOp::Delete {
                    key: key_item(&key.id, &key.record_type),
                    condition: None,
                },
            );
            deleted.push(key);
        }

        let (keys, ops): (Vec<RecordKey>, Vec<WriteOp>) = ops.into_iter().unzip();
        self.client
            .transact_write(&self.config.table_name, ops)
            .map_err(|e| write_error(e, &keys))?;

        Ok(UpdateRecordsResult { saved, deleted })
    }

    fn find_records(&self, query: &FindingRecords) -> Result<PageResult<Value>> {
        let filter = match query.effective_predicate() {
            Some((predicate, binds)) => Some(compile(&predicate, &binds)?),
            None => None,
        };
        if let Some(filter) = &filter {
            trace!(expression = %filter.text(), "compiled filter");
        }

        let mut request = ScanRequest {
            table: self.config.table_name.clone(),
            filter,
            exclusive_start_key: None,
            limit: self.config.scan_page_size,
        };
        let mut records = Vec::new();
        loop {
            let output = self
                .client
                .scan(&request)
                .map_err(|e| StoreError::internal("find_records", None, e))?;
            for item in &output.items {
                records.push(item_to_record(item)?);
            }
            match output.last_evaluated_key {
                Some(key) => request.exclusive_start_key = Some(key),
                None => break,
            }
        }
        sort_and_page(records, query)
    }
}
