//! In-process repository.

use super::{plan_saves, sort_and_page, surviving_saves, Repository};
use crate::changelog::AppendLog;
use crate::error::{Result, StoreError};
use crate::predicate::evaluate;
use crate::types::{
    FindingRecords, PageResult, Record, RecordKey, UpdateRecords, UpdateRecordsResult,
};
use crate::value::Value;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Reference store guarded by one readers-writer lock.
///
/// Queries hold the read lock from scan to page cut. A batch holds the write
/// lock while it validates every version, applies its writes and appends
/// their changes to the attached log, so readers and subscribers never see
/// half of a batch.
#[derive(Default)]
pub struct MemoryRepository {
    records: RwLock<HashMap<RecordKey, Record<Value>>>,
    log: Option<Arc<AppendLog<Value>>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Repository that appends a [`Change`](crate::types::Change) to `log`
    /// for every record it saves or deletes.
    ///
    /// Writing after the log has been closed panics.
    pub fn with_log(log: Arc<AppendLog<Value>>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            log: Some(log),
        }
    }

    pub fn log(&self) -> Option<&Arc<AppendLog<Value>>> {
        self.log.as_ref()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Repository for MemoryRepository {
    fn get(&self, id: &str, record_type: &str) -> Result<Record<Value>> {
        let key = RecordKey::new(id, record_type);
        self.records
            .read()
            .get(&key)
            .cloned()
            .ok_or(StoreError::NotFound(key))
    }

    fn update_records(&self, command: UpdateRecords<Value>) -> Result<UpdateRecordsResult<Value>> {
        if command.is_empty() {
            return Err(StoreError::EmptyCommand);
        }
        let UpdateRecords {
            saving,
            deleting,
            policy,
            creating,
        } = command;

        let mut records = self.records.write();
        let stored = saving
            .iter()
            .filter_map(|r| {
                let key = r.key();
                records.get(&key).map(|current| (key, current.version))
            })
            .collect();
        let planned = plan_saves(saving, policy, &creating, &stored)?;
        let saved = surviving_saves(&planned, &deleting);

        for (_, record) in planned {
            let before = records.insert(record.key(), record.clone());
            if let Some(log) = &self.log {
                log.change(before, Some(record));
            }
        }

        let mut deleted = Vec::with_capacity(deleting.len());
        for record in deleting {
            let key = record.key();
            if let Some(before) = records.remove(&key) {
                if let Some(log) = &self.log {
                    log.delete(before);
                }
            }
            deleted.push(key);
        }

        debug!(
            saved = saved.len(),
            deleted = deleted.len(),
            policy = ?policy,
            "records updated"
        );
        Ok(UpdateRecordsResult { saved, deleted })
    }

    fn find_records(&self, query: &FindingRecords) -> Result<PageResult<Value>> {
        let filter = query.effective_predicate();
        let records = self.records.read();
        let matched = records
            .values()
            .filter(|record| match &filter {
                Some((predicate, binds)) => evaluate(predicate, &record.to_document(), binds),
                None => true,
            })
            .cloned()
            .collect();
        sort_and_page(matched, query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changelog::{CancelToken, FROM_EARLIEST};
    use crate::error::ErrorKind;
    use crate::predicate::{where_, ParamBinds};
    use crate::types::UpdatingPolicy;

    fn order(status: &str) -> Record<Value> {
        Record::new("o1", "orders", Value::map([("status", Value::from(status))]))
    }

    #[test]
    fn test_occ_scenario() {
        let repo = MemoryRepository::new();
        repo.update_records(UpdateRecords::save(vec![order("pending")]))
            .unwrap();
        assert_eq!(repo.get("o1", "orders").unwrap().version, 0);

        let updated = repo
            .update_records(UpdateRecords::save(vec![order("shipped")]))
            .unwrap();
        assert_eq!(updated.saved[0].version, 1);

        let err = repo
            .update_records(UpdateRecords::save(vec![order("cancelled")]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::VersionConflict);

        let stored = repo.get("o1", "orders").unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.data.get("status"), Some(&Value::from("shipped")));
    }

    #[test]
    fn test_conflict_aborts_whole_batch() {
        let repo = MemoryRepository::new();
        repo.update_records(UpdateRecords::save(vec![order("a")])).unwrap();

        let mut batch = UpdateRecords::save(vec![
            Record::new("o2", "orders", Value::None),
            order("b").with_version(3),
        ]);
        batch.deleting.push(order("a"));
        assert!(repo.update_records(batch).is_err());
        assert_eq!(repo.len(), 1);
        assert_eq!(repo.get("o1", "orders").unwrap().version, 0);
    }

    #[test]
    fn test_second_create_of_same_key_conflicts() {
        let repo = MemoryRepository::new();
        let total = |n: i64| Record::new("north", "totals", Value::map([("total", Value::from(n))]));
        repo.update_records(UpdateRecords::create(vec![total(7)])).unwrap();

        let err = repo
            .update_records(UpdateRecords::create(vec![total(5)]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::VersionConflict);
        let err = repo
            .update_records(
                UpdateRecords::create(vec![total(5)])
                    .with_policy(UpdatingPolicy::OverwriteServerChanges),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::VersionConflict);

        let stored = repo.get("north", "totals").unwrap();
        assert_eq!(stored.version, 0);
        assert_eq!(stored.data.get("total"), Some(&Value::from(7)));
    }

    #[test]
    fn test_overwrite_adopts_stored_version() {
        let repo = MemoryRepository::new();
        repo.update_records(UpdateRecords::save(vec![order("a")])).unwrap();
        repo.update_records(UpdateRecords::save(vec![order("b")])).unwrap();
        let result = repo
            .update_records(
                UpdateRecords::save(vec![order("c").with_version(42)])
                    .with_policy(UpdatingPolicy::OverwriteServerChanges),
            )
            .unwrap();
        assert_eq!(result.saved[0].version, 2);
    }

    #[test]
    fn test_empty_command_and_missing_delete() {
        let repo = MemoryRepository::new();
        assert_eq!(
            repo.update_records(UpdateRecords::default()).unwrap_err().kind(),
            ErrorKind::EmptyCommand
        );
        let result = repo
            .update_records(UpdateRecords::delete(vec![order("x")]))
            .unwrap();
        assert_eq!(result.deleted.len(), 1);
        assert!(repo.is_empty());
    }

    #[test]
    fn test_type_filter_and_predicate() {
        let repo = MemoryRepository::new();
        repo.update_records(UpdateRecords::save(vec![
            order("pending"),
            Record::new("u1", "users", Value::map([("status", Value::from("pending"))])),
        ]))
        .unwrap();
        let mut params = ParamBinds::new();
        params.insert("s".into(), Value::from("pending"));
        let page = repo
            .find_records(
                &FindingRecords::of_type("orders").filter(where_("Data.status = :s", params).unwrap()),
            )
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, "o1");
    }

    #[test]
    fn test_writes_are_logged() {
        let log = Arc::new(AppendLog::new());
        let repo = MemoryRepository::with_log(Arc::clone(&log));
        repo.update_records(UpdateRecords::save(vec![order("a")])).unwrap();
        repo.update_records(UpdateRecords::save(vec![order("b")])).unwrap();
        repo.update_records(UpdateRecords::delete(vec![order("b")]))
            .unwrap();
        log.close();

        let mut changes = Vec::new();
        log.subscribe(FROM_EARLIEST, &CancelToken::new(), |c| {
            changes.push(c.clone());
            Ok(())
        })
        .unwrap();
        assert_eq!(changes.len(), 3);
        assert!(changes[0].before.is_none());
        assert_eq!(changes[1].before.as_ref().map(|r| r.version), Some(0));
        assert_eq!(changes[1].after.as_ref().map(|r| r.version), Some(1));
        assert!(changes[2].deleted);
        assert_eq!(
            changes.iter().map(|c| c.offset).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }
}
