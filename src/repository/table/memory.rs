//! In-process table that executes compiled conditional expressions.

use super::attribute::{decode, AttributeValue, Item, ID_ATTR, TYPE_ATTR};
use super::client::{
    ScanOutput, ScanRequest, TableClient, TableError, WriteOp, CONDITIONAL_CHECK_FAILED,
};
use super::expression::{AttributePath, Condition, Expression, Operand, PathElem};
use crate::types::RecordKey;
use crate::value::{Location, Segment, Value};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};

type Rows = BTreeMap<RecordKey, Item>;

/// Table fake keyed by `(ID, Type)`.
///
/// Scans walk rows in key order; `limit` bounds the rows examined before the
/// filter applies, as a real table does. Transactions check every condition
/// before applying any write.
#[derive(Default)]
pub struct MemoryTable {
    tables: RwLock<HashMap<String, Rows>>,
    unavailable: AtomicBool,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with a transport error until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn item_count(&self, table: &str) -> usize {
        self.tables.read().get(table).map(BTreeMap::len).unwrap_or(0)
    }

    fn check_available(&self) -> Result<(), TableError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(TableError::Transport("table unavailable".into()))
        } else {
            Ok(())
        }
    }
}

fn row_key(item: &Item) -> Result<RecordKey, TableError> {
    match (item.get(ID_ATTR), item.get(TYPE_ATTR)) {
        (Some(AttributeValue::S(id)), Some(AttributeValue::S(record_type))) => {
            Ok(RecordKey::new(id.clone(), record_type.clone()))
        }
        _ => Err(TableError::Validation("item is missing its key attributes".into())),
    }
}

impl TableClient for MemoryTable {
    fn get_item(&self, table: &str, key: &Item) -> Result<Option<Item>, TableError> {
        self.check_available()?;
        let key = row_key(key)?;
        Ok(self
            .tables
            .read()
            .get(table)
            .and_then(|rows| rows.get(&key))
            .cloned())
    }

    fn scan(&self, request: &ScanRequest) -> Result<ScanOutput, TableError> {
        self.check_available()?;
        let tables = self.tables.read();
        let Some(rows) = tables.get(&request.table) else {
            return Ok(ScanOutput::default());
        };
        let lower = match &request.exclusive_start_key {
            Some(key) => Bound::Excluded(row_key(key)?),
            None => Bound::Unbounded,
        };
        let limit = if request.limit == 0 {
            usize::MAX
        } else {
            request.limit
        };

        let mut output = ScanOutput::default();
        let mut last = None;
        for (key, item) in rows.range((lower, Bound::Unbounded)).take(limit) {
            last = Some(key);
            let keep = match &request.filter {
                Some(filter) => item_matches(filter, item)?,
                None => true,
            };
            if keep {
                output.items.push(item.clone());
            }
        }
        if let Some(last) = last {
            let more = rows
                .range((Bound::Excluded(last.clone()), Bound::Unbounded))
                .next()
                .is_some();
            if more {
                let mut key = Item::new();
                key.insert(ID_ATTR.into(), AttributeValue::S(last.id.clone()));
                key.insert(TYPE_ATTR.into(), AttributeValue::S(last.record_type.clone()));
                output.last_evaluated_key = Some(key);
            }
        }
        Ok(output)
    }

    fn transact_write(&self, table: &str, ops: Vec<WriteOp>) -> Result<(), TableError> {
        self.check_available()?;
        let mut tables = self.tables.write();
        let rows = tables.entry(table.to_string()).or_default();

        let mut reasons = Vec::with_capacity(ops.len());
        let mut failed = false;
        for op in &ops {
            let (key, condition) = match op {
                WriteOp::Put { item, condition } => (row_key(item)?, condition),
                WriteOp::Delete { key, condition } => (row_key(key)?, condition),
            };
            let passed = match condition {
                Some(condition) => {
                    let current = rows.get(&key).cloned().unwrap_or_default();
                    item_matches(condition, &current)?
                }
                None => true,
            };
            failed |= !passed;
            reasons.push((!passed).then(|| CONDITIONAL_CHECK_FAILED.to_string()));
        }
        if failed {
            return Err(TableError::TransactionCanceled { reasons });
        }

        for op in ops {
            match op {
                WriteOp::Put { item, .. } => {
                    rows.insert(row_key(&item)?, item);
                }
                WriteOp::Delete { key, .. } => {
                    rows.remove(&row_key(&key)?);
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Condition evaluation
// ============================================================================

fn item_matches(expression: &Expression, item: &Item) -> Result<bool, TableError> {
    let document = Value::Map(
        item.iter()
            .map(|(k, v)| Ok((k.clone(), decode(v).map_err(validation)?)))
            .collect::<Result<_, TableError>>()?,
    );
    eval(&expression.condition, expression, &document)
}

fn eval(condition: &Condition, expr: &Expression, document: &Value) -> Result<bool, TableError> {
    Ok(match condition {
        Condition::And(parts) => {
            for part in parts {
                if !eval(part, expr, document)? {
                    return Ok(false);
                }
            }
            true
        }
        Condition::Or(parts) => {
            for part in parts {
                if eval(part, expr, document)? {
                    return Ok(true);
                }
            }
            false
        }
        Condition::Not(inner) => !eval(inner, expr, document)?,
        Condition::AttributeExists(path) => location(path, expr)?.get(document).is_some(),
        Condition::AttributeNotExists(path) => location(path, expr)?.get(document).is_none(),
        Condition::Compare {
            left,
            operator,
            right,
        } => {
            let Some(left) = location(left, expr)?.get(document) else {
                return Ok(false);
            };
            let right = match right {
                Operand::Path(path) => location(path, expr)?.get(document).cloned(),
                Operand::Value(placeholder) => {
                    let attribute = expr.values.get(placeholder).ok_or_else(|| {
                        TableError::Validation(format!("undefined value {placeholder}"))
                    })?;
                    Some(decode(attribute).map_err(validation)?)
                }
            };
            match right {
                Some(right) => operator.holds(left.compare(&right)),
                None => false,
            }
        }
    })
}

fn location(path: &AttributePath, expr: &Expression) -> Result<Location, TableError> {
    let segments = path
        .0
        .iter()
        .map(|elem| match elem {
            PathElem::Name(placeholder) => expr
                .names
                .get(placeholder)
                .map(|name| Segment::Field(name.clone()))
                .ok_or_else(|| TableError::Validation(format!("undefined name {placeholder}"))),
            PathElem::Index(i) => Ok(Segment::Index(*i)),
            PathElem::Wildcard => Ok(Segment::Anything),
        })
        .collect::<Result<_, _>>()?;
    Ok(Location::new(segments))
}

fn validation(e: crate::error::StoreError) -> TableError {
    TableError::Validation(e.to_string())
}
