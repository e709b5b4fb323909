//! Attribute-value codec for the column-family table.
//!
//! Items are flat maps of attribute name to a tagged value, the shape a
//! DynamoDB-style table stores and streams:
//!
//! | Tag    | Value             |
//! |--------|-------------------|
//! | `S`    | string            |
//! | `N`    | number as text    |
//! | `BOOL` | boolean           |
//! | `NULL` | always `true`     |
//! | `L`    | list              |
//! | `M`    | map               |

use crate::error::{Result, StoreError};
use crate::types::{Record, Version};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One stored attribute.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    #[serde(rename = "S")]
    S(String),
    #[serde(rename = "N")]
    N(String),
    #[serde(rename = "BOOL")]
    Bool(bool),
    #[serde(rename = "NULL")]
    Null(bool),
    #[serde(rename = "L")]
    L(Vec<AttributeValue>),
    #[serde(rename = "M")]
    M(BTreeMap<String, AttributeValue>),
}

/// A table row.
pub type Item = BTreeMap<String, AttributeValue>;

pub const ID_ATTR: &str = "ID";
pub const TYPE_ATTR: &str = "Type";
pub const DATA_ATTR: &str = "Data";
pub const VERSION_ATTR: &str = "Version";

/// Encode a value. Non-finite numbers have no attribute representation.
pub fn encode(value: &Value) -> Result<AttributeValue> {
    Ok(match value {
        Value::None => AttributeValue::Null(true),
        Value::Boolean(b) => AttributeValue::Bool(*b),
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Number(n) if n.is_finite() => AttributeValue::N(format_number(*n)),
        Value::Number(n) => {
            return Err(StoreError::invalid_type("finite number", n.to_string()));
        }
        Value::List(items) => AttributeValue::L(items.iter().map(encode).collect::<Result<_>>()?),
        Value::Map(map) => AttributeValue::M(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), encode(v)?)))
                .collect::<Result<_>>()?,
        ),
    })
}

pub fn decode(attribute: &AttributeValue) -> Result<Value> {
    Ok(match attribute {
        AttributeValue::Null(_) => Value::None,
        AttributeValue::Bool(b) => Value::Boolean(*b),
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::N(text) => Value::Number(
            text.parse::<f64>()
                .map_err(|_| StoreError::invalid_type("number", text.clone()))?,
        ),
        AttributeValue::L(items) => Value::List(items.iter().map(decode).collect::<Result<_>>()?),
        AttributeValue::M(map) => Value::Map(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), decode(v)?)))
                .collect::<Result<_>>()?,
        ),
    })
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

pub fn record_to_item(record: &Record<Value>) -> Result<Item> {
    let mut item = Item::new();
    item.insert(ID_ATTR.into(), AttributeValue::S(record.id.clone()));
    item.insert(TYPE_ATTR.into(), AttributeValue::S(record.record_type.clone()));
    item.insert(DATA_ATTR.into(), encode(&record.data)?);
    item.insert(
        VERSION_ATTR.into(),
        AttributeValue::N(record.version.to_string()),
    );
    Ok(item)
}

pub fn item_to_record(item: &Item) -> Result<Record<Value>> {
    let text = |name: &str| match item.get(name) {
        Some(AttributeValue::S(s)) => Ok(s.clone()),
        other => Err(StoreError::invalid_type(
            format!("string attribute {name}"),
            format!("{other:?}"),
        )),
    };
    let version = match item.get(VERSION_ATTR) {
        Some(AttributeValue::N(n)) => n
            .parse::<Version>()
            .map_err(|_| StoreError::invalid_type("version", n.clone()))?,
        other => return Err(StoreError::invalid_type("version", format!("{other:?}"))),
    };
    let data = match item.get(DATA_ATTR) {
        Some(attribute) => decode(attribute)?,
        None => Value::None,
    };
    Ok(Record {
        id: text(ID_ATTR)?,
        record_type: text(TYPE_ATTR)?,
        data,
        version,
    })
}

/// Primary-key attributes of a record.
pub fn key_item(id: &str, record_type: &str) -> Item {
    let mut key = Item::new();
    key.insert(ID_ATTR.into(), AttributeValue::S(id.to_string()));
    key.insert(TYPE_ATTR.into(), AttributeValue::S(record_type.to_string()));
    key
}
