//! Conversions between native Rust values and [`Value`].

use super::Value;
use crate::error::{Result, StoreError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;

/// Largest integer an `f64` represents exactly.
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::None,
            serde_json::Value::Bool(b) => Value::Boolean(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(entries) => Value::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect::<BTreeMap<_, _>>(),
            ),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::None => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(b),
            Value::String(s) => serde_json::Value::String(s),
            Value::Number(n) => number_to_json(n),
            Value::List(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            Value::Map(entries) => serde_json::Value::Object(
                entries.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}

/// Whole numbers become JSON integers so that integer fields deserialize.
/// Non-finite numbers have no JSON form and become null.
fn number_to_json(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() < MAX_EXACT_INT {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

/// Convert any serializable value into a [`Value`].
pub fn to_value<T: Serialize + ?Sized>(data: &T) -> Result<Value> {
    Ok(Value::from(serde_json::to_value(data)?))
}

/// Convert a [`Value`] into a native type.
///
/// A shape mismatch is reported as `InvalidType`.
pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T> {
    let kind = value.kind_name();
    serde_json::from_value(serde_json::Value::from(value)).map_err(|e| {
        StoreError::invalid_type(std::any::type_name::<T>(), format!("{kind} ({e})"))
    })
}
