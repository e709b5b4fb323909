//! Predicate compilation to search query bodies.
//!
//! Documents are indexed in their record shape (`ID`, `Type`, `Data`,
//! `Version`), so a location maps onto a dotted field path. A wildcard
//! segment becomes `*`. Positional list access has no field-path form and is
//! rejected.

use crate::error::{Result, StoreError};
use crate::predicate::{Bindable, Compare, Operator, ParamBinds, Predicate};
use crate::repository::Cursor;
use crate::types::SortField;
use crate::value::{Location, Segment, Value};
use serde_json::{json, Map, Value as Json};

/// Script used for comparisons between two fields of the same document.
/// `params.op` is one of `=`, `<`, `>`, `<=`, `>=`, `<>`.
pub const RELATIVE_SCRIPT: &str = "def l = doc[params.left]; def r = doc[params.right]; \
if (l.size() == 0 || r.size() == 0) { return false; } \
int c = l.value.compareTo(r.value); \
if (params.op == '=') { return c == 0; } if (params.op == '<>') { return c != 0; } \
if (params.op == '<') { return c < 0; } if (params.op == '>') { return c > 0; } \
if (params.op == '<=') { return c <= 0; } return c >= 0;";

/// Dotted field path for a location.
pub fn field_path(location: &Location) -> Result<String> {
    if location.is_empty() {
        return Err(StoreError::invalid_type("non-empty location", "empty location"));
    }
    let mut parts = Vec::with_capacity(location.segments().len());
    for segment in location.segments() {
        match segment {
            Segment::Field(name) if name.contains('.') || name == "*" || name.is_empty() => {
                return Err(StoreError::invalid_type(
                    "field name usable in a dotted path",
                    name.clone(),
                ))
            }
            Segment::Field(name) => parts.push(name.clone()),
            Segment::Anything => parts.push("*".to_string()),
            Segment::Index(_) => {
                return Err(StoreError::invalid_type(
                    "location without list positions",
                    location.to_string(),
                ))
            }
        }
    }
    Ok(parts.join("."))
}

/// Inverse of [`field_path`].
pub fn parse_field_path(path: &str) -> Location {
    Location::new(
        path.split('.')
            .map(|part| match part {
                "*" => Segment::Anything,
                name => Segment::Field(name.to_string()),
            })
            .collect(),
    )
}

/// Compile a predicate into a query clause.
pub fn compile_filter(predicate: &Predicate, binds: &ParamBinds) -> Result<Json> {
    Ok(match predicate {
        Predicate::And(children) if children.is_empty() => match_all(),
        Predicate::Or(children) if children.is_empty() => match_none(),
        Predicate::And(children) => json!({
            "bool": { "must": compile_all(children, binds)? }
        }),
        Predicate::Or(children) => json!({
            "bool": { "should": compile_all(children, binds)?, "minimum_should_match": 1 }
        }),
        Predicate::Not(inner) => json!({
            "bool": { "must_not": [compile_filter(inner, binds)?] }
        }),
        Predicate::Compare(cmp) => compile_compare(cmp, binds)?,
    })
}

fn compile_all(children: &[Predicate], binds: &ParamBinds) -> Result<Vec<Json>> {
    children.iter().map(|c| compile_filter(c, binds)).collect()
}

fn compile_compare(cmp: &Compare, binds: &ParamBinds) -> Result<Json> {
    let field = field_path(&cmp.location)?;
    let value = match &cmp.bind {
        Bindable::Param(name) => match binds.get(name) {
            Some(value) => value,
            None => return Ok(match_none()),
        },
        Bindable::Literal(value) => value,
        Bindable::Relative(other) => {
            return Ok(json!({
                "script": {
                    "script": {
                        "source": RELATIVE_SCRIPT,
                        "params": {
                            "left": field,
                            "op": cmp.operator.symbol(),
                            "right": field_path(other)?,
                        }
                    }
                }
            }));
        }
    };
    if matches!(value, Value::None) {
        // Indexed nulls are indistinguishable from absent fields.
        return Err(StoreError::invalid_type(
            "non-null comparison value",
            format!("null compared with {field}"),
        ));
    }
    let value = Json::from(value.clone());
    let range = |op: &str| {
        let mut bound = Map::new();
        bound.insert(op.to_string(), value.clone());
        let mut field_range = Map::new();
        field_range.insert(field.clone(), Json::Object(bound));
        json!({ "range": field_range })
    };
    Ok(match cmp.operator {
        Operator::Eq => term(&field, value.clone()),
        Operator::Ne => json!({
            "bool": {
                "must": [{ "exists": { "field": field } }],
                "must_not": [term(&field, value.clone())],
            }
        }),
        Operator::Lt => range("lt"),
        Operator::Gt => range("gt"),
        Operator::Le => range("lte"),
        Operator::Ge => range("gte"),
    })
}

fn term(field: &str, value: Json) -> Json {
    let mut inner = Map::new();
    inner.insert(field.to_string(), value);
    json!({ "term": inner })
}

fn match_all() -> Json {
    json!({ "match_all": {} })
}

fn match_none() -> Json {
    json!({ "match_none": {} })
}

/// Placement of documents missing a sort field: lowest in either direction.
pub fn missing_marker(descending: bool) -> &'static str {
    if descending {
        "_last"
    } else {
        "_first"
    }
}

/// Sort clause: the query's sort fields, then `ID`, then `Type`. Missing
/// values order lowest.
pub fn sort_clause(sort: &[SortField]) -> Result<Vec<Json>> {
    let mut clauses = Vec::with_capacity(sort.len() + 2);
    for field in sort {
        let order = if field.descending { "desc" } else { "asc" };
        let missing = missing_marker(field.descending);
        let mut clause = Map::new();
        clause.insert(
            field_path(&field.location)?,
            json!({ "order": order, "missing": missing }),
        );
        clauses.push(Json::Object(clause));
    }
    clauses.push(json!({ "ID": { "order": "asc" } }));
    clauses.push(json!({ "Type": { "order": "asc" } }));
    Ok(clauses)
}

/// Full search request body.
pub fn search_body(
    filter: Option<&(Predicate, ParamBinds)>,
    sort: &[SortField],
    size: usize,
    after: Option<&Cursor>,
) -> Result<Json> {
    let query = match filter {
        Some((predicate, binds)) => compile_filter(predicate, binds)?,
        None => match_all(),
    };
    let mut body = json!({
        "query": query,
        "sort": sort_clause(sort)?,
        "size": size,
    });
    if let (Some(cursor), Json::Object(map)) = (after, &mut body) {
        // A cursor key is `None` where the record lacks the field; the
        // position then carries the clause's missing marker.
        let mut position: Vec<Json> = cursor
            .keys
            .iter()
            .zip(sort)
            .map(|(key, field)| match key {
                Value::None => Json::from(missing_marker(field.descending)),
                key => Json::from(key.clone()),
            })
            .collect();
        position.push(Json::from(cursor.id.clone()));
        position.push(Json::from(cursor.record_type.clone()));
        map.insert("search_after".to_string(), Json::Array(position));
    }
    Ok(body)
}

/// Convert a sort-value array back into values. `missing` holds each sort
/// clause's missing marker; a value equal to its clause's marker is `None`.
pub fn sort_values(values: &[Json], missing: &[Option<&str>]) -> Vec<Value> {
    values
        .iter()
        .enumerate()
        .map(|(i, value)| match (value, missing.get(i).copied().flatten()) {
            (Json::String(s), Some(marker)) if s == marker => Value::None,
            (value, _) => Value::from(value.clone()),
        })
        .collect()
}
