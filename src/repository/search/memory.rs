//! In-process index that executes search bodies.
//!
//! Understands the clauses the query compiler emits: `match_all`,
//! `match_none`, `term`, `range`, `exists`, `bool` and the field comparison
//! `script`. Field paths resolve with location semantics, so `*` picks the
//! first matching map entry or list element.

use super::client::{Hit, IndexCondition, SearchClient, SearchError, SearchResponse};
use super::query::{parse_field_path, sort_values};
use crate::predicate::Operator;
use crate::value::Value;
use parking_lot::RwLock;
use serde_json::{Map, Value as Json};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

#[derive(Default)]
pub struct MemoryIndex {
    indices: RwLock<HashMap<String, BTreeMap<String, Json>>>,
    unavailable: AtomicBool,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with a transport error until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, AtomicOrdering::SeqCst);
    }

    pub fn document_count(&self, index: &str) -> usize {
        self.indices.read().get(index).map(BTreeMap::len).unwrap_or(0)
    }

    fn check_available(&self) -> Result<(), SearchError> {
        if self.unavailable.load(AtomicOrdering::SeqCst) {
            Err(SearchError::Transport("index unavailable".into()))
        } else {
            Ok(())
        }
    }
}

impl SearchClient for MemoryIndex {
    fn get(&self, index: &str, id: &str) -> Result<Option<Json>, SearchError> {
        self.check_available()?;
        Ok(self
            .indices
            .read()
            .get(index)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    fn index(
        &self,
        index: &str,
        id: &str,
        document: Json,
        condition: IndexCondition,
    ) -> Result<(), SearchError> {
        self.check_available()?;
        let mut indices = self.indices.write();
        let docs = indices.entry(index.to_string()).or_default();
        let current = docs.get(id);
        let allowed = match condition {
            IndexCondition::Any => true,
            IndexCondition::MustNotExist => current.is_none(),
            IndexCondition::IfStoredVersion(version) => current
                .and_then(|doc| doc.get("Version"))
                .and_then(Json::as_u64)
                == Some(u64::from(version)),
        };
        if !allowed {
            return Err(SearchError::VersionConflict { id: id.to_string() });
        }
        docs.insert(id.to_string(), document);
        Ok(())
    }

    fn delete(&self, index: &str, id: &str) -> Result<(), SearchError> {
        self.check_available()?;
        if let Some(docs) = self.indices.write().get_mut(index) {
            docs.remove(id);
        }
        Ok(())
    }

    fn search(&self, index: &str, body: &Json) -> Result<SearchResponse, SearchError> {
        self.check_available()?;
        let query = body.get("query").cloned().unwrap_or(Json::Null);
        let sort = parse_sort(body.get("sort"))?;
        let size = body
            .get("size")
            .and_then(Json::as_u64)
            .map(|n| n as usize)
            .unwrap_or(10);
        let missing: Vec<Option<&str>> = sort.iter().map(|c| c.missing.as_deref()).collect();
        let after = body
            .get("search_after")
            .and_then(Json::as_array)
            .map(|values| sort_values(values, &missing));

        let indices = self.indices.read();
        let Some(docs) = indices.get(index) else {
            return Ok(SearchResponse::default());
        };

        let mut hits = Vec::new();
        for (id, source) in docs {
            let document = Value::from(source.clone());
            if query.is_null() || matches_clause(&query, &document)? {
                let keys: Vec<Value> = sort
                    .iter()
                    .map(|clause| {
                        parse_field_path(&clause.field)
                            .get(&document)
                            .cloned()
                            .unwrap_or_default()
                    })
                    .collect();
                hits.push((keys, id, source));
            }
        }
        hits.sort_by(|(a, _, _), (b, _, _)| compare_keys(&sort, a, b));
        if let Some(after) = after {
            hits.retain(|(keys, _, _)| compare_keys(&sort, keys, &after) == Ordering::Greater);
        }

        Ok(SearchResponse {
            hits: hits
                .into_iter()
                .take(size)
                .map(|(keys, id, source)| Hit {
                    id: id.clone(),
                    source: source.clone(),
                    sort: keys
                        .into_iter()
                        .zip(&missing)
                        .map(|(key, marker)| match (key, marker) {
                            (Value::None, Some(marker)) => Json::from(*marker),
                            (key, _) => Json::from(key),
                        })
                        .collect(),
                })
                .collect(),
        })
    }
}

fn malformed(what: impl Into<String>) -> SearchError {
    SearchError::Query(what.into())
}

struct SortClause {
    field: String,
    descending: bool,
    /// Stands in for a missing value in sort positions.
    missing: Option<String>,
}

fn parse_sort(sort: Option<&Json>) -> Result<Vec<SortClause>, SearchError> {
    let Some(sort) = sort else {
        return Ok(Vec::new());
    };
    let clauses = sort.as_array().ok_or_else(|| malformed("sort must be an array"))?;
    clauses
        .iter()
        .map(|clause| {
            let (field, spec) = single_entry(clause)?;
            let descending = match spec {
                Json::String(order) => order == "desc",
                spec => spec.get("order").and_then(Json::as_str) == Some("desc"),
            };
            Ok(SortClause {
                field: field.clone(),
                descending,
                missing: spec.get("missing").and_then(Json::as_str).map(str::to_string),
            })
        })
        .collect()
}

fn compare_keys(sort: &[SortClause], a: &[Value], b: &[Value]) -> Ordering {
    for (i, SortClause { descending, .. }) in sort.iter().enumerate() {
        let (Some(x), Some(y)) = (a.get(i), b.get(i)) else {
            break;
        };
        let ord = x.compare(y);
        let ord = if *descending { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn single_entry(clause: &Json) -> Result<(&String, &Json), SearchError> {
    let map: &Map<String, Json> = clause
        .as_object()
        .ok_or_else(|| malformed(format!("expected object, got {clause}")))?;
    let mut entries = map.iter();
    match (entries.next(), entries.next()) {
        (Some(entry), None) => Ok(entry),
        _ => Err(malformed(format!("expected a single key in {clause}"))),
    }
}

fn resolve<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    parse_field_path(path).get(document)
}

fn clauses<'a>(spec: &'a Json, key: &str) -> Result<&'a [Json], SearchError> {
    match spec.get(key) {
        None => Ok(&[]),
        Some(Json::Array(items)) => Ok(items),
        Some(other) => Err(malformed(format!("{key} must be an array, got {other}"))),
    }
}

fn matches_clause(clause: &Json, document: &Value) -> Result<bool, SearchError> {
    let (kind, spec) = single_entry(clause)?;
    Ok(match kind.as_str() {
        "match_all" => true,
        "match_none" => false,
        "exists" => {
            let field = spec
                .get("field")
                .and_then(Json::as_str)
                .ok_or_else(|| malformed("exists needs a field"))?;
            resolve(document, field).is_some()
        }
        "term" => {
            let (field, value) = single_entry(spec)?;
            match resolve(document, field) {
                Some(stored) => stored.compare(&Value::from(value.clone())) == Ordering::Equal,
                None => false,
            }
        }
        "range" => {
            let (field, bounds) = single_entry(spec)?;
            let Some(stored) = resolve(document, field) else {
                return Ok(false);
            };
            let bounds = bounds
                .as_object()
                .ok_or_else(|| malformed("range bounds must be an object"))?;
            let mut all = true;
            for (op, bound) in bounds {
                let operator = match op.as_str() {
                    "lt" => Operator::Lt,
                    "gt" => Operator::Gt,
                    "lte" => Operator::Le,
                    "gte" => Operator::Ge,
                    other => return Err(malformed(format!("unknown range bound {other}"))),
                };
                all &= operator.holds(stored.compare(&Value::from(bound.clone())));
            }
            all
        }
        "bool" => {
            for child in clauses(spec, "must")? {
                if !matches_clause(child, document)? {
                    return Ok(false);
                }
            }
            for child in clauses(spec, "must_not")? {
                if matches_clause(child, document)? {
                    return Ok(false);
                }
            }
            let should = clauses(spec, "should")?;
            if should.is_empty() {
                true
            } else {
                let mut any = false;
                for child in should {
                    if matches_clause(child, document)? {
                        any = true;
                        break;
                    }
                }
                any
            }
        }
        "script" => {
            let params = spec
                .get("script")
                .and_then(|s| s.get("params"))
                .ok_or_else(|| malformed("script needs params"))?;
            let field = |name: &str| {
                params
                    .get(name)
                    .and_then(Json::as_str)
                    .ok_or_else(|| malformed(format!("script param {name} missing")))
            };
            let operator = match field("op")? {
                "=" => Operator::Eq,
                "<" => Operator::Lt,
                ">" => Operator::Gt,
                "<=" => Operator::Le,
                ">=" => Operator::Ge,
                "<>" => Operator::Ne,
                other => return Err(malformed(format!("unknown operator {other}"))),
            };
            match (resolve(document, field("left")?), resolve(document, field("right")?)) {
                (Some(left), Some(right)) => operator.holds(left.compare(right)),
                _ => false,
            }
        }
        other => return Err(malformed(format!("unsupported clause {other}"))),
    })
}
