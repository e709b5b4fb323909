//! Parameter bindings and validated `where` clauses.

use super::ast::Predicate;
use super::parser::parse;
use crate::error::{Result, StoreError};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Bind-name to value mapping.
pub type ParamBinds = BTreeMap<String, Value>;

/// A predicate together with exactly the bindings it references.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WherePredicates {
    pub predicate: Predicate,
    pub params: ParamBinds,
}

impl WherePredicates {
    /// Parse `text` and check its bind names against `params`.
    ///
    /// Fails before any I/O with `Syntax` or `BindMismatch`.
    pub fn new(text: &str, params: ParamBinds) -> Result<Self> {
        let predicate = parse(text)?;
        Self::from_predicate(predicate, params)
    }

    /// Validate a programmatically built predicate.
    pub fn from_predicate(predicate: Predicate, params: ParamBinds) -> Result<Self> {
        check_binds(&predicate, &params)?;
        Ok(Self { predicate, params })
    }

    pub fn evaluate(&self, data: &Value) -> bool {
        super::evaluate(&self.predicate, data, &self.params)
    }
}

/// Shorthand for [`WherePredicates::new`].
pub fn where_(text: &str, params: ParamBinds) -> Result<WherePredicates> {
    WherePredicates::new(text, params)
}

fn check_binds(predicate: &Predicate, params: &ParamBinds) -> Result<()> {
    let referenced = predicate.bind_names();
    let supplied: BTreeSet<String> = params.keys().cloned().collect();
    if referenced == supplied {
        return Ok(());
    }
    Err(StoreError::BindMismatch {
        missing: referenced.difference(&supplied).cloned().collect(),
        extra: supplied.difference(&referenced).cloned().collect(),
    })
}
