//! Predicate compilation to conditional expressions.
//!
//! Every attribute name is replaced by a `#nN` placeholder and every value by
//! a `:vN` placeholder, so user data never collides with reserved words.
//! Placeholders are numbered in order of first appearance, which makes the
//! compiled text deterministic for a given predicate.

use super::attribute::{encode, AttributeValue, ID_ATTR};
use crate::error::{Result, StoreError};
use crate::predicate::{Bindable, Compare, Operator, ParamBinds, Predicate};
use crate::value::{Location, Segment};
use std::collections::BTreeMap;
use std::fmt;

/// One element of an attribute path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathElem {
    /// Name placeholder, e.g. `#n0`.
    Name(String),
    Index(usize),
    /// Any map entry or list element.
    Wildcard,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttributePath(pub Vec<PathElem>);

#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Path(AttributePath),
    /// Value placeholder, e.g. `:v0`.
    Value(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
    Compare {
        left: AttributePath,
        operator: Operator,
        right: Operand,
    },
    AttributeExists(AttributePath),
    AttributeNotExists(AttributePath),
}

/// A condition together with its placeholder tables.
#[derive(Clone, Debug, PartialEq)]
pub struct Expression {
    pub condition: Condition,
    /// Placeholder to attribute name.
    pub names: BTreeMap<String, String>,
    /// Placeholder to value.
    pub values: BTreeMap<String, AttributeValue>,
}

impl Expression {
    /// Expression text as sent to the table.
    pub fn text(&self) -> String {
        self.condition.to_string()
    }
}

/// Allocates placeholders while a condition is being built.
#[derive(Default)]
pub struct ExpressionBuilder {
    names: BTreeMap<String, String>,
    by_name: BTreeMap<String, String>,
    values: BTreeMap<String, AttributeValue>,
}

impl ExpressionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Placeholder for an attribute name; repeated names share one.
    pub fn name(&mut self, name: &str) -> String {
        if let Some(placeholder) = self.by_name.get(name) {
            return placeholder.clone();
        }
        let placeholder = format!("#n{}", self.by_name.len());
        self.by_name.insert(name.to_string(), placeholder.clone());
        self.names.insert(placeholder.clone(), name.to_string());
        placeholder
    }

    pub fn value(&mut self, value: AttributeValue) -> String {
        let placeholder = format!(":v{}", self.values.len());
        self.values.insert(placeholder.clone(), value);
        placeholder
    }

    /// Path of top-level attribute `name`.
    pub fn attribute(&mut self, name: &str) -> AttributePath {
        AttributePath(vec![PathElem::Name(self.name(name))])
    }

    /// Translate a document location. The first segment must name a
    /// top-level attribute.
    pub fn path(&mut self, location: &Location) -> Result<AttributePath> {
        match location.segments().first() {
            Some(Segment::Field(_)) => {}
            Some(_) => {
                return Err(StoreError::invalid_type(
                    "location starting with an attribute name",
                    location.to_string(),
                ))
            }
            None => return Err(StoreError::invalid_type("non-empty location", "empty location")),
        }
        let elems = location
            .segments()
            .iter()
            .map(|segment| match segment {
                Segment::Field(name) => PathElem::Name(self.name(name)),
                Segment::Index(i) => PathElem::Index(*i),
                Segment::Anything => PathElem::Wildcard,
            })
            .collect();
        Ok(AttributePath(elems))
    }

    pub fn finish(self, condition: Condition) -> Expression {
        Expression {
            condition,
            names: self.names,
            values: self.values,
        }
    }
}

/// Compile a predicate and its bindings into a filter expression.
pub fn compile(predicate: &Predicate, binds: &ParamBinds) -> Result<Expression> {
    let mut builder = ExpressionBuilder::new();
    let condition = compile_node(predicate, binds, &mut builder)?;
    Ok(builder.finish(condition))
}

fn compile_node(
    predicate: &Predicate,
    binds: &ParamBinds,
    builder: &mut ExpressionBuilder,
) -> Result<Condition> {
    Ok(match predicate {
        Predicate::And(children) if children.is_empty() => always(builder),
        Predicate::Or(children) if children.is_empty() => never(builder),
        Predicate::And(children) => Condition::And(
            children
                .iter()
                .map(|c| compile_node(c, binds, builder))
                .collect::<Result<_>>()?,
        ),
        Predicate::Or(children) => Condition::Or(
            children
                .iter()
                .map(|c| compile_node(c, binds, builder))
                .collect::<Result<_>>()?,
        ),
        Predicate::Not(inner) => Condition::Not(Box::new(compile_node(inner, binds, builder)?)),
        Predicate::Compare(cmp) => compile_compare(cmp, binds, builder)?,
    })
}

fn compile_compare(
    cmp: &Compare,
    binds: &ParamBinds,
    builder: &mut ExpressionBuilder,
) -> Result<Condition> {
    let left = builder.path(&cmp.location)?;
    let right = match &cmp.bind {
        Bindable::Param(name) => match binds.get(name) {
            Some(value) => Operand::Value(builder.value(encode(value)?)),
            None => return Ok(never(builder)),
        },
        Bindable::Literal(value) => Operand::Value(builder.value(encode(value)?)),
        Bindable::Relative(location) => Operand::Path(builder.path(location)?),
    };
    let compare = Condition::Compare {
        left: left.clone(),
        operator: cmp.operator,
        right,
    };
    // A missing attribute never satisfies a comparison, including `<>`.
    Ok(match cmp.operator {
        Operator::Ne => Condition::And(vec![Condition::AttributeExists(left), compare]),
        _ => compare,
    })
}

fn always(builder: &mut ExpressionBuilder) -> Condition {
    Condition::AttributeExists(builder.attribute(ID_ATTR))
}

fn never(builder: &mut ExpressionBuilder) -> Condition {
    Condition::AttributeNotExists(builder.attribute(ID_ATTR))
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, elem) in self.0.iter().enumerate() {
            match elem {
                PathElem::Name(placeholder) => {
                    if i > 0 {
                        f.write_str(".")?;
                    }
                    f.write_str(placeholder)?;
                }
                PathElem::Index(idx) => write!(f, "[{}]", idx)?,
                PathElem::Wildcard => f.write_str("[*]")?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Path(path) => path.fmt(f),
            Operand::Value(placeholder) => f.write_str(placeholder),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |f: &mut fmt::Formatter<'_>, parts: &[Condition], sep: &str| {
            f.write_str("(")?;
            for (i, part) in parts.iter().enumerate() {
                if i > 0 {
                    write!(f, " {} ", sep)?;
                }
                write!(f, "{}", part)?;
            }
            f.write_str(")")
        };
        match self {
            Condition::And(parts) => join(f, parts, "AND"),
            Condition::Or(parts) => join(f, parts, "OR"),
            Condition::Not(inner) => write!(f, "(NOT {})", inner),
            Condition::Compare {
                left,
                operator,
                right,
            } => write!(f, "{} {} {}", left, operator.symbol(), right),
            Condition::AttributeExists(path) => write!(f, "attribute_exists({})", path),
            Condition::AttributeNotExists(path) => write!(f, "attribute_not_exists({})", path),
        }
    }
}
