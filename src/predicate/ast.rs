//! Predicate syntax tree.

use crate::value::{Location, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Boolean query expression over document locations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    Compare(Compare),
}

/// `location operator bindable`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Compare {
    pub location: Location,
    pub operator: Operator,
    pub bind: Bindable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Eq,
    Lt,
    Gt,
    Le,
    Ge,
    Ne,
}

/// Right-hand side of a comparison.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Bindable {
    /// `:name`, resolved from the parameter bindings.
    Param(String),
    Literal(Value),
    /// Another location in the same document.
    Relative(Location),
}

impl Operator {
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Lt => "<",
            Operator::Gt => ">",
            Operator::Le => "<=",
            Operator::Ge => ">=",
            Operator::Ne => "<>",
        }
    }

    /// Whether a three-way comparison result satisfies this operator.
    pub fn holds(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            Operator::Eq => ordering == Equal,
            Operator::Lt => ordering == Less,
            Operator::Gt => ordering == Greater,
            Operator::Le => ordering != Greater,
            Operator::Ge => ordering != Less,
            Operator::Ne => ordering != Equal,
        }
    }
}

impl Predicate {
    /// `location operator :param`
    pub fn param(location: Location, operator: Operator, name: impl Into<String>) -> Self {
        Predicate::Compare(Compare {
            location,
            operator,
            bind: Bindable::Param(name.into()),
        })
    }

    /// `location operator literal`
    pub fn literal(location: Location, operator: Operator, value: impl Into<Value>) -> Self {
        Predicate::Compare(Compare {
            location,
            operator,
            bind: Bindable::Literal(value.into()),
        })
    }

    pub fn not(predicate: Predicate) -> Self {
        Predicate::Not(Box::new(predicate))
    }

    /// Names of every parameter referenced, sorted and deduplicated.
    pub fn bind_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.collect_bind_names(&mut names);
        names
    }

    fn collect_bind_names(&self, names: &mut BTreeSet<String>) {
        match self {
            Predicate::And(children) | Predicate::Or(children) => {
                for child in children {
                    child.collect_bind_names(names);
                }
            }
            Predicate::Not(inner) => inner.collect_bind_names(names),
            Predicate::Compare(cmp) => {
                if let Bindable::Param(name) = &cmp.bind {
                    names.insert(name.clone());
                }
            }
        }
    }

    fn is_group(&self) -> bool {
        matches!(self, Predicate::And(_) | Predicate::Or(_))
    }
}

impl fmt::Display for Bindable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bindable::Param(name) => write!(f, ":{}", name),
            Bindable::Literal(value) => write!(f, "{}", value),
            Bindable::Relative(location) => write!(f, "{}", location),
        }
    }
}

fn write_child(f: &mut fmt::Formatter<'_>, child: &Predicate) -> fmt::Result {
    if child.is_group() {
        write!(f, "({})", child)
    } else {
        write!(f, "{}", child)
    }
}

/// Renders the textual predicate syntax. Empty groups have no textual form
/// and render as `()`.
impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::And(children) | Predicate::Or(children) => {
                if children.is_empty() {
                    return f.write_str("()");
                }
                let joiner = if matches!(self, Predicate::And(_)) {
                    " AND "
                } else {
                    " OR "
                };
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(joiner)?;
                    }
                    write_child(f, child)?;
                }
                Ok(())
            }
            Predicate::Not(inner) => {
                f.write_str("NOT ")?;
                write_child(f, inner)
            }
            Predicate::Compare(cmp) => write!(
                f,
                "{} {} {}",
                cmp.location,
                cmp.operator.symbol(),
                cmp.bind
            ),
        }
    }
}
