//! Backend-agnostic predicate language.
//!
//! Predicates are parsed from text (or built directly), validated against
//! their parameter bindings, optimized, and then either evaluated in process
//! or compiled by a repository backend into its native filter syntax.
//!
//! # Example
//!
//! ```ignore
//! let mut params = ParamBinds::new();
//! params.insert("age".into(), Value::from(20));
//! params.insert("maxAge".into(), Value::from(40));
//! let clause = where_("Data.Age > :age AND Data.Age < :maxAge", params)?;
//! ```

mod ast;
mod binds;
mod eval;
mod optimize;
mod parser;

pub use ast::{Bindable, Compare, Operator, Predicate};
pub use binds::{where_, ParamBinds, WherePredicates};
pub use eval::evaluate;
pub use optimize::optimize;
pub use parser::parse;
