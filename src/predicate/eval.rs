//! Predicate evaluation against a document.

use super::ast::{Bindable, Compare, Predicate};
use super::ParamBinds;
use crate::value::Value;

/// Evaluate `predicate` against `data` with the given parameter bindings.
///
/// A comparison whose left side is missing from `data`, or whose right side
/// cannot be resolved, is false.
pub fn evaluate(predicate: &Predicate, data: &Value, binds: &ParamBinds) -> bool {
    match predicate {
        Predicate::And(children) => children.iter().all(|c| evaluate(c, data, binds)),
        Predicate::Or(children) => children.iter().any(|c| evaluate(c, data, binds)),
        Predicate::Not(inner) => !evaluate(inner, data, binds),
        Predicate::Compare(cmp) => compare(cmp, data, binds),
    }
}

fn compare(cmp: &Compare, data: &Value, binds: &ParamBinds) -> bool {
    let Some(left) = cmp.location.get(data) else {
        return false;
    };
    let right = match &cmp.bind {
        Bindable::Param(name) => binds.get(name),
        Bindable::Literal(value) => Some(value),
        Bindable::Relative(location) => location.get(data),
    };
    match right {
        Some(right) => cmp.operator.holds(left.compare(right)),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::parse;

    fn binds(pairs: &[(&str, Value)]) -> ParamBinds {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn person(age: i64) -> Value {
        Value::map([
            ("Name", Value::from("someone")),
            ("Age", Value::from(age)),
            ("Limit", Value::from(35)),
        ])
    }

    #[test]
    fn test_range_with_params() {
        let p = parse("Age > :age AND Age < :maxAge").unwrap();
        let b = binds(&[("age", Value::from(20)), ("maxAge", Value::from(40))]);
        let ages = [20, 30, 39, 40, 39];
        let matched: Vec<i64> = ages
            .iter()
            .copied()
            .filter(|&a| evaluate(&p, &person(a), &b))
            .collect();
        assert_eq!(matched, vec![30, 39, 39]);
    }

    #[test]
    fn test_empty_groups() {
        let data = person(1);
        let b = ParamBinds::new();
        assert!(evaluate(&Predicate::And(vec![]), &data, &b));
        assert!(!evaluate(&Predicate::Or(vec![]), &data, &b));
    }

    #[test]
    fn test_missing_path_is_false_for_every_operator() {
        let data = person(1);
        let b = ParamBinds::new();
        for op in ["=", "<", ">", "<=", ">=", "<>"] {
            let p = parse(&format!("Missing {} 1", op)).unwrap();
            assert!(!evaluate(&p, &data, &b), "{}", op);
        }
        let p = parse("NOT Missing = 1").unwrap();
        assert!(evaluate(&p, &data, &b));
    }

    #[test]
    fn test_unbound_param_is_false() {
        let p = parse("Age = :nope").unwrap();
        assert!(!evaluate(&p, &person(3), &ParamBinds::new()));
    }

    #[test]
    fn test_relative_location() {
        let p = parse("Age < Limit").unwrap();
        let b = ParamBinds::new();
        assert!(evaluate(&p, &person(30), &b));
        assert!(!evaluate(&p, &person(36), &b));
        let p = parse("Age < Nowhere").unwrap();
        assert!(!evaluate(&p, &person(30), &b));
    }

    #[test]
    fn test_none_sorts_lowest() {
        let data = Value::map([("Spouse", Value::None)]);
        let b = ParamBinds::new();
        assert!(evaluate(&parse("Spouse < false").unwrap(), &data, &b));
        assert!(evaluate(&parse("Spouse = null").unwrap(), &data, &b));
    }
}
