//! Structural simplification of predicates.

use super::ast::Predicate;

/// Simplify a predicate without changing what it matches.
///
/// A group nested directly in a group of the same kind is spliced into its
/// parent, singleton `And`/`Or` groups collapse to their only child and
/// double negation cancels. The rewrite is idempotent.
pub fn optimize(predicate: &Predicate) -> Predicate {
    match predicate {
        Predicate::And(children) => collapse(children, Predicate::And, |p| match p {
            Predicate::And(nested) => Ok(nested),
            other => Err(other),
        }),
        Predicate::Or(children) => collapse(children, Predicate::Or, |p| match p {
            Predicate::Or(nested) => Ok(nested),
            other => Err(other),
        }),
        Predicate::Not(inner) => match optimize(inner) {
            Predicate::Not(cancelled) => *cancelled,
            other => Predicate::not(other),
        },
        Predicate::Compare(_) => predicate.clone(),
    }
}

/// `same_kind` hands back the children of a group of the parent's kind.
fn collapse(
    children: &[Predicate],
    make: fn(Vec<Predicate>) -> Predicate,
    same_kind: fn(Predicate) -> Result<Vec<Predicate>, Predicate>,
) -> Predicate {
    let mut optimized = Vec::with_capacity(children.len());
    for child in children {
        match same_kind(optimize(child)) {
            Ok(nested) => optimized.extend(nested),
            Err(other) => optimized.push(other),
        }
    }
    if optimized.len() == 1 {
        optimized.remove(0)
    } else {
        make(optimized)
    }
}
