//! Parser for the textual predicate language.
//!
//! ```text
//! Expression := OrCond (OR OrCond)*
//! OrCond     := Cond (AND Cond)*
//! Cond       := NOT Cond | "(" Expression ")" | Comparable
//! Comparable := Location Operator (":" name | Literal | Location)
//! Operator   := "=" | "<" | ">" | "<=" | ">=" | "<>"
//! Literal    := number | "string" | true | false | null
//! ```
//!
//! Keywords are case-insensitive.

use super::ast::{Bindable, Compare, Operator, Predicate};
use crate::error::{Result, StoreError};
use crate::value::{self, Value};
use chumsky::prelude::*;

/// Parse predicate text.
pub fn parse(text: &str) -> Result<Predicate> {
    parser()
        .padded()
        .then_ignore(end())
        .parse(text)
        .map_err(|errors| {
            let first = errors.into_iter().next();
            StoreError::Syntax {
                position: first.as_ref().map(|e| e.span().start).unwrap_or(0),
                message: first
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "invalid predicate".to_string()),
            }
        })
}

fn keyword(word: &'static str) -> impl Parser<char, (), Error = Simple<char>> + Clone {
    text::ident()
        .try_map(move |ident: String, span| {
            if ident.eq_ignore_ascii_case(word) {
                Ok(())
            } else {
                Err(Simple::custom(span, format!("expected {}", word)))
            }
        })
        .padded()
}

fn operator() -> impl Parser<char, Operator, Error = Simple<char>> + Clone {
    choice((
        just("<=").to(Operator::Le),
        just(">=").to(Operator::Ge),
        just("<>").to(Operator::Ne),
        just("=").to(Operator::Eq),
        just("<").to(Operator::Lt),
        just(">").to(Operator::Gt),
    ))
    .padded()
}

fn number() -> impl Parser<char, Value, Error = Simple<char>> + Clone {
    let exponent = one_of("eE")
        .then(one_of("+-").or_not())
        .then(text::digits(10))
        .map(|((e, sign), digits): ((char, Option<char>), String)| {
            let mut s = String::new();
            s.push(e);
            if let Some(sign) = sign {
                s.push(sign);
            }
            s.push_str(&digits);
            s
        });

    just('-')
        .or_not()
        .then(text::digits(10))
        .then(just('.').ignore_then(text::digits(10)).or_not())
        .then(exponent.or_not())
        .try_map(|(((sign, int), frac), exp), span| {
            let mut s = String::new();
            if sign.is_some() {
                s.push('-');
            }
            s.push_str(&int);
            if let Some(frac) = frac {
                s.push('.');
                s.push_str(&frac);
            }
            if let Some(exp) = exp {
                s.push_str(&exp);
            }
            s.parse::<f64>()
                .map(Value::Number)
                .map_err(|e| Simple::custom(span, e.to_string()))
        })
}

fn string() -> impl Parser<char, Value, Error = Simple<char>> + Clone {
    let escape = just('\\').ignore_then(choice((
        just('n').to('\n'),
        just('t').to('\t'),
        just('r').to('\r'),
        just('"'),
        just('\\'),
        just('/'),
    )));
    just('"')
        .ignore_then(filter(|c: &char| *c != '"' && *c != '\\').or(escape).repeated())
        .then_ignore(just('"'))
        .collect::<String>()
        .map(Value::String)
}

fn word_literal() -> impl Parser<char, Value, Error = Simple<char>> + Clone {
    text::ident().try_map(|ident: String, span| match ident.as_str() {
        "true" => Ok(Value::Boolean(true)),
        "false" => Ok(Value::Boolean(false)),
        "null" => Ok(Value::None),
        _ => Err(Simple::custom(span, "expected literal")),
    })
}

fn bindable() -> impl Parser<char, Bindable, Error = Simple<char>> + Clone {
    let param = just(':').ignore_then(text::ident()).map(Bindable::Param);
    let literal = choice((number(), string(), word_literal())).map(Bindable::Literal);
    let relative = value::location::parser().map(Bindable::Relative);
    choice((param, literal, relative)).padded()
}

fn comparable() -> impl Parser<char, Predicate, Error = Simple<char>> + Clone {
    value::location::parser()
        .padded()
        .then(operator())
        .then(bindable())
        .map(|((location, operator), bind)| {
            Predicate::Compare(Compare {
                location,
                operator,
                bind,
            })
        })
}

fn group(
    first: Predicate,
    rest: Vec<Predicate>,
    make: fn(Vec<Predicate>) -> Predicate,
) -> Predicate {
    if rest.is_empty() {
        first
    } else {
        let mut all = Vec::with_capacity(rest.len() + 1);
        all.push(first);
        all.extend(rest);
        make(all)
    }
}

pub(crate) fn parser() -> impl Parser<char, Predicate, Error = Simple<char>> + Clone {
    recursive(|expression| {
        let atom = expression
            .delimited_by(just('(').padded(), just(')').padded())
            .or(comparable());

        let cond = recursive(|cond| {
            keyword("NOT")
                .ignore_then(cond)
                .map(Predicate::not)
                .or(atom)
        });

        let or_cond = cond
            .clone()
            .then(keyword("AND").ignore_then(cond).repeated())
            .map(|(first, rest)| group(first, rest, Predicate::And));

        or_cond
            .clone()
            .then(keyword("OR").ignore_then(or_cond).repeated())
            .map(|(first, rest)| group(first, rest, Predicate::Or))
    })
}
