//! Paths into a [`Value`].
//!
//! Text form:
//!
//! - `Data.Age`: field access
//! - `Data.Tags[0]`: list index
//! - `Data["odd key"]`: quoted field
//! - `Data.Shape.#.Radius`, `Data.Items[*]`: wildcard, matches any map entry
//!   (other than the union tag) or any list element

use super::{Value, UNION_TAG_KEY};
use crate::error::{Result, StoreError};
use chumsky::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One step of a [`Location`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Segment {
    Field(String),
    Index(usize),
    Anything,
}

/// Ordered sequence of segments addressing a sub-value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Location {
    segments: Vec<Segment>,
}

impl Location {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    /// Location consisting of plain field names.
    pub fn fields<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(names.into_iter().map(|n| Segment::Field(n.into())).collect())
    }

    /// Parse the textual form.
    pub fn parse(text: &str) -> Result<Self> {
        parser()
            .then_ignore(end())
            .parse(text.trim())
            .map_err(|errors| {
                let first = errors.into_iter().next();
                StoreError::Syntax {
                    position: first.as_ref().map(|e| e.span().start).unwrap_or(0),
                    message: first
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "invalid location".to_string()),
                }
            })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Append a segment, returning the extended location.
    pub fn push(mut self, segment: Segment) -> Self {
        self.segments.push(segment);
        self
    }

    /// Resolve this location against `value`.
    ///
    /// Wildcards try candidates in key (or index) order and pick the first one
    /// for which the rest of the path resolves. A missing path yields `None`.
    pub fn get<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        resolve(&self.segments, value)
    }
}

fn resolve<'a>(segments: &[Segment], value: &'a Value) -> Option<&'a Value> {
    let Some((head, rest)) = segments.split_first() else {
        return Some(value);
    };
    match (head, value) {
        (Segment::Field(name), Value::Map(map)) => resolve(rest, map.get(name)?),
        (Segment::Index(i), Value::List(items)) => resolve(rest, items.get(*i)?),
        (Segment::Anything, Value::Map(map)) => map
            .iter()
            .filter(|(k, _)| k.as_str() != UNION_TAG_KEY)
            .find_map(|(_, v)| resolve(rest, v)),
        (Segment::Anything, Value::List(items)) => items.iter().find_map(|v| resolve(rest, v)),
        _ => None,
    }
}

fn is_plain(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Field(name) if is_plain(name) => {
                    if i > 0 {
                        f.write_str(".")?;
                    }
                    f.write_str(name)?;
                }
                Segment::Field(name) => {
                    let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
                    write!(f, "[\"{}\"]", escaped)?;
                }
                Segment::Index(idx) => write!(f, "[{}]", idx)?,
                Segment::Anything => {
                    if i > 0 {
                        f.write_str(".")?;
                    }
                    f.write_str("#")?;
                }
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for Location {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Location::parse(s)
    }
}

/// Plain identifier usable as a field name without quoting.
pub(crate) fn name() -> impl Parser<char, String, Error = Simple<char>> + Clone {
    filter(|c: &char| c.is_alphanumeric() || *c == '_' || *c == '$')
        .repeated()
        .at_least(1)
        .collect::<String>()
}

pub(crate) fn quoted() -> impl Parser<char, String, Error = Simple<char>> + Clone {
    let escape = just('\\').ignore_then(any());
    let plain = filter(|c: &char| *c != '"' && *c != '\\');
    just('"')
        .ignore_then(plain.or(escape).repeated())
        .then_ignore(just('"'))
        .collect::<String>()
}

/// Parser for the textual location form, shared with the predicate grammar.
pub(crate) fn parser() -> impl Parser<char, Location, Error = Simple<char>> + Clone {
    let index = text::int(10).try_map(|digits: String, span| {
        digits
            .parse::<usize>()
            .map_err(|e| Simple::custom(span, e.to_string()))
    });

    let bracket = just('[')
        .ignore_then(choice((
            index.map(Segment::Index),
            quoted().map(Segment::Field),
            just('*').to(Segment::Anything),
        )))
        .then_ignore(just(']'));

    let bare = name().map(Segment::Field).or(just('#').to(Segment::Anything));
    let dotted = just('.').ignore_then(bare.clone());

    bare.or(bracket.clone())
        .then(dotted.or(bracket).repeated())
        .map(|(first, rest)| {
            let mut segments = Vec::with_capacity(rest.len() + 1);
            segments.push(first);
            segments.extend(rest);
            Location::new(segments)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Value {
        Value::map([
            ("Age", Value::from(30)),
            (
                "Tags",
                Value::List(vec![Value::from("a"), Value::from("b")]),
            ),
            (
                "Shape",
                Value::union("Circle", Value::map([("Radius", Value::from(2))])),
            ),
            ("odd key", Value::from(true)),
        ])
    }

    #[test]
    fn test_parse_segments() {
        let loc = Location::parse("Data.Tags[1]").unwrap();
        assert_eq!(
            loc.segments(),
            &[
                Segment::Field("Data".into()),
                Segment::Field("Tags".into()),
                Segment::Index(1)
            ]
        );

        let loc = Location::parse(r#"Data["odd key"].#"#).unwrap();
        assert_eq!(
            loc.segments(),
            &[
                Segment::Field("Data".into()),
                Segment::Field("odd key".into()),
                Segment::Anything
            ]
        );

        let loc = Location::parse("Items[*]").unwrap();
        assert_eq!(loc.segments()[1], Segment::Anything);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Location::parse("Data..Age").is_err());
        assert!(Location::parse("Data[").is_err());
        assert!(Location::parse("").is_err());
    }

    #[test]
    fn test_display_parses_back() {
        for text in ["Data.Age", "Data.Tags[0]", r#"Data["odd key"]"#, "Data.Shape.#.Radius"] {
            let loc = Location::parse(text).unwrap();
            assert_eq!(loc.to_string(), text);
            assert_eq!(Location::parse(&loc.to_string()).unwrap(), loc);
        }
    }

    #[test]
    fn test_get() {
        let data = sample();
        assert_eq!(Location::parse("Age").unwrap().get(&data), Some(&Value::from(30)));
        assert_eq!(
            Location::parse("Tags[1]").unwrap().get(&data),
            Some(&Value::from("b"))
        );
        assert_eq!(
            Location::parse(r#"["odd key"]"#).unwrap().get(&data),
            Some(&Value::from(true))
        );
        assert_eq!(Location::parse("Tags[5]").unwrap().get(&data), None);
        assert_eq!(Location::parse("Age.Nested").unwrap().get(&data), None);
    }

    #[test]
    fn test_wildcard_skips_union_tag() {
        let data = sample();
        assert_eq!(
            Location::parse("Shape.#.Radius").unwrap().get(&data),
            Some(&Value::from(2))
        );
        assert_eq!(
            Location::parse("Shape.#").unwrap().get(&data),
            Some(&Value::map([("Radius", Value::from(2))]))
        );
    }

    #[test]
    fn test_wildcard_backtracks_over_list() {
        let data = Value::map([(
            "Items",
            Value::List(vec![
                Value::map([("Other", Value::from(1))]),
                Value::map([("Price", Value::from(9))]),
            ]),
        )]);
        assert_eq!(
            Location::parse("Items[*].Price").unwrap().get(&data),
            Some(&Value::from(9))
        );
    }
}
