//! Typed paths over record shapes.
//!
//! Record types describe themselves with a [`Shape`]. A [`TypedPath`] written
//! against that shape is rewritten to the [`Location`] addressing the same
//! data in the generic [`Value`](crate::value::Value) encoding. The rewrite
//! is where tagged unions show up: a union value is stored as
//! `{"$type": tag, tag: payload}`, so reaching into its payload needs either
//! the variant tag as a field or a wildcard over the variants.

use crate::error::{Result, StoreError};
use crate::predicate::{Bindable, Compare, Predicate};
use crate::value::{Location, Segment};
use std::collections::{BTreeMap, HashMap};

/// Structure of a stored type.
#[derive(Clone, Debug, PartialEq)]
pub enum Shape {
    /// String, number or boolean.
    Scalar,
    /// Unconstrained; nothing below it can be addressed.
    Any,
    /// Optional or boxed value; transparent to paths.
    Pointer(Box<Shape>),
    /// Named alias of another shape; transparent to paths.
    Alias(String, Box<Shape>),
    Struct(Vec<(String, Shape)>),
    /// Tagged union of `(tag, payload)` variants.
    Union(Vec<(String, Shape)>),
    List(Box<Shape>),
    /// String-keyed map.
    Map(Box<Shape>),
}

impl Shape {
    pub fn structure<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (S, Shape)>,
        S: Into<String>,
    {
        Shape::Struct(fields.into_iter().map(|(n, s)| (n.into(), s)).collect())
    }

    pub fn union<I, S>(variants: I) -> Self
    where
        I: IntoIterator<Item = (S, Shape)>,
        S: Into<String>,
    {
        Shape::Union(variants.into_iter().map(|(n, s)| (n.into(), s)).collect())
    }

    /// Shape of a stored record whose payload has shape `data`.
    pub fn record(data: Shape) -> Self {
        Shape::structure([
            ("ID", Shape::Scalar),
            ("Type", Shape::Scalar),
            ("Data", data),
            ("Version", Shape::Scalar),
        ])
    }
}

/// Types that can describe their stored shape.
pub trait Shaped {
    fn shape() -> Shape;
}

macro_rules! scalar_shapes {
    ($($t:ty),* $(,)?) => {
        $(impl Shaped for $t {
            fn shape() -> Shape {
                Shape::Scalar
            }
        })*
    };
}

scalar_shapes!(String, bool, f32, f64, i8, i16, i32, i64, u8, u16, u32, u64, usize);

impl<T: Shaped> Shaped for Option<T> {
    fn shape() -> Shape {
        Shape::Pointer(Box::new(T::shape()))
    }
}

impl<T: Shaped> Shaped for Box<T> {
    fn shape() -> Shape {
        Shape::Pointer(Box::new(T::shape()))
    }
}

impl<T: Shaped> Shaped for Vec<T> {
    fn shape() -> Shape {
        Shape::List(Box::new(T::shape()))
    }
}

impl<T: Shaped> Shaped for BTreeMap<String, T> {
    fn shape() -> Shape {
        Shape::Map(Box::new(T::shape()))
    }
}

impl<T: Shaped> Shaped for HashMap<String, T> {
    fn shape() -> Shape {
        Shape::Map(Box::new(T::shape()))
    }
}

impl Shaped for crate::value::Value {
    fn shape() -> Shape {
        Shape::Any
    }
}

/// One step of a [`TypedPath`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathSegment {
    /// Struct field.
    Field(String),
    /// Payload of a specific union variant.
    Variant(String),
    /// List position.
    Index(usize),
    /// Map key.
    Key(String),
    /// Any list element or map entry.
    Each,
}

/// Path expressed against a [`Shape`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TypedPath {
    segments: Vec<PathSegment>,
}

impl TypedPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.segments.push(PathSegment::Field(name.into()));
        self
    }

    pub fn variant(mut self, tag: impl Into<String>) -> Self {
        self.segments.push(PathSegment::Variant(tag.into()));
        self
    }

    pub fn index(mut self, index: usize) -> Self {
        self.segments.push(PathSegment::Index(index));
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.segments.push(PathSegment::Key(key.into()));
        self
    }

    pub fn each(mut self) -> Self {
        self.segments.push(PathSegment::Each);
        self
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }
}

impl From<&Location> for TypedPath {
    /// Reads a generic location as a typed path: fields stay fields,
    /// positions stay positions, wildcards become [`PathSegment::Each`].
    fn from(location: &Location) -> Self {
        Self {
            segments: location
                .segments()
                .iter()
                .map(|segment| match segment {
                    Segment::Field(name) => PathSegment::Field(name.clone()),
                    Segment::Index(i) => PathSegment::Index(*i),
                    Segment::Anything => PathSegment::Each,
                })
                .collect(),
        }
    }
}

/// Location of `path` in the generic encoding of `shape`.
///
/// Pointers and aliases are stepped through. At a union, an explicit variant
/// (or a field named like a variant) becomes that tag's field; any other step
/// goes through a wildcard over the variants, provided some variant can take
/// the rest of the path. Fails with `ShapeNotFound` when the path leaves the
/// shape or crosses [`Shape::Any`].
pub fn location_for(shape: &Shape, path: &TypedPath) -> Result<Location> {
    let mut out = Vec::new();
    walk(shape, path.segments(), &mut out)?;
    Ok(Location::new(out))
}

/// [`location_for`] against the record shape of `T`.
pub fn record_location<T: Shaped>(path: &TypedPath) -> Result<Location> {
    location_for(&Shape::record(T::shape()), path)
}

fn walk(shape: &Shape, path: &[PathSegment], out: &mut Vec<Segment>) -> Result<()> {
    let Some((head, rest)) = path.split_first() else {
        return Ok(());
    };
    match (shape, head) {
        (Shape::Pointer(inner), _) | (Shape::Alias(_, inner), _) => walk(inner, path, out),

        (Shape::Struct(fields), PathSegment::Field(name)) => {
            let (_, field) = fields
                .iter()
                .find(|(n, _)| n == name)
                .ok_or_else(|| not_found(format!("no field {name}")))?;
            out.push(Segment::Field(name.clone()));
            walk(field, rest, out)
        }

        (Shape::Union(variants), PathSegment::Variant(tag))
        | (Shape::Union(variants), PathSegment::Field(tag))
            if variants.iter().any(|(t, _)| t == tag) =>
        {
            let (_, payload) = variants
                .iter()
                .find(|(t, _)| t == tag)
                .ok_or_else(|| not_found(format!("no variant {tag}")))?;
            out.push(Segment::Field(tag.clone()));
            walk(payload, rest, out)
        }
        (Shape::Union(_), PathSegment::Variant(tag)) => Err(not_found(format!("no variant {tag}"))),
        (Shape::Union(variants), _) => {
            for (_, payload) in variants {
                let mut attempt = vec![Segment::Anything];
                if walk(payload, path, &mut attempt).is_ok() {
                    out.extend(attempt);
                    return Ok(());
                }
            }
            Err(not_found(format!("no variant accepts {head:?}")))
        }

        (Shape::List(item), PathSegment::Index(i)) => {
            out.push(Segment::Index(*i));
            walk(item, rest, out)
        }
        (Shape::List(item), PathSegment::Each) | (Shape::Map(item), PathSegment::Each) => {
            out.push(Segment::Anything);
            walk(item, rest, out)
        }
        (Shape::Map(item), PathSegment::Key(key)) | (Shape::Map(item), PathSegment::Field(key)) => {
            out.push(Segment::Field(key.clone()));
            walk(item, rest, out)
        }

        (Shape::Any, _) => Err(not_found(format!("cannot address {head:?} in an unconstrained value"))),
        (shape, head) => Err(not_found(format!("{head:?} does not apply to {}", kind(shape)))),
    }
}

fn kind(shape: &Shape) -> &'static str {
    match shape {
        Shape::Scalar => "a scalar",
        Shape::Any => "an unconstrained value",
        Shape::Pointer(_) => "a pointer",
        Shape::Alias(..) => "an alias",
        Shape::Struct(_) => "a struct",
        Shape::Union(_) => "a union",
        Shape::List(_) => "a list",
        Shape::Map(_) => "a map",
    }
}

fn not_found(message: String) -> StoreError {
    StoreError::ShapeNotFound(message)
}

/// Rewrite every location in `predicate`, read as a typed path against
/// `shape`, into its generic-encoding location.
pub fn predicate_for(shape: &Shape, predicate: &Predicate) -> Result<Predicate> {
    Ok(match predicate {
        Predicate::And(children) => Predicate::And(
            children
                .iter()
                .map(|c| predicate_for(shape, c))
                .collect::<Result<_>>()?,
        ),
        Predicate::Or(children) => Predicate::Or(
            children
                .iter()
                .map(|c| predicate_for(shape, c))
                .collect::<Result<_>>()?,
        ),
        Predicate::Not(inner) => Predicate::not(predicate_for(shape, inner)?),
        Predicate::Compare(cmp) => Predicate::Compare(Compare {
            location: location_for(shape, &TypedPath::from(&cmp.location))?,
            operator: cmp.operator,
            bind: match &cmp.bind {
                Bindable::Relative(other) => {
                    Bindable::Relative(location_for(shape, &TypedPath::from(other))?)
                }
                bind => bind.clone(),
            },
        }),
    })
}
