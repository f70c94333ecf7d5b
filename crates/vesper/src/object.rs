//! Public value type.
//!
//! `Object` is the owned, heap-independent form of a runtime value, handed
//! out by [`Runner`](crate::Runner) as the program result. Container values
//! convert structurally; identity types (instances, functions, coroutines)
//! surface as their rendered representation.

use std::fmt;

use indexmap::IndexMap;

use crate::{
    heap::HeapData,
    value::{ReprCtx, Value, format_float},
};

#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<Object>),
    Tuple(Vec<Object>),
    Dict(IndexMap<String, Object>),
    /// A value with no structural `Object` mapping (an instance, function,
    /// blueprint, or coroutine), carried as its rendered form.
    Repr(String),
}

impl Object {
    pub(crate) fn from_value(value: &Value, ctx: &ReprCtx<'_>) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(v) => Self::Bool(*v),
            Value::Int(v) => Self::Int(*v),
            Value::Float(v) => Self::Float(*v),
            Value::Ref(id) => match ctx.heap.get(*id) {
                HeapData::Str(s) => Self::Str(s.clone()),
                HeapData::Array(items) => Self::Array(items.iter().map(|v| Self::from_value(v, ctx)).collect()),
                HeapData::Tuple(items) => Self::Tuple(items.iter().map(|v| Self::from_value(v, ctx)).collect()),
                HeapData::Dict(dict) => Self::Dict(
                    dict.iter()
                        .map(|(k, v)| (k.to_owned(), Self::from_value(v, ctx)))
                        .collect(),
                ),
                _ => Self::Repr(ctx.repr(value)),
            },
            other => Self::Repr(ctx.repr(other)),
        }
    }
}

impl Object {
    /// Source-like rendering used inside containers: strings are quoted.
    fn fmt_nested(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "\"{s}\""),
            other => write!(f, "{other}"),
        }
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(true) => write!(f, "true"),
            Self::Bool(false) => write!(f, "false"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{}", format_float(*v)),
            Self::Str(s) => write!(f, "{s}"),
            Self::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    item.fmt_nested(f)?;
                }
                write!(f, "]")
            }
            Self::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    item.fmt_nested(f)?;
                }
                if items.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
            Self::Dict(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "\"{key}\": ")?;
                    value.fmt_nested(f)?;
                }
                write!(f, "}}")
            }
            Self::Repr(text) => write!(f, "{text}"),
        }
    }
}
