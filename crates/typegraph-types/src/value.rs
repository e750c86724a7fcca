//! Property values.
//!
//! Graph stores only understand a handful of primitive kinds (booleans,
//! numbers, strings and lists of those). Application objects carry richer
//! *native* values (uuids, timestamps, decimals) that are coerced to primitives
//! on the way into the graph and back on the way out (see `attribute.rs`).
//!
//! `Value` covers both planes so one map type can be used everywhere.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An ordered property map (`name -> value`).
///
/// Ordered so that serialized maps, rendered queries and digests are
/// deterministic.
pub type Properties = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    /// Native only: travels as a hyphenated string.
    Uuid(Uuid),
    /// Native only: travels as an RFC 3339 string.
    DateTime(DateTime<FixedOffset>),
    /// Native only: canonical decimal text (e.g. `-12.50`).
    Decimal(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// True if the value can be stored as-is by a graph store.
    pub fn is_primitive(&self) -> bool {
        match self {
            Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::String(_) => {
                true
            }
            Value::List(items) => items.iter().all(Value::is_primitive),
            Value::Uuid(_) | Value::DateTime(_) | Value::Decimal(_) => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Short name of the variant, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Uuid(_) => "uuid",
            Value::DateTime(_) => "datetime",
            Value::Decimal(_) => "decimal",
        }
    }

    /// Canonical text key for exact-match indexes.
    ///
    /// Two values produce the same key iff they are equal primitives; the
    /// variant tag keeps `1` and `"1"` apart.
    pub fn index_key(&self) -> String {
        match self {
            Value::Null => "n:".to_string(),
            Value::Bool(b) => format!("b:{b}"),
            Value::Int(i) => format!("i:{i}"),
            Value::Float(f) => format!("f:{}", f.to_bits()),
            Value::String(s) => format!("s:{s}"),
            Value::List(items) => {
                let inner: Vec<String> = items.iter().map(Value::index_key).collect();
                format!("l:[{}]", inner.join(","))
            }
            Value::Uuid(u) => format!("u:{u}"),
            Value::DateTime(dt) => format!("d:{}", dt.to_rfc3339()),
            Value::Decimal(d) => format!("m:{d}"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Uuid(u) => write!(f, "{u}"),
            Value::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            Value::Decimal(d) => write!(f, "{d}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(v: DateTime<FixedOffset>) -> Self {
        Value::DateTime(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
