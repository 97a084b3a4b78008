//! Typed attribute values carried by records

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A single attribute value.
///
/// Containers use ordered collections so that serializing a value is
/// deterministic, which identity hashing relies on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum AttrValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<AttrValue>),
    Set(BTreeSet<String>),
    Map(BTreeMap<String, AttrValue>),
}

/// Attribute collection keyed by name
pub type Attributes = BTreeMap<String, AttrValue>;

impl AttrValue {
    /// Numeric view used by the ordering merge strategies.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(n) => Some(*n as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Evaluate the value as a boolean.
    ///
    /// Returns `None` when the value has no sensible truth value (NaN).
    pub fn truthiness(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int(n) => Some(*n != 0),
            Self::Float(f) if f.is_nan() => None,
            Self::Float(f) => Some(*f != 0.0),
            Self::String(s) => Some(!s.is_empty()),
            Self::List(items) => Some(!items.is_empty()),
            Self::Set(items) => Some(!items.is_empty()),
            Self::Map(items) => Some(!items.is_empty()),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for AttrValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<f64> for AttrValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Vec<AttrValue>> for AttrValue {
    fn from(items: Vec<AttrValue>) -> Self {
        Self::List(items)
    }
}

impl From<BTreeSet<String>> for AttrValue {
    fn from(items: BTreeSet<String>) -> Self {
        Self::Set(items)
    }
}

impl std::fmt::Display for AttrValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(s) => write!(f, "{}", s),
            Self::Int(n) => write!(f, "{}", n),
            Self::Float(x) => write!(f, "{}", x),
            Self::Bool(b) => write!(f, "{}", b),
            Self::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Self::Set(items) => {
                let parts: Vec<&str> = items.iter().map(String::as_str).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
            Self::Map(items) => {
                let parts: Vec<String> =
                    items.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
        }
    }
}
