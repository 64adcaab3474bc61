//! Property values stored on entities and relationships.
//!
//! Values are tagged in their serialized form so an exported graph keeps the
//! difference between `1` and `1.0`, or between a string and a timestamp.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Property map. Keys are unordered by contract; a `BTreeMap` keeps
/// serialization deterministic.
pub type Properties = BTreeMap<String, Value>;

/// A property value.
///
/// # Examples
///
/// ```
/// use worldmodel::Value;
///
/// let title = Value::from("Attention is all you need");
/// let year = Value::from(2017);
///
/// assert_eq!(title.as_str(), Some("Attention is all you need"));
/// assert_eq!(year.as_int(), Some(2017));
/// assert_eq!(year.type_name(), "int");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    List(Vec<Value>),
    Structured(serde_json::Value),
    #[default]
    Null,
}

impl Value {
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        if let Self::Bool(v) = self {
            Some(*v)
        } else {
            None
        }
    }

    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        if let Self::Int(v) = self {
            Some(*v)
        } else {
            None
        }
    }

    /// Floats, and ints widened to float.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        if let Self::String(v) = self {
            Some(v)
        } else {
            None
        }
    }

    #[must_use]
    pub const fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        if let Self::Timestamp(v) = self {
            Some(*v)
        } else {
            None
        }
    }

    /// Returns false if this value (or any nested list item) is a NaN or
    /// infinite float. JSON cannot carry those, so they would not survive an
    /// export.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        match self {
            Self::Float(v) => v.is_finite(),
            Self::List(items) => items.iter().all(Self::is_finite),
            _ => true,
        }
    }

    /// The serialized tag.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Timestamp(_) => "timestamp",
            Self::List(_) => "list",
            Self::Structured(_) => "structured",
            Self::Null => "null",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => v.fmt(f),
            Self::Int(v) => v.fmt(f),
            Self::Float(v) => v.fmt(f),
            Self::String(v) => write!(f, "{v:?}"),
            Self::Timestamp(v) => f.write_str(&v.to_rfc3339()),
            Self::List(v) => write!(f, "list[{}]", v.len()),
            Self::Structured(v) => v.fmt(f),
            Self::Null => f.write_str("null"),
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant(v.into())
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i32 => Int,
    i64 => Int,
    f64 => Float,
    String => String,
    &str => String,
    DateTime<Utc> => Timestamp,
    Vec<Value> => List,
    serde_json::Value => Structured,
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_and_float_keep_their_tag() {
        let int_json = serde_json::to_string(&Value::Int(1)).unwrap();
        let float_json = serde_json::to_string(&Value::Float(1.0)).unwrap();
        assert_ne!(int_json, float_json);

        let back: Value = serde_json::from_str(&float_json).unwrap();
        assert_eq!(back.type_name(), "float");
    }

    #[test]
    fn test_timestamp_survives_serialization() {
        let now = Utc::now();
        let json = serde_json::to_string(&Value::Timestamp(now)).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back.as_timestamp(), Some(now));
    }

    #[test]
    fn test_is_finite_checks_nested_lists() {
        assert!(Value::from(vec![Value::Float(1.0), Value::Int(2)]).is_finite());
        assert!(!Value::Float(f64::NAN).is_finite());
        assert!(!Value::from(vec![Value::Float(f64::INFINITY)]).is_finite());
    }

    #[test]
    fn test_as_float_widens_ints() {
        assert_eq!(Value::Int(3).as_float(), Some(3.0));
        assert_eq!(Value::from("x").as_float(), None);
    }

    #[test]
    fn test_option_into_value() {
        assert_eq!(Value::from(Option::<i64>::None), Value::Null);
        assert_eq!(Value::from(Some("y")).as_str(), Some("y"));
        assert_eq!(Value::default(), Value::Null);
    }
}
