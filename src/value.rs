//! Values decoded from instrument replies and encoded into commands.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single scalar carried over the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Signed integer (`%d`, `%i`, `%o`, `%x`)
    Int(i64),
    /// Unsigned integer (`%u`)
    Uint(u64),
    /// Floating point (`%f`, `%e`, `%g`)
    Float(f64),
    /// Text (`%s`, `%c`, `%Nc`, raw string queries)
    Text(String),
}

impl Value {
    /// Convert to f64 for numeric operations
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Uint(u) => Some(*u as f64),
            Value::Text(_) => None,
        }
    }

    /// Convert to i64 for integer operations
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Uint(u) => i64::try_from(*u).ok(),
            Value::Float(_) | Value::Text(_) => None,
        }
    }

    /// Borrow the text, if this is a text value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Uint(_) => "uint",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Uint(u) => write!(f, "{u}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Uint(u64::from(value))
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::Uint(value)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Uint(value as u64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

/// Result of a parsed query: one value, or an ordered tuple of values.
///
/// A template with exactly one capture group yields [`Parsed::Scalar`]. Any other
/// count, including zero for presence-check templates, yields [`Parsed::Tuple`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Parsed {
    /// Exactly one capture group
    Scalar(Value),
    /// Zero or several capture groups, in template order
    Tuple(Vec<Value>),
}

impl Parsed {
    pub(crate) fn from_values(mut values: Vec<Value>) -> Self {
        if values.len() == 1 {
            if let Some(value) = values.pop() {
                return Parsed::Scalar(value);
            }
        }
        Parsed::Tuple(values)
    }

    /// The scalar value, if this is a single-value result.
    pub fn scalar(&self) -> Option<&Value> {
        match self {
            Parsed::Scalar(v) => Some(v),
            Parsed::Tuple(_) => None,
        }
    }

    /// Scalar as f64.
    pub fn as_f64(&self) -> Option<f64> {
        self.scalar().and_then(Value::as_f64)
    }

    /// Scalar as i64.
    pub fn as_i64(&self) -> Option<i64> {
        self.scalar().and_then(Value::as_i64)
    }

    /// Scalar as text.
    pub fn as_str(&self) -> Option<&str> {
        self.scalar().and_then(Value::as_str)
    }

    /// All values in template order.
    pub fn into_values(self) -> Vec<Value> {
        match self {
            Parsed::Scalar(v) => vec![v],
            Parsed::Tuple(values) => values,
        }
    }

    /// All values as f64, or `None` if any is not numeric.
    pub fn into_vec_f64(self) -> Option<Vec<f64>> {
        self.into_values().iter().map(Value::as_f64).collect()
    }

    /// Number of values carried.
    pub fn len(&self) -> usize {
        match self {
            Parsed::Scalar(_) => 1,
            Parsed::Tuple(values) => values.len(),
        }
    }

    /// True for presence-check results with no values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
