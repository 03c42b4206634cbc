//! Dynamic SQL values and their cache-key form.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A dynamically-typed SQL value.
///
/// This enum covers the storage classes the entity layer persists. Richer
/// caller-side inputs (row references, structured JSON) are handled one layer
/// up; by the time a value reaches the driver it is one of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,

    /// 64-bit signed integer
    Int(i64),

    /// 64-bit floating point
    Real(f64),

    /// Text string
    Text(String),

    /// Binary data
    Blob(Vec<u8>),
}

impl Value {
    /// Check if this value is NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get the type name of this value.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Int(_) => "INTEGER",
            Value::Real(_) => "REAL",
            Value::Text(_) => "TEXT",
            Value::Blob(_) => "BLOB",
        }
    }

    /// Try to convert this value to an i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Real(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// Try to convert this value to an f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Real(v) => Some(*v),
            _ => None,
        }
    }

    /// Try to get this value as a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get this value as a byte slice.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(b) => Some(b),
            Value::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Numeric view used by comparisons: integers widen to reals.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Real(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Real(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Blob(b) => write!(f, "<blob {} bytes>", b.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Hashable form of a lookup value, used as the key of the weak caches.
///
/// Reals are keyed by their bit pattern, so `1.0` and `1` are distinct keys;
/// lookup values always come out of the same coercion path for a given field,
/// which keeps the keying consistent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LookupKey {
    Null,
    Int(i64),
    RealBits(u64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<&Value> for LookupKey {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => LookupKey::Null,
            Value::Int(v) => LookupKey::Int(*v),
            Value::Real(v) => LookupKey::RealBits(v.to_bits()),
            Value::Text(s) => LookupKey::Text(s.clone()),
            Value::Blob(b) => LookupKey::Blob(b.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn type_names() {
        assert_eq!(Value::Null.type_name(), "NULL");
        assert_eq!(Value::Int(1).type_name(), "INTEGER");
        assert_eq!(Value::Real(1.5).type_name(), "REAL");
        assert_eq!(Value::Text("x".into()).type_name(), "TEXT");
        assert_eq!(Value::Blob(vec![0]).type_name(), "BLOB");
    }

    #[test]
    fn numeric_views() {
        assert_eq!(Value::Int(7).as_f64(), Some(7.0));
        assert_eq!(Value::Real(7.9).as_i64(), Some(7));
        assert_eq!(Value::Text("7".into()).as_i64(), None);
    }

    #[test]
    fn lookup_keys_distinguish_types() {
        let mut map: HashMap<LookupKey, u32> = HashMap::new();
        map.insert((&Value::Int(1)).into(), 1);
        map.insert((&Value::Text("1".into())).into(), 2);
        map.insert((&Value::Real(1.0)).into(), 3);
        assert_eq!(map.len(), 3);
        assert_eq!(map.get(&LookupKey::Int(1)), Some(&1));
    }

    #[test]
    fn lookup_key_roundtrip_for_equal_values() {
        let a: LookupKey = (&Value::Text("key".into())).into();
        let b: LookupKey = (&Value::Text("key".into())).into();
        assert_eq!(a, b);
    }

    #[test]
    fn option_conversion() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some(3_i64)), Value::Int(3));
    }
}
