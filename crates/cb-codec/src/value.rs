//! The self-describing value model the codec round-trips.
//!
//! `Value` stands in for whatever a task expression, its captured globals,
//! or its evaluated result look like: arbitrary nested structured data plus
//! an escape hatch (`Value::Opaque`) for expression trees the core never
//! needs to inspect, only carry.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A self-describing value preserved bit-for-bit across `encode`/`decode`.
///
/// Encoded with its ordinary (externally tagged) derive representation
/// rather than `#[serde(untagged)]`: untagged would make `Bytes` and
/// `Opaque` indistinguishable on the wire (both are plain byte strings),
/// silently reinterpreting one as the other on decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(#[serde(with = "serde_bytes")] Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// An expression tree or other payload the codec carries but never
    /// interprets; the worker runtime's evaluator owns its meaning.
    Opaque(#[serde(with = "serde_bytes")] Vec<u8>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v.as_slice()),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{decode, encode};

    #[test]
    fn round_trips_nested_structures() {
        let mut inner = BTreeMap::new();
        inner.insert("x".to_string(), Value::Int(1));
        inner.insert("y".to_string(), Value::List(vec![Value::Bool(true), Value::Null]));
        let v = Value::Map(inner);

        let bytes = encode(&v).unwrap();
        let back: Value = decode(&bytes).unwrap();
        assert_eq!(v, back);
    }

    #[test]
    fn round_trips_opaque_bytes() {
        let v = Value::Opaque(vec![0xde, 0xad, 0xbe, 0xef]);
        let bytes = encode(&v).unwrap();
        let back: Value = decode(&bytes).unwrap();
        assert_eq!(v, back);
    }
}
