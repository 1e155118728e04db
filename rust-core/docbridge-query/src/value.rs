// SPDX-License-Identifier: PMPL-1.0-or-later
//! Caller-facing values.
//!
//! Queries are built from [`Value`]s rather than raw BSON so that callers can
//! pass dates and byte strings without knowing the store's encoding. Values
//! are converted once, when a clause or update is compiled.

use std::fmt;

use bson::spec::BinarySubtype;
use bson::{Binary, Bson, Document};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A relational value used in clauses and updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// SQL NULL.
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// A raw byte string. Identifier normalization may turn a 16-byte string
    /// into a binary UUID.
    Bytes(Vec<u8>),
    /// A UTC timestamp, stored natively with millisecond precision.
    DateTime(DateTime<Utc>),
    Array(Vec<Value>),
    /// Ordered field/value pairs.
    Map(Vec<(String, Value)>),
    /// An already-native value, passed through untouched.
    Native(Bson),
}

impl Value {
    /// Build a [`Value::Bytes`].
    pub fn bytes(raw: impl Into<Vec<u8>>) -> Self {
        Value::Bytes(raw.into())
    }

    /// True for a flat list, the shape `push`/`pull` treat as a batch.
    pub fn is_list(&self) -> bool {
        matches!(self, Value::Array(_) | Value::Native(Bson::Array(_)))
    }

    /// Convert into the store's native representation.
    ///
    /// Dates become native millisecond timestamps at any depth. Integers that
    /// fit in 32 bits are stored as 32-bit integers.
    pub fn into_bson(self) -> Bson {
        match self {
            Value::Null => Bson::Null,
            Value::Bool(b) => Bson::Boolean(b),
            Value::Int(i) => match i32::try_from(i) {
                Ok(small) => Bson::Int32(small),
                Err(_) => Bson::Int64(i),
            },
            Value::Float(f) => Bson::Double(f),
            Value::String(s) => Bson::String(s),
            Value::Bytes(bytes) => Bson::Binary(Binary {
                subtype: BinarySubtype::Generic,
                bytes,
            }),
            Value::DateTime(dt) => Bson::DateTime(bson::DateTime::from_chrono(dt)),
            Value::Array(items) => Bson::Array(items.into_iter().map(Value::into_bson).collect()),
            Value::Map(pairs) => {
                let mut doc = Document::new();
                for (key, value) in pairs {
                    doc.insert(key, value.into_bson());
                }
                Bson::Document(doc)
            }
            Value::Native(native) => native,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::Bytes(b) => write!(f, "bytes[{}]", b.len()),
            Value::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            Value::Array(items) => write!(f, "array[{}]", items.len()),
            Value::Map(pairs) => write!(f, "map[{}]", pairs.len()),
            Value::Native(b) => write!(f, "{}", b),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
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

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::DateTime(v)
    }
}

impl From<Bson> for Value {
    fn from(v: Bson) -> Self {
        Value::Native(v)
    }
}

impl From<Document> for Value {
    fn from(v: Document) -> Self {
        Value::Native(Bson::Document(v))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Value {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Value::Map(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
