//! Scalar values, raw documents and object identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A raw record as returned by the document store.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Name of the identifier field carried by every stored document.
pub const ID_FIELD: &str = "_id";

/// A scalar value that can appear on the right-hand side of a predicate.
///
/// Integers are tried before floats so that `1` stays `1` when the native
/// query is serialized again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// UTF-8 string.
    String(String),
}

impl Scalar {
    /// Convert to a JSON value for comparison against documents.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Scalar::Int(i) => serde_json::Value::from(*i),
            Scalar::Float(f) => serde_json::Value::from(*f),
            Scalar::String(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::Int(v as i64)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::String(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::String(v)
    }
}

/// A 12-byte document identifier, written as 24 hexadecimal characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    /// Parse and validate a textual id.
    pub fn parse(id: &str) -> Result<Self, Error> {
        if id.len() != 24 {
            return Err(Error::InvalidId(id.to_string()));
        }
        let mut bytes = [0u8; 12];
        hex::decode_to_slice(id, &mut bytes).map_err(|_| Error::InvalidId(id.to_string()))?;
        Ok(Self(bytes))
    }
}

impl FromStr for ObjectId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl Serialize for ObjectId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ObjectId::parse(&s).map_err(serde::de::Error::custom)
    }
}
