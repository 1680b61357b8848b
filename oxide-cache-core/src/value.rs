//! Cache value model and its encoding to Redis strings

use crate::error::{CacheError, CacheResult};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A value stored through the adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CacheValue {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Ordered list of values
    Array(Vec<CacheValue>),
    /// String-keyed map of values
    Object(BTreeMap<String, CacheValue>),
}

impl CacheValue {
    /// Kind of this value, as used by the capability table
    #[must_use]
    pub const fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Null,
            Self::Bool(_) => ValueKind::Boolean,
            Self::Int(_) => ValueKind::Integer,
            Self::Float(_) => ValueKind::Double,
            Self::String(_) => ValueKind::String,
            Self::Array(_) => ValueKind::Array,
            Self::Object(_) => ValueKind::Object,
        }
    }

    /// Borrow the string content, if this is a string
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for CacheValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for CacheValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for CacheValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for CacheValue {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for CacheValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for CacheValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Vec<Self>> for CacheValue {
    fn from(arr: Vec<Self>) -> Self {
        Self::Array(arr)
    }
}

/// Kind of value, keyed in the capability table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// Null
    Null,
    /// Boolean
    Boolean,
    /// Integer
    Integer,
    /// Floating point
    Double,
    /// String
    String,
    /// List
    Array,
    /// Map
    Object,
}

impl ValueKind {
    /// All kinds in table order
    pub const ALL: [Self; 7] = [
        Self::Null,
        Self::Boolean,
        Self::Integer,
        Self::Double,
        Self::String,
        Self::Array,
        Self::Object,
    ];

    /// Whether the kind is a scalar
    #[must_use]
    pub const fn is_scalar(self) -> bool {
        !matches!(self, Self::Array | Self::Object)
    }

    /// Lowercase name of the kind
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Double => "double",
            Self::String => "string",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How values are turned into Redis strings
///
/// Resolved once when the adapter is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueEncoding {
    /// Scalars are stored as their text form; structured values are rejected
    #[default]
    Raw,
    /// Every value goes through a JSON encode/decode step
    Json,
}

impl ValueEncoding {
    /// Whether an external serializer is active
    #[must_use]
    pub const fn is_serializing(self) -> bool {
        matches!(self, Self::Json)
    }

    /// Encode a value for a write
    ///
    /// In raw mode booleans become `"1"` or `""`, numbers their decimal
    /// text and null `""`.
    pub fn encode(self, value: &CacheValue) -> CacheResult<Bytes> {
        match self {
            Self::Json => Ok(Bytes::from(serde_json::to_vec(value)?)),
            Self::Raw => match value {
                CacheValue::Null | CacheValue::Bool(false) => Ok(Bytes::new()),
                CacheValue::Bool(true) => Ok(Bytes::from_static(b"1")),
                CacheValue::Int(i) => Ok(Bytes::from(i.to_string())),
                CacheValue::Float(f) => Ok(Bytes::from(f.to_string())),
                CacheValue::String(s) => Ok(Bytes::from(s.clone())),
                CacheValue::Array(_) | CacheValue::Object(_) => Err(CacheError::Unsupported(
                    format!("{} values require a serializer", value.kind()),
                )),
            },
        }
    }

    /// Decode a value read back from Redis
    ///
    /// Raw mode always yields a string; the caller coerces it. Bytes that
    /// are not valid UTF-8 fail with [`CacheError::Serialization`].
    pub fn decode(self, raw: &[u8]) -> CacheResult<CacheValue> {
        match self {
            Self::Json => Ok(serde_json::from_slice(raw)?),
            Self::Raw => match std::str::from_utf8(raw) {
                Ok(text) => Ok(CacheValue::String(text.to_string())),
                Err(e) => Err(CacheError::Serialization(serde::de::Error::custom(
                    format!("raw value is not valid UTF-8: {e}"),
                ))),
            },
        }
    }
}
