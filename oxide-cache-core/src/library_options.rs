//! Client library options forwarded to every freshly established connection

use crate::error::{CacheError, CacheResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of a client library option
///
/// Ids outside the [`LibraryOption`] table pass through unchecked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OptionId(pub u32);

impl OptionId {
    /// Look up the named option for this id, if it is a known one
    #[must_use]
    pub fn known(self) -> Option<LibraryOption> {
        LibraryOption::ALL.into_iter().find(|opt| opt.id() == self)
    }

    /// Resolve a configuration key: a decimal id or a known option name
    pub fn resolve(key: &str) -> CacheResult<Self> {
        let key = key.trim();
        if let Ok(id) = key.parse::<u32>() {
            return Ok(Self(id));
        }
        LibraryOption::from_name(key)
            .map(LibraryOption::id)
            .ok_or_else(|| CacheError::Config(format!("unknown library option '{key}'")))
    }
}

impl From<u32> for OptionId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl From<LibraryOption> for OptionId {
    fn from(opt: LibraryOption) -> Self {
        opt.id()
    }
}

impl fmt::Display for OptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.known() {
            Some(opt) => write!(f, "{}({})", opt.name(), self.0),
            None => write!(f, "{}", self.0),
        }
    }
}

/// Known client library options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum LibraryOption {
    /// Library-side value serializer (0 disables it)
    Serializer = 1,
    /// Library-side key prefix
    Prefix = 2,
    /// Per-command read timeout in seconds
    ReadTimeout = 3,
    /// SCAN retry behaviour
    Scan = 4,
    /// Cluster failover behaviour
    Failover = 5,
    /// TCP keepalive
    TcpKeepalive = 6,
    /// Value compression algorithm
    Compression = 7,
    /// Return literal replies
    ReplyLiteral = 8,
    /// Compression level
    CompressionLevel = 9,
    /// Treat null multi-bulk replies as null
    NullMultibulkAsNull = 10,
    /// Maximum command retries
    MaxRetries = 11,
    /// Backoff algorithm between retries
    BackoffAlgorithm = 12,
    /// Backoff base delay in milliseconds
    BackoffBase = 13,
    /// Backoff cap in milliseconds
    BackoffCap = 14,
}

impl LibraryOption {
    /// Every known option
    pub const ALL: [Self; 14] = [
        Self::Serializer,
        Self::Prefix,
        Self::ReadTimeout,
        Self::Scan,
        Self::Failover,
        Self::TcpKeepalive,
        Self::Compression,
        Self::ReplyLiteral,
        Self::CompressionLevel,
        Self::NullMultibulkAsNull,
        Self::MaxRetries,
        Self::BackoffAlgorithm,
        Self::BackoffBase,
        Self::BackoffCap,
    ];

    /// Numeric id of the option
    #[must_use]
    pub const fn id(self) -> OptionId {
        OptionId(self as u32)
    }

    /// Canonical configuration name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Serializer => "serializer",
            Self::Prefix => "prefix",
            Self::ReadTimeout => "read_timeout",
            Self::Scan => "scan",
            Self::Failover => "failover",
            Self::TcpKeepalive => "tcp_keepalive",
            Self::Compression => "compression",
            Self::ReplyLiteral => "reply_literal",
            Self::CompressionLevel => "compression_level",
            Self::NullMultibulkAsNull => "null_multibulk_as_null",
            Self::MaxRetries => "max_retries",
            Self::BackoffAlgorithm => "backoff_algorithm",
            Self::BackoffBase => "backoff_base",
            Self::BackoffCap => "backoff_cap",
        }
    }

    /// Match a name case-insensitively, with or without an `OPT_` prefix
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.trim().to_ascii_lowercase();
        let bare = lower.strip_prefix("opt_").unwrap_or(&lower);
        Self::ALL.into_iter().find(|opt| opt.name() == bare)
    }
}

/// Value of a library option
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    /// Integer value
    Int(i64),
    /// Floating point value
    Float(f64),
    /// Text value
    Text(String),
}

impl OptionValue {
    /// Integer view of the value
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(_) => None,
            Self::Text(s) => s.trim().parse().ok(),
        }
    }

    /// Floating point view of the value
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }

    /// Whether the value switches a feature on
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        match self {
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Text(s) => {
                let s = s.trim();
                !(s.is_empty() || s == "0" || s.eq_ignore_ascii_case("none"))
            }
        }
    }
}

impl From<i64> for OptionValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for OptionValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for OptionValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// Mapping from option id to value, applied one entry at a time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LibraryOptions(BTreeMap<OptionId, OptionValue>);

impl LibraryOptions {
    /// Create an empty option set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an option by id
    pub fn set(&mut self, id: impl Into<OptionId>, value: impl Into<OptionValue>) {
        self.0.insert(id.into(), value.into());
    }

    /// Set an option by name; unknown names are rejected
    pub fn set_named(&mut self, name: &str, value: impl Into<OptionValue>) -> CacheResult<()> {
        let id = OptionId::resolve(name)?;
        self.0.insert(id, value.into());
        Ok(())
    }

    /// Remove an option
    pub fn remove(&mut self, id: impl Into<OptionId>) -> Option<OptionValue> {
        self.0.remove(&id.into())
    }

    /// Get an option value
    #[must_use]
    pub fn get(&self, id: impl Into<OptionId>) -> Option<&OptionValue> {
        self.0.get(&id.into())
    }

    /// Iterate in id order
    pub fn iter(&self) -> impl Iterator<Item = (OptionId, &OptionValue)> {
        self.0.iter().map(|(id, value)| (*id, value))
    }

    /// Number of options
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no option is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether the library-side serializer is switched on
    #[must_use]
    pub fn serializer_enabled(&self) -> bool {
        self.get(LibraryOption::Serializer)
            .is_some_and(OptionValue::is_enabled)
    }

    /// Library-side key prefix, empty when unset
    #[must_use]
    pub fn key_prefix(&self) -> String {
        match self.get(LibraryOption::Prefix) {
            Some(OptionValue::Text(prefix)) => prefix.clone(),
            Some(OptionValue::Int(i)) => i.to_string(),
            Some(OptionValue::Float(f)) => f.to_string(),
            None => String::new(),
        }
    }
}

impl TryFrom<BTreeMap<String, OptionValue>> for LibraryOptions {
    type Error = CacheError;

    fn try_from(raw: BTreeMap<String, OptionValue>) -> CacheResult<Self> {
        let mut options = Self::new();
        for (key, value) in raw {
            options.0.insert(OptionId::resolve(&key)?, value);
        }
        Ok(options)
    }
}
