//! Version-dependent capability resolution

use crate::types::ServerVersion;
use crate::value::{ValueEncoding, ValueKind};
use serde::Serialize;
use std::collections::BTreeMap;

/// Key length limit of pre-3.0 servers
pub const LEGACY_MAX_KEY_LENGTH: usize = 255;

/// Key length ceiling used for 3.0 and later
pub const MAX_KEY_LENGTH: usize = 512_000_000;

/// How a value kind survives a write/read cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KindSupport {
    /// Returned with its original type
    Supported,
    /// Cannot be stored
    Unsupported,
    /// Returned as the given kind; the caller coerces
    StoredAs(ValueKind),
}

impl KindSupport {
    /// Whether values of this kind can be written at all
    #[must_use]
    pub const fn is_storable(self) -> bool {
        !matches!(self, Self::Unsupported)
    }
}

/// What the connected store supports
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityDescriptor {
    /// Longest accepted physical key
    pub max_key_length: usize,
    /// Whether keys can carry an expiry
    pub ttl_supported: bool,
    /// Expiry precision in seconds
    pub ttl_precision: u64,
    /// Smallest accepted time-to-live in seconds
    pub min_ttl: u64,
    /// Largest accepted time-to-live in seconds; 0 means unbounded
    pub max_ttl: u64,
    /// Expiry is fixed at write time
    pub static_ttl: bool,
    /// Expiry is measured from server time, not request time
    pub use_request_time: bool,
    /// Namespaces are implemented as key prefixes
    pub namespace_is_prefix: bool,
    /// Separator between namespace and key
    pub namespace_separator: String,
    /// Metadata fields served by `metadata`
    pub supported_metadata: Vec<&'static str>,
    /// Per value kind support
    pub supported_kinds: BTreeMap<ValueKind, KindSupport>,
}

impl CapabilityDescriptor {
    /// Resolve the descriptor for a server version and encoding
    #[must_use]
    pub fn resolve(version: &ServerVersion, encoding: ValueEncoding, separator: &str) -> Self {
        let ttl_supported = version.major() >= 2;
        let max_key_length = if version.major() < 3 {
            LEGACY_MAX_KEY_LENGTH
        } else {
            MAX_KEY_LENGTH
        };

        let supported_kinds = ValueKind::ALL
            .into_iter()
            .map(|kind| (kind, kind_support(kind, encoding)))
            .collect();

        Self {
            max_key_length,
            ttl_supported,
            ttl_precision: 1,
            min_ttl: u64::from(ttl_supported),
            max_ttl: 0,
            static_ttl: true,
            use_request_time: false,
            namespace_is_prefix: true,
            namespace_separator: separator.to_string(),
            supported_metadata: vec!["ttl"],
            supported_kinds,
        }
    }

    /// Support entry for one kind
    #[must_use]
    pub fn kind(&self, kind: ValueKind) -> KindSupport {
        self.supported_kinds
            .get(&kind)
            .copied()
            .unwrap_or(KindSupport::Unsupported)
    }
}

fn kind_support(kind: ValueKind, encoding: ValueEncoding) -> KindSupport {
    match (encoding, kind) {
        (ValueEncoding::Json, ValueKind::Array | ValueKind::Object) => KindSupport::StoredAs(kind),
        (ValueEncoding::Json, _) => KindSupport::Supported,
        (ValueEncoding::Raw, ValueKind::Array | ValueKind::Object) => KindSupport::Unsupported,
        (ValueEncoding::Raw, _) => KindSupport::StoredAs(ValueKind::String),
    }
}

/// Memoized descriptor, dropped whenever configuration changes
#[derive(Debug, Default, Clone)]
pub struct CapabilityCache {
    cached: Option<CapabilityDescriptor>,
}

impl CapabilityCache {
    /// Create an empty cache
    #[must_use]
    pub const fn new() -> Self {
        Self { cached: None }
    }

    /// Return the cached descriptor or resolve and cache a new one
    pub fn get_or_resolve(
        &mut self,
        version: &ServerVersion,
        encoding: ValueEncoding,
        separator: &str,
    ) -> &CapabilityDescriptor {
        self.cached
            .get_or_insert_with(|| CapabilityDescriptor::resolve(version, encoding, separator))
    }

    /// Forget the cached descriptor
    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    /// Whether a descriptor is cached
    #[must_use]
    pub const fn is_cached(&self) -> bool {
        self.cached.is_some()
    }
}
