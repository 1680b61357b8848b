//! Common types used throughout the library

use crate::error::{CacheError, CacheResult};
use semver::{Prerelease, Version};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Redis server version as reported by `INFO` or configured explicitly
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerVersion(Version);

impl ServerVersion {
    /// Text of the sentinel used when the server did not report a usable version
    pub const UNKNOWN: &'static str = "0.0.0-unknown";

    /// Create a version from its numeric components
    #[must_use]
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self(Version::new(major, minor, patch))
    }

    /// The `0.0.0-unknown` sentinel
    #[must_use]
    pub fn unknown() -> Self {
        let mut version = Version::new(0, 0, 0);
        version.pre = Prerelease::new("unknown").unwrap_or(Prerelease::EMPTY);
        Self(version)
    }

    /// Parse a version string leniently
    ///
    /// Full semantic versions are accepted as-is; `major` and `major.minor`
    /// forms are padded with zeroes.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Ok(version) = Version::parse(text) {
            return Some(Self(version));
        }

        let mut parts = text.split('.');
        let major = parts.next()?.parse::<u64>().ok()?;
        let minor = parts.next().map_or(Ok(0), str::parse::<u64>).ok()?;
        let patch = parts.next().map_or(Ok(0), str::parse::<u64>).ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(major, minor, patch))
    }

    /// Extract `redis_version` from an `INFO` reply
    #[must_use]
    pub fn from_info(info: &str) -> Option<Self> {
        info.lines()
            .find_map(|line| line.trim().strip_prefix("redis_version:"))
            .and_then(Self::parse)
    }

    /// Major component
    #[must_use]
    pub const fn major(&self) -> u64 {
        self.0.major
    }

    /// Minor component
    #[must_use]
    pub const fn minor(&self) -> u64 {
        self.0.minor
    }

    /// Whether this is the unknown sentinel
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        *self == Self::unknown()
    }

    /// Compare `major.minor` against a lower bound, ignoring patch and pre-release
    #[must_use]
    pub const fn at_least(&self, major: u64, minor: u64) -> bool {
        self.0.major > major || (self.0.major == major && self.0.minor >= minor)
    }
}

impl Default for ServerVersion {
    fn default() -> Self {
        Self::unknown()
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ServerVersion {
    type Err = CacheError;

    fn from_str(s: &str) -> CacheResult<Self> {
        Self::parse(s).ok_or_else(|| CacheError::Config(format!("invalid server version '{s}'")))
    }
}

/// Host and port of a Redis node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeAddress {
    /// Host name or IP address
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl NodeAddress {
    /// Create a node address
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for NodeAddress {
    type Err = CacheError;

    fn from_str(s: &str) -> CacheResult<Self> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| CacheError::Config(format!("node '{s}' must be host:port")))?;
        let port = port
            .parse::<u16>()
            .map_err(|e| CacheError::Config(format!("invalid port in node '{s}': {e}")))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(CacheError::Config(format!("node '{s}' has an empty host")));
        }
        Ok(Self::new(host, port))
    }
}

/// Represents a slot range in a Redis cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRange {
    /// Start of the slot range (inclusive)
    pub start: u16,
    /// End of the slot range (inclusive)
    pub end: u16,
}

impl SlotRange {
    /// Create a new slot range
    #[must_use]
    pub const fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    /// Check if a slot is within this range
    #[must_use]
    pub const fn contains(&self, slot: u16) -> bool {
        slot >= self.start && slot <= self.end
    }
}

/// Node record discovered from the cluster topology
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Node ID
    pub id: String,
    /// Client address of the node
    pub address: NodeAddress,
    /// Slot ranges owned by this node
    pub slots: Vec<SlotRange>,
    /// Whether this node is a primary (shard owner)
    pub is_primary: bool,
    /// Whether the cluster currently flags the node as failing or address-less
    pub is_failing: bool,
}

impl NodeInfo {
    /// Create a primary node record without slots
    #[must_use]
    pub const fn new(id: String, address: NodeAddress) -> Self {
        Self {
            id,
            address,
            slots: Vec::new(),
            is_primary: true,
            is_failing: false,
        }
    }
}

/// Per-key metadata produced on demand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Seconds left before expiry, or [`Metadata::UNLIMITED`]
    pub remaining_time_to_live: i64,
}

impl Metadata {
    /// Sentinel for keys without an expiry
    pub const UNLIMITED: i64 = -1;

    /// Whether the key never expires
    #[must_use]
    pub const fn is_unlimited(&self) -> bool {
        self.remaining_time_to_live == Self::UNLIMITED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parsing() {
        let v = ServerVersion::parse("7.2.4").unwrap();
        assert_eq!((v.major(), v.minor()), (7, 2));

        let v = ServerVersion::parse("2.6").unwrap();
        assert_eq!(v, ServerVersion::new(2, 6, 0));

        let v = ServerVersion::parse("3").unwrap();
        assert_eq!(v, ServerVersion::new(3, 0, 0));

        assert!(ServerVersion::parse("").is_none());
        assert!(ServerVersion::parse("abc").is_none());
        assert!(ServerVersion::parse("1.2.3.4").is_none());
    }

    #[test]
    fn test_version_from_info() {
        let info = "# Server\r\nredis_version:2.8.19\r\nredis_git_sha1:00000000\r\n";
        assert_eq!(
            ServerVersion::from_info(info),
            Some(ServerVersion::new(2, 8, 19))
        );
        assert!(ServerVersion::from_info("# Server\r\nuptime_in_days:3\r\n").is_none());
    }

    #[test]
    fn test_unknown_sentinel() {
        let unknown = ServerVersion::unknown();
        assert_eq!(unknown.to_string(), ServerVersion::UNKNOWN);
        assert!(unknown.is_unknown());
        assert_eq!(unknown.major(), 0);
        assert!(!ServerVersion::new(0, 0, 0).is_unknown());
    }

    #[test]
    fn test_version_bands() {
        let v = ServerVersion::new(2, 8, 0);
        assert!(v.at_least(2, 8));
        assert!(v.at_least(2, 6));
        assert!(!v.at_least(3, 0));
        assert!(ServerVersion::new(3, 0, 0).at_least(2, 8));
        assert!(!ServerVersion::new(2, 7, 99).at_least(2, 8));
    }

    #[test]
    fn test_node_address_parsing() {
        let node: NodeAddress = "10.0.0.1:7000".parse().unwrap();
        assert_eq!(node, NodeAddress::new("10.0.0.1", 7000));
        assert_eq!(node.to_string(), "10.0.0.1:7000");

        let node: NodeAddress = "[::1]:7001".parse().unwrap();
        assert_eq!(node.host, "::1");
        assert_eq!(node.to_string(), "[::1]:7001");

        assert!("localhost".parse::<NodeAddress>().is_err());
        assert!(":7000".parse::<NodeAddress>().is_err());
        assert!("host:notaport".parse::<NodeAddress>().is_err());
    }

    #[test]
    fn test_slot_range_contains() {
        let range = SlotRange::new(100, 200);
        assert!(range.contains(100));
        assert!(range.contains(150));
        assert!(range.contains(200));
        assert!(!range.contains(99));
        assert!(!range.contains(201));
    }
}
