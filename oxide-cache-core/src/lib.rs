//! Core types for the oxide-cache Redis storage adapter
//!
//! This crate holds the I/O-free parts of the adapter: configuration, the
//! error taxonomy, server versions, value encoding, key namespacing,
//! capability resolution, TTL normalization and existence disambiguation.

#![warn(missing_docs)]

pub mod capability;
pub mod config;
pub mod error;
pub mod existence;
pub mod library_options;
pub mod namespace;
pub mod ttl;
pub mod types;
pub mod value;

pub use capability::{CapabilityCache, CapabilityDescriptor, KindSupport};
pub use config::{
    AdapterOptions, ClusterConnectionSettings, ClusterOptions, ClusterRegistry, ClusterSettings,
    ConnectionSettings, Credentials, NamedClusterConfig, NamespaceConfig, Persistence,
    RedisSettings, ServerAddress, ServerEndpoint, TlsConfig,
};
pub use error::{CacheError, CacheResult};
pub use library_options::{LibraryOption, LibraryOptions, OptionId, OptionValue};
pub use namespace::Namespacer;
pub use ttl::{RemainingTtl, TtlStrategy, TtlUnit};
pub use types::{Metadata, NodeAddress, NodeInfo, ServerVersion, SlotRange};
pub use value::{CacheValue, ValueEncoding, ValueKind};
