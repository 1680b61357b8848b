//! Redis and Redis Cluster cache storage adapter
//!
//! `oxide-cache` stores cache entries in Redis behind the [`CacheStorage`]
//! trait. It resolves what the connected server can do from its version,
//! normalizes remaining time-to-live across server generations and tells a
//! missing key apart from a stored value that reads back empty.
//!
//! # Features
//!
//! - Single server ([`RedisStorage`]) and Redis Cluster ([`RedisClusterStorage`])
//! - Lazy connection with authentication, database selection and library options
//! - Version-aware capabilities and TTL handling
//! - Raw string or JSON value encoding
//! - Persistent connections shared between adapters
//! - Async/await support with Tokio
//!
//! # Quick Start
//!
//! ```no_run
//! use oxide_cache::{AdapterOptions, CacheStorage, CacheValue, NamespaceConfig, RedisStorage};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = AdapterOptions::from_uri("redis://localhost:6379")?
//!         .with_namespace(NamespaceConfig::new("app"));
//!     let mut storage = RedisStorage::new(options)?;
//!
//!     storage
//!         .set("user:1", &CacheValue::from("alice"), Some(Duration::from_secs(60)))
//!         .await?;
//!     let metadata = storage.metadata("user:1").await?;
//!     println!("Metadata: {:?}", metadata);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::return_self_not_must_use)]

pub mod cluster;
pub mod cluster_storage;
pub mod connection;
pub mod driver;
pub mod native;
pub mod standalone;
pub mod storage;

pub use cluster_storage::RedisClusterStorage;
pub use connection::{ClusterManager, ConnectionHandle, ConnectionManager, PersistentConnections};
pub use driver::{ClusterCommands, ClusterConnector, Connector, RedisCommands, StandaloneCommands};
pub use native::{
    NativeClusterConnection, NativeClusterConnector, NativeConnection, NativeConnector,
};
pub use standalone::RedisStorage;
pub use storage::CacheStorage;

pub use oxide_cache_core::{
    capability::{CapabilityDescriptor, KindSupport},
    config::{
        AdapterOptions, ClusterOptions, ClusterRegistry, ClusterSettings, Credentials,
        NamedClusterConfig, NamespaceConfig, Persistence, RedisSettings, ServerEndpoint,
        TlsConfig,
    },
    error::{CacheError, CacheResult},
    library_options::{LibraryOption, LibraryOptions},
    types::{Metadata, NodeAddress, NodeInfo, ServerVersion},
    value::{CacheValue, ValueEncoding, ValueKind},
};
