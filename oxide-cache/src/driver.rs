//! Command-level seams between the adapter and a Redis client
//!
//! The adapter never speaks the wire protocol itself. It drives a client
//! through these traits: [`Connector`] opens single-server connections,
//! [`ClusterConnector`] opens cluster connections, and the command traits
//! expose the primitive commands the executors need. The [`native`](crate::native)
//! module implements them on top of the `redis` crate.

use async_trait::async_trait;
use bytes::Bytes;
use oxide_cache_core::{
    config::{ClusterConnectionSettings, ServerEndpoint, TlsConfig},
    error::{CacheError, CacheResult},
    library_options::{OptionId, OptionValue},
    types::NodeInfo,
};

/// Commands shared by single-server and cluster connections
#[async_trait]
pub trait RedisCommands: Clone + Send + Sync + 'static {
    /// `GET`
    async fn get(&mut self, key: &str) -> CacheResult<Option<Bytes>>;

    /// `MGET`; replies are positional
    async fn mget(&mut self, keys: &[String]) -> CacheResult<Vec<Option<Bytes>>>;

    /// `SET`
    async fn set(&mut self, key: &str, value: Bytes) -> CacheResult<()>;

    /// `SETEX`
    async fn setex(&mut self, key: &str, seconds: u64, value: Bytes) -> CacheResult<()>;

    /// `SETNX`; true when the key was created
    async fn setnx(&mut self, key: &str, value: Bytes) -> CacheResult<bool>;

    /// `DEL`; number of keys removed
    async fn del(&mut self, keys: &[String]) -> CacheResult<u64>;

    /// `EXISTS` for one key
    async fn exists(&mut self, key: &str) -> CacheResult<bool>;

    /// `EXPIRE`; true when the key exists
    async fn expire(&mut self, key: &str, seconds: u64) -> CacheResult<bool>;

    /// `TTL`
    async fn ttl(&mut self, key: &str) -> CacheResult<i64>;

    /// `PTTL`
    async fn pttl(&mut self, key: &str) -> CacheResult<i64>;

    /// `INCRBY`
    async fn incr_by(&mut self, key: &str, delta: i64) -> CacheResult<i64>;

    /// `KEYS`
    async fn keys(&mut self, pattern: &str) -> CacheResult<Vec<String>>;

    /// `INFO [section]`
    async fn info(&mut self, section: Option<&str>) -> CacheResult<String>;

    /// Apply one client library option
    async fn set_option(&mut self, id: OptionId, value: &OptionValue) -> CacheResult<()>;
}

/// Commands only meaningful on a single server
#[async_trait]
pub trait StandaloneCommands: RedisCommands {
    /// `AUTH password` or `AUTH username password`
    async fn auth(&mut self, args: &[String]) -> CacheResult<()>;

    /// `SELECT db`
    async fn select(&mut self, database: u32) -> CacheResult<()>;

    /// `MSET`
    async fn mset(&mut self, pairs: &[(String, Bytes)]) -> CacheResult<()>;

    /// `SETEX` for every pair inside one `MULTI`/`EXEC` block
    async fn multi_setex(&mut self, pairs: &[(String, Bytes)], seconds: u64) -> CacheResult<()>;

    /// `FLUSHDB`
    async fn flush_db(&mut self) -> CacheResult<()>;

    /// `FLUSHALL`
    async fn flush_all(&mut self) -> CacheResult<()>;
}

/// Commands only meaningful on a cluster
#[async_trait]
pub trait ClusterCommands: RedisCommands {
    /// Every node known to the cluster, as reported by `CLUSTER NODES`
    async fn nodes(&mut self) -> CacheResult<Vec<NodeInfo>>;
}

/// Opens single-server connections
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connection type produced
    type Conn: StandaloneCommands;

    /// Open a connection; no authentication or database selection happens here
    async fn connect(
        &self,
        endpoint: &ServerEndpoint,
        tls: Option<&TlsConfig>,
    ) -> CacheResult<Self::Conn>;
}

/// Opens cluster connections and direct connections to single nodes
#[async_trait]
pub trait ClusterConnector: Send + Sync + 'static {
    /// Cluster connection type produced
    type Conn: ClusterCommands;
    /// Connector used to reach individual nodes
    type Node: Connector;

    /// Open a cluster connection from the seed nodes, authenticated
    async fn connect(&self, settings: &ClusterConnectionSettings) -> CacheResult<Self::Conn>;

    /// Connector for direct node connections
    fn node_connector(&self) -> &Self::Node;
}

/// Map a `redis` crate error onto the adapter taxonomy
pub fn map_redis_error(err: redis::RedisError) -> CacheError {
    if err.is_timeout() {
        CacheError::Timeout
    } else if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error() {
        CacheError::Connection(err.to_string())
    } else {
        CacheError::Command(err.to_string())
    }
}
