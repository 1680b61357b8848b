//! Drivers built on the `redis` crate
//!
//! Single servers use a multiplexed connection, clusters the async cluster
//! connection. Both are wrapped in [`NativeConnection`], which applies the
//! per-command read timeout. Retry options are handed to the cluster client
//! builder; any other enabled library option the driver cannot honour is
//! rejected with [`CacheError::Unsupported`].

use crate::cluster::parse_cluster_nodes;
use crate::driver::{
    map_redis_error, ClusterCommands, ClusterConnector, Connector, RedisCommands,
    StandaloneCommands,
};
use async_trait::async_trait;
use bytes::Bytes;
use oxide_cache_core::{
    config::{ClusterConnectionSettings, ServerAddress, ServerEndpoint, TlsConfig},
    error::{CacheError, CacheResult},
    library_options::{LibraryOption, LibraryOptions, OptionId, OptionValue},
    types::{NodeAddress, NodeInfo},
};
use redis::aio::{ConnectionLike, MultiplexedConnection};
use redis::cluster_async::ClusterConnection;
use redis::{FromRedisValue, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Connection over the `redis` crate
#[derive(Clone)]
pub struct NativeConnection<C = MultiplexedConnection> {
    inner: C,
    read_timeout: Option<Duration>,
    cluster: bool,
    options: BTreeMap<OptionId, OptionValue>,
}

/// Cluster connection over the `redis` crate
pub type NativeClusterConnection = NativeConnection<ClusterConnection>;

impl<C> NativeConnection<C>
where
    C: ConnectionLike + Clone + Send + 'static,
{
    fn new(inner: C, read_timeout: Option<Duration>, cluster: bool) -> Self {
        Self {
            inner,
            read_timeout,
            cluster,
            options: BTreeMap::new(),
        }
    }

    /// Library options applied to this connection
    pub fn options(&self) -> &BTreeMap<OptionId, OptionValue> {
        &self.options
    }

    /// Current per-command read timeout
    pub const fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    async fn query<T: FromRedisValue>(&mut self, cmd: &redis::Cmd) -> CacheResult<T> {
        let fut = cmd.query_async(&mut self.inner);
        match self.read_timeout {
            Some(limit) => timeout(limit, fut)
                .await
                .map_err(|_| CacheError::Timeout)?
                .map_err(map_redis_error),
            None => fut.await.map_err(map_redis_error),
        }
    }

    async fn query_pipeline(&mut self, pipe: &redis::Pipeline) -> CacheResult<()> {
        let fut = pipe.query_async(&mut self.inner);
        match self.read_timeout {
            Some(limit) => timeout(limit, fut)
                .await
                .map_err(|_| CacheError::Timeout)?
                .map_err(map_redis_error),
            None => fut.await.map_err(map_redis_error),
        }
    }
}

#[async_trait]
impl<C> RedisCommands for NativeConnection<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    async fn get(&mut self, key: &str) -> CacheResult<Option<Bytes>> {
        let value: Option<Vec<u8>> = self.query(redis::cmd("GET").arg(key)).await?;
        Ok(value.map(Bytes::from))
    }

    async fn mget(&mut self, keys: &[String]) -> CacheResult<Vec<Option<Bytes>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let values: Vec<Option<Vec<u8>>> = self.query(redis::cmd("MGET").arg(keys)).await?;
        Ok(values.into_iter().map(|v| v.map(Bytes::from)).collect())
    }

    async fn set(&mut self, key: &str, value: Bytes) -> CacheResult<()> {
        self.query(redis::cmd("SET").arg(key).arg(value.as_ref()))
            .await
    }

    async fn setex(&mut self, key: &str, seconds: u64, value: Bytes) -> CacheResult<()> {
        self.query(redis::cmd("SETEX").arg(key).arg(seconds).arg(value.as_ref()))
            .await
    }

    async fn setnx(&mut self, key: &str, value: Bytes) -> CacheResult<bool> {
        self.query(redis::cmd("SETNX").arg(key).arg(value.as_ref()))
            .await
    }

    async fn del(&mut self, keys: &[String]) -> CacheResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.query(redis::cmd("DEL").arg(keys)).await
    }

    async fn exists(&mut self, key: &str) -> CacheResult<bool> {
        self.query(redis::cmd("EXISTS").arg(key)).await
    }

    async fn expire(&mut self, key: &str, seconds: u64) -> CacheResult<bool> {
        self.query(redis::cmd("EXPIRE").arg(key).arg(seconds)).await
    }

    async fn ttl(&mut self, key: &str) -> CacheResult<i64> {
        self.query(redis::cmd("TTL").arg(key)).await
    }

    async fn pttl(&mut self, key: &str) -> CacheResult<i64> {
        self.query(redis::cmd("PTTL").arg(key)).await
    }

    async fn incr_by(&mut self, key: &str, delta: i64) -> CacheResult<i64> {
        self.query(redis::cmd("INCRBY").arg(key).arg(delta)).await
    }

    async fn keys(&mut self, pattern: &str) -> CacheResult<Vec<String>> {
        self.query(redis::cmd("KEYS").arg(pattern)).await
    }

    async fn info(&mut self, section: Option<&str>) -> CacheResult<String> {
        let mut cmd = redis::cmd("INFO");
        if let Some(section) = section {
            cmd.arg(section);
        }
        let reply: Value = self.query(&cmd).await?;
        value_text(&reply)
            .ok_or_else(|| CacheError::Command(format!("unexpected INFO reply: {reply:?}")))
    }

    async fn set_option(&mut self, id: OptionId, value: &OptionValue) -> CacheResult<()> {
        match option_handling(id, value, self.cluster)? {
            OptionHandling::ReadTimeout => {
                self.read_timeout = read_timeout(value)?;
                debug!("Applied library option {} = {:?}", id, value);
            }
            OptionHandling::Adapter => debug!("Library option {} is handled by the adapter", id),
            OptionHandling::ClusterClient => {
                debug!("Library option {} was applied to the cluster client", id);
            }
            OptionHandling::Disabled => debug!("Library option {} is switched off", id),
        }
        self.options.insert(id, value.clone());
        Ok(())
    }
}

#[async_trait]
impl StandaloneCommands for NativeConnection<MultiplexedConnection> {
    async fn auth(&mut self, args: &[String]) -> CacheResult<()> {
        self.query(redis::cmd("AUTH").arg(args)).await
    }

    async fn select(&mut self, database: u32) -> CacheResult<()> {
        self.query(redis::cmd("SELECT").arg(database)).await
    }

    async fn mset(&mut self, pairs: &[(String, Bytes)]) -> CacheResult<()> {
        if pairs.is_empty() {
            return Ok(());
        }
        let mut cmd = redis::cmd("MSET");
        for (key, value) in pairs {
            cmd.arg(key).arg(value.as_ref());
        }
        self.query(&cmd).await
    }

    async fn multi_setex(&mut self, pairs: &[(String, Bytes)], seconds: u64) -> CacheResult<()> {
        if pairs.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value) in pairs {
            pipe.cmd("SETEX")
                .arg(key)
                .arg(seconds)
                .arg(value.as_ref())
                .ignore();
        }
        self.query_pipeline(&pipe).await
    }

    async fn flush_db(&mut self) -> CacheResult<()> {
        self.query(&redis::cmd("FLUSHDB")).await
    }

    async fn flush_all(&mut self) -> CacheResult<()> {
        self.query(&redis::cmd("FLUSHALL")).await
    }
}

#[async_trait]
impl ClusterCommands for NativeClusterConnection {
    async fn nodes(&mut self) -> CacheResult<Vec<NodeInfo>> {
        let reply: Value = self.query(redis::cmd("CLUSTER").arg("NODES")).await?;
        let text = value_text(&reply).ok_or_else(|| {
            CacheError::Command(format!("unexpected CLUSTER NODES reply: {reply:?}"))
        })?;
        parse_cluster_nodes(&text)
    }
}

/// Where a library option takes effect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OptionHandling {
    /// Value encoding or key prefix, applied before any command is built
    Adapter,
    /// Per-command read timeout of this connection
    ReadTimeout,
    /// Retry policy of the cluster client, fixed when it is built
    ClusterClient,
    /// A disabled value; nothing to apply
    Disabled,
}

fn option_handling(
    id: OptionId,
    value: &OptionValue,
    cluster: bool,
) -> CacheResult<OptionHandling> {
    match id.known() {
        Some(LibraryOption::Serializer | LibraryOption::Prefix) => Ok(OptionHandling::Adapter),
        Some(LibraryOption::ReadTimeout) => Ok(OptionHandling::ReadTimeout),
        Some(
            LibraryOption::MaxRetries | LibraryOption::BackoffBase | LibraryOption::BackoffCap,
        ) if cluster => Ok(OptionHandling::ClusterClient),
        _ if !value.is_enabled() => Ok(OptionHandling::Disabled),
        _ => Err(CacheError::Unsupported(format!(
            "library option {id} is not supported by the native {} driver",
            if cluster { "cluster" } else { "standalone" }
        ))),
    }
}

fn read_timeout(value: &OptionValue) -> CacheResult<Option<Duration>> {
    let secs = value.as_f64().ok_or_else(|| {
        CacheError::Config(format!("read timeout must be numeric, got {value:?}"))
    })?;
    if secs <= 0.0 {
        return Ok(None);
    }
    Duration::try_from_secs_f64(secs)
        .map(Some)
        .map_err(|e| CacheError::Config(format!("invalid read timeout '{secs}': {e}")))
}

/// Non-negative integer option, in the unit the cluster builder expects
fn option_u64(options: &LibraryOptions, option: LibraryOption) -> CacheResult<Option<u64>> {
    options
        .get(option)
        .map(|value| {
            value
                .as_int()
                .and_then(|i| u64::try_from(i).ok())
                .ok_or_else(|| {
                    CacheError::Config(format!(
                        "{} must be a non-negative integer, got {value:?}",
                        option.name()
                    ))
                })
        })
        .transpose()
}

/// Hand the retry options to the cluster client
fn with_retry_options(
    mut builder: redis::cluster::ClusterClientBuilder,
    options: &LibraryOptions,
) -> CacheResult<redis::cluster::ClusterClientBuilder> {
    if let Some(retries) = option_u64(options, LibraryOption::MaxRetries)? {
        let retries = u32::try_from(retries)
            .map_err(|_| CacheError::Config(format!("max_retries {retries} is too large")))?;
        builder = builder.retries(retries);
    }
    if let Some(base) = option_u64(options, LibraryOption::BackoffBase)? {
        builder = builder.min_retry_wait(base);
    }
    if let Some(cap) = option_u64(options, LibraryOption::BackoffCap)? {
        builder = builder.max_retry_wait(cap);
    }
    Ok(builder)
}

/// First text payload of a reply; multi-node replies yield their first entry
fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::BulkString(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::SimpleString(text) | Value::VerbatimString { text, .. } => Some(text.clone()),
        Value::Array(items) | Value::Set(items) => items.iter().find_map(value_text),
        Value::Map(entries) => entries.iter().find_map(|(_, v)| value_text(v)),
        _ => None,
    }
}

/// Connector for single servers
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeConnector;

#[async_trait]
impl Connector for NativeConnector {
    type Conn = NativeConnection;

    async fn connect(
        &self,
        endpoint: &ServerEndpoint,
        tls: Option<&TlsConfig>,
    ) -> CacheResult<Self::Conn> {
        let url = connection_url(&endpoint.address, tls)?;
        let client = open_client(url, tls).await?;

        debug!("Connecting to Redis at {}", endpoint);
        let inner = timeout(
            endpoint.connect_timeout,
            client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| CacheError::Timeout)?
        .map_err(map_redis_error)?;

        Ok(NativeConnection::new(inner, endpoint.read_timeout, false))
    }
}

/// Connector for Redis Cluster
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeClusterConnector {
    node: NativeConnector,
}

#[async_trait]
impl ClusterConnector for NativeClusterConnector {
    type Conn = NativeClusterConnection;
    type Node = NativeConnector;

    async fn connect(&self, settings: &ClusterConnectionSettings) -> CacheResult<Self::Conn> {
        let tls = settings.tls.as_ref();
        let nodes = settings
            .seeds
            .iter()
            .map(|seed| {
                connection_url(
                    &ServerAddress::Tcp {
                        host: seed.host.clone(),
                        port: seed.port,
                    },
                    tls,
                )
            })
            .collect::<CacheResult<Vec<_>>>()?;

        let mut builder = redis::cluster::ClusterClientBuilder::new(nodes)
            .connection_timeout(settings.timeout);
        if let Some(read_timeout) = settings.read_timeout {
            builder = builder.response_timeout(read_timeout);
        }
        if let Some(username) = &settings.credentials.username {
            builder = builder.username(username.clone());
        }
        if let Some(password) = &settings.credentials.password {
            builder = builder.password(password.clone());
        }
        builder = with_retry_options(builder, &settings.library_options)?;
        builder = with_cluster_certificates(builder, tls).await?;

        let client = builder.build().map_err(map_redis_error)?;
        debug!("Connecting to Redis Cluster via {} seed nodes", settings.seeds.len());
        let inner = timeout(settings.timeout, client.get_async_connection())
            .await
            .map_err(|_| CacheError::Timeout)?
            .map_err(map_redis_error)?;

        Ok(NativeConnection::new(inner, settings.read_timeout, true))
    }

    fn node_connector(&self) -> &Self::Node {
        &self.node
    }
}

/// Build the client URL for an address
fn connection_url(address: &ServerAddress, tls: Option<&TlsConfig>) -> CacheResult<String> {
    if let Some(tls) = tls {
        reject_unsupported_tls(tls)?;
    }
    match address {
        ServerAddress::Unix(path) => {
            if tls.is_some() {
                return Err(CacheError::Config(
                    "TLS is not available over unix sockets".to_string(),
                ));
            }
            Ok(format!("redis+unix://{}", path.display()))
        }
        ServerAddress::Tcp { host, port } => {
            let node = NodeAddress::new(host.clone(), *port);
            Ok(match tls {
                None => format!("redis://{node}"),
                Some(tls) if tls.verify_peer => format!("rediss://{node}"),
                Some(_) => format!("rediss://{node}/#insecure"),
            })
        }
    }
}

fn reject_unsupported_tls(tls: &TlsConfig) -> CacheResult<()> {
    let unsupported = [
        ("cipher list", tls.ciphers.is_some()),
        ("SNI override", tls.sni.is_some()),
        ("fingerprint pinning", tls.fingerprint.is_some()),
    ];
    match unsupported.iter().find(|(_, set)| *set) {
        Some((what, _)) => Err(CacheError::Unsupported(format!(
            "TLS {what} is not supported by the native driver"
        ))),
        None => Ok(()),
    }
}

fn has_certificates(tls: Option<&TlsConfig>) -> bool {
    tls.is_some_and(|tls| tls.ca_file.is_some() || tls.cert_file.is_some())
}

#[cfg(feature = "tls")]
async fn load_certificates(tls: &TlsConfig) -> CacheResult<redis::TlsCertificates> {
    async fn read(path: &std::path::Path) -> CacheResult<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .map_err(|e| CacheError::Config(format!("cannot read {}: {e}", path.display())))
    }

    let root_cert = match &tls.ca_file {
        Some(path) => Some(read(path).await?),
        None => None,
    };
    let client_tls = match (&tls.cert_file, &tls.key_file) {
        (Some(cert), Some(key)) => Some(redis::ClientTlsConfig {
            client_cert: read(cert).await?,
            client_key: read(key).await?,
        }),
        _ => None,
    };
    Ok(redis::TlsCertificates {
        client_tls,
        root_cert,
    })
}

#[cfg(feature = "tls")]
async fn open_client(url: String, tls: Option<&TlsConfig>) -> CacheResult<redis::Client> {
    match tls {
        Some(tls) if has_certificates(Some(tls)) => {
            let certs = load_certificates(tls).await?;
            redis::Client::build_with_tls(url, certs).map_err(map_redis_error)
        }
        _ => redis::Client::open(url).map_err(map_redis_error),
    }
}

#[cfg(not(feature = "tls"))]
async fn open_client(url: String, tls: Option<&TlsConfig>) -> CacheResult<redis::Client> {
    if has_certificates(tls) {
        return Err(CacheError::Unsupported(
            "TLS certificate files require the `tls` feature".to_string(),
        ));
    }
    redis::Client::open(url).map_err(map_redis_error)
}

#[cfg(feature = "tls")]
async fn with_cluster_certificates(
    builder: redis::cluster::ClusterClientBuilder,
    tls: Option<&TlsConfig>,
) -> CacheResult<redis::cluster::ClusterClientBuilder> {
    match tls {
        Some(tls) if has_certificates(Some(tls)) => {
            Ok(builder.certs(load_certificates(tls).await?))
        }
        _ => Ok(builder),
    }
}

#[cfg(not(feature = "tls"))]
async fn with_cluster_certificates(
    builder: redis::cluster::ClusterClientBuilder,
    tls: Option<&TlsConfig>,
) -> CacheResult<redis::cluster::ClusterClientBuilder> {
    if has_certificates(tls) {
        return Err(CacheError::Unsupported(
            "TLS certificate files require the `tls` feature".to_string(),
        ));
    }
    Ok(builder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_connection_urls() {
        let tcp = ServerAddress::Tcp {
            host: "cache.internal".to_string(),
            port: 6380,
        };
        assert_eq!(
            connection_url(&tcp, None).unwrap(),
            "redis://cache.internal:6380"
        );
        assert_eq!(
            connection_url(&tcp, Some(&TlsConfig::default())).unwrap(),
            "rediss://cache.internal:6380"
        );

        let insecure = TlsConfig {
            verify_peer: false,
            ..TlsConfig::default()
        };
        assert_eq!(
            connection_url(&tcp, Some(&insecure)).unwrap(),
            "rediss://cache.internal:6380/#insecure"
        );

        let v6 = ServerAddress::Tcp {
            host: "::1".to_string(),
            port: 6379,
        };
        assert_eq!(connection_url(&v6, None).unwrap(), "redis://[::1]:6379");

        let unix = ServerAddress::Unix(PathBuf::from("/tmp/redis.sock"));
        assert_eq!(
            connection_url(&unix, None).unwrap(),
            "redis+unix:///tmp/redis.sock"
        );
        assert!(connection_url(&unix, Some(&TlsConfig::default())).is_err());
    }

    #[test]
    fn test_unsupported_tls_settings() {
        let tcp = ServerAddress::Tcp {
            host: "localhost".to_string(),
            port: 6379,
        };
        let pinned = TlsConfig {
            fingerprint: Some("sha256:ab".to_string()),
            ..TlsConfig::default()
        };
        assert!(matches!(
            connection_url(&tcp, Some(&pinned)),
            Err(CacheError::Unsupported(_))
        ));
    }

    #[test]
    fn test_option_handling() {
        let on = OptionValue::Int(1);
        let off = OptionValue::Int(0);

        for cluster in [false, true] {
            assert_eq!(
                option_handling(LibraryOption::Prefix.id(), &"lib:".into(), cluster).unwrap(),
                OptionHandling::Adapter
            );
            assert_eq!(
                option_handling(LibraryOption::Serializer.id(), &on, cluster).unwrap(),
                OptionHandling::Adapter
            );
            assert_eq!(
                option_handling(LibraryOption::ReadTimeout.id(), &2.5.into(), cluster).unwrap(),
                OptionHandling::ReadTimeout
            );
            assert_eq!(
                option_handling(LibraryOption::Compression.id(), &off, cluster).unwrap(),
                OptionHandling::Disabled
            );
            assert!(matches!(
                option_handling(LibraryOption::Compression.id(), &on, cluster),
                Err(CacheError::Unsupported(_))
            ));
            assert!(matches!(
                option_handling(OptionId(99), &on, cluster),
                Err(CacheError::Unsupported(_))
            ));
        }

        assert_eq!(
            option_handling(LibraryOption::MaxRetries.id(), &3i64.into(), true).unwrap(),
            OptionHandling::ClusterClient
        );
        assert!(matches!(
            option_handling(LibraryOption::MaxRetries.id(), &3i64.into(), false),
            Err(CacheError::Unsupported(_))
        ));
    }

    #[test]
    fn test_read_timeout_option() {
        assert_eq!(
            read_timeout(&OptionValue::Float(1.5)).unwrap(),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(read_timeout(&OptionValue::Int(0)).unwrap(), None);
        assert!(read_timeout(&"soon".into()).is_err());
    }

    #[test]
    fn test_retry_options() {
        let mut options = LibraryOptions::new();
        options.set(LibraryOption::MaxRetries, 4i64);
        options.set(LibraryOption::BackoffCap, "250");
        assert_eq!(option_u64(&options, LibraryOption::MaxRetries).unwrap(), Some(4));
        assert_eq!(option_u64(&options, LibraryOption::BackoffCap).unwrap(), Some(250));
        assert_eq!(option_u64(&options, LibraryOption::BackoffBase).unwrap(), None);

        let builder = redis::cluster::ClusterClientBuilder::new(vec!["redis://127.0.0.1:7000"]);
        assert!(with_retry_options(builder, &options).is_ok());

        options.set(LibraryOption::BackoffBase, -5i64);
        assert!(matches!(
            option_u64(&options, LibraryOption::BackoffBase),
            Err(CacheError::Config(_))
        ));
    }

    #[test]
    fn test_value_text() {
        assert_eq!(
            value_text(&Value::BulkString(b"redis_version:7.2.0".to_vec())).as_deref(),
            Some("redis_version:7.2.0")
        );
        let per_node = Value::Map(vec![(
            Value::SimpleString("127.0.0.1:7000".to_string()),
            Value::BulkString(b"redis_version:7.0.0".to_vec()),
        )]);
        assert_eq!(
            value_text(&per_node).as_deref(),
            Some("redis_version:7.0.0")
        );
        assert_eq!(value_text(&Value::Nil), None);
    }
}
