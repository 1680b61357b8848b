//! Storage adapter for a Redis Cluster
//!
//! Multi-key commands are split by hash slot so no command ever spans two
//! shards. Batch writes are a scatter of single-key writes and report the
//! keys that failed. `flush` and `total_space` talk to every healthy primary
//! directly.

use crate::cluster::{group_by_slot, healthy_primaries};
use crate::connection::{ClusterManager, PersistentConnections};
use crate::driver::{ClusterCommands, ClusterConnector, RedisCommands, StandaloneCommands};
use crate::native::NativeClusterConnector;
use crate::storage::{
    batch_outcome, info_field, read_ttl, read_value, read_values, write_value, AdapterState, CacheStorage,
};
use async_trait::async_trait;
use oxide_cache_core::{
    capability::CapabilityDescriptor,
    config::{
        ClusterConnectionSettings, ClusterOptions, ClusterRegistry, Credentials, NamespaceConfig,
        TlsConfig,
    },
    error::{CacheError, CacheResult},
    library_options::LibraryOptions,
    types::{Metadata, NodeAddress, NodeInfo, ServerVersion},
    value::{CacheValue, ValueEncoding},
};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Cache storage on a Redis Cluster
pub struct RedisClusterStorage<C: ClusterConnector = NativeClusterConnector> {
    manager: ClusterManager<C>,
    state: AdapterState,
}

impl RedisClusterStorage<NativeClusterConnector> {
    /// Create an adapter using the `redis` crate cluster driver
    ///
    /// A named configuration is looked up in `registry`.
    pub fn new(options: ClusterOptions, registry: &ClusterRegistry) -> CacheResult<Self> {
        Self::with_connector(NativeClusterConnector::default(), options, registry)
    }
}

impl<C: ClusterConnector> RedisClusterStorage<C> {
    /// Create an adapter over any cluster connector
    pub fn with_connector(
        connector: C,
        options: ClusterOptions,
        registry: &ClusterRegistry,
    ) -> CacheResult<Self> {
        options.namespace.validate()?;
        let settings = options.resolve(registry)?;
        let state = AdapterState::new(
            options.namespace,
            options.encoding,
            &options.library_options,
            options.ttl,
        );
        let manager =
            ClusterManager::new(connector, settings)?.with_server_version(options.server_version);
        Ok(Self { manager, state })
    }

    /// Share persistent connections with other adapters
    #[must_use]
    pub fn with_persistent_connections(mut self, table: PersistentConnections<C::Conn>) -> Self {
        self.manager = self.manager.with_persistent_connections(table);
        self
    }

    /// Connection manager of this adapter
    pub const fn connection(&self) -> &ClusterManager<C> {
        &self.manager
    }

    /// Value encoding in effect
    pub const fn encoding(&self) -> ValueEncoding {
        self.state.encoding()
    }

    /// Default time-to-live for writes
    pub const fn ttl(&self) -> Option<Duration> {
        self.state.ttl()
    }

    /// Namespace configuration
    pub const fn namespace(&self) -> &NamespaceConfig {
        self.state.namespacer().config()
    }

    /// Change the namespace; the connection is kept
    pub fn set_namespace(&mut self, namespace: NamespaceConfig) -> CacheResult<()> {
        self.state.set_namespace(namespace)
    }

    /// Change the default time-to-live
    pub fn set_ttl(&mut self, ttl: Option<Duration>) {
        self.state.set_ttl(ttl);
    }

    /// Change the requested value encoding
    pub fn set_encoding(&mut self, encoding: ValueEncoding) {
        let options = &self.manager.settings().library_options;
        self.state.set_encoding(encoding, options);
    }

    /// Change the credentials; reconnects on next use
    pub fn set_credentials(&mut self, credentials: Credentials) -> CacheResult<()> {
        self.update_settings(|settings| settings.credentials = credentials)
    }

    /// Replace the seed nodes; reconnects on next use
    pub fn set_seeds(&mut self, seeds: Vec<NodeAddress>) -> CacheResult<()> {
        self.update_settings(|settings| settings.seeds = seeds)?;
        self.state.invalidate_capabilities();
        Ok(())
    }

    /// Share the cluster client across adapters with the same seeds
    pub fn set_persistent(&mut self, persistent: bool) -> CacheResult<()> {
        self.update_settings(|settings| settings.persistent = persistent)
    }

    /// Switch TLS on or off; reconnects on next use
    pub fn set_tls(&mut self, tls: Option<TlsConfig>) -> CacheResult<()> {
        self.update_settings(|settings| settings.tls = tls)
    }

    /// Replace the library options; reconnects on next use
    pub fn set_library_options(&mut self, options: LibraryOptions) -> CacheResult<()> {
        let mut settings = self.manager.settings().clone();
        settings.library_options = options.clone();
        self.manager.set_settings(settings)?;
        self.state.apply_options(&options);
        Ok(())
    }

    /// Pin the server version, or `None` to detect it; reconnects on next use
    pub fn set_server_version(&mut self, version: Option<ServerVersion>) {
        self.manager.set_server_version(version);
        self.state.invalidate_capabilities();
    }

    async fn write(
        &mut self,
        key: &str,
        value: &CacheValue,
        ttl: Option<Duration>,
        only_new: bool,
    ) -> CacheResult<bool> {
        let encoded = self.state.encode(value)?;
        let handle = self.manager.acquire().await?;
        let version = handle.version().clone();
        self.state.sync(handle.generation());
        let physical = self.state.key(key, &version)?;
        let seconds = self.state.ttl_seconds(ttl, &version)?;

        let result = write_value(handle.conn(), &physical, encoded, seconds, only_new).await;
        self.manager.check(result).await
    }

    async fn delete(&mut self, key: &str) -> CacheResult<bool> {
        let handle = self.manager.acquire().await?;
        let version = handle.version().clone();
        self.state.sync(handle.generation());
        let physical = self.state.key(key, &version)?;

        let result = handle.conn().del(&[physical]).await;
        Ok(self.manager.check(result).await? > 0)
    }

    async fn clear_matching(&mut self, pattern: String) -> CacheResult<bool> {
        let handle = self.manager.acquire().await?;
        let result = handle.conn().keys(&pattern).await;
        let keys = self.manager.check(result).await?;
        if keys.is_empty() {
            return Ok(true);
        }

        let handle = self.manager.acquire().await?;
        let conn = handle.conn();
        let mut removed = 0;
        let mut broken = None;
        for indexes in group_by_slot(&keys).into_values() {
            let group: Vec<String> = indexes.into_iter().map(|i| keys[i].clone()).collect();
            match conn.del(&group).await {
                Ok(count) => removed += count,
                Err(err) => {
                    warn!("Failed to delete {} keys matching '{}': {}", group.len(), pattern, err);
                    broken = Some(err);
                    break;
                }
            }
        }
        if let Some(err) = broken {
            self.discard(err).await;
            return Ok(false);
        }
        debug!("Removed {} of {} keys matching '{}'", removed, keys.len(), pattern);
        Ok(removed == keys.len() as u64)
    }

    /// Validated change of the connection settings, the cached client is kept when nothing changed
    fn update_settings(
        &mut self,
        update: impl FnOnce(&mut ClusterConnectionSettings),
    ) -> CacheResult<()> {
        let mut settings = self.manager.settings().clone();
        update(&mut settings);
        self.manager.set_settings(settings)
    }

    /// Let the manager see an error that is reported as a partial failure
    async fn discard(&mut self, err: CacheError) {
        let _ = self.manager.check::<()>(Err(err)).await;
    }

    /// Healthy primaries as currently reported by the cluster, possibly none
    async fn primaries(&mut self) -> CacheResult<Vec<NodeInfo>> {
        let handle = self.manager.acquire().await?;
        let result = handle.conn().nodes().await;
        Ok(healthy_primaries(self.manager.check(result).await?))
    }
}

#[async_trait]
impl<C: ClusterConnector> CacheStorage for RedisClusterStorage<C> {
    async fn get(&mut self, key: &str) -> CacheResult<Option<CacheValue>> {
        let handle = self.manager.acquire().await?;
        let version = handle.version().clone();
        self.state.sync(handle.generation());
        let physical = self.state.key(key, &version)?;

        let result = read_value(handle.conn(), &physical, self.state.encoding()).await;
        let raw = self.manager.check(result).await?;
        raw.map(|raw| self.state.decode(&raw)).transpose()
    }

    async fn get_many(&mut self, keys: &[&str]) -> CacheResult<HashMap<String, CacheValue>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let handle = self.manager.acquire().await?;
        let version = handle.version().clone();
        self.state.sync(handle.generation());
        let physical = self.state.keys(keys, &version)?;
        let encoding = self.state.encoding();

        let conn = handle.conn();
        let mut replies = Vec::new();
        let mut failure = None;
        for indexes in group_by_slot(&physical).into_values() {
            let group: Vec<String> = indexes.iter().map(|&i| physical[i].clone()).collect();
            match read_values(conn, &group, encoding).await {
                Ok(values) => replies.extend(indexes.into_iter().zip(values)),
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        if let Some(err) = failure {
            return self.manager.check(Err(err)).await;
        }

        let mut found = HashMap::with_capacity(replies.len());
        for (index, raw) in replies {
            if let Some(raw) = raw {
                found.insert(keys[index].to_string(), self.state.decode(&raw)?);
            }
        }
        Ok(found)
    }

    async fn set(
        &mut self,
        key: &str,
        value: &CacheValue,
        ttl: Option<Duration>,
    ) -> CacheResult<bool> {
        self.write(key, value, ttl, false).await
    }

    async fn set_many(
        &mut self,
        items: &[(&str, CacheValue)],
        ttl: Option<Duration>,
    ) -> CacheResult<Vec<String>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let handle = self.manager.acquire().await?;
        let version = handle.version().clone();
        self.state.sync(handle.generation());
        let seconds = self.state.ttl_seconds(ttl, &version)?;
        let mut pairs = Vec::with_capacity(items.len());
        for (key, value) in items {
            pairs.push((*key, self.state.key(key, &version)?, self.state.encode(value)?));
        }

        let conn = handle.conn();
        let mut failed = Vec::new();
        let mut broken = None;
        for (key, physical, value) in pairs {
            if let Err(err) = write_value(conn, &physical, value, seconds, false).await {
                warn!("Failed to write key '{}': {}", physical, err);
                if err.is_connection_error() {
                    broken = Some(err);
                }
                failed.push(key.to_string());
            }
        }
        if let Some(err) = broken {
            self.discard(err).await;
        }
        Ok(failed)
    }

    async fn add(
        &mut self,
        key: &str,
        value: &CacheValue,
        ttl: Option<Duration>,
    ) -> CacheResult<bool> {
        self.write(key, value, ttl, true).await
    }

    async fn remove(&mut self, key: &str) -> CacheResult<bool> {
        self.delete(key).await
    }

    async fn remove_many(&mut self, keys: &[&str]) -> CacheResult<Vec<String>> {
        let mut failed = Vec::new();
        for key in keys {
            let removed = self.delete(key).await;
            if !batch_outcome("Removing", key, removed)? {
                failed.push((*key).to_string());
            }
        }
        Ok(failed)
    }

    async fn touch(&mut self, key: &str) -> CacheResult<bool> {
        let handle = self.manager.acquire().await?;
        let version = handle.version().clone();
        self.state.sync(handle.generation());
        let physical = self.state.key(key, &version)?;
        let seconds = self.state.ttl_seconds(None, &version)?;

        let conn = handle.conn();
        let result = match seconds {
            Some(seconds) => conn.expire(&physical, seconds).await,
            None => conn.exists(&physical).await,
        };
        self.manager.check(result).await
    }

    async fn touch_many(&mut self, keys: &[&str]) -> CacheResult<Vec<String>> {
        let mut failed = Vec::new();
        for key in keys {
            let touched = self.touch(key).await;
            if !batch_outcome("Touching", key, touched)? {
                failed.push((*key).to_string());
            }
        }
        Ok(failed)
    }

    async fn has(&mut self, key: &str) -> CacheResult<bool> {
        let handle = self.manager.acquire().await?;
        let version = handle.version().clone();
        self.state.sync(handle.generation());
        let physical = self.state.key(key, &version)?;

        let result = handle.conn().exists(&physical).await;
        self.manager.check(result).await
    }

    async fn has_many(&mut self, keys: &[&str]) -> CacheResult<Vec<String>> {
        let mut present = Vec::new();
        for key in keys {
            if self.has(key).await? {
                present.push((*key).to_string());
            }
        }
        Ok(present)
    }

    /// `FLUSHALL` on every healthy primary; true if at least one succeeded
    async fn flush(&mut self) -> CacheResult<bool> {
        let primaries = self.primaries().await?;
        if primaries.is_empty() {
            warn!("No healthy primary to flush");
            return Ok(false);
        }
        let mut flushed = 0;
        for node in &primaries {
            let result = async {
                let mut conn = self.manager.node_connection(&node.address).await?;
                conn.flush_all().await
            }
            .await;
            match result {
                Ok(()) => flushed += 1,
                Err(err) => warn!("Skipping primary {} during flush: {}", node.address, err),
            }
        }
        debug!("Flushed {} of {} primaries", flushed, primaries.len());
        Ok(flushed > 0)
    }

    async fn clear_by_namespace(&mut self, namespace: &str) -> CacheResult<bool> {
        let pattern = self.state.namespacer().namespace_pattern(namespace)?;
        self.clear_matching(pattern).await
    }

    async fn clear_by_prefix(&mut self, prefix: &str) -> CacheResult<bool> {
        let pattern = self.state.namespacer().prefix_pattern(prefix)?;
        self.clear_matching(pattern).await
    }

    async fn metadata(&mut self, key: &str) -> CacheResult<Option<Metadata>> {
        let handle = self.manager.acquire().await?;
        let version = handle.version().clone();
        self.state.sync(handle.generation());
        let physical = self.state.key(key, &version)?;

        let result = read_ttl(handle.conn(), &physical, &version).await;
        Ok(self.manager.check(result).await?.into_metadata())
    }

    async fn capabilities(&mut self) -> CacheResult<CapabilityDescriptor> {
        let handle = self.manager.acquire().await?;
        let version = handle.version().clone();
        self.state.sync(handle.generation());
        Ok(self.state.capabilities(&version).clone())
    }

    async fn increment(&mut self, key: &str, delta: i64) -> CacheResult<i64> {
        let handle = self.manager.acquire().await?;
        let version = handle.version().clone();
        self.state.sync(handle.generation());
        let physical = self.state.key(key, &version)?;

        let result = handle.conn().incr_by(&physical, delta).await;
        self.manager.check(result).await
    }

    /// Sum of `used_memory` over the reachable primaries
    async fn total_space(&mut self) -> CacheResult<u64> {
        let primaries = self.primaries().await?;
        let mut total = 0;
        let mut reached = 0;
        for node in &primaries {
            let result = async {
                let mut conn = self.manager.node_connection(&node.address).await?;
                conn.info(Some("memory")).await
            }
            .await;
            match result {
                Ok(info) => {
                    total += info_field(&info, "used_memory").unwrap_or(0);
                    reached += 1;
                }
                Err(err) => warn!("Skipping primary {} for memory usage: {}", node.address, err),
            }
        }
        if reached == 0 {
            return Err(CacheError::Command(
                "no primary reported its memory usage".to_string(),
            ));
        }
        Ok(total)
    }
}
