//! Storage adapter for a single Redis server

use crate::connection::{ConnectionManager, PersistentConnections};
use crate::driver::{Connector, RedisCommands, StandaloneCommands};
use crate::native::NativeConnector;
use crate::storage::{
    batch_outcome, info_field, read_ttl, read_value, read_values, write_value, AdapterState, CacheStorage,
};
use async_trait::async_trait;
use oxide_cache_core::{
    capability::CapabilityDescriptor,
    config::{AdapterOptions, Credentials, NamespaceConfig, Persistence, ServerEndpoint, TlsConfig},
    error::{CacheError, CacheResult},
    library_options::LibraryOptions,
    types::{Metadata, ServerVersion},
    value::{CacheValue, ValueEncoding},
};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Cache storage on one Redis server
///
/// # Example
///
/// ```no_run
/// use oxide_cache::{AdapterOptions, CacheStorage, CacheValue, RedisStorage};
///
/// # async fn example() -> oxide_cache::CacheResult<()> {
/// let options = AdapterOptions::from_uri("redis://localhost:6379/0")?;
/// let mut storage = RedisStorage::new(options)?;
///
/// storage.set("greeting", &CacheValue::from("hello"), None).await?;
/// let value = storage.get("greeting").await?;
/// # Ok(())
/// # }
/// ```
pub struct RedisStorage<C: Connector = NativeConnector> {
    manager: ConnectionManager<C>,
    state: AdapterState,
}

impl RedisStorage<NativeConnector> {
    /// Create an adapter using the `redis` crate driver
    pub fn new(options: AdapterOptions) -> CacheResult<Self> {
        Self::with_connector(NativeConnector, options)
    }
}

impl<C: Connector> RedisStorage<C> {
    /// Create an adapter over any connector
    pub fn with_connector(connector: C, options: AdapterOptions) -> CacheResult<Self> {
        options.validate()?;
        let state = AdapterState::new(
            options.namespace,
            options.encoding,
            &options.connection.library_options,
            options.ttl,
        );
        let manager = ConnectionManager::new(connector, options.connection)?
            .with_server_version(options.server_version);
        Ok(Self { manager, state })
    }

    /// Share persistent connections with other adapters
    #[must_use]
    pub fn with_persistent_connections(mut self, table: PersistentConnections<C::Conn>) -> Self {
        self.manager = self.manager.with_persistent_connections(table);
        self
    }

    /// Connection manager of this adapter
    pub const fn connection(&self) -> &ConnectionManager<C> {
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

    /// Change the server; reconnects on next use
    pub fn set_endpoint(&mut self, endpoint: ServerEndpoint) {
        self.manager.set_endpoint(endpoint);
        self.state.invalidate_capabilities();
    }

    /// Change the credentials; reconnects on next use
    pub fn set_credentials(&mut self, credentials: Credentials) -> CacheResult<()> {
        self.manager.set_credentials(credentials)
    }

    /// Change the database index; reconnects on next use
    pub fn set_database(&mut self, database: u32) {
        self.manager.set_database(database);
    }

    /// Change the connection reuse policy; reconnects on next use
    pub fn set_persistence(&mut self, persistence: Persistence) {
        self.manager.set_persistence(persistence);
    }

    /// Replace the library options; reconnects on next use
    pub fn set_library_options(&mut self, options: LibraryOptions) {
        self.state.apply_options(&options);
        self.manager.set_library_options(options);
    }

    /// Change the TLS settings; reconnects on next use
    pub fn set_tls(&mut self, tls: Option<TlsConfig>) -> CacheResult<()> {
        self.manager.set_tls(tls)
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
        let result = delete_matching(handle.conn(), &pattern).await;
        self.manager.check(result).await
    }
}

/// `KEYS` then `DEL`; true when nothing matched or everything was removed
async fn delete_matching<T: RedisCommands>(conn: &mut T, pattern: &str) -> CacheResult<bool> {
    let keys = conn.keys(pattern).await?;
    if keys.is_empty() {
        return Ok(true);
    }
    let removed = conn.del(&keys).await?;
    debug!("Removed {} of {} keys matching '{}'", removed, keys.len(), pattern);
    Ok(removed == keys.len() as u64)
}

#[async_trait]
impl<C: Connector> CacheStorage for RedisStorage<C> {
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

        let result = read_values(handle.conn(), &physical, self.state.encoding()).await;
        let values = self.manager.check(result).await?;

        let mut found = HashMap::with_capacity(keys.len());
        for (key, raw) in keys.iter().zip(values) {
            if let Some(raw) = raw {
                found.insert((*key).to_string(), self.state.decode(&raw)?);
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
            pairs.push((self.state.key(key, &version)?, self.state.encode(value)?));
        }

        let conn = handle.conn();
        let result = match seconds {
            Some(seconds) => conn.multi_setex(&pairs, seconds).await,
            None => conn.mset(&pairs).await,
        };
        match self.manager.check(result).await {
            Ok(()) => Ok(Vec::new()),
            Err(err) => {
                warn!("Batch write of {} keys failed: {}", items.len(), err);
                Ok(items.iter().map(|(key, _)| (*key).to_string()).collect())
            }
        }
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

    async fn flush(&mut self) -> CacheResult<bool> {
        let handle = self.manager.acquire().await?;
        let result = handle.conn().flush_db().await;
        self.manager.check(result).await?;
        Ok(true)
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

    async fn total_space(&mut self) -> CacheResult<u64> {
        let handle = self.manager.acquire().await?;
        let result = handle.conn().info(Some("memory")).await;
        let info = self.manager.check(result).await?;
        info_field(&info, "used_memory").ok_or_else(|| {
            CacheError::Command("INFO memory did not report used_memory".to_string())
        })
    }
}
