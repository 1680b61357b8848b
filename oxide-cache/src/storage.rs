//! The storage contract exposed to a caching layer
//!
//! Both [`RedisStorage`](crate::RedisStorage) and
//! [`RedisClusterStorage`](crate::RedisClusterStorage) implement
//! [`CacheStorage`]. Batch operations report the keys that failed instead
//! of erroring on the first failure.

use crate::driver::RedisCommands;
use async_trait::async_trait;
use bytes::Bytes;
use oxide_cache_core::{
    capability::{CapabilityCache, CapabilityDescriptor},
    config::{effective_encoding, NamespaceConfig},
    error::{CacheError, CacheResult},
    existence::{is_falsy, needs_exists_check, resolve_read},
    library_options::LibraryOptions,
    namespace::Namespacer,
    ttl::{RemainingTtl, TtlStrategy, TtlUnit},
    types::{Metadata, ServerVersion},
    value::{CacheValue, ValueEncoding},
};
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

/// Key/value storage backed by Redis
#[async_trait]
pub trait CacheStorage: Send {
    /// Read one value; `None` when the key is absent
    async fn get(&mut self, key: &str) -> CacheResult<Option<CacheValue>>;

    /// Read several values; absent keys are left out of the result
    async fn get_many(&mut self, keys: &[&str]) -> CacheResult<HashMap<String, CacheValue>>;

    /// Write one value with `ttl`, or the configured default when `None`
    async fn set(&mut self, key: &str, value: &CacheValue, ttl: Option<Duration>)
        -> CacheResult<bool>;

    /// Write several values; returns the keys that were not written
    async fn set_many(
        &mut self,
        items: &[(&str, CacheValue)],
        ttl: Option<Duration>,
    ) -> CacheResult<Vec<String>>;

    /// Write a value only if the key does not exist yet
    async fn add(&mut self, key: &str, value: &CacheValue, ttl: Option<Duration>)
        -> CacheResult<bool>;

    /// Delete one key; false when it did not exist
    async fn remove(&mut self, key: &str) -> CacheResult<bool>;

    /// Delete several keys; returns the keys that were not removed
    async fn remove_many(&mut self, keys: &[&str]) -> CacheResult<Vec<String>>;

    /// Re-apply the configured time-to-live to an existing key
    async fn touch(&mut self, key: &str) -> CacheResult<bool>;

    /// Touch several keys; returns the keys that were not touched
    async fn touch_many(&mut self, keys: &[&str]) -> CacheResult<Vec<String>>;

    /// Whether a key exists
    async fn has(&mut self, key: &str) -> CacheResult<bool>;

    /// Keys among `keys` that exist
    async fn has_many(&mut self, keys: &[&str]) -> CacheResult<Vec<String>>;

    /// Drop everything in the store
    async fn flush(&mut self) -> CacheResult<bool>;

    /// Delete every key stored under `namespace`
    async fn clear_by_namespace(&mut self, namespace: &str) -> CacheResult<bool>;

    /// Delete every key of the configured namespace starting with `prefix`
    async fn clear_by_prefix(&mut self, prefix: &str) -> CacheResult<bool>;

    /// Metadata of a key; `None` when it is absent
    async fn metadata(&mut self, key: &str) -> CacheResult<Option<Metadata>>;

    /// Capabilities of the connected store
    async fn capabilities(&mut self) -> CacheResult<CapabilityDescriptor>;

    /// Add `delta` to an integer value and return the result
    async fn increment(&mut self, key: &str, delta: i64) -> CacheResult<i64>;

    /// Subtract `delta` from an integer value and return the result
    async fn decrement(&mut self, key: &str, delta: i64) -> CacheResult<i64> {
        let delta = delta.checked_neg().ok_or_else(|| {
            CacheError::InvalidArgument(format!("cannot decrement by {delta}"))
        })?;
        self.increment(key, delta).await
    }

    /// Memory used by the store in bytes
    async fn total_space(&mut self) -> CacheResult<u64>;
}

/// Adapter state that does not depend on the connection
#[derive(Debug, Clone)]
pub(crate) struct AdapterState {
    namespacer: Namespacer,
    requested_encoding: ValueEncoding,
    encoding: ValueEncoding,
    ttl: Option<Duration>,
    capabilities: CapabilityCache,
    generation: u64,
}

impl AdapterState {
    pub(crate) fn new(
        namespace: NamespaceConfig,
        encoding: ValueEncoding,
        options: &LibraryOptions,
        ttl: Option<Duration>,
    ) -> Self {
        let mut namespacer = Namespacer::new(namespace);
        namespacer.set_library_prefix(options.key_prefix());
        Self {
            namespacer,
            requested_encoding: encoding,
            encoding: effective_encoding(encoding, options),
            ttl,
            capabilities: CapabilityCache::new(),
            generation: 0,
        }
    }

    pub(crate) const fn encoding(&self) -> ValueEncoding {
        self.encoding
    }

    pub(crate) const fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub(crate) const fn namespacer(&self) -> &Namespacer {
        &self.namespacer
    }

    pub(crate) fn set_ttl(&mut self, ttl: Option<Duration>) {
        self.ttl = ttl;
    }

    pub(crate) fn set_namespace(&mut self, namespace: NamespaceConfig) -> CacheResult<()> {
        self.namespacer.set_config(namespace)?;
        self.capabilities.invalidate();
        Ok(())
    }

    pub(crate) fn set_encoding(&mut self, encoding: ValueEncoding, options: &LibraryOptions) {
        self.requested_encoding = encoding;
        self.apply_options(options);
    }

    /// Pick up the options handled by the adapter: serializer and key prefix
    pub(crate) fn apply_options(&mut self, options: &LibraryOptions) {
        self.encoding = effective_encoding(self.requested_encoding, options);
        self.namespacer.set_library_prefix(options.key_prefix());
        self.capabilities.invalidate();
    }

    pub(crate) fn invalidate_capabilities(&mut self) {
        self.capabilities.invalidate();
    }

    /// Forget capabilities resolved for a previous connection
    pub(crate) fn sync(&mut self, generation: u64) {
        if self.generation != generation {
            self.generation = generation;
            self.capabilities.invalidate();
        }
    }

    pub(crate) fn capabilities(&mut self, version: &ServerVersion) -> &CapabilityDescriptor {
        let separator = &self.namespacer.config().separator;
        self.capabilities
            .get_or_resolve(version, self.encoding, separator)
    }

    /// Physical key for `key`, rejecting empty and oversize keys
    pub(crate) fn key(&mut self, key: &str, version: &ServerVersion) -> CacheResult<String> {
        if key.is_empty() {
            return Err(CacheError::InvalidArgument("key must not be empty".to_string()));
        }
        let physical = self.namespacer.key(key);
        let max = self.capabilities(version).max_key_length;
        if physical.len() > max {
            return Err(CacheError::InvalidArgument(format!(
                "key is {} bytes long, the server accepts at most {max}",
                physical.len()
            )));
        }
        Ok(physical)
    }

    pub(crate) fn keys(&mut self, keys: &[&str], version: &ServerVersion) -> CacheResult<Vec<String>> {
        keys.iter().map(|key| self.key(key, version)).collect()
    }

    /// Expiry in whole seconds for a write, `None` for no expiry
    pub(crate) fn ttl_seconds(
        &mut self,
        ttl: Option<Duration>,
        version: &ServerVersion,
    ) -> CacheResult<Option<u64>> {
        match ttl.or(self.ttl).filter(|ttl| !ttl.is_zero()) {
            None => Ok(None),
            Some(ttl) => {
                if !self.capabilities(version).ttl_supported {
                    return Err(CacheError::Unsupported(format!(
                        "server version {version} does not support expiring keys"
                    )));
                }
                Ok(Some(ttl.as_secs().max(1)))
            }
        }
    }

    pub(crate) fn encode(&self, value: &CacheValue) -> CacheResult<Bytes> {
        self.encoding.encode(value)
    }

    pub(crate) fn decode(&self, raw: &[u8]) -> CacheResult<CacheValue> {
        self.encoding.decode(raw)
    }
}

/// Read one key, confirming an ambiguous reply with `EXISTS`
pub(crate) async fn read_value<T: RedisCommands>(
    conn: &mut T,
    key: &str,
    encoding: ValueEncoding,
) -> CacheResult<Option<Bytes>> {
    let raw = conn.get(key).await?;
    resolve_read(raw, encoding, move || async move { conn.exists(key).await }).await
}

/// `MGET` several keys of one slot, confirming ambiguous replies with `EXISTS`
pub(crate) async fn read_values<T: RedisCommands>(
    conn: &mut T,
    keys: &[String],
    encoding: ValueEncoding,
) -> CacheResult<Vec<Option<Bytes>>> {
    let replies = conn.mget(keys).await?;
    if replies.len() != keys.len() {
        return Err(CacheError::Command(format!(
            "MGET returned {} replies for {} keys",
            replies.len(),
            keys.len()
        )));
    }

    let mut values = Vec::with_capacity(replies.len());
    for (key, raw) in keys.iter().zip(replies) {
        let present = if needs_exists_check(raw.as_deref(), encoding) {
            conn.exists(key).await?
        } else {
            !is_falsy(raw.as_deref())
        };
        values.push(present.then(|| raw.unwrap_or_default()));
    }
    Ok(values)
}

/// `SET`/`SETEX`, or `SETNX` followed by `EXPIRE` when `only_new`
///
/// The expiry of a conditional write is only applied once the key was
/// actually created.
pub(crate) async fn write_value<T: RedisCommands>(
    conn: &mut T,
    key: &str,
    value: Bytes,
    seconds: Option<u64>,
    only_new: bool,
) -> CacheResult<bool> {
    if only_new {
        if !conn.setnx(key, value).await? {
            return Ok(false);
        }
        if let Some(seconds) = seconds {
            conn.expire(key, seconds).await?;
        }
        return Ok(true);
    }
    match seconds {
        Some(seconds) => conn.setex(key, seconds, value).await?,
        None => conn.set(key, value).await?,
    }
    Ok(true)
}

/// Normalized remaining time to live of one key
pub(crate) async fn read_ttl<T: RedisCommands>(
    conn: &mut T,
    key: &str,
    version: &ServerVersion,
) -> CacheResult<RemainingTtl> {
    let strategy = TtlStrategy::for_version(version);
    let raw = match strategy.unit() {
        Some(TtlUnit::Milliseconds) => Some(conn.pttl(key).await?),
        Some(TtlUnit::Seconds) => Some(conn.ttl(key).await?),
        None => None,
    };
    strategy
        .remaining(raw, move || async move { conn.exists(key).await })
        .await
}

/// Result of one key of a batch
///
/// A runtime failure counts as the key not being handled, so the batch can
/// go on with the next key. Argument and capability errors still propagate.
pub(crate) fn batch_outcome(action: &str, key: &str, result: CacheResult<bool>) -> CacheResult<bool> {
    match result {
        Err(err) if err.is_runtime() => {
            warn!("{} '{}' failed: {}", action, key, err);
            Ok(false)
        }
        other => other,
    }
}

/// Numeric field of an `INFO` reply
pub(crate) fn info_field(info: &str, field: &str) -> Option<u64> {
    info.lines().find_map(|line| {
        let (name, value) = line.trim().split_once(':')?;
        (name == field).then(|| value.trim().parse().ok()).flatten()
    })
}
