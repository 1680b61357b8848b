//! In-memory Redis used by the integration tests
//!
//! `FakeServer` keeps one keyspace per database and answers the commands the
//! adapter uses, replying to `TTL`/`PTTL` the way servers of the configured
//! version do. `SELECT` binds a connection and all of its clones, as it
//! binds a shared socket.
//! `FakeCluster` routes keys to three primaries by hash slot.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use oxide_cache::cluster::calculate_slot;
use oxide_cache::{
    CacheError, CacheResult, ClusterCommands, ClusterConnector, Connector, NodeAddress, NodeInfo,
    RedisCommands, ServerVersion, StandaloneCommands, TlsConfig,
};
use oxide_cache_core::config::{ClusterConnectionSettings, ServerEndpoint};
use oxide_cache_core::library_options::{OptionId, OptionValue};
use oxide_cache_core::types::SlotRange;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

struct Entry {
    value: Bytes,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct ServerState {
    version: Option<String>,
    databases: HashMap<u32, HashMap<String, Entry>>,
    current: u32,
    connects: usize,
    auths: Vec<Vec<String>>,
    selects: Vec<u32>,
    options: Vec<(OptionId, OptionValue)>,
    commands: Vec<&'static str>,
    password: Option<String>,
    refuse_connections: bool,
    drop_next_command: bool,
}

impl ServerState {
    fn parsed_version(&self) -> ServerVersion {
        self.version
            .as_deref()
            .and_then(ServerVersion::parse)
            .unwrap_or_else(ServerVersion::unknown)
    }

    /// Keyspace of the selected database
    fn entries(&mut self) -> &mut HashMap<String, Entry> {
        self.databases.entry(self.current).or_default()
    }

    fn live(&mut self, key: &str) -> Option<&Entry> {
        let entries = self.entries();
        let expired = entries
            .get(key)
            .and_then(|entry| entry.expires_at)
            .is_some_and(|at| at <= Instant::now());
        if expired {
            entries.remove(key);
        }
        entries.get(key)
    }

    fn store(&mut self, key: &str, value: Bytes, ttl: Option<Duration>) {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries()
            .insert(key.to_string(), Entry { value, expires_at });
    }

    /// Remaining lifetime in milliseconds: `None` when absent, `Some(None)` without expiry
    fn remaining(&mut self, key: &str) -> Option<Option<u64>> {
        let entry = self.live(key)?;
        Some(entry.expires_at.map(|at| {
            at.saturating_duration_since(Instant::now()).as_millis() as u64
        }))
    }

    /// Reply for a key that does not exist
    fn missing_ttl_reply(&self) -> i64 {
        if self.parsed_version().at_least(2, 8) {
            -2
        } else {
            -1
        }
    }

    fn begin(&mut self, command: &'static str) -> CacheResult<()> {
        self.commands.push(command);
        if self.drop_next_command {
            self.drop_next_command = false;
            return Err(CacheError::Connection("connection reset by peer".to_string()));
        }
        Ok(())
    }

    fn get(&mut self, key: &str) -> Option<Bytes> {
        self.live(key).map(|entry| entry.value.clone())
    }

    fn del(&mut self, keys: &[String]) -> u64 {
        keys.iter()
            .filter(|key| {
                let present = self.live(key).is_some();
                self.entries().remove(key.as_str());
                present
            })
            .count() as u64
    }

    fn expire(&mut self, key: &str, seconds: u64) -> bool {
        if self.live(key).is_none() {
            return false;
        }
        if let Some(entry) = self.entries().get_mut(key) {
            entry.expires_at = Some(Instant::now() + Duration::from_secs(seconds));
        }
        true
    }

    fn pttl(&mut self, key: &str) -> i64 {
        match self.remaining(key) {
            None => self.missing_ttl_reply(),
            Some(None) => -1,
            Some(Some(ms)) => ms as i64,
        }
    }

    fn ttl(&mut self, key: &str) -> i64 {
        match self.remaining(key) {
            None => self.missing_ttl_reply(),
            Some(None) => -1,
            Some(Some(ms)) => ((ms + 500) / 1000) as i64,
        }
    }

    fn incr_by(&mut self, key: &str, delta: i64) -> CacheResult<i64> {
        let current = match self.live(key) {
            Some(entry) => std::str::from_utf8(&entry.value)
                .ok()
                .and_then(|text| text.parse::<i64>().ok())
                .ok_or_else(|| {
                    CacheError::Command("ERR value is not an integer or out of range".to_string())
                })?,
            None => 0,
        };
        let next = current + delta;
        let expires_at = self.entries().get(key).and_then(|entry| entry.expires_at);
        self.entries().insert(
            key.to_string(),
            Entry {
                value: Bytes::from(next.to_string()),
                expires_at,
            },
        );
        Ok(next)
    }

    fn keys(&mut self, pattern: &str) -> Vec<String> {
        let now = Instant::now();
        let entries = self.entries();
        entries.retain(|_, entry| entry.expires_at.map_or(true, |at| at > now));
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    fn info(&mut self, section: Option<&str>) -> String {
        match section {
            Some("memory") => format!(
                "# Memory\r\nused_memory:{}\r\n",
                1000 + 100 * self.entries().len()
            ),
            _ => match &self.version {
                Some(version) => format!("# Server\r\nredis_version:{version}\r\nredis_mode:standalone\r\n"),
                None => "# Server\r\nredis_mode:standalone\r\n".to_string(),
            },
        }
    }
}

/// Redis glob matching for `*`, `?` and backslash escapes
fn glob_match(pattern: &str, text: &str) -> bool {
    fn matches(pattern: &[char], text: &[char]) -> bool {
        match pattern.split_first() {
            None => text.is_empty(),
            Some(('*', rest)) => (0..=text.len()).any(|skip| matches(rest, &text[skip..])),
            Some(('?', rest)) => !text.is_empty() && matches(rest, &text[1..]),
            Some(('\\', rest)) if !rest.is_empty() => {
                text.first() == rest.first() && matches(&rest[1..], &text[1..])
            }
            Some((c, rest)) => text.first() == Some(c) && matches(rest, &text[1..]),
        }
    }
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    matches(&pattern, &text)
}

/// One in-memory Redis server
#[derive(Clone, Default)]
pub struct FakeServer {
    state: Arc<Mutex<ServerState>>,
}

impl FakeServer {
    /// Server reporting `version` in `INFO`
    pub fn new(version: &str) -> Self {
        let server = Self::default();
        server.lock().version = Some(version.to_string());
        server
    }

    /// Server whose `INFO` carries no version
    pub fn without_version() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap()
    }

    /// Lock with `database` selected
    fn lock_db(&self, database: u32) -> MutexGuard<'_, ServerState> {
        let mut state = self.lock();
        state.current = database;
        state
    }

    /// Connector that opens connections to this server
    pub fn connector(&self) -> FakeConnector {
        FakeConnector {
            server: self.clone(),
        }
    }

    pub fn require_password(&self, password: &str) {
        self.lock().password = Some(password.to_string());
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.lock().refuse_connections = refuse;
    }

    /// Fail the next command as if the socket was reset
    pub fn drop_next_command(&self) {
        self.lock().drop_next_command = true;
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    pub fn auths(&self) -> Vec<Vec<String>> {
        self.lock().auths.clone()
    }

    pub fn selects(&self) -> Vec<u32> {
        self.lock().selects.clone()
    }

    pub fn options(&self) -> Vec<(OptionId, OptionValue)> {
        self.lock().options.clone()
    }

    /// Number of times `command` was received
    pub fn count(&self, command: &str) -> usize {
        self.lock().commands.iter().filter(|c| **c == command).count()
    }

    pub fn raw(&self, key: &str) -> Option<Bytes> {
        self.raw_in(0, key)
    }

    /// Value of `key` in `database`
    pub fn raw_in(&self, database: u32, key: &str) -> Option<Bytes> {
        self.lock_db(database).get(key)
    }

    pub fn insert_raw(&self, key: &str, value: &str) {
        self.lock_db(0)
            .store(key, Bytes::from(value.to_string()), None);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock_db(0).live(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.len_in(0)
    }

    /// Number of live keys in `database`
    pub fn len_in(&self, database: u32) -> usize {
        self.lock_db(database).keys("*").len()
    }

    /// Expire a key immediately
    pub fn force_expire(&self, key: &str) {
        if let Some(entry) = self.lock_db(0).entries().get_mut(key) {
            entry.expires_at = Some(Instant::now());
        }
    }

    /// Remaining lifetime of a key, as the server sees it
    pub fn expiry(&self, key: &str) -> Option<Duration> {
        self.lock_db(0)
            .remaining(key)
            .flatten()
            .map(Duration::from_millis)
    }
}

/// A connection to a [`FakeServer`]
#[derive(Clone)]
pub struct FakeConnection {
    server: FakeServer,
    database: Arc<AtomicU32>,
}

impl FakeConnection {
    fn new(server: FakeServer) -> Self {
        Self {
            server,
            database: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Server state with this connection's database selected
    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.server.lock_db(self.database.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl RedisCommands for FakeConnection {
    async fn get(&mut self, key: &str) -> CacheResult<Option<Bytes>> {
        let mut state = self.state();
        state.begin("GET")?;
        Ok(state.get(key))
    }

    async fn mget(&mut self, keys: &[String]) -> CacheResult<Vec<Option<Bytes>>> {
        let mut state = self.state();
        state.begin("MGET")?;
        Ok(keys.iter().map(|key| state.get(key)).collect())
    }

    async fn set(&mut self, key: &str, value: Bytes) -> CacheResult<()> {
        let mut state = self.state();
        state.begin("SET")?;
        state.store(key, value, None);
        Ok(())
    }

    async fn setex(&mut self, key: &str, seconds: u64, value: Bytes) -> CacheResult<()> {
        let mut state = self.state();
        state.begin("SETEX")?;
        state.store(key, value, Some(Duration::from_secs(seconds)));
        Ok(())
    }

    async fn setnx(&mut self, key: &str, value: Bytes) -> CacheResult<bool> {
        let mut state = self.state();
        state.begin("SETNX")?;
        if state.live(key).is_some() {
            return Ok(false);
        }
        state.store(key, value, None);
        Ok(true)
    }

    async fn del(&mut self, keys: &[String]) -> CacheResult<u64> {
        let mut state = self.state();
        state.begin("DEL")?;
        Ok(state.del(keys))
    }

    async fn exists(&mut self, key: &str) -> CacheResult<bool> {
        let mut state = self.state();
        state.begin("EXISTS")?;
        Ok(state.live(key).is_some())
    }

    async fn expire(&mut self, key: &str, seconds: u64) -> CacheResult<bool> {
        let mut state = self.state();
        state.begin("EXPIRE")?;
        Ok(state.expire(key, seconds))
    }

    async fn ttl(&mut self, key: &str) -> CacheResult<i64> {
        let mut state = self.state();
        state.begin("TTL")?;
        Ok(state.ttl(key))
    }

    async fn pttl(&mut self, key: &str) -> CacheResult<i64> {
        let mut state = self.state();
        state.begin("PTTL")?;
        Ok(state.pttl(key))
    }

    async fn incr_by(&mut self, key: &str, delta: i64) -> CacheResult<i64> {
        let mut state = self.state();
        state.begin("INCRBY")?;
        state.incr_by(key, delta)
    }

    async fn keys(&mut self, pattern: &str) -> CacheResult<Vec<String>> {
        let mut state = self.state();
        state.begin("KEYS")?;
        Ok(state.keys(pattern))
    }

    async fn info(&mut self, section: Option<&str>) -> CacheResult<String> {
        let mut state = self.state();
        state.begin("INFO")?;
        Ok(state.info(section))
    }

    async fn set_option(&mut self, id: OptionId, value: &OptionValue) -> CacheResult<()> {
        self.state().options.push((id, value.clone()));
        Ok(())
    }
}

#[async_trait]
impl StandaloneCommands for FakeConnection {
    async fn auth(&mut self, args: &[String]) -> CacheResult<()> {
        let mut state = self.state();
        state.begin("AUTH")?;
        state.auths.push(args.to_vec());
        match (&state.password, args.last()) {
            (Some(expected), Some(given)) if expected != given => Err(CacheError::Command(
                "WRONGPASS invalid username-password pair".to_string(),
            )),
            _ => Ok(()),
        }
    }

    async fn select(&mut self, database: u32) -> CacheResult<()> {
        let mut state = self.state();
        state.begin("SELECT")?;
        state.selects.push(database);
        self.database.store(database, Ordering::SeqCst);
        Ok(())
    }

    async fn mset(&mut self, pairs: &[(String, Bytes)]) -> CacheResult<()> {
        let mut state = self.state();
        state.begin("MSET")?;
        for (key, value) in pairs {
            state.store(key, value.clone(), None);
        }
        Ok(())
    }

    async fn multi_setex(&mut self, pairs: &[(String, Bytes)], seconds: u64) -> CacheResult<()> {
        let mut state = self.state();
        state.begin("MULTI")?;
        for (key, value) in pairs {
            state.store(key, value.clone(), Some(Duration::from_secs(seconds)));
        }
        Ok(())
    }

    async fn flush_db(&mut self) -> CacheResult<()> {
        let mut state = self.state();
        state.begin("FLUSHDB")?;
        state.entries().clear();
        Ok(())
    }

    async fn flush_all(&mut self) -> CacheResult<()> {
        let mut state = self.state();
        state.begin("FLUSHALL")?;
        state.databases.clear();
        Ok(())
    }
}

/// Opens connections to one [`FakeServer`]
pub struct FakeConnector {
    server: FakeServer,
}

#[async_trait]
impl Connector for FakeConnector {
    type Conn = FakeConnection;

    async fn connect(
        &self,
        _endpoint: &ServerEndpoint,
        _tls: Option<&TlsConfig>,
    ) -> CacheResult<Self::Conn> {
        let mut state = self.server.lock();
        if state.refuse_connections {
            return Err(CacheError::Connection("connection refused".to_string()));
        }
        state.connects += 1;
        Ok(FakeConnection::new(self.server.clone()))
    }
}

struct ClusterNode {
    info: NodeInfo,
    server: FakeServer,
    failing: AtomicBool,
}

/// Three primaries and one replica sharing the slot space
#[derive(Clone)]
pub struct FakeCluster {
    nodes: Arc<Vec<ClusterNode>>,
    connects: Arc<Mutex<usize>>,
}

impl FakeCluster {
    pub fn new(version: &str) -> Self {
        let ranges = [(0, 5460), (5461, 10922), (10923, 16383)];
        let mut nodes: Vec<ClusterNode> = ranges
            .iter()
            .enumerate()
            .map(|(i, &(start, end))| {
                let mut info = NodeInfo::new(
                    format!("primary{i}"),
                    NodeAddress::new("127.0.0.1", 7000 + i as u16),
                );
                info.is_primary = true;
                info.slots = vec![SlotRange::new(start, end)];
                ClusterNode {
                    info,
                    server: FakeServer::new(version),
                    failing: AtomicBool::new(false),
                }
            })
            .collect();
        let mut replica = NodeInfo::new("replica0".to_string(), NodeAddress::new("127.0.0.1", 7003));
        replica.is_primary = false;
        nodes.push(ClusterNode {
            info: replica,
            server: FakeServer::new(version),
            failing: AtomicBool::new(false),
        });
        Self {
            nodes: Arc::new(nodes),
            connects: Arc::new(Mutex::new(0)),
        }
    }

    /// Primary `index` as a standalone server
    pub fn primary(&self, index: usize) -> &FakeServer {
        &self.nodes[index].server
    }

    /// Index of the primary owning `key`
    pub fn owner(&self, key: &str) -> usize {
        let slot = calculate_slot(key.as_bytes());
        self.nodes
            .iter()
            .position(|node| node.info.is_primary && node.info.slots.iter().any(|range| range.contains(slot)))
            .unwrap_or(0)
    }

    /// A logical key whose physical form (with `prefix`) lands on primary `index`
    pub fn key_on(&self, index: usize, prefix: &str, hint: &str) -> String {
        (0..)
            .map(|n| format!("{hint}{n}"))
            .find(|key| self.owner(&format!("{prefix}{key}")) == index)
            .unwrap_or_default()
    }

    pub fn connects(&self) -> usize {
        *self.connects.lock().unwrap()
    }

    /// Report node `index` with the `fail` flag in `CLUSTER NODES`
    pub fn mark_failing(&self, index: usize) {
        self.nodes[index].failing.store(true, Ordering::SeqCst);
    }

    fn route(&self, key: &str) -> FakeServer {
        self.nodes[self.owner(key)].server.clone()
    }

    fn route_many(&self, keys: &[String]) -> CacheResult<FakeServer> {
        let first = keys
            .first()
            .ok_or_else(|| CacheError::Command("ERR wrong number of arguments".to_string()))?;
        let slot = calculate_slot(first.as_bytes());
        if keys.iter().any(|key| calculate_slot(key.as_bytes()) != slot) {
            return Err(CacheError::Command(
                "CROSSSLOT Keys in request don't hash to the same slot".to_string(),
            ));
        }
        Ok(self.route(first))
    }
}

/// Cluster-aware connection to a [`FakeCluster`]
#[derive(Clone)]
pub struct FakeClusterConnection {
    cluster: FakeCluster,
}

impl FakeClusterConnection {
    fn node(&self, key: &str) -> FakeConnection {
        FakeConnection::new(self.cluster.route(key))
    }
}

#[async_trait]
impl RedisCommands for FakeClusterConnection {
    async fn get(&mut self, key: &str) -> CacheResult<Option<Bytes>> {
        self.node(key).get(key).await
    }

    async fn mget(&mut self, keys: &[String]) -> CacheResult<Vec<Option<Bytes>>> {
        let server = self.cluster.route_many(keys)?;
        FakeConnection::new(server).mget(keys).await
    }

    async fn set(&mut self, key: &str, value: Bytes) -> CacheResult<()> {
        self.node(key).set(key, value).await
    }

    async fn setex(&mut self, key: &str, seconds: u64, value: Bytes) -> CacheResult<()> {
        self.node(key).setex(key, seconds, value).await
    }

    async fn setnx(&mut self, key: &str, value: Bytes) -> CacheResult<bool> {
        self.node(key).setnx(key, value).await
    }

    async fn del(&mut self, keys: &[String]) -> CacheResult<u64> {
        let server = self.cluster.route_many(keys)?;
        FakeConnection::new(server).del(keys).await
    }

    async fn exists(&mut self, key: &str) -> CacheResult<bool> {
        self.node(key).exists(key).await
    }

    async fn expire(&mut self, key: &str, seconds: u64) -> CacheResult<bool> {
        self.node(key).expire(key, seconds).await
    }

    async fn ttl(&mut self, key: &str) -> CacheResult<i64> {
        self.node(key).ttl(key).await
    }

    async fn pttl(&mut self, key: &str) -> CacheResult<i64> {
        self.node(key).pttl(key).await
    }

    async fn incr_by(&mut self, key: &str, delta: i64) -> CacheResult<i64> {
        self.node(key).incr_by(key, delta).await
    }

    async fn keys(&mut self, pattern: &str) -> CacheResult<Vec<String>> {
        let mut keys = Vec::new();
        for node in self.cluster.nodes.iter().filter(|node| node.info.is_primary) {
            let mut conn = FakeConnection::new(node.server.clone());
            keys.extend(conn.keys(pattern).await?);
        }
        Ok(keys)
    }

    async fn info(&mut self, section: Option<&str>) -> CacheResult<String> {
        let mut conn = FakeConnection::new(self.cluster.nodes[0].server.clone());
        conn.info(section).await
    }

    async fn set_option(&mut self, id: OptionId, value: &OptionValue) -> CacheResult<()> {
        for node in self.cluster.nodes.iter() {
            node.server.lock().options.push((id, value.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterCommands for FakeClusterConnection {
    async fn nodes(&mut self) -> CacheResult<Vec<NodeInfo>> {
        Ok(self
            .cluster
            .nodes
            .iter()
            .map(|node| {
                let mut info = node.info.clone();
                info.is_failing = node.failing.load(Ordering::SeqCst);
                info
            })
            .collect())
    }
}

/// Direct connections to the nodes of a [`FakeCluster`]
pub struct FakeNodeConnector {
    cluster: FakeCluster,
}

#[async_trait]
impl Connector for FakeNodeConnector {
    type Conn = FakeConnection;

    async fn connect(
        &self,
        endpoint: &ServerEndpoint,
        tls: Option<&TlsConfig>,
    ) -> CacheResult<Self::Conn> {
        let address = endpoint.to_string();
        let node = self
            .cluster
            .nodes
            .iter()
            .find(|node| node.info.address.to_string() == address)
            .ok_or_else(|| CacheError::Connection(format!("no route to {address}")))?;
        node.server.connector().connect(endpoint, tls).await
    }
}

/// Opens connections to a [`FakeCluster`]
pub struct FakeClusterConnector {
    nodes: FakeNodeConnector,
}

impl FakeClusterConnector {
    pub fn new(cluster: &FakeCluster) -> Self {
        Self {
            nodes: FakeNodeConnector {
                cluster: cluster.clone(),
            },
        }
    }
}

#[async_trait]
impl ClusterConnector for FakeClusterConnector {
    type Conn = FakeClusterConnection;
    type Node = FakeNodeConnector;

    async fn connect(&self, _settings: &ClusterConnectionSettings) -> CacheResult<Self::Conn> {
        *self.nodes.cluster.connects.lock().unwrap() += 1;
        Ok(FakeClusterConnection {
            cluster: self.nodes.cluster.clone(),
        })
    }

    fn node_connector(&self) -> &Self::Node {
        &self.nodes
    }
}
