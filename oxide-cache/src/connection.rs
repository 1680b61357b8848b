//! Connection lifecycle management
//!
//! [`ConnectionManager`] and [`ClusterManager`] own the live connection of an
//! adapter. They connect lazily, authenticate, select the database, apply
//! library options and detect the server version. The cached handle is
//! reused until a setting that identifies the connection changes or a
//! command reports a broken connection.

use crate::driver::{ClusterConnector, Connector, RedisCommands, StandaloneCommands};
use oxide_cache_core::{
    config::{
        ClusterConnectionSettings, ConnectionSettings, Credentials, Persistence, ServerEndpoint,
        TlsConfig,
    },
    error::{CacheError, CacheResult},
    library_options::LibraryOptions,
    types::{NodeAddress, ServerVersion},
};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Shared table of persistent connections
///
/// Adapters handed clones of the same table reuse each other's connections
/// when they are configured with the same persistent id and server, and the
/// same database, credentials, TLS settings and library options. A shared
/// connection carries that session state, so adapters differing in any of
/// them get their own entry.
pub struct PersistentConnections<T> {
    connections: Arc<Mutex<HashMap<String, T>>>,
}

impl<T> PersistentConnections<T> {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            connections: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of registered connections
    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Whether no connection is registered
    pub async fn is_empty(&self) -> bool {
        self.connections.lock().await.is_empty()
    }

    async fn insert(&self, key: String, conn: T) {
        self.connections.lock().await.insert(key, conn);
    }

    async fn remove(&self, key: &str) {
        self.connections.lock().await.remove(key);
    }
}

impl<T: Clone> PersistentConnections<T> {
    async fn get(&self, key: &str) -> Option<T> {
        self.connections.lock().await.get(key).cloned()
    }
}

impl<T> Clone for PersistentConnections<T> {
    fn clone(&self) -> Self {
        Self {
            connections: Arc::clone(&self.connections),
        }
    }
}

impl<T> Default for PersistentConnections<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for PersistentConnections<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentConnections").finish_non_exhaustive()
    }
}

/// A live, initialized connection
pub struct ConnectionHandle<T> {
    conn: T,
    version: ServerVersion,
    generation: u64,
}

impl<T> ConnectionHandle<T> {
    /// The underlying connection
    pub fn conn(&mut self) -> &mut T {
        &mut self.conn
    }

    /// Server version detected or configured for this connection
    pub const fn version(&self) -> &ServerVersion {
        &self.version
    }

    /// Sequence number of the connection within its manager
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

enum ConnectionState<T> {
    Uninitialized,
    Connected(ConnectionHandle<T>),
}

impl<T> ConnectionState<T> {
    fn handle(&mut self) -> CacheResult<&mut ConnectionHandle<T>> {
        match self {
            Self::Connected(handle) => Ok(handle),
            Self::Uninitialized => Err(CacheError::Connection("not connected".to_string())),
        }
    }

    const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }

    fn version(&self) -> Option<&ServerVersion> {
        match self {
            Self::Connected(handle) => Some(&handle.version),
            Self::Uninitialized => None,
        }
    }
}

/// Owner of the connection to a single server
pub struct ConnectionManager<C: Connector> {
    connector: C,
    settings: ConnectionSettings,
    server_version: Option<ServerVersion>,
    persistent: PersistentConnections<C::Conn>,
    state: ConnectionState<C::Conn>,
    generation: u64,
}

impl<C: Connector> ConnectionManager<C> {
    /// Create a manager; nothing is connected until [`acquire`](Self::acquire)
    pub fn new(connector: C, settings: ConnectionSettings) -> CacheResult<Self> {
        settings.validate()?;
        Ok(Self {
            connector,
            settings,
            server_version: None,
            persistent: PersistentConnections::new(),
            state: ConnectionState::Uninitialized,
            generation: 0,
        })
    }

    /// Use a shared persistent connection table
    #[must_use]
    pub fn with_persistent_connections(mut self, table: PersistentConnections<C::Conn>) -> Self {
        self.persistent = table;
        self.invalidate();
        self
    }

    /// Use this version instead of asking the server
    #[must_use]
    pub fn with_server_version(mut self, version: Option<ServerVersion>) -> Self {
        self.set_server_version(version);
        self
    }

    /// Current connection settings
    pub const fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Persistent connection table in use
    pub fn persistent_connections(&self) -> &PersistentConnections<C::Conn> {
        &self.persistent
    }

    /// Whether a connection is cached
    pub const fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Version of the cached connection
    pub fn version(&self) -> Option<&ServerVersion> {
        self.state.version()
    }

    /// Change the server
    pub fn set_endpoint(&mut self, endpoint: ServerEndpoint) {
        if self.settings.endpoint.as_ref() != Some(&endpoint) {
            self.settings.endpoint = Some(endpoint);
            self.invalidate();
        }
    }

    /// Change the credentials
    pub fn set_credentials(&mut self, credentials: Credentials) -> CacheResult<()> {
        credentials.validate()?;
        if self.settings.credentials != credentials {
            self.settings.credentials = credentials;
            self.invalidate();
        }
        Ok(())
    }

    /// Change the database index
    pub fn set_database(&mut self, database: u32) {
        if self.settings.database != database {
            self.settings.database = database;
            self.invalidate();
        }
    }

    /// Change the connection reuse policy
    pub fn set_persistence(&mut self, persistence: Persistence) {
        if self.settings.persistence != persistence {
            self.settings.persistence = persistence;
            self.invalidate();
        }
    }

    /// Replace the library options
    pub fn set_library_options(&mut self, options: LibraryOptions) {
        if self.settings.library_options != options {
            self.settings.library_options = options;
            self.invalidate();
        }
    }

    /// Change the TLS settings
    pub fn set_tls(&mut self, tls: Option<TlsConfig>) -> CacheResult<()> {
        if let Some(tls) = &tls {
            tls.validate()?;
        }
        if self.settings.tls != tls {
            self.settings.tls = tls;
            self.invalidate();
        }
        Ok(())
    }

    /// Use this version instead of asking the server, or `None` to detect it
    pub fn set_server_version(&mut self, version: Option<ServerVersion>) {
        if self.server_version != version {
            self.server_version = version;
            self.invalidate();
        }
    }

    /// Drop the cached connection; the next [`acquire`](Self::acquire) reconnects
    pub fn invalidate(&mut self) {
        if self.state.is_connected() {
            debug!("Dropping cached connection after reconfiguration");
        }
        self.state = ConnectionState::Uninitialized;
    }

    /// Return the cached connection, establishing one if needed
    ///
    /// Any failure while connecting or initializing is reported as
    /// [`CacheError::Connection`] and leaves nothing cached.
    pub async fn acquire(&mut self) -> CacheResult<&mut ConnectionHandle<C::Conn>> {
        if !self.state.is_connected() {
            let (conn, version) = self.establish().await.map_err(|e| {
                warn!("Failed to establish Redis connection: {}", e);
                e.into_connection_failure()
            })?;
            self.generation += 1;
            self.state = ConnectionState::Connected(ConnectionHandle {
                conn,
                version,
                generation: self.generation,
            });
        }
        self.state.handle()
    }

    /// Pass a command result through, dropping the connection if it broke
    pub async fn check<T>(&mut self, result: CacheResult<T>) -> CacheResult<T> {
        if let Err(err) = &result {
            if err.is_connection_error() {
                warn!("Connection error, reconnecting on next use: {}", err);
                self.invalidate();
                if let Some(key) = self.persistent_key() {
                    self.persistent.remove(&key).await;
                }
            }
        }
        result
    }

    fn endpoint(&self) -> CacheResult<&ServerEndpoint> {
        self.settings
            .endpoint
            .as_ref()
            .ok_or_else(|| CacheError::Config("no server configured".to_string()))
    }

    fn persistent_key(&self) -> Option<String> {
        match (&self.settings.persistence, &self.settings.endpoint) {
            (Persistence::Persistent { id }, Some(endpoint)) => Some(format!(
                "{id}@{endpoint}/{}#{:016x}",
                self.settings.database,
                session_fingerprint(
                    &self.settings.credentials,
                    self.settings.tls.as_ref(),
                    &self.settings.library_options,
                )
            )),
            _ => None,
        }
    }

    async fn establish(&self) -> CacheResult<(C::Conn, ServerVersion)> {
        let endpoint = self.endpoint()?;
        let tls = self.settings.tls.as_ref();

        let persistent_key = self.persistent_key();
        let reused = match &persistent_key {
            Some(key) => self.persistent.get(key).await,
            None => None,
        };
        let is_reused = reused.is_some();
        let mut conn = match reused {
            Some(conn) => {
                debug!("Reusing persistent connection to {}", endpoint);
                conn
            }
            None => self.connector.connect(endpoint, tls).await?,
        };

        let initialized = async {
            self.initialize(&mut conn).await?;
            detect_version(&mut conn, self.server_version.as_ref()).await
        }
        .await;

        let version = match (initialized, &persistent_key) {
            (Ok(version), Some(key)) => {
                if !is_reused {
                    self.persistent.insert(key.clone(), conn.clone()).await;
                }
                version
            }
            (Ok(version), None) => version,
            (Err(err), key) => {
                if let (true, Some(key)) = (is_reused, key) {
                    self.persistent.remove(key).await;
                }
                return Err(err);
            }
        };

        info!("Connected to Redis at {} (version {})", endpoint, version);
        Ok((conn, version))
    }

    async fn initialize(&self, conn: &mut C::Conn) -> CacheResult<()> {
        if let Some(args) = self.settings.credentials.auth_args() {
            debug!("Authenticating with Redis server");
            conn.auth(&args).await?;
        }
        conn.select(self.settings.database).await?;
        apply_library_options(conn, &self.settings.library_options).await
    }
}

/// Owner of the connection to a Redis Cluster
pub struct ClusterManager<C: ClusterConnector> {
    connector: C,
    settings: ClusterConnectionSettings,
    server_version: Option<ServerVersion>,
    persistent: PersistentConnections<C::Conn>,
    state: ConnectionState<C::Conn>,
    generation: u64,
}

impl<C: ClusterConnector> ClusterManager<C> {
    /// Create a manager for resolved cluster settings
    pub fn new(connector: C, settings: ClusterConnectionSettings) -> CacheResult<Self> {
        validate_cluster_settings(&settings)?;
        Ok(Self {
            connector,
            settings,
            server_version: None,
            persistent: PersistentConnections::new(),
            state: ConnectionState::Uninitialized,
            generation: 0,
        })
    }

    /// Use a shared persistent connection table
    #[must_use]
    pub fn with_persistent_connections(mut self, table: PersistentConnections<C::Conn>) -> Self {
        self.persistent = table;
        self.invalidate();
        self
    }

    /// Use this version instead of asking the cluster
    #[must_use]
    pub fn with_server_version(mut self, version: Option<ServerVersion>) -> Self {
        self.set_server_version(version);
        self
    }

    /// Current cluster settings
    pub const fn settings(&self) -> &ClusterConnectionSettings {
        &self.settings
    }

    /// Whether a connection is cached
    pub const fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Version of the cached connection
    pub fn version(&self) -> Option<&ServerVersion> {
        self.state.version()
    }

    /// Replace the resolved settings
    pub fn set_settings(&mut self, settings: ClusterConnectionSettings) -> CacheResult<()> {
        validate_cluster_settings(&settings)?;
        if self.settings != settings {
            self.settings = settings;
            self.invalidate();
        }
        Ok(())
    }

    /// Use this version instead of asking the cluster, or `None` to detect it
    pub fn set_server_version(&mut self, version: Option<ServerVersion>) {
        if self.server_version != version {
            self.server_version = version;
            self.invalidate();
        }
    }

    /// Drop the cached connection
    pub fn invalidate(&mut self) {
        if self.state.is_connected() {
            debug!("Dropping cached cluster connection after reconfiguration");
        }
        self.state = ConnectionState::Uninitialized;
    }

    /// Return the cached cluster connection, establishing one if needed
    pub async fn acquire(&mut self) -> CacheResult<&mut ConnectionHandle<C::Conn>> {
        if !self.state.is_connected() {
            let (conn, version) = self.establish().await.map_err(|e| {
                warn!("Failed to establish Redis Cluster connection: {}", e);
                e.into_connection_failure()
            })?;
            self.generation += 1;
            self.state = ConnectionState::Connected(ConnectionHandle {
                conn,
                version,
                generation: self.generation,
            });
        }
        self.state.handle()
    }

    /// Pass a command result through, dropping the connection if it broke
    pub async fn check<T>(&mut self, result: CacheResult<T>) -> CacheResult<T> {
        if let Err(err) = &result {
            if err.is_connection_error() {
                warn!("Cluster connection error, reconnecting on next use: {}", err);
                self.invalidate();
                if let Some(key) = self.persistent_key() {
                    self.persistent.remove(&key).await;
                }
            }
        }
        result
    }

    /// Open an authenticated direct connection to one cluster node
    pub async fn node_connection(
        &self,
        node: &NodeAddress,
    ) -> CacheResult<<C::Node as Connector>::Conn> {
        let mut endpoint = ServerEndpoint::tcp(node.host.clone(), node.port)
            .with_connect_timeout(self.settings.timeout);
        endpoint.read_timeout = self.settings.read_timeout;

        let mut conn = self
            .connector
            .node_connector()
            .connect(&endpoint, self.settings.tls.as_ref())
            .await?;
        if let Some(args) = self.settings.credentials.auth_args() {
            conn.auth(&args).await?;
        }
        Ok(conn)
    }

    fn persistent_key(&self) -> Option<String> {
        self.settings.persistent.then(|| {
            let seeds = self
                .settings
                .seeds
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",");
            format!(
                "{seeds}#{:016x}",
                session_fingerprint(
                    &self.settings.credentials,
                    self.settings.tls.as_ref(),
                    &self.settings.library_options,
                )
            )
        })
    }

    async fn establish(&self) -> CacheResult<(C::Conn, ServerVersion)> {
        let persistent_key = self.persistent_key();
        if let Some(key) = &persistent_key {
            if let Some(mut conn) = self.persistent.get(key).await {
                debug!("Reusing persistent cluster connection");
                return match self.detect(&mut conn).await {
                    Ok(version) => Ok((conn, version)),
                    Err(err) => {
                        self.persistent.remove(key).await;
                        Err(err)
                    }
                };
            }
        }

        let mut conn = self.connector.connect(&self.settings).await?;
        let version = self.detect(&mut conn).await?;
        if let Some(key) = persistent_key {
            self.persistent.insert(key, conn.clone()).await;
        }
        info!(
            "Connected to Redis Cluster via {} seed nodes (version {})",
            self.settings.seeds.len(),
            version
        );
        Ok((conn, version))
    }

    async fn detect(&self, conn: &mut C::Conn) -> CacheResult<ServerVersion> {
        apply_library_options(conn, &self.settings.library_options).await?;
        detect_version(conn, self.server_version.as_ref()).await
    }
}

/// Hash of the session state a connection carries besides its database
fn session_fingerprint(
    credentials: &Credentials,
    tls: Option<&TlsConfig>,
    options: &LibraryOptions,
) -> u64 {
    let mut hasher = DefaultHasher::new();
    credentials.username.hash(&mut hasher);
    credentials.password.hash(&mut hasher);
    tls.hash(&mut hasher);
    format!("{options:?}").hash(&mut hasher);
    hasher.finish()
}

fn validate_cluster_settings(settings: &ClusterConnectionSettings) -> CacheResult<()> {
    if settings.seeds.is_empty() {
        return Err(CacheError::Config(
            "at least one seed node is required".to_string(),
        ));
    }
    settings.credentials.validate()?;
    if let Some(tls) = &settings.tls {
        tls.validate()?;
    }
    Ok(())
}

async fn apply_library_options<T: RedisCommands>(
    conn: &mut T,
    options: &LibraryOptions,
) -> CacheResult<()> {
    for (id, value) in options.iter() {
        conn.set_option(id, value).await?;
    }
    Ok(())
}

/// Configured version, or the one reported by `INFO`
///
/// A missing or unparsable version degrades to the unknown sentinel; only a
/// broken connection fails.
async fn detect_version<T: RedisCommands>(
    conn: &mut T,
    configured: Option<&ServerVersion>,
) -> CacheResult<ServerVersion> {
    if let Some(version) = configured {
        return Ok(version.clone());
    }
    match conn.info(Some("server")).await {
        Ok(info) => Ok(ServerVersion::from_info(&info).unwrap_or_else(|| {
            warn!(
                "Server did not report a usable redis_version, assuming {}",
                ServerVersion::UNKNOWN
            );
            ServerVersion::unknown()
        })),
        Err(err) if err.is_connection_error() => Err(err),
        Err(err) => {
            warn!("INFO failed ({}), assuming {}", err, ServerVersion::UNKNOWN);
            Ok(ServerVersion::unknown())
        }
    }
}
