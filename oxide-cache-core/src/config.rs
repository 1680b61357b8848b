//! Configuration types for Redis storage adapters

use crate::error::{CacheError, CacheResult};
use crate::library_options::{LibraryOptions, OptionValue};
use crate::types::{NodeAddress, ServerVersion};
use crate::value::ValueEncoding;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Default Redis port
pub const DEFAULT_PORT: u16 = 6379;

/// Longest accepted namespace
pub const MAX_NAMESPACE_LENGTH: usize = 128;

/// Default connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Where a server listens
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ServerAddress {
    /// TCP host and port
    Tcp {
        /// Host name or IP address
        host: String,
        /// TCP port
        port: u16,
    },
    /// Unix domain socket
    Unix(PathBuf),
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "{}", NodeAddress::new(host.clone(), *port)),
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// A single server to connect to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerEndpoint {
    /// Socket address
    pub address: ServerAddress,
    /// Timeout for establishing the connection
    pub connect_timeout: Duration,
    /// Per-command read timeout
    pub read_timeout: Option<Duration>,
}

/// Result of parsing a server URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedServer {
    /// Endpoint part
    pub endpoint: ServerEndpoint,
    /// Credentials embedded as `user:pass@`
    pub credentials: Credentials,
    /// Database embedded as the URI path
    pub database: Option<u32>,
    /// Whether the `rediss` scheme was used
    pub tls: bool,
}

impl ServerEndpoint {
    /// TCP endpoint with default timeouts
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::with_address(ServerAddress::Tcp {
            host: host.into(),
            port,
        })
    }

    /// Unix socket endpoint with default timeouts
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Self::with_address(ServerAddress::Unix(path.into()))
    }

    fn with_address(address: ServerAddress) -> Self {
        Self {
            address,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: None,
        }
    }

    /// Set the connect timeout
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the read timeout
    #[must_use]
    pub const fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Parse a server specification
    ///
    /// Accepted forms: `redis://[user[:pass]@]host[:port][/db]`, `rediss://…`,
    /// `unix:///path`, `/path/to.sock`, `host:port` and `host`.
    pub fn parse(input: &str) -> CacheResult<ParsedServer> {
        let input = input.trim();
        if input.is_empty() {
            return Err(CacheError::Config("server must not be empty".to_string()));
        }

        let plain = |endpoint| ParsedServer {
            endpoint,
            credentials: Credentials::default(),
            database: None,
            tls: false,
        };

        if input.starts_with('/') {
            return Ok(plain(Self::unix(input)));
        }
        if let Some(path) = input.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(CacheError::Config(format!("'{input}' has no socket path")));
            }
            return Ok(plain(Self::unix(path)));
        }
        if input.contains("://") {
            return Self::parse_url(input);
        }

        let endpoint = match input.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') || host.ends_with(']') => {
                let node: NodeAddress = format!("{host}:{port}").parse()?;
                Self::tcp(node.host, node.port)
            }
            _ => Self::tcp(input, DEFAULT_PORT),
        };
        Ok(plain(endpoint))
    }

    fn parse_url(input: &str) -> CacheResult<ParsedServer> {
        let url =
            Url::parse(input).map_err(|e| CacheError::Config(format!("invalid URI '{input}': {e}")))?;

        let tls = match url.scheme() {
            "redis" => false,
            "rediss" => true,
            other => {
                return Err(CacheError::Config(format!(
                    "unsupported URI scheme '{other}'"
                )))
            }
        };

        let host = url
            .host_str()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']'))
            .filter(|h| !h.is_empty())
            .ok_or_else(|| CacheError::Config(format!("'{input}' has no host")))?;
        let port = url.port().unwrap_or(DEFAULT_PORT);

        let decode = |part: &str| {
            urlencoding::decode(part)
                .map(|s| s.into_owned())
                .map_err(|e| CacheError::Config(format!("invalid escape in '{input}': {e}")))
        };
        let username = match url.username() {
            "" => None,
            user => Some(decode(user)?),
        };
        let password = url.password().map(decode).transpose()?;

        let database = match url.path().trim_matches('/') {
            "" => None,
            db => Some(
                db.parse::<u32>()
                    .map_err(|e| CacheError::Config(format!("invalid database '{db}': {e}")))?,
            ),
        };

        Ok(ParsedServer {
            endpoint: Self::tcp(host, port),
            credentials: Credentials { username, password },
            database,
            tls,
        })
    }
}

impl fmt::Display for ServerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.address.fmt(f)
    }
}

/// Authentication credentials
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Credentials {
    /// ACL user name (Redis 6+)
    pub username: Option<String>,
    /// Password
    pub password: Option<String>,
}

impl Credentials {
    /// Password-only credentials
    pub fn password(password: impl Into<String>) -> Self {
        Self {
            username: None,
            password: Some(password.into()),
        }
    }

    /// User and password credentials
    pub fn user(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Whether no credentials are configured
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.username.is_none() && self.password.is_none()
    }

    /// Reject a username without a password
    pub fn validate(&self) -> CacheResult<()> {
        if self.username.is_some() && self.password.is_none() {
            return Err(CacheError::Config(
                "a username was configured without a password".to_string(),
            ));
        }
        Ok(())
    }

    /// Arguments for `AUTH`: `[password]` or `[username, password]`
    #[must_use]
    pub fn auth_args(&self) -> Option<Vec<String>> {
        let password = self.password.clone()?;
        Some(match &self.username {
            Some(user) => vec![user.clone(), password],
            None => vec![password],
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Namespace and separator prepended to every logical key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamespaceConfig {
    /// Namespace; empty disables prefixing
    pub namespace: String,
    /// Separator between namespace and key
    pub separator: String,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            separator: ":".to_string(),
        }
    }
}

impl NamespaceConfig {
    /// Namespace with the default separator
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// Set the separator
    #[must_use]
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Enforce the namespace length bound
    pub fn validate(&self) -> CacheResult<()> {
        if self.namespace.chars().count() > MAX_NAMESPACE_LENGTH {
            return Err(CacheError::Config(format!(
                "namespace is longer than {MAX_NAMESPACE_LENGTH} characters"
            )));
        }
        Ok(())
    }
}

/// TLS settings for `rediss` connections
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Verify the server certificate
    pub verify_peer: bool,
    /// CA bundle used to verify the server
    pub ca_file: Option<PathBuf>,
    /// Client certificate
    pub cert_file: Option<PathBuf>,
    /// Client private key
    pub key_file: Option<PathBuf>,
    /// Allowed cipher list
    pub ciphers: Option<String>,
    /// Server name indication override
    pub sni: Option<String>,
    /// Pinned server certificate fingerprint
    pub fingerprint: Option<String>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            verify_peer: true,
            ca_file: None,
            cert_file: None,
            key_file: None,
            ciphers: None,
            sni: None,
            fingerprint: None,
        }
    }
}

impl TlsConfig {
    /// Client certificate and key must be configured together
    pub fn validate(&self) -> CacheResult<()> {
        if self.cert_file.is_some() != self.key_file.is_some() {
            return Err(CacheError::Config(
                "TLS client certificate and key must be configured together".to_string(),
            ));
        }
        Ok(())
    }
}

/// Connection reuse policy
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Persistence {
    /// A new socket for every (re)connect
    #[default]
    Fresh,
    /// Reuse a socket registered under this id
    Persistent {
        /// Persistent connection id
        id: String,
    },
}

impl Persistence {
    /// Persistent connection under the given id
    pub fn persistent(id: impl Into<String>) -> Self {
        Self::Persistent { id: id.into() }
    }
}

/// Everything that identifies a live single-server connection
///
/// Any change forces a reconnect on next use.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConnectionSettings {
    /// Server endpoint
    pub endpoint: Option<ServerEndpoint>,
    /// Credentials
    pub credentials: Credentials,
    /// Database index selected after connecting
    pub database: u32,
    /// Library options applied after connecting
    pub library_options: LibraryOptions,
    /// Connection reuse policy
    pub persistence: Persistence,
    /// TLS settings
    pub tls: Option<TlsConfig>,
}

impl ConnectionSettings {
    /// Validate the whole connection identity
    pub fn validate(&self) -> CacheResult<()> {
        if self.endpoint.is_none() {
            return Err(CacheError::Config("no server configured".to_string()));
        }
        self.credentials.validate()?;
        if let Some(tls) = &self.tls {
            tls.validate()?;
        }
        Ok(())
    }
}

/// Options of a single-server adapter
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterOptions {
    /// Connection identity
    pub connection: ConnectionSettings,
    /// Key namespace
    pub namespace: NamespaceConfig,
    /// Default time-to-live for writes; `None` stores without expiry
    pub ttl: Option<Duration>,
    /// Value encoding requested by the caller
    pub encoding: ValueEncoding,
    /// Server version to use instead of asking the server
    pub server_version: Option<ServerVersion>,
}

impl AdapterOptions {
    /// Options for the given endpoint
    pub fn new(endpoint: ServerEndpoint) -> Self {
        Self {
            connection: ConnectionSettings {
                endpoint: Some(endpoint),
                ..ConnectionSettings::default()
            },
            namespace: NamespaceConfig::default(),
            ttl: None,
            encoding: ValueEncoding::Raw,
            server_version: None,
        }
    }

    /// Options from a server URI, including embedded credentials and database
    pub fn from_uri(uri: &str) -> CacheResult<Self> {
        let parsed = ServerEndpoint::parse(uri)?;
        let mut options = Self::new(parsed.endpoint);
        options.connection.credentials = parsed.credentials;
        options.connection.database = parsed.database.unwrap_or(0);
        if parsed.tls {
            options.connection.tls = Some(TlsConfig::default());
        }
        Ok(options)
    }

    /// Set the credentials
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.connection.credentials = credentials;
        self
    }

    /// Set the database index
    #[must_use]
    pub const fn with_database(mut self, database: u32) -> Self {
        self.connection.database = database;
        self
    }

    /// Set the namespace
    #[must_use]
    pub fn with_namespace(mut self, namespace: NamespaceConfig) -> Self {
        self.namespace = namespace;
        self
    }

    /// Replace all library options
    #[must_use]
    pub fn with_library_options(mut self, options: LibraryOptions) -> Self {
        self.connection.library_options = options;
        self
    }

    /// Set one library option by name
    pub fn with_named_option(
        mut self,
        name: &str,
        value: impl Into<OptionValue>,
    ) -> CacheResult<Self> {
        self.connection.library_options.set_named(name, value)?;
        Ok(self)
    }

    /// Set the connection reuse policy
    #[must_use]
    pub fn with_persistence(mut self, persistence: Persistence) -> Self {
        self.connection.persistence = persistence;
        self
    }

    /// Enable TLS
    #[must_use]
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.connection.tls = Some(tls);
        self
    }

    /// Set the default time-to-live
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Set the value encoding
    #[must_use]
    pub const fn with_encoding(mut self, encoding: ValueEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Skip version detection and use this version
    #[must_use]
    pub fn with_server_version(mut self, version: ServerVersion) -> Self {
        self.server_version = Some(version);
        self
    }

    /// Encoding in effect: JSON when requested or when the library serializer is on
    #[must_use]
    pub fn value_encoding(&self) -> ValueEncoding {
        effective_encoding(self.encoding, &self.connection.library_options)
    }

    /// Validate all settings
    pub fn validate(&self) -> CacheResult<()> {
        self.connection.validate()?;
        self.namespace.validate()
    }
}

/// Encoding in effect for a requested encoding and library options
///
/// JSON wins when requested or when the library serializer is switched on.
#[must_use]
pub fn effective_encoding(encoding: ValueEncoding, options: &LibraryOptions) -> ValueEncoding {
    if encoding.is_serializing() || options.serializer_enabled() {
        ValueEncoding::Json
    } else {
        ValueEncoding::Raw
    }
}

/// Cluster settings registered under a name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamedClusterConfig {
    /// Seed nodes as `host:port`
    pub seeds: Vec<String>,
    /// Connect timeout in seconds
    pub timeout: Option<f64>,
    /// Read timeout in seconds
    pub read_timeout: Option<f64>,
    /// Cluster password
    pub password: Option<String>,
}

/// Named cluster configurations, keyed by name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterRegistry {
    clusters: HashMap<String, NamedClusterConfig>,
}

impl ClusterRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a registry from a JSON object of name to settings
    pub fn from_json(json: &str) -> CacheResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Register a cluster
    pub fn insert(&mut self, name: impl Into<String>, config: NamedClusterConfig) {
        self.clusters.insert(name.into(), config);
    }

    /// Look up a cluster by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&NamedClusterConfig> {
        self.clusters.get(name)
    }
}

/// Connection identity of a cluster after named configuration is resolved
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterConnectionSettings {
    /// Seed nodes
    pub seeds: Vec<NodeAddress>,
    /// Credentials used for every node
    pub credentials: Credentials,
    /// Connect timeout
    pub timeout: Duration,
    /// Per-command read timeout
    pub read_timeout: Option<Duration>,
    /// Whether connections are reused across reconfiguration
    pub persistent: bool,
    /// Library options
    pub library_options: LibraryOptions,
    /// TLS settings
    pub tls: Option<TlsConfig>,
}

/// Options of a cluster adapter
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterOptions {
    /// Explicit seed nodes
    pub seeds: Vec<NodeAddress>,
    /// Name of a registered cluster configuration
    pub name: Option<String>,
    /// Credentials
    pub credentials: Credentials,
    /// Connect timeout
    pub timeout: Duration,
    /// Per-command read timeout
    pub read_timeout: Option<Duration>,
    /// Whether connections are reused across reconfiguration
    pub persistent: bool,
    /// Library options
    pub library_options: LibraryOptions,
    /// TLS settings
    pub tls: Option<TlsConfig>,
    /// Key namespace
    pub namespace: NamespaceConfig,
    /// Default time-to-live for writes
    pub ttl: Option<Duration>,
    /// Value encoding requested by the caller
    pub encoding: ValueEncoding,
    /// Server version to use instead of asking the cluster
    pub server_version: Option<ServerVersion>,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            seeds: Vec::new(),
            name: None,
            credentials: Credentials::default(),
            timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: None,
            persistent: false,
            library_options: LibraryOptions::new(),
            tls: None,
            namespace: NamespaceConfig::default(),
            ttl: None,
            encoding: ValueEncoding::Raw,
            server_version: None,
        }
    }
}

impl ClusterOptions {
    /// Options seeded with explicit nodes
    pub fn with_seeds(seeds: impl IntoIterator<Item = NodeAddress>) -> Self {
        Self {
            seeds: seeds.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Options referring to a registered cluster
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Add a seed node
    #[must_use]
    pub fn seed(mut self, node: NodeAddress) -> Self {
        self.seeds.push(node);
        self
    }

    /// Set the credentials
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Set the connect timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the read timeout
    #[must_use]
    pub const fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Set the persistence flag
    #[must_use]
    pub const fn with_persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    /// Replace all library options
    #[must_use]
    pub fn with_library_options(mut self, options: LibraryOptions) -> Self {
        self.library_options = options;
        self
    }

    /// Enable TLS
    #[must_use]
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Set the namespace
    #[must_use]
    pub fn with_namespace(mut self, namespace: NamespaceConfig) -> Self {
        self.namespace = namespace;
        self
    }

    /// Set the default time-to-live
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Set the value encoding
    #[must_use]
    pub const fn with_encoding(mut self, encoding: ValueEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Skip version detection and use this version
    #[must_use]
    pub fn with_server_version(mut self, version: ServerVersion) -> Self {
        self.server_version = Some(version);
        self
    }

    /// Encoding in effect
    #[must_use]
    pub fn value_encoding(&self) -> ValueEncoding {
        effective_encoding(self.encoding, &self.library_options)
    }

    /// Validate settings that do not depend on the registry
    pub fn validate(&self) -> CacheResult<()> {
        match (&self.name, self.seeds.is_empty()) {
            (Some(_), false) => {
                return Err(CacheError::Config(
                    "configure either a cluster name or seed nodes, not both".to_string(),
                ))
            }
            (None, true) => {
                return Err(CacheError::Config(
                    "a cluster name or at least one seed node is required".to_string(),
                ))
            }
            (Some(name), true) if name.trim().is_empty() => {
                return Err(CacheError::Config("cluster name must not be empty".to_string()))
            }
            _ => {}
        }
        self.credentials.validate()?;
        if let Some(tls) = &self.tls {
            tls.validate()?;
        }
        self.namespace.validate()
    }

    /// Resolve the connection identity, looking up a named cluster if needed
    pub fn resolve(&self, registry: &ClusterRegistry) -> CacheResult<ClusterConnectionSettings> {
        self.validate()?;

        let mut settings = ClusterConnectionSettings {
            seeds: self.seeds.clone(),
            credentials: self.credentials.clone(),
            timeout: self.timeout,
            read_timeout: self.read_timeout,
            persistent: self.persistent,
            library_options: self.library_options.clone(),
            tls: self.tls.clone(),
        };

        if let Some(name) = &self.name {
            let named = registry.get(name).ok_or_else(|| {
                CacheError::Config(format!("no cluster configuration named '{name}'"))
            })?;
            settings.seeds = named
                .seeds
                .iter()
                .map(|seed| seed.parse::<NodeAddress>())
                .collect::<CacheResult<Vec<_>>>()?;
            if settings.seeds.is_empty() {
                return Err(CacheError::Config(format!(
                    "cluster configuration '{name}' has no seed nodes"
                )));
            }
            if let Some(timeout) = named.timeout {
                settings.timeout = seconds(timeout, "timeout")?;
            }
            if let Some(read_timeout) = named.read_timeout {
                settings.read_timeout = Some(seconds(read_timeout, "read_timeout")?);
            }
            if settings.credentials.password.is_none() {
                settings.credentials.password = named.password.clone();
            }
        }

        settings.credentials.validate()?;
        Ok(settings)
    }
}

fn seconds(value: f64, field: &str) -> CacheResult<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| CacheError::Config(format!("invalid {field} '{value}': {e}")))
}

/// Deserializable single-server settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RedisSettings {
    /// Server URI or socket path
    pub server: String,
    /// Database index; overrides one embedded in the URI
    pub database: Option<u32>,
    /// ACL user name
    pub username: Option<String>,
    /// Password
    pub password: Option<String>,
    /// Key namespace
    pub namespace: String,
    /// Namespace separator
    pub namespace_separator: Option<String>,
    /// Persistent connection id
    pub persistent_id: Option<String>,
    /// Library options by name or numeric id
    pub lib_options: BTreeMap<String, OptionValue>,
    /// Default time-to-live in seconds; 0 disables expiry
    pub ttl: u64,
    /// Value encoding
    pub serializer: ValueEncoding,
    /// Connect timeout in seconds
    pub timeout: Option<f64>,
    /// Read timeout in seconds
    pub read_timeout: Option<f64>,
    /// TLS settings
    pub tls: Option<TlsConfig>,
    /// Server version override
    pub server_version: Option<String>,
}

impl RedisSettings {
    /// Convert into validated adapter options
    pub fn into_options(self) -> CacheResult<AdapterOptions> {
        let mut options = AdapterOptions::from_uri(&self.server)?;
        let connection = &mut options.connection;

        if let Some(endpoint) = connection.endpoint.as_mut() {
            if let Some(timeout) = self.timeout {
                endpoint.connect_timeout = seconds(timeout, "timeout")?;
            }
            if let Some(read_timeout) = self.read_timeout {
                endpoint.read_timeout = Some(seconds(read_timeout, "read_timeout")?);
            }
        }
        if self.username.is_some() || self.password.is_some() {
            connection.credentials = Credentials {
                username: self.username,
                password: self.password,
            };
        }
        if let Some(database) = self.database {
            connection.database = database;
        }
        if let Some(id) = self.persistent_id {
            connection.persistence = Persistence::Persistent { id };
        }
        connection.library_options = LibraryOptions::try_from(self.lib_options)?;
        if self.tls.is_some() {
            connection.tls = self.tls;
        }

        options.namespace = NamespaceConfig {
            namespace: self.namespace,
            separator: self
                .namespace_separator
                .unwrap_or_else(|| NamespaceConfig::default().separator),
        };
        options.ttl = (self.ttl > 0).then(|| Duration::from_secs(self.ttl));
        options.encoding = self.serializer;
        options.server_version = self
            .server_version
            .as_deref()
            .map(str::parse::<ServerVersion>)
            .transpose()?;

        options.validate()?;
        Ok(options)
    }
}

/// Deserializable cluster settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    /// Registered cluster name
    pub name: Option<String>,
    /// Seed nodes as `host:port`
    pub seeds: Vec<String>,
    /// ACL user name
    pub username: Option<String>,
    /// Password
    pub password: Option<String>,
    /// Connect timeout in seconds
    pub timeout: Option<f64>,
    /// Read timeout in seconds
    pub read_timeout: Option<f64>,
    /// Persistence flag
    pub persistent: bool,
    /// Key namespace
    pub namespace: String,
    /// Namespace separator
    pub namespace_separator: Option<String>,
    /// Library options by name or numeric id
    pub lib_options: BTreeMap<String, OptionValue>,
    /// Default time-to-live in seconds; 0 disables expiry
    pub ttl: u64,
    /// Value encoding
    pub serializer: ValueEncoding,
    /// TLS settings
    pub tls: Option<TlsConfig>,
    /// Server version override
    pub server_version: Option<String>,
}

impl ClusterSettings {
    /// Convert into validated cluster options
    pub fn into_options(self) -> CacheResult<ClusterOptions> {
        let mut options = ClusterOptions {
            seeds: self
                .seeds
                .iter()
                .map(|seed| seed.parse::<NodeAddress>())
                .collect::<CacheResult<Vec<_>>>()?,
            name: self.name,
            credentials: Credentials {
                username: self.username,
                password: self.password,
            },
            persistent: self.persistent,
            library_options: LibraryOptions::try_from(self.lib_options)?,
            tls: self.tls,
            namespace: NamespaceConfig {
                namespace: self.namespace,
                separator: self
                    .namespace_separator
                    .unwrap_or_else(|| NamespaceConfig::default().separator),
            },
            ttl: (self.ttl > 0).then(|| Duration::from_secs(self.ttl)),
            encoding: self.serializer,
            ..ClusterOptions::default()
        };
        if let Some(timeout) = self.timeout {
            options.timeout = seconds(timeout, "timeout")?;
        }
        if let Some(read_timeout) = self.read_timeout {
            options.read_timeout = Some(seconds(read_timeout, "read_timeout")?);
        }
        options.server_version = self
            .server_version
            .as_deref()
            .map(str::parse::<ServerVersion>)
            .transpose()?;

        options.validate()?;
        Ok(options)
    }
}
