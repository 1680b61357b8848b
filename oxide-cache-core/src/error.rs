//! Error types for cache storage operations

use thiserror::Error;

/// Result type for cache storage operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Error taxonomy shared by every layer of the adapter
#[derive(Error, Debug)]
pub enum CacheError {
    /// Invalid or contradictory configuration, raised at construction time
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A call argument was rejected before reaching the server
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Could not establish, authenticate or initialize a connection
    #[error("Connection failed: {0}")]
    Connection(String),

    /// A single Redis command failed
    #[error("Command failed: {0}")]
    Command(String),

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,

    /// The detected server version or value encoding does not provide the capability
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Value encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    /// Check if this error means the underlying connection is no longer usable
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout)
    }

    /// Check if this error was raised at call time by the server round trip
    ///
    /// Connection failures, command failures and timeouts form the runtime
    /// error kind; configuration and capability errors do not.
    #[must_use]
    pub const fn is_runtime(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Command(_) | Self::Timeout
        )
    }

    /// Wrap any error raised while establishing a connection
    ///
    /// The lower-level diagnostic is kept in the message. Connection
    /// failures and settings the driver cannot honour are returned unchanged.
    #[must_use]
    pub fn into_connection_failure(self) -> Self {
        match self {
            Self::Connection(_) | Self::Unsupported(_) => self,
            Self::Timeout => Self::Connection("connection attempt timed out".to_string()),
            other => Self::Connection(other.to_string()),
        }
    }
}
