//! Logical to physical key mapping
//!
//! Every key written through an adapter is prefixed with the configured
//! namespace and separator, preceded by the library-side key prefix when one
//! is set. The composed prefix is computed once and reused until either part
//! changes.

use crate::config::NamespaceConfig;
use crate::error::{CacheError, CacheResult};
use std::sync::OnceLock;

/// Compose a physical key
///
/// An empty namespace leaves the key untouched.
#[must_use]
pub fn physical_key(namespace: &str, separator: &str, key: &str) -> String {
    if namespace.is_empty() {
        key.to_string()
    } else {
        let mut physical = String::with_capacity(namespace.len() + separator.len() + key.len());
        physical.push_str(namespace);
        physical.push_str(separator);
        physical.push_str(key);
        physical
    }
}

/// Escape glob metacharacters for use in a `KEYS` pattern
#[must_use]
pub fn escape_glob(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Key mapper with a cached prefix
#[derive(Debug, Default)]
pub struct Namespacer {
    config: NamespaceConfig,
    library_prefix: String,
    prefix: OnceLock<String>,
}

impl Namespacer {
    /// Create a namespacer for the given configuration
    #[must_use]
    pub fn new(config: NamespaceConfig) -> Self {
        Self {
            config,
            library_prefix: String::new(),
            prefix: OnceLock::new(),
        }
    }

    /// Current configuration
    #[must_use]
    pub const fn config(&self) -> &NamespaceConfig {
        &self.config
    }

    /// Replace the configuration and drop the cached prefix
    pub fn set_config(&mut self, config: NamespaceConfig) -> CacheResult<()> {
        config.validate()?;
        self.config = config;
        self.prefix = OnceLock::new();
        Ok(())
    }

    /// Library-side key prefix placed before the namespace
    #[must_use]
    pub fn library_prefix(&self) -> &str {
        &self.library_prefix
    }

    /// Replace the library-side key prefix
    pub fn set_library_prefix(&mut self, prefix: impl Into<String>) {
        let prefix = prefix.into();
        if self.library_prefix != prefix {
            self.library_prefix = prefix;
            self.prefix = OnceLock::new();
        }
    }

    /// `library prefix + namespace + separator`; the namespace part is left
    /// out when no namespace is set
    pub fn prefix(&self) -> &str {
        self.prefix.get_or_init(|| {
            if self.config.namespace.is_empty() {
                self.library_prefix.clone()
            } else {
                format!(
                    "{}{}{}",
                    self.library_prefix, self.config.namespace, self.config.separator
                )
            }
        })
    }

    /// Physical key for a logical key
    #[must_use]
    pub fn key(&self, key: &str) -> String {
        let prefix = self.prefix();
        let mut physical = String::with_capacity(prefix.len() + key.len());
        physical.push_str(prefix);
        physical.push_str(key);
        physical
    }

    /// Strip the prefix from a physical key, if it carries it
    #[must_use]
    pub fn logical<'a>(&self, physical: &'a str) -> Option<&'a str> {
        physical.strip_prefix(self.prefix())
    }

    /// `KEYS` pattern matching everything stored under `namespace`
    ///
    /// The pattern uses the configured separator, not the configured namespace.
    pub fn namespace_pattern(&self, namespace: &str) -> CacheResult<String> {
        if namespace.is_empty() {
            return Err(CacheError::InvalidArgument(
                "namespace must not be empty".to_string(),
            ));
        }
        Ok(format!(
            "{}{}{}*",
            escape_glob(&self.library_prefix),
            escape_glob(namespace),
            escape_glob(&self.config.separator)
        ))
    }

    /// `KEYS` pattern matching logical keys starting with `prefix`
    pub fn prefix_pattern(&self, prefix: &str) -> CacheResult<String> {
        if prefix.is_empty() {
            return Err(CacheError::InvalidArgument(
                "prefix must not be empty".to_string(),
            ));
        }
        Ok(format!(
            "{}{}*",
            escape_glob(self.prefix()),
            escape_glob(prefix)
        ))
    }
}

impl Clone for Namespacer {
    fn clone(&self) -> Self {
        let mut namespacer = Self::new(self.config.clone());
        namespacer.library_prefix = self.library_prefix.clone();
        namespacer
    }
}
