//! Error types for opconfig

use std::time::Duration;
use thiserror::Error;

/// Result type alias using opconfig's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while resolving configuration.
///
/// Errors are `Clone` because one in-flight load is shared by every caller
/// waiting on it. Foreign errors are therefore stored as rendered messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Cache initialization vector not configured
    #[error(
        "OP_CACHE_IV is not set. Set it to a 16-byte hex value, for example: OP_CACHE_IV={suggestion}"
    )]
    CacheIvMissing { suggestion: String },

    /// Cache initialization vector present but unusable
    #[error("OP_CACHE_IV is invalid ({reason}). A freshly generated value: OP_CACHE_IV={suggestion}")]
    InvalidCacheIv { reason: String, suggestion: String },

    /// Service account token not configured
    #[error("OP_SERVICE_ACCOUNT_TOKEN is not set")]
    ServiceTokenMissing,

    /// A setting could not be interpreted
    #[error("Invalid value for {name}: '{value}'")]
    InvalidSetting { name: String, value: String },

    /// No override file and no remote document location
    #[error("OP_CONFIG_PATH is not set and no local override file was found")]
    ConfigPathMissing,

    /// Remote client could not be constructed
    #[error("Failed to initialize secret store client: {0}")]
    ClientInit(String),

    /// Remote lookup failed
    #[error("Failed to fetch secret '{path}': {message}")]
    SecretFetch { path: String, message: String },

    /// Cache file exists but cannot be used
    #[error("Cache is corrupt: {0}")]
    CacheCorrupt(String),

    /// Cache file I/O failure
    #[error("Cache file error at {path}: {message}")]
    CacheIo { path: String, message: String },

    /// Encryption failure outside of decrypting a cache
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Template rendering error
    #[error("Template error: {0}")]
    Template(String),

    /// Rendered document is not valid TOML
    #[error("Configuration parse error: {0}")]
    Parse(String),

    /// Load did not settle in time
    #[error("Configuration load timed out after {after:?}")]
    LoadTimeout { after: Duration },

    /// Read of the resolved configuration before any successful load
    #[error("Configuration has not been loaded yet")]
    NotLoadedYet,

    /// Async runtime or worker thread failure
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl Error {
    /// Create a secret fetch error
    pub fn secret_fetch(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SecretFetch {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a cache corruption error
    pub fn cache_corrupt(message: impl Into<String>) -> Self {
        Self::CacheCorrupt(message.into())
    }

    /// Create a cache I/O error
    pub fn cache_io(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CacheIo {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a client initialization error
    pub fn client_init(message: impl Into<String>) -> Self {
        Self::ClientInit(message.into())
    }

    /// Create a template error
    pub fn template(message: impl Into<String>) -> Self {
        Self::Template(message.into())
    }

    /// Create an invalid setting error
    pub fn invalid_setting(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidSetting {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Fatal configuration problems. Retrying cannot help; the environment must change.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::CacheIvMissing { .. }
                | Self::InvalidCacheIv { .. }
                | Self::ServiceTokenMissing
                | Self::InvalidSetting { .. }
                | Self::ConfigPathMissing
                | Self::ClientInit(_)
        )
    }

    /// Cache problems that the pipeline treats as a cache miss.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::CacheCorrupt(_) | Self::CacheIo { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors_are_fatal() {
        assert!(Error::ServiceTokenMissing.is_configuration_error());
        assert!(Error::ConfigPathMissing.is_configuration_error());
        assert!(Error::client_init("no version").is_configuration_error());
        assert!(!Error::secret_fetch("op://v/i/f", "denied").is_configuration_error());
    }

    #[test]
    fn test_cache_errors_are_recoverable() {
        assert!(Error::cache_corrupt("bad padding").is_recoverable());
        assert!(Error::cache_io("config.cache", "denied").is_recoverable());
        assert!(!Error::template("unexpected }}").is_recoverable());
        assert!(!Error::LoadTimeout {
            after: Duration::from_secs(30)
        }
        .is_recoverable());
    }

    #[test]
    fn test_missing_iv_message_carries_suggestion() {
        let err = Error::CacheIvMissing {
            suggestion: "00112233445566778899aabbccddeeff".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("OP_CACHE_IV=00112233445566778899aabbccddeeff"));
    }

    #[test]
    fn test_secret_fetch_message_names_path() {
        let err = Error::secret_fetch("op://vault/item/field", "not signed in");
        assert_eq!(
            err.to_string(),
            "Failed to fetch secret 'op://vault/item/field': not signed in"
        );
    }
}
