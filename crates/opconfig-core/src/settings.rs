//! Environment-sourced settings
//!
//! Everything the loader needs from the process environment is read once,
//! up front, so configuration mistakes fail before any I/O happens.

use crate::crypto::{self, IV_SIZE};
use crate::error::{Error, Result};
use crate::secure::SecureString;
use std::time::Duration;

/// Service account token for the secret store and the cache key
pub const ENV_SERVICE_TOKEN: &str = "OP_SERVICE_ACCOUNT_TOKEN";

/// Secret reference of the templated configuration document
pub const ENV_CONFIG_PATH: &str = "OP_CONFIG_PATH";

/// Cache time-to-live in seconds
pub const ENV_CACHE_TTL: &str = "OP_CACHE_TTL";

/// Hex-encoded cache initialization vector
pub const ENV_CACHE_IV: &str = "OP_CACHE_IV";

/// Log the rendered document before parsing
pub const ENV_DEBUG_DUMP: &str = "OP_CONFIG_DEBUG";

/// Settings read from the environment
#[derive(Debug, Clone)]
pub struct Settings {
    /// Service account token
    pub token: SecureString,
    /// Secret reference of the raw document, required unless an override file exists
    pub config_path: Option<String>,
    /// On-disk cache lifetime; `None` disables caching
    pub cache_ttl: Option<Duration>,
    /// Fixed IV for cache encryption
    pub cache_iv: [u8; IV_SIZE],
    /// Log the rendered document
    pub debug_dump: bool,
}

impl Settings {
    /// Read settings from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through an arbitrary lookup function.
    ///
    /// Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let cache_iv = match get(ENV_CACHE_IV) {
            Some(value) => crypto::parse_iv(&value).map_err(|reason| Error::InvalidCacheIv {
                reason,
                suggestion: crypto::generate_iv_hex(),
            })?,
            None => {
                return Err(Error::CacheIvMissing {
                    suggestion: crypto::generate_iv_hex(),
                })
            }
        };

        let token = get(ENV_SERVICE_TOKEN)
            .map(SecureString::from)
            .ok_or(Error::ServiceTokenMissing)?;

        let cache_ttl = match get(ENV_CACHE_TTL) {
            Some(value) => parse_ttl(&value)?,
            None => None,
        };

        Ok(Self {
            token,
            config_path: get(ENV_CONFIG_PATH).map(|v| v.trim().to_string()),
            cache_ttl,
            cache_iv,
            debug_dump: get(ENV_DEBUG_DUMP).is_some_and(|v| is_truthy(&v)),
        })
    }
}

fn parse_ttl(value: &str) -> Result<Option<Duration>> {
    let seconds: u64 = value
        .trim()
        .parse()
        .map_err(|_| Error::invalid_setting(ENV_CACHE_TTL, value))?;
    Ok((seconds > 0).then(|| Duration::from_secs(seconds)))
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
