//! Load options

use camino::Utf8PathBuf;
use opconfig_core::crypto::DEFAULT_KDF_COST;
use opconfig_secrets::IntegrationIdentity;
use std::collections::BTreeMap;
use std::time::Duration;

pub const DEFAULT_OVERRIDE_FILE: &str = "./config.toml";
pub const DEFAULT_CACHE_FILE: &str = "./config.cache";
pub const DEFAULT_DESCRIPTOR_FILE: &str = "./Cargo.toml";

/// Elapsed time after which a pending load logs a warning
pub const DEFAULT_SLOW_WARNING: Duration = Duration::from_secs(10);

/// Elapsed time after which a pending load fails
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Options recognized by the loader
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Local document that replaces remote resolution when present
    pub override_file_path: Utf8PathBuf,
    /// Encrypted secret path cache
    pub cache_file_path: Utf8PathBuf,
    /// Project descriptor supplying the client's name and version
    pub descriptor_path: Utf8PathBuf,
    /// Explicit client identity; skips reading the descriptor
    pub integration: Option<IntegrationIdentity>,
    /// Variables applied over the process environment
    pub extra_bindings: BTreeMap<String, String>,
    pub slow_warning: Duration,
    pub timeout: Duration,
    /// scrypt cost (log2 N) for the cache key
    pub kdf_cost: u8,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            override_file_path: Utf8PathBuf::from(DEFAULT_OVERRIDE_FILE),
            cache_file_path: Utf8PathBuf::from(DEFAULT_CACHE_FILE),
            descriptor_path: Utf8PathBuf::from(DEFAULT_DESCRIPTOR_FILE),
            integration: None,
            extra_bindings: BTreeMap::new(),
            slow_warning: DEFAULT_SLOW_WARNING,
            timeout: DEFAULT_TIMEOUT,
            kdf_cost: DEFAULT_KDF_COST,
        }
    }
}

impl LoadOptions {
    pub fn with_override_file(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.override_file_path = path.into();
        self
    }

    pub fn with_cache_file(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.cache_file_path = path.into();
        self
    }

    pub fn with_descriptor(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.descriptor_path = path.into();
        self
    }

    pub fn with_integration(mut self, identity: IntegrationIdentity) -> Self {
        self.integration = Some(identity);
        self
    }

    pub fn with_binding(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_bindings.insert(key.into(), value.into());
        self
    }

    pub fn with_timeouts(mut self, slow_warning: Duration, timeout: Duration) -> Self {
        self.slow_warning = slow_warning;
        self.timeout = timeout;
        self
    }

    pub fn with_kdf_cost(mut self, log_n: u8) -> Self {
        self.kdf_cost = log_n;
        self
    }
}
