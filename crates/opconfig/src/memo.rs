//! Process-wide memo of the resolved configuration
//!
//! Empty at process start, written at most once by the first successful
//! load, read-only afterwards. There is no expiry; only the on-disk cache
//! expires.

use opconfig_core::ResolvedConfig;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use tracing::debug;

static GLOBAL: OnceLock<Arc<ConfigMemo>> = OnceLock::new();

/// Holder of the published configuration
#[derive(Debug, Default)]
pub struct ConfigMemo {
    value: RwLock<Option<ResolvedConfig>>,
}

impl ConfigMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// The memo shared by every loader in this process
    pub fn global() -> Arc<ConfigMemo> {
        GLOBAL.get_or_init(|| Arc::new(ConfigMemo::new())).clone()
    }

    /// A copy of the published configuration, if any
    pub fn get(&self) -> Option<ResolvedConfig> {
        self.value
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.value
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Publish a configuration. The first publication wins; a copy of the
    /// memoized value is returned either way.
    pub fn publish(&self, config: ResolvedConfig) -> ResolvedConfig {
        let mut value = self.value.write().unwrap_or_else(PoisonError::into_inner);
        match value.as_ref() {
            Some(existing) => {
                debug!("Configuration already published, keeping the first value");
                existing.clone()
            }
            None => {
                *value = Some(config.clone());
                config
            }
        }
    }

    /// Forget the published value. For test harnesses only.
    pub fn reset(&self) {
        *self.value.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
