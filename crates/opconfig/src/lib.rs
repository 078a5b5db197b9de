//! Startup configuration resolved from a secret store
//!
//! The configuration document is a Tera template held in 1Password (or in a
//! local override file during development). Rendering substitutes
//! environment variables and looks up `op://` secret references; resolved
//! secrets are cached on disk, encrypted, for a configurable time.
//!
//! ```no_run
//! # async fn run() -> opconfig::Result<()> {
//! let config = opconfig::load().await?;
//! let host = config.get_str("database.host");
//! # Ok(())
//! # }
//! ```

pub mod loader;
pub mod memo;
pub mod options;
pub mod source;

pub use loader::{default_store_factory, ConfigLoader};
pub use memo::ConfigMemo;
pub use opconfig_core::{Error, ResolvedConfig, Result, Settings, VariableBindings};
pub use options::LoadOptions;
pub use source::{RawDocument, SourceSelector};

use std::sync::{Mutex, PoisonError};

/// The process-wide loader, built from the environment on first use.
/// Construction failures are not remembered.
fn default_loader() -> Result<ConfigLoader> {
    static LOADER: Mutex<Option<ConfigLoader>> = Mutex::new(None);

    let mut slot = LOADER.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(loader) = slot.as_ref() {
        return Ok(loader.clone());
    }

    let loader = ConfigLoader::from_env(LoadOptions::default())?;
    *slot = Some(loader.clone());
    Ok(loader)
}

/// Load the configuration with default options
pub async fn load() -> Result<ResolvedConfig> {
    load_with(VariableBindings::new()).await
}

/// Load the configuration with extra variable bindings
pub async fn load_with(vars: VariableBindings) -> Result<ResolvedConfig> {
    if let Some(config) = ConfigMemo::global().get() {
        return Ok(config);
    }
    default_loader()?.load_with(vars).await
}

/// Blocking variant of [`load`]
pub fn load_blocking() -> Result<ResolvedConfig> {
    load_blocking_with(VariableBindings::new())
}

/// Blocking variant of [`load_with`]
pub fn load_blocking_with(vars: VariableBindings) -> Result<ResolvedConfig> {
    if let Some(config) = ConfigMemo::global().get() {
        return Ok(config);
    }
    default_loader()?.load_blocking_with(vars)
}

/// The configuration published by an earlier load
pub fn read_already_loaded() -> Result<ResolvedConfig> {
    ConfigMemo::global().get().ok_or(Error::NotLoadedYet)
}
