//! Remote secret store abstraction

pub mod op_cli;

use async_trait::async_trait;
use opconfig_core::Result;
use std::sync::Arc;

/// A remote store that answers secret references
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Read the value behind a secret reference
    async fn read(&self, path: &str) -> Result<String>;

    /// Store name for log messages
    fn name(&self) -> &'static str;
}

/// Builds the store client. Called at most once per resolver, on first need.
pub type StoreFactory = Arc<dyn Fn() -> Result<Arc<dyn SecretStore>> + Send + Sync>;

pub use op_cli::{IntegrationIdentity, OpCliStore};
