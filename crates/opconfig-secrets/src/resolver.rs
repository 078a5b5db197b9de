//! Memoizing secret resolver
//!
//! Every secret reference is fetched from the remote store at most once per
//! resolver. The store client itself is built lazily, so a load that is fully
//! answered from the on-disk cache never constructs it.

use crate::store::{SecretStore, StoreFactory};
use crate::types::SecretPathCache;
use async_trait::async_trait;
use opconfig_core::{Result, SecretLookup};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

#[derive(Default)]
struct Resolved {
    /// Seeded and fetched values
    all: SecretPathCache,
    /// Values read from the remote store by this resolver
    fetched: SecretPathCache,
}

/// Resolves secret references through a lazily built store client
pub struct SecretResolver {
    factory: StoreFactory,
    client: OnceCell<Arc<dyn SecretStore>>,
    /// Held across the remote read, so one path is never fetched twice
    resolved: Mutex<Resolved>,
    remote_fetches: AtomicUsize,
}

impl SecretResolver {
    pub fn new(factory: StoreFactory) -> Self {
        Self {
            factory,
            client: OnceCell::new(),
            resolved: Mutex::new(Resolved::default()),
            remote_fetches: AtomicUsize::new(0),
        }
    }

    /// Create a resolver around an already built store
    pub fn with_store(store: Arc<dyn SecretStore>) -> Self {
        Self::new(Arc::new(move || -> Result<Arc<dyn SecretStore>> {
            Ok(store.clone())
        }))
    }

    /// Merge previously cached values in
    pub async fn seed(&self, cached: SecretPathCache) {
        let mut resolved = self.resolved.lock().await;
        debug!("Seeding resolver with {} cached secret(s)", cached.len());
        resolved.all.merge(cached);
    }

    /// Resolve a secret reference, fetching it on first use
    pub async fn resolve(&self, path: &str) -> Result<String> {
        let mut resolved = self.resolved.lock().await;
        if let Some(value) = resolved.all.get(path) {
            debug!("Secret cache hit: {}", path);
            return Ok(value.to_string());
        }

        let client = self.client().await?;
        debug!("Fetching secret from {}: {}", client.name(), path);
        self.remote_fetches.fetch_add(1, Ordering::SeqCst);
        let value = client.read(path).await?;

        resolved.all.insert(path, value.clone());
        resolved.fetched.insert(path, value.clone());
        Ok(value)
    }

    /// Everything resolved or seeded so far
    pub async fn snapshot(&self) -> SecretPathCache {
        self.resolved.lock().await.all.clone()
    }

    /// Only the values this resolver read from the remote store.
    ///
    /// Seeded values are left out: writing them back would restart their
    /// time-to-live without re-reading them.
    pub async fn fetched(&self) -> SecretPathCache {
        self.resolved.lock().await.fetched.clone()
    }

    /// Number of reads issued to the remote store
    pub fn remote_fetches(&self) -> usize {
        self.remote_fetches.load(Ordering::SeqCst)
    }

    /// Whether the store client has been built
    pub fn is_connected(&self) -> bool {
        self.client.initialized()
    }

    async fn client(&self) -> Result<&Arc<dyn SecretStore>> {
        self.client
            .get_or_try_init(|| async { (self.factory)() })
            .await
    }
}

#[async_trait]
impl SecretLookup for SecretResolver {
    async fn lookup(&self, path: &str) -> Result<String> {
        self.resolve(path).await
    }
}

impl fmt::Debug for SecretResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretResolver")
            .field("connected", &self.is_connected())
            .field("remote_fetches", &self.remote_fetches())
            .finish_non_exhaustive()
    }
}
