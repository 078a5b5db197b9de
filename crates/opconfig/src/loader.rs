//! Load orchestration
//!
//! A load walks `Idle -> Loading -> Resolved` or `Loading -> Failed`:
//! - Concurrent callers share one in-flight attempt (single-flight)
//! - A slow attempt logs a warning; one that passes the timeout fails with
//!   `LoadTimeout` and its pipeline is left to finish unobserved
//! - The first success is published to the process-wide memo and every
//!   later call returns a copy of it
//! - Failures are not remembered; the next call starts a fresh attempt

use crate::memo::ConfigMemo;
use crate::options::LoadOptions;
use crate::source::SourceSelector;
use futures::future::{BoxFuture, FutureExt, Shared};
use opconfig_core::{
    CryptoBox, Error, ResolvedConfig, Result, Settings, TemplateRenderer, VariableBindings,
};
use opconfig_secrets::{
    CacheFile, IntegrationIdentity, OpCliStore, SecretPathCache, SecretResolver, SecretStore,
    StoreFactory,
};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type SharedAttempt = Shared<BoxFuture<'static, Result<ResolvedConfig>>>;

/// What one pipeline run produced
struct PipelineOutput {
    config: ResolvedConfig,
    /// Secrets to persist; `None` for an override document or when nothing
    /// was fetched remotely
    cache: Option<SecretPathCache>,
}

#[derive(Default)]
struct LoaderState {
    in_flight: Mutex<Option<(u64, SharedAttempt)>>,
    next_attempt: AtomicU64,
    pending_writes: Mutex<Vec<JoinHandle<()>>>,
    pipeline_runs: AtomicUsize,
}

/// Resolves the application configuration.
///
/// Cheap to clone; clones share the in-flight attempt and pending cache
/// writes.
#[derive(Clone)]
pub struct ConfigLoader {
    settings: Arc<Settings>,
    options: Arc<LoadOptions>,
    cache: CacheFile,
    store_factory: StoreFactory,
    memo: Arc<ConfigMemo>,
    state: Arc<LoaderState>,
}

impl ConfigLoader {
    /// Build a loader from the process environment
    pub fn from_env(options: LoadOptions) -> Result<Self> {
        Self::new(Settings::from_env()?, options)
    }

    /// Build a loader that uses the `op` CLI store and the global memo
    pub fn new(settings: Settings, options: LoadOptions) -> Result<Self> {
        let crypto = CryptoBox::with_cost(settings.cache_iv, options.kdf_cost)?;
        let cache = CacheFile::new(
            options.cache_file_path.clone().into_std_path_buf(),
            crypto,
            settings.token.clone(),
            settings.cache_ttl,
        );
        let store_factory = default_store_factory(&settings, &options);

        Ok(Self {
            settings: Arc::new(settings),
            options: Arc::new(options),
            cache,
            store_factory,
            memo: ConfigMemo::global(),
            state: Arc::default(),
        })
    }

    /// Use a different secret store
    pub fn with_store_factory(mut self, factory: StoreFactory) -> Self {
        self.store_factory = factory;
        self
    }

    /// Publish to a memo other than the global one
    pub fn with_memo(mut self, memo: Arc<ConfigMemo>) -> Self {
        self.memo = memo;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn options(&self) -> &LoadOptions {
        &self.options
    }

    pub fn memo(&self) -> &Arc<ConfigMemo> {
        &self.memo
    }

    /// Load the configuration with the environment and configured bindings
    pub async fn load(&self) -> Result<ResolvedConfig> {
        self.load_with(VariableBindings::new()).await
    }

    /// Load the configuration with extra bindings for this call.
    ///
    /// A call that joins an attempt already in flight shares that attempt's
    /// bindings.
    pub async fn load_with(&self, vars: VariableBindings) -> Result<ResolvedConfig> {
        if let Some(config) = self.memo.get() {
            return Ok(config);
        }

        let attempt = self.join_or_start(vars);
        attempt.await
    }

    /// Blocking variant of [`load`](Self::load)
    pub fn load_blocking(&self) -> Result<ResolvedConfig> {
        self.load_blocking_with(VariableBindings::new())
    }

    /// Blocking variant of [`load_with`](Self::load_with).
    ///
    /// Runs the load on a dedicated thread with its own runtime and blocks
    /// until it settles. Usable from synchronous code and from inside a
    /// runtime, where it blocks the calling worker.
    pub fn load_blocking_with(&self, vars: VariableBindings) -> Result<ResolvedConfig> {
        if let Some(config) = self.memo.get() {
            return Ok(config);
        }

        let loader = self.clone();
        let worker = std::thread::Builder::new()
            .name("opconfig-load".to_string())
            .spawn(move || -> Result<ResolvedConfig> {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .map_err(|e| Error::Runtime(format!("failed to build load runtime: {}", e)))?;

                runtime.block_on(async {
                    let result = loader.load_with(vars).await;
                    // The runtime is dropped with this thread
                    loader.flush().await;
                    result
                })
            })
            .map_err(|e| Error::Runtime(format!("failed to spawn load thread: {}", e)))?;

        worker
            .join()
            .map_err(|_| Error::Runtime("configuration load thread panicked".to_string()))?
    }

    /// A copy of the configuration published by an earlier load
    pub fn read_already_loaded(&self) -> Result<ResolvedConfig> {
        self.memo.get().ok_or(Error::NotLoadedYet)
    }

    /// Wait for pending cache writes to settle
    pub async fn flush(&self) {
        let pending = std::mem::take(
            &mut *self
                .state
                .pending_writes
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for handle in pending {
            if let Err(e) = handle.await {
                warn!("Cache write task failed: {}", e);
            }
        }
    }

    /// Delete the on-disk cache file
    pub async fn clear_cache(&self) -> Result<bool> {
        self.cache.clear().await
    }

    /// Number of pipeline executions started by this loader and its clones
    pub fn pipeline_runs(&self) -> usize {
        self.state.pipeline_runs.load(Ordering::SeqCst)
    }

    fn join_or_start(&self, vars: VariableBindings) -> SharedAttempt {
        let mut slot = self
            .state
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some((_, attempt)) = slot.as_ref() {
            debug!("Joining configuration load already in flight");
            return attempt.clone();
        }

        let id = self.state.next_attempt.fetch_add(1, Ordering::SeqCst);
        let attempt = self.clone().attempt(vars, id).boxed().shared();
        *slot = Some((id, attempt.clone()));
        attempt
    }

    async fn attempt(self, vars: VariableBindings, id: u64) -> Result<ResolvedConfig> {
        let started = Instant::now();
        let mut pipeline = tokio::spawn(self.clone().run_pipeline(vars));

        let slow_warning = tokio::time::sleep(self.options.slow_warning);
        let hard_timeout = tokio::time::sleep(self.options.timeout);
        tokio::pin!(slow_warning, hard_timeout);
        let mut warned = false;

        let outcome = loop {
            tokio::select! {
                joined = &mut pipeline => {
                    break joined.unwrap_or_else(|e| {
                        Err(Error::Runtime(format!("configuration load task failed: {}", e)))
                    });
                }
                _ = &mut slow_warning, if !warned => {
                    warned = true;
                    warn!(
                        "Configuration load still pending after {:?}",
                        self.options.slow_warning
                    );
                }
                _ = &mut hard_timeout => {
                    warn!(
                        "Configuration load timed out after {:?}, abandoning attempt",
                        self.options.timeout
                    );
                    break Err(Error::LoadTimeout { after: self.options.timeout });
                }
            }
        };

        let result = outcome.map(|output| {
            if let Some(cache) = output.cache {
                self.persist(cache);
            }
            let config = self.memo.publish(output.config);
            info!("Configuration loaded in {:?}", started.elapsed());
            config
        });

        self.finish_attempt(id);
        result
    }

    async fn run_pipeline(self, vars: VariableBindings) -> Result<PipelineOutput> {
        self.state.pipeline_runs.fetch_add(1, Ordering::SeqCst);
        debug!("Starting configuration pipeline");

        let bindings = VariableBindings::from_process_env()
            .with_overrides(self.options.extra_bindings.clone())
            .with_overrides(vars);

        let resolver = SecretResolver::new(self.store_factory.clone());
        let selector = SourceSelector::new(
            self.options.override_file_path.clone(),
            self.settings.config_path.clone(),
        );

        let raw = selector.obtain_raw_document(&self.cache, &resolver).await?;
        let rendered = TemplateRenderer::new()
            .render(raw.content(), &bindings, &resolver)
            .await?;

        if self.settings.debug_dump {
            info!("Rendered configuration:\n{}", rendered);
        }

        let config = ResolvedConfig::parse(&rendered)?;
        debug!(
            remote_fetches = resolver.remote_fetches(),
            "Configuration pipeline finished"
        );

        // Only values read from the store in this run are written, so the
        // file's age is the age of its oldest value. A load answered from the
        // cache writes nothing and leaves the original expiry in place.
        let cache = if raw.is_override() {
            None
        } else {
            let fetched = resolver.fetched().await;
            if fetched.is_empty() {
                debug!("Every secret came from the cache, not rewriting it");
                None
            } else {
                Some(fetched)
            }
        };

        Ok(PipelineOutput { config, cache })
    }

    fn persist(&self, cache: SecretPathCache) {
        if let Some(handle) = self.cache.persist(cache) {
            let mut pending = self
                .state
                .pending_writes
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            pending.retain(|handle| !handle.is_finished());
            pending.push(handle);
        }
    }

    fn finish_attempt(&self, id: u64) {
        let finished = {
            let mut slot = self
                .state
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some((current, _)) if *current == id => slot.take(),
                _ => None,
            }
        };
        drop(finished);
    }
}

impl fmt::Debug for ConfigLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigLoader")
            .field("settings", &self.settings)
            .field("options", &self.options)
            .field("cache", &self.cache)
            .field("loaded", &self.memo.is_loaded())
            .finish_non_exhaustive()
    }
}

/// Store factory for the `op` CLI, identified by the configured integration
/// or the project descriptor
pub fn default_store_factory(settings: &Settings, options: &LoadOptions) -> StoreFactory {
    let token = settings.token.clone();
    let integration = options.integration.clone();
    let descriptor = options.descriptor_path.clone();

    Arc::new(move || -> Result<Arc<dyn SecretStore>> {
        let identity = match &integration {
            Some(identity) => identity.clone(),
            None => IntegrationIdentity::from_descriptor(descriptor.as_std_path())?,
        };
        Ok(Arc::new(OpCliStore::new(token.clone(), identity)))
    })
}
