//! Common test helpers for opconfig integration tests
//!
//! Provides:
//! - A recording mock `SecretStore` with configurable latency and failures
//! - A temp-dir `TestContext` that builds isolated loaders
//! - Settings and document fixtures
//! - A `MakeWriter` that captures log output

use async_trait::async_trait;
use camino::Utf8PathBuf;
use opconfig::{ConfigLoader, ConfigMemo, LoadOptions, Settings};
use opconfig_core::{Error, Result};
use opconfig_secrets::{IntegrationIdentity, SecretStore, StoreFactory};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::io;
use std::time::Duration;
use tempfile::TempDir;
use tracing_subscriber::fmt::MakeWriter;

pub const TEST_IV: &str = "000102030405060708090a0b0c0d0e0f";
pub const TEST_TOKEN: &str = "ops_test_token";
pub const DOC_PATH: &str = "op://vault/app/config";

/// scrypt cost used in tests; production uses 14
pub const TEST_KDF_COST: u8 = 4;

// ─── Mock Secret Store ──────────────────────────────────────────────────────

/// Secret store double that records every read
#[derive(Default)]
#[allow(dead_code)]
pub struct MockStore {
    values: Mutex<HashMap<String, String>>,
    reads: Mutex<Vec<String>>,
    delay: Mutex<Duration>,
    hang: AtomicBool,
    fail_repeated_reads: AtomicBool,
}

#[allow(dead_code)]
impl MockStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_secret(&self, path: &str, value: &str) {
        self.values
            .lock()
            .unwrap()
            .insert(path.to_string(), value.to_string());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Never answer reads that start while set
    pub fn set_hang(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }

    /// Fail any read of a path that was read before
    pub fn fail_repeated_reads(&self) {
        self.fail_repeated_reads.store(true, Ordering::SeqCst);
    }

    pub fn reads(&self) -> Vec<String> {
        self.reads.lock().unwrap().clone()
    }

    pub fn reads_of(&self, path: &str) -> usize {
        self.reads().iter().filter(|p| *p == path).count()
    }

    /// Assert the store was never contacted.
    pub fn assert_not_contacted(&self) {
        let reads = self.reads();
        assert!(reads.is_empty(), "store was read: {:?}", reads);
    }
}

#[async_trait]
impl SecretStore for MockStore {
    async fn read(&self, path: &str) -> Result<String> {
        let repeated = {
            let mut reads = self.reads.lock().unwrap();
            let repeated = reads.iter().any(|p| p == path);
            reads.push(path.to_string());
            repeated
        };

        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if repeated && self.fail_repeated_reads.load(Ordering::SeqCst) {
            return Err(Error::secret_fetch(path, "unexpected second read"));
        }

        self.values
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| Error::secret_fetch(path, "item not found"))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

// ─── Test Context ───────────────────────────────────────────────────────────

/// Temp directory, mock store and private memo for one test
#[allow(dead_code)]
pub struct TestContext {
    pub dir: TempDir,
    pub store: Arc<MockStore>,
    pub memo: Arc<ConfigMemo>,
    factory_calls: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl TestContext {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
            store: MockStore::new(),
            memo: Arc::new(ConfigMemo::new()),
            factory_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn path(&self, name: &str) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(self.dir.path().join(name)).expect("temp dir is UTF-8")
    }

    pub fn override_path(&self) -> Utf8PathBuf {
        self.path("config.toml")
    }

    pub fn cache_path(&self) -> Utf8PathBuf {
        self.path("config.cache")
    }

    pub fn write_override(&self, content: &str) {
        std::fs::write(self.override_path(), content).expect("Failed to write override file");
    }

    pub fn write_cache(&self, content: &str) {
        std::fs::write(self.cache_path(), content).expect("Failed to write cache file");
    }

    pub fn cache_exists(&self) -> bool {
        self.cache_path().exists()
    }

    /// Options pointing into the temp dir with a cheap KDF and short timers
    pub fn options(&self) -> LoadOptions {
        LoadOptions::default()
            .with_override_file(self.override_path())
            .with_cache_file(self.cache_path())
            .with_descriptor(self.path("Cargo.toml"))
            .with_integration(IntegrationIdentity::new("opconfig-tests", "0.0.0"))
            .with_kdf_cost(TEST_KDF_COST)
            .with_timeouts(Duration::from_secs(2), Duration::from_secs(5))
    }

    /// Remote document location set, caching off
    pub fn settings(&self) -> Settings {
        settings(Some(DOC_PATH), None)
    }

    /// Loader backed by the mock store and the private memo
    pub fn loader(&self, settings: Settings, options: LoadOptions) -> ConfigLoader {
        ConfigLoader::new(settings, options)
            .expect("Failed to build loader")
            .with_store_factory(self.factory())
            .with_memo(self.memo.clone())
    }

    pub fn default_loader(&self) -> ConfigLoader {
        self.loader(self.settings(), self.options())
    }

    /// Factory handing out the mock store, counting constructions
    pub fn factory(&self) -> StoreFactory {
        let store = self.store.clone();
        let calls = self.factory_calls.clone();
        Arc::new(move || -> Result<Arc<dyn SecretStore>> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(store.clone() as Arc<dyn SecretStore>)
        })
    }

    /// Number of times a store client was constructed
    pub fn factory_calls(&self) -> usize {
        self.factory_calls.load(Ordering::SeqCst)
    }
}

// ─── Log Capture ────────────────────────────────────────────────────────────

/// Collects formatted log lines for assertions
#[derive(Clone, Default)]
#[allow(dead_code)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

#[allow(dead_code)]
impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscriber writing plain text into this capture
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync {
        tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_target(false)
            .finish()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock().unwrap()).into_owned()
    }

    /// Number of captured lines containing `needle`
    pub fn count(&self, needle: &str) -> usize {
        self.contents()
            .lines()
            .filter(|line| line.contains(needle))
            .count()
    }
}

pub struct LogCaptureWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl io::Write for LogCaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogCaptureWriter {
            buffer: self.buffer.clone(),
        }
    }
}

// ─── Fixtures ───────────────────────────────────────────────────────────────

/// Settings with a fixed token and IV
#[allow(dead_code)]
pub fn settings(config_path: Option<&str>, ttl: Option<Duration>) -> Settings {
    let config_path = config_path.map(str::to_string);
    let ttl = ttl.map(|ttl| ttl.as_secs().to_string());
    Settings::from_lookup(move |name| match name {
        "OP_CACHE_IV" => Some(TEST_IV.to_string()),
        "OP_SERVICE_ACCOUNT_TOKEN" => Some(TEST_TOKEN.to_string()),
        "OP_CONFIG_PATH" => config_path.clone(),
        "OP_CACHE_TTL" => ttl.clone(),
        _ => None,
    })
    .expect("fixture settings are valid")
}

/// A store factory that must never be called
#[allow(dead_code)]
pub fn offline_factory() -> StoreFactory {
    Arc::new(|| -> Result<Arc<dyn SecretStore>> {
        Err(Error::client_init("offline test: the store must not be built"))
    })
}

/// Remote document referencing one secret twice and one variable
#[allow(dead_code)]
pub const APP_TEMPLATE: &str = r#"name = "orders"

[database]
host = "{{ DB_HOST }}"
password = "{{ op('op://vault/db/password') }}"

[replica]
password = "{{ op("op://vault/db/password") }}"
"#;
