//! Encrypted on-disk cache of resolved secrets
//!
//! The file holds one line, `ciphertext:salt`. The plaintext is the
//! serialized [`SecretPathCache`]: resolved values keyed by secret
//! reference, not the rendered document, so template edits never
//! invalidate it. The key is derived from the service account token and the
//! per-write salt; the token itself is never written.

use crate::types::SecretPathCache;
use opconfig_core::crypto::{self, CryptoBox};
use opconfig_core::{Error, Result, SecureString};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Parsed `ciphertext:salt` file content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedCacheEntry {
    pub ciphertext: String,
    pub salt: String,
}

impl EncryptedCacheEntry {
    /// Split at the last `:`. Both halves must be non-empty.
    pub fn parse(content: &str) -> Result<Self> {
        let (ciphertext, salt) = content
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| Error::cache_corrupt("missing ':' separator"))?;

        if ciphertext.is_empty() || salt.is_empty() {
            return Err(Error::cache_corrupt("empty ciphertext or salt"));
        }

        Ok(Self {
            ciphertext: ciphertext.to_string(),
            salt: salt.to_string(),
        })
    }
}

impl fmt::Display for EncryptedCacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ciphertext, self.salt)
    }
}

/// The cache file and everything needed to read or write it
#[derive(Debug, Clone)]
pub struct CacheFile {
    path: PathBuf,
    crypto: CryptoBox,
    token: SecureString,
    ttl: Option<Duration>,
}

impl CacheFile {
    pub fn new(
        path: impl Into<PathBuf>,
        crypto: CryptoBox,
        token: SecureString,
        ttl: Option<Duration>,
    ) -> Self {
        Self {
            path: path.into(),
            crypto,
            token,
            ttl,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Read and decrypt the cache.
    ///
    /// A missing file, or one older than the TTL, is `Ok(None)`. Stale
    /// files are removed. Unusable content is `CacheCorrupt`.
    pub async fn read(&self) -> Result<Option<SecretPathCache>> {
        let metadata = match fs::metadata(&self.path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No cache file at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(self.io_error(e)),
        };

        if let Some(ttl) = self.ttl {
            let expired = metadata
                .modified()
                .ok()
                .and_then(|modified| modified.elapsed().ok())
                .is_some_and(|age| age >= ttl);
            if expired {
                info!("Cache file {} outlived its TTL, removing", self.path.display());
                self.clear().await?;
                return Ok(None);
            }
        }

        let content = fs::read_to_string(&self.path).await.map_err(|e| {
            if e.kind() == ErrorKind::InvalidData {
                Error::cache_corrupt("cache file is not valid UTF-8")
            } else {
                self.io_error(e)
            }
        })?;
        let entry = EncryptedCacheEntry::parse(&content)?;

        let crypto = self.crypto.clone();
        let token = self.token.clone();
        let plaintext = tokio::task::spawn_blocking(move || {
            let key = crypto.derive_key(token.expose(), &entry.salt)?;
            crypto.decrypt(&entry.ciphertext, &key).map(Zeroizing::new)
        })
        .await
        .map_err(|e| Error::Runtime(format!("cache decryption task failed: {}", e)))??;

        let cache = SecretPathCache::from_json(&plaintext)?;
        debug!("Cache hit: {} secret path(s) from {}", cache.len(), self.path.display());
        Ok(Some(cache))
    }

    /// Encrypt and write the cache with a fresh salt
    pub async fn write(&self, cache: &SecretPathCache) -> Result<()> {
        let plaintext = Zeroizing::new(cache.to_json()?);
        let salt = crypto::generate_salt();

        let crypto = self.crypto.clone();
        let token = self.token.clone();
        let key_salt = salt.clone();
        let ciphertext = tokio::task::spawn_blocking(move || {
            let key = crypto.derive_key(token.expose(), &key_salt)?;
            crypto.encrypt(&plaintext, &key)
        })
        .await
        .map_err(|e| Error::Runtime(format!("cache encryption task failed: {}", e)))??;

        let entry = EncryptedCacheEntry { ciphertext, salt };
        fs::write(&self.path, entry.to_string())
            .await
            .map_err(|e| self.io_error(e))?;

        // Set restrictive permissions on Unix
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| self.io_error(e))?;
        }

        debug!("Cached {} secret path(s) to {}", cache.len(), self.path.display());
        Ok(())
    }

    /// Write the cache in the background and schedule its removal after the TTL.
    ///
    /// Returns `None` without writing when no TTL is configured. The handle
    /// completes once the write has settled; failures are logged, never
    /// returned. The removal runs as its own detached task.
    pub fn persist(&self, cache: SecretPathCache) -> Option<JoinHandle<()>> {
        let Some(ttl) = self.ttl else {
            debug!("No cache TTL configured, skipping cache write");
            return None;
        };

        let file = self.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = file.write(&cache).await {
                warn!("Failed to write cache file {}: {}", file.path.display(), e);
                return;
            }
            file.schedule_expiry(ttl);
        }))
    }

    /// Remove the cache file after `ttl` has elapsed
    pub fn schedule_expiry(&self, ttl: Duration) -> JoinHandle<()> {
        let file = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            match file.clear().await {
                Ok(true) => debug!("Cache file {} expired", file.path.display()),
                Ok(false) => {}
                Err(e) => warn!("Failed to remove expired cache file: {}", e),
            }
        })
    }

    /// Delete the cache file. Returns whether a file was removed.
    pub async fn clear(&self) -> Result<bool> {
        remove_cache_file(&self.path).await
    }

    fn io_error(&self, e: std::io::Error) -> Error {
        Error::cache_io(self.path.display().to_string(), e.to_string())
    }
}

/// Delete a cache file without decrypting it, so no token or IV is needed.
/// Returns whether a file was removed.
pub async fn remove_cache_file(path: &Path) -> Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::cache_io(path.display().to_string(), e.to_string())),
    }
}
