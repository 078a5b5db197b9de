//! Raw document selection
//!
//! Precedence: local override file, then the remote document. Before going
//! remote the encrypted cache is consulted; it seeds the resolver with
//! previously resolved secrets (the document itself included), so a warm
//! cache answers the remote read without a round trip.

use camino::{Utf8Path, Utf8PathBuf};
use opconfig_core::{Error, Result};
use opconfig_secrets::{CacheFile, SecretResolver};
use std::io::ErrorKind;
use tracing::{debug, info, warn};

/// The templated source text, not yet rendered
#[derive(Clone, PartialEq, Eq)]
pub enum RawDocument {
    /// Contents of the local override file
    Override(String),
    /// Document read from the secret store
    Remote { path: String, content: String },
}

impl RawDocument {
    pub fn content(&self) -> &str {
        match self {
            Self::Override(content) => content,
            Self::Remote { content, .. } => content,
        }
    }

    pub fn is_override(&self) -> bool {
        matches!(self, Self::Override(_))
    }
}

impl std::fmt::Debug for RawDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Override(content) => write!(f, "Override({} bytes)", content.len()),
            Self::Remote { path, content } => write!(f, "Remote({}, {} bytes)", path, content.len()),
        }
    }
}

/// Decides where the raw document comes from
#[derive(Debug, Clone)]
pub struct SourceSelector {
    override_file: Utf8PathBuf,
    config_path: Option<String>,
}

impl SourceSelector {
    pub fn new(override_file: impl Into<Utf8PathBuf>, config_path: Option<String>) -> Self {
        Self {
            override_file: override_file.into(),
            config_path,
        }
    }

    /// Obtain the raw document. The first source that answers wins.
    pub async fn obtain_raw_document(
        &self,
        cache: &CacheFile,
        resolver: &SecretResolver,
    ) -> Result<RawDocument> {
        if let Some(content) = read_override(&self.override_file).await {
            info!("Using local override file {}", self.override_file);
            return Ok(RawDocument::Override(content));
        }

        let path = self
            .config_path
            .clone()
            .ok_or(Error::ConfigPathMissing)?;

        match cache.read().await {
            Ok(Some(cached)) => resolver.seed(cached).await,
            Ok(None) => debug!("Cache miss, resolving from the secret store"),
            Err(e) => info!("Ignoring unusable cache file: {}", e),
        }

        let content = resolver.resolve(&path).await?;
        Ok(RawDocument::Remote { path, content })
    }
}

async fn read_override(path: &Utf8Path) -> Option<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Some(content),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => {
            warn!("Override file {} exists but cannot be read: {}", path, e);
            None
        }
    }
}
