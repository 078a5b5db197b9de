//! 1Password CLI secret store
//!
//! Reads secret references with `op read`, authenticated by a service
//! account token. The client identifies itself with the host project's
//! name and version.

use super::SecretStore;
use async_trait::async_trait;
use opconfig_core::{Error, Result, SecureString};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Secret reference scheme accepted by the CLI
pub const REFERENCE_PREFIX: &str = "op://";

const DEFAULT_PROGRAM: &str = "op";

/// Name and version the client reports to the secret service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrationIdentity {
    pub name: String,
    pub version: String,
}

impl IntegrationIdentity {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Read `[package] name` and `version` from a project descriptor
    pub fn from_descriptor(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::client_init(format!(
                "cannot read project descriptor {}: {}",
                path.display(),
                e
            ))
        })?;

        let descriptor: toml::Table = toml::from_str(&content).map_err(|e| {
            Error::client_init(format!(
                "project descriptor {} is not valid TOML: {}",
                path.display(),
                e
            ))
        })?;

        let field = |name: &str| -> Result<String> {
            descriptor
                .get("package")
                .and_then(|package| package.get(name))
                .and_then(toml::Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    Error::client_init(format!(
                        "project descriptor {} has no string package.{}",
                        path.display(),
                        name
                    ))
                })
        };

        Ok(Self::new(field("name")?, field("version")?))
    }
}

/// Secret store backed by the `op` command line tool
#[derive(Debug, Clone)]
pub struct OpCliStore {
    token: SecureString,
    identity: IntegrationIdentity,
    program: String,
}

impl OpCliStore {
    pub fn new(token: SecureString, identity: IntegrationIdentity) -> Self {
        info!(
            "Creating 1Password client for {} {}",
            identity.name, identity.version
        );
        Self {
            token,
            identity,
            program: DEFAULT_PROGRAM.to_string(),
        }
    }

    /// Use a different executable than `op` on the PATH
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn identity(&self) -> &IntegrationIdentity {
        &self.identity
    }
}

#[async_trait]
impl SecretStore for OpCliStore {
    async fn read(&self, path: &str) -> Result<String> {
        if !path.starts_with(REFERENCE_PREFIX) {
            return Err(Error::secret_fetch(
                path,
                format!("secret references must start with {}", REFERENCE_PREFIX),
            ));
        }

        debug!("Running: {} read {}", self.program, path);
        let output = Command::new(&self.program)
            .args(["read", "--no-newline", path])
            .env("OP_SERVICE_ACCOUNT_TOKEN", self.token.expose())
            .env("OP_INTEGRATION_NAME", &self.identity.name)
            .env("OP_INTEGRATION_VERSION", &self.identity.version)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::secret_fetch(path, format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::secret_fetch(
                path,
                format!("{} exited with {}: {}", self.program, output.status, stderr.trim()),
            ));
        }

        String::from_utf8(output.stdout)
            .map_err(|_| Error::secret_fetch(path, "secret value is not valid UTF-8"))
    }

    fn name(&self) -> &'static str {
        "1password"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn descriptor(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn store() -> OpCliStore {
        OpCliStore::new(
            SecureString::from("ops_test"),
            IntegrationIdentity::new("orders", "1.2.3"),
        )
    }

    #[test]
    fn test_identity_from_descriptor() {
        let file = descriptor("[package]\nname = \"orders\"\nversion = \"1.2.3\"\n");
        let identity = IntegrationIdentity::from_descriptor(file.path()).unwrap();
        assert_eq!(identity, IntegrationIdentity::new("orders", "1.2.3"));
    }

    #[test]
    fn test_identity_requires_string_version() {
        let file = descriptor("[package]\nname = \"orders\"\nversion.workspace = true\n");
        let err = IntegrationIdentity::from_descriptor(file.path()).unwrap_err();
        assert!(matches!(err, Error::ClientInit(ref msg) if msg.contains("package.version")));
    }

    #[test]
    fn test_identity_missing_descriptor() {
        let err = IntegrationIdentity::from_descriptor(Path::new("/nonexistent/Cargo.toml"))
            .unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[tokio::test]
    async fn test_rejects_non_reference_path() {
        let err = store().read("vault/item/field").await.unwrap_err();
        assert!(matches!(err, Error::SecretFetch { ref path, .. } if path == "vault/item/field"));
    }

    #[tokio::test]
    async fn test_missing_program_is_fetch_error() {
        let store = store().with_program("/nonexistent/op");
        let err = store.read("op://v/i/f").await.unwrap_err();
        match err {
            Error::SecretFetch { path, message } => {
                assert_eq!(path, "op://v/i/f");
                assert!(message.contains("failed to run"));
            }
            other => panic!("expected SecretFetch, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdout_is_the_value() {
        // echo prints its arguments back, standing in for a successful read
        let store = store().with_program("echo");
        let value = store.read("op://v/i/f").await.unwrap();
        assert_eq!(value, "read --no-newline op://v/i/f\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_fetch_error() {
        let store = store().with_program("false");
        let err = store.read("op://v/i/f").await.unwrap_err();
        assert!(matches!(err, Error::SecretFetch { ref message, .. } if message.contains("exited")));
    }
}
