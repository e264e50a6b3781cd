//! ACME account secret retrieval
//!
//! The account key lives outside the certificate store. It is read once at
//! startup, before any order is created.

use std::fmt::Debug;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, trace};

use super::error::{AcmeError, AcmeResult};

/// Source of the encoded ACME account credentials
#[async_trait]
pub trait SecretSource: Send + Sync + Debug {
    /// Fetch the encoded secret, `None` if it was never stored
    async fn fetch(&self) -> AcmeResult<Option<String>>;

    /// Store a newly created secret
    async fn store(&self, value: &str) -> AcmeResult<()>;
}

/// Secret kept in a single file with owner-only permissions
///
/// The path is `{secrets}/{parameter-prefix}/acme-key`.
#[derive(Debug, Clone)]
pub struct FileSecretSource {
    path: PathBuf,
}

impl FileSecretSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SecretSource for FileSecretSource {
    async fn fetch(&self) -> AcmeResult<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => {
                trace!(path = %self.path.display(), "Account secret file is empty");
                Ok(None)
            }
            Ok(content) => {
                debug!(path = %self.path.display(), "Loaded account secret");
                Ok(Some(content.trim().to_string()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                trace!(path = %self.path.display(), "No stored account secret");
                Ok(None)
            }
            Err(e) => Err(AcmeError::Secret(format!(
                "Failed to read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    async fn store(&self, value: &str) -> AcmeResult<()> {
        let io_err = |e: std::io::Error| {
            AcmeError::Secret(format!("Failed to write {}: {}", self.path.display(), e))
        };

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        tokio::fs::write(&self.path, value).await.map_err(io_err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(io_err)?;
        }

        info!(path = %self.path.display(), "Saved ACME account secret");
        Ok(())
    }
}
