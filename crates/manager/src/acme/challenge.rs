//! HTTP-01 challenge response store
//!
//! Maps challenge tokens to the key authorization that must be served at
//! `/.well-known/acme-challenge/<token>`. Records are written right before
//! reachability polling starts and removed once the ACME server has been
//! told to validate, whatever the outcome.

use std::fmt::Debug;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info, trace, warn};

use super::error::{StorageError, StorageResult};

/// HTTP-01 challenge path prefix
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// Storage for pending challenge responses.
///
/// Implementations must be safe for concurrent use; a single order writes
/// one record per domain from concurrently running tasks.
#[async_trait]
pub trait ChallengeStore: Send + Sync + Debug {
    /// Insert or replace the response for a token
    async fn put(&self, token: &str, response: &str) -> StorageResult<()>;

    /// Look up the response for a token
    async fn get(&self, token: &str) -> StorageResult<Option<String>>;

    /// Remove a token.
    ///
    /// Best-effort: the goal is "record absent", which a failed delete of a
    /// record that never existed already satisfies. Failures are logged.
    async fn delete(&self, token: &str);
}

/// Check that a token is usable as a storage key.
///
/// ACME tokens are base64url; anything else is refused so a token can never
/// escape the challenge directory.
pub fn validate_token(token: &str) -> StorageResult<()> {
    let valid = !token.is_empty()
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidToken(token.to_string()))
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// In-process challenge store
///
/// Only useful when the challenge endpoint runs in the same process as the
/// orchestrator (daemon mode, tests).
///
/// # Thread Safety
///
/// Uses `DashMap` for lock-free concurrent access from request handlers and
/// validation tasks.
#[derive(Debug, Clone, Default)]
pub struct MemoryChallengeStore {
    /// Map of challenge token -> key authorization response
    challenges: Arc<DashMap<String, String>>,
}

impl MemoryChallengeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of pending challenges
    pub fn pending_count(&self) -> usize {
        self.challenges.len()
    }

    /// Whether a record exists for the token
    pub fn contains(&self, token: &str) -> bool {
        self.challenges.contains_key(token)
    }
}

#[async_trait]
impl ChallengeStore for MemoryChallengeStore {
    async fn put(&self, token: &str, response: &str) -> StorageResult<()> {
        validate_token(token)?;
        debug!(token = %token, "Registering ACME HTTP-01 challenge");
        self.challenges
            .insert(token.to_string(), response.to_string());
        Ok(())
    }

    async fn get(&self, token: &str) -> StorageResult<Option<String>> {
        let result = self.challenges.get(token).map(|v| v.clone());
        if result.is_some() {
            trace!(token = %token, "ACME challenge token found");
        } else {
            trace!(token = %token, "ACME challenge token not found");
        }
        Ok(result)
    }

    async fn delete(&self, token: &str) {
        if self.challenges.remove(token).is_some() {
            debug!(token = %token, "Removed ACME challenge");
        }
    }
}

// ============================================================================
// Directory-backed store
// ============================================================================

/// Challenge store keeping one file per token.
///
/// Lets a one-shot `issue`/`renew` process publish records that a separately
/// running challenge endpoint serves.
///
/// ```text
/// challenges/
/// ├── <token>       # key authorization
/// └── <token>.tmp   # in-flight write, renamed into place
/// ```
#[derive(Debug, Clone)]
pub struct FileChallengeStore {
    base_path: PathBuf,
}

impl FileChallengeStore {
    /// Open (and create if needed) a challenge directory
    pub fn new(base_path: &Path) -> StorageResult<Self> {
        std::fs::create_dir_all(base_path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(base_path, std::fs::Permissions::from_mode(0o700))?;
        }

        info!(
            storage_path = %base_path.display(),
            "Initialized challenge response store"
        );

        Ok(Self {
            base_path: base_path.to_path_buf(),
        })
    }

    /// Get the storage base path
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn token_path(&self, token: &str) -> PathBuf {
        self.base_path.join(token)
    }
}

#[async_trait]
impl ChallengeStore for FileChallengeStore {
    async fn put(&self, token: &str, response: &str) -> StorageResult<()> {
        validate_token(token)?;

        let path = self.token_path(token);
        let tmp_path = self.base_path.join(format!("{}.tmp", token));

        tokio::fs::write(&tmp_path, response).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        debug!(token = %token, "Stored ACME challenge response");
        Ok(())
    }

    async fn get(&self, token: &str) -> StorageResult<Option<String>> {
        if validate_token(token).is_err() {
            trace!(token = %token, "Rejected malformed challenge token");
            return Ok(None);
        }

        match tokio::fs::read_to_string(self.token_path(token)).await {
            Ok(response) => Ok(Some(response)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn delete(&self, token: &str) {
        if validate_token(token).is_err() {
            return;
        }

        match tokio::fs::remove_file(self.token_path(token)).await {
            Ok(()) => debug!(token = %token, "Removed ACME challenge"),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                trace!(token = %token, "Challenge record already absent");
            }
            Err(e) => {
                warn!(token = %token, error = %e, "Failed to remove challenge record");
            }
        }
    }
}
