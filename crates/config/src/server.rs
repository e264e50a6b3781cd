//! Storage, challenge endpoint and renewal schedule configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use validator::Validate;

/// Where certificates, challenge records and the account secret live
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StorageConfig {
    /// Root directory of the file-backed certificate store
    pub certificates: PathBuf,

    /// Directory of the challenge response store.
    ///
    /// `None` keeps challenge records in process memory, which only works
    /// when the challenge endpoint runs in the same process (daemon mode).
    #[serde(default)]
    pub challenges: Option<PathBuf>,

    /// Root directory of stored secrets
    pub secrets: PathBuf,

    /// Parameter prefix under `secrets` holding the account key
    #[validate(length(min = 1, message = "storage.parameter-prefix must not be empty"))]
    pub parameter_prefix: String,
}

impl StorageConfig {
    /// Path of the ACME account secret (`{secrets}/{prefix}/acme-key`)
    pub fn account_secret_path(&self) -> PathBuf {
        self.secrets
            .join(self.parameter_prefix.trim_matches('/'))
            .join("acme-key")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            certificates: default_certificates_dir(),
            challenges: None,
            secrets: default_secrets_dir(),
            parameter_prefix: default_parameter_prefix(),
        }
    }
}

/// Challenge endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    /// Listen address of the `/.well-known/acme-challenge/` endpoint
    #[validate(custom(function = "crate::validation::validate_socket_addr"))]
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Renewal schedule used by daemon mode
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RenewalConfig {
    /// Seconds between renewal scans
    pub check_interval_secs: u64,
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
        }
    }
}

pub(crate) fn default_certificates_dir() -> PathBuf {
    PathBuf::from("/var/lib/certward/certificates")
}

pub(crate) fn default_secrets_dir() -> PathBuf {
    PathBuf::from("/etc/certward/secrets")
}

pub(crate) fn default_parameter_prefix() -> String {
    "certward".to_string()
}

pub(crate) fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

pub(crate) fn default_check_interval_secs() -> u64 {
    12 * 3600
}
