//! Environment variable overrides.
//!
//! Deployments that configure everything through the environment set
//! `ACME_EMAIL`, `LETSENCRYPT_STAGING`, `INSTALLATION_ID` and
//! `PARAMETER_PREFIX`. Values present in the environment win over the file.
//!
//! `LETSENCRYPT_STAGING` selects staging only when it reads `true` (any
//! case); every other value selects production.

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::Config;

/// Overrides read from the process environment
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnvOverrides {
    pub acme_email: Option<String>,
    pub letsencrypt_staging: Option<String>,
    pub installation_id: Option<String>,
    pub parameter_prefix: Option<String>,
}

impl EnvOverrides {
    /// Read overrides from the process environment
    pub fn from_env() -> Result<Self> {
        envy::from_env::<Self>().context("Failed to read configuration from environment")
    }

    /// Read overrides from explicit key/value pairs
    pub fn from_pairs<I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter::<_, Self>(pairs).context("Failed to parse configuration overrides")
    }

    /// Apply the overrides on top of a parsed configuration
    pub fn apply(self, config: &mut Config) {
        if let Some(email) = self.acme_email {
            debug!("ACME email overridden from environment");
            config.acme.email = email;
        }
        if let Some(staging) = self.letsencrypt_staging {
            config.acme.staging = staging.trim().eq_ignore_ascii_case("true");
        }
        if let Some(id) = self.installation_id {
            config.installation.id = id;
        }
        if let Some(prefix) = self.parameter_prefix {
            config.storage.parameter_prefix = prefix;
        }
    }
}
