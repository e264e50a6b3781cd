//! Configuration for the certward certificate manager
//!
//! Parses the KDL configuration file, layers environment overrides on top
//! and validates the result.
//!
//! # Module Organization
//!
//! - [`acme`]: ACME account and installation identity
//! - [`server`]: storage locations, challenge endpoint, renewal schedule
//! - [`env`]: environment variable overrides
//! - [`validation`]: field validators
//!
//! # Example
//!
//! ```kdl
//! acme {
//!     email "admin@example.com"
//!     staging #false
//! }
//! installation {
//!     id "prod"
//! }
//! storage {
//!     certificates "/var/lib/certward/certificates"
//!     challenges "/var/lib/certward/challenges"
//!     secrets "/etc/certward/secrets"
//!     parameter-prefix "certward"
//! }
//! server {
//!     listen "0.0.0.0:8080"
//! }
//! renewal {
//!     check-interval-secs 43200
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};
use validator::Validate;

// ============================================================================
// Module Declarations
// ============================================================================

pub mod acme;
pub mod env;
mod kdl;
pub mod server;
pub mod validation;

// ============================================================================
// Re-exports
// ============================================================================

pub use acme::{AcmeConfig, InstallationConfig, OWNER_TAG_PREFIX};
pub use env::EnvOverrides;
pub use server::{RenewalConfig, ServerConfig, StorageConfig};

// ============================================================================
// Main Configuration Structure
// ============================================================================

/// Main configuration structure for certward
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct Config {
    /// ACME account settings
    #[validate(nested)]
    pub acme: AcmeConfig,

    /// Installation identity (owner tag)
    #[validate(nested)]
    pub installation: InstallationConfig,

    /// Storage locations
    #[validate(nested)]
    #[serde(default)]
    pub storage: StorageConfig,

    /// Challenge endpoint
    #[validate(nested)]
    #[serde(default)]
    pub server: ServerConfig,

    /// Renewal schedule
    #[serde(default)]
    pub renewal: RenewalConfig,
}

// ============================================================================
// Config Implementation
// ============================================================================

impl Config {
    /// Load configuration the way the binary does: file (if any), then
    /// environment overrides, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                info!(path = %path.display(), "Loading configuration");
                Self::from_file(path)?
            }
            None => {
                info!("No configuration file given, using defaults and environment");
                Self::default()
            }
        };

        EnvOverrides::from_env()?.apply(&mut config);
        config.validate_all()?;

        debug!(
            owner_tag = %config.owner_tag(),
            staging = config.acme.staging,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Load configuration from a KDL file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::from_kdl(&content)
    }

    /// Parse configuration from KDL format
    pub fn from_kdl(content: &str) -> Result<Self> {
        let doc: ::kdl::KdlDocument = content
            .parse()
            .map_err(|e: ::kdl::KdlError| render_kdl_error(content, &e))?;

        kdl::parse_kdl_document(doc)
    }

    /// Run field validation and turn the report into a readable error
    pub fn validate_all(&self) -> Result<()> {
        self.validate()
            .map_err(|e| anyhow::anyhow!("Configuration validation failed:\n{}", e))
    }

    /// Owner tag stamped on every certificate this installation manages
    pub fn owner_tag(&self) -> String {
        self.installation.owner_tag()
    }
}

/// Render a KDL parse error with line/column context
fn render_kdl_error(content: &str, e: &::kdl::KdlError) -> anyhow::Error {
    use miette::Diagnostic;

    let mut error_msg = String::from("KDL configuration parse error:\n\n");
    let mut found_details = false;

    if let Some(related) = e.related() {
        for diagnostic in related {
            found_details = true;
            error_msg.push_str(&format!("  {}\n", diagnostic));

            if let Some(labels) = diagnostic.labels() {
                for label in labels {
                    let (line, col) = kdl::offset_to_line_col(content, label.offset());
                    error_msg.push_str(&format!("  --> at line {}, column {}\n", line, col));

                    if let Some(line_content) = content.lines().nth(line.saturating_sub(1)) {
                        error_msg.push_str(&format!("{:>4} | {}\n", line, line_content));
                        error_msg.push_str(&format!(
                            "     | {}^\n",
                            " ".repeat(col.saturating_sub(1))
                        ));
                    }
                }
            }

            if let Some(help) = diagnostic.help() {
                error_msg.push_str(&format!("  Help: {}\n", help));
            }
        }
    }

    if !found_details {
        error_msg.push_str(&format!("  {}\n", e));
    }

    anyhow::anyhow!("{}", error_msg)
}
