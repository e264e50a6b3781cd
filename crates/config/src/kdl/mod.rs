//! KDL configuration parsing.
//!
//! Converts a parsed KDL document into a [`Config`]. Every block is optional
//! here; required values are enforced later by validation so that
//! environment overrides can fill them in.

mod helpers;

pub use helpers::{child_names, get_bool_entry, get_int_entry, get_string_entry, offset_to_line_col};

use anyhow::Result;
use std::path::PathBuf;
use tracing::trace;

use crate::acme::{AcmeConfig, InstallationConfig};
use crate::server::{RenewalConfig, ServerConfig, StorageConfig};
use crate::Config;

const TOP_LEVEL_BLOCKS: &[&str] = &["acme", "installation", "storage", "server", "renewal"];

/// Convert a parsed KDL document to Config
pub fn parse_kdl_document(doc: kdl::KdlDocument) -> Result<Config> {
    let mut config = Config::default();

    for node in doc.nodes() {
        match node.name().value() {
            "acme" => config.acme = parse_acme(node)?,
            "installation" => config.installation = parse_installation(node)?,
            "storage" => config.storage = parse_storage(node)?,
            "server" => config.server = parse_server(node)?,
            "renewal" => config.renewal = parse_renewal(node)?,
            other => {
                return Err(anyhow::anyhow!(
                    "Unknown top-level configuration block: '{}'\n\
                     Valid blocks are: {}",
                    other,
                    TOP_LEVEL_BLOCKS.join(", ")
                ));
            }
        }
    }

    Ok(config)
}

/// Reject keys a block does not understand; catches typos like `emial`
fn reject_unknown(node: &kdl::KdlNode, block: &str, known: &[&str]) -> Result<()> {
    for name in child_names(node) {
        if !known.contains(&name.as_str()) {
            return Err(anyhow::anyhow!(
                "Unknown key '{}' in '{}' block. Valid keys are: {}",
                name,
                block,
                known.join(", ")
            ));
        }
    }
    Ok(())
}

/// Parse the `acme` block
pub fn parse_acme(node: &kdl::KdlNode) -> Result<AcmeConfig> {
    reject_unknown(node, "acme", &["email", "staging"])?;

    let config = AcmeConfig {
        email: get_string_entry(node, "email").unwrap_or_default(),
        staging: get_bool_entry(node, "staging").unwrap_or(false),
    };

    trace!(email = %config.email, staging = config.staging, "Parsed ACME configuration");
    Ok(config)
}

/// Parse the `installation` block
pub fn parse_installation(node: &kdl::KdlNode) -> Result<InstallationConfig> {
    reject_unknown(node, "installation", &["id"])?;

    Ok(InstallationConfig {
        id: get_string_entry(node, "id").unwrap_or_default(),
    })
}

/// Parse the `storage` block
pub fn parse_storage(node: &kdl::KdlNode) -> Result<StorageConfig> {
    reject_unknown(
        node,
        "storage",
        &["certificates", "challenges", "secrets", "parameter-prefix"],
    )?;

    let defaults = StorageConfig::default();
    let config = StorageConfig {
        certificates: get_string_entry(node, "certificates")
            .map(PathBuf::from)
            .unwrap_or(defaults.certificates),
        challenges: get_string_entry(node, "challenges").map(PathBuf::from),
        secrets: get_string_entry(node, "secrets")
            .map(PathBuf::from)
            .unwrap_or(defaults.secrets),
        parameter_prefix: get_string_entry(node, "parameter-prefix")
            .unwrap_or(defaults.parameter_prefix),
    };

    trace!(
        certificates = %config.certificates.display(),
        challenges = ?config.challenges,
        "Parsed storage configuration"
    );
    Ok(config)
}

/// Parse the `server` block
pub fn parse_server(node: &kdl::KdlNode) -> Result<ServerConfig> {
    reject_unknown(node, "server", &["listen"])?;

    Ok(ServerConfig {
        listen: get_string_entry(node, "listen").unwrap_or_else(crate::server::default_listen),
    })
}

/// Parse the `renewal` block
pub fn parse_renewal(node: &kdl::KdlNode) -> Result<RenewalConfig> {
    reject_unknown(node, "renewal", &["check-interval-secs"])?;

    let check_interval_secs = match get_int_entry(node, "check-interval-secs") {
        Some(v) if v <= 0 => {
            return Err(anyhow::anyhow!(
                "renewal.check-interval-secs must be positive, got {}",
                v
            ));
        }
        Some(v) => u64::try_from(v)?,
        None => crate::server::default_check_interval_secs(),
    };

    Ok(RenewalConfig {
        check_interval_secs,
    })
}
