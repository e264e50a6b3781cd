//! ACME account and installation identity configuration.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Prefix of the owner tag written on every certificate this installation creates
pub const OWNER_TAG_PREFIX: &str = "certward";

/// ACME account settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct AcmeConfig {
    /// Contact e-mail registered with the ACME account
    #[validate(email(message = "acme.email must be a valid e-mail address"))]
    pub email: String,

    /// Use the Let's Encrypt staging directory
    #[serde(default)]
    pub staging: bool,
}

/// Identity of this deployment within a shared certificate store
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct InstallationConfig {
    /// Installation id; distinguishes our certificates from other tenants'
    #[validate(length(min = 1, message = "installation.id must not be empty"))]
    pub id: String,
}

impl InstallationConfig {
    /// Owner tag value (`certward-<id>`)
    pub fn owner_tag(&self) -> String {
        format!("{}-{}", OWNER_TAG_PREFIX, self.id)
    }
}
