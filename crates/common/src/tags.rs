//! Certificate record tag schema.
//!
//! The certificate store has no side database: ownership, canonical name and
//! expiry live in three string tags on each record. This module is the only
//! place that knows their keys and formats, and validates them on read.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use thiserror::Error;

/// Tag holding the owner/installation marker
pub const TAG_CREATED_BY: &str = "CreatedBy";
/// Tag holding the canonical domain set name
pub const TAG_NAME: &str = "Name";
/// Tag holding the leaf certificate's NotAfter
pub const TAG_EXPIRES_AT: &str = "ExpiresAt";

/// Sortable timestamp format used for `ExpiresAt` (always UTC)
pub const EXPIRY_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// A stored record whose tags do not satisfy the schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagSchemaError {
    #[error("missing required tag '{key}'")]
    MissingTag { key: &'static str },

    #[error("tag '{key}' has an unparseable timestamp '{value}'")]
    InvalidExpiry { key: &'static str, value: String },
}

/// The three required tags on a certificate record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateTags {
    /// Which installation created the record
    pub owner: String,
    /// Canonical domain set name
    pub name: String,
    /// Certificate NotAfter
    pub expires_at: DateTime<Utc>,
}

impl CertificateTags {
    pub fn new(owner: impl Into<String>, name: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            expires_at,
        }
    }

    /// Render the tags as the key/value map applied to the store record
    pub fn to_map(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (TAG_CREATED_BY.to_string(), self.owner.clone()),
            (TAG_NAME.to_string(), self.name.clone()),
            (TAG_EXPIRES_AT.to_string(), format_expiry(self.expires_at)),
        ])
    }

    /// Validate a record's raw tags against the schema
    pub fn from_map(tags: &BTreeMap<String, String>) -> Result<Self, TagSchemaError> {
        let owner = required(tags, TAG_CREATED_BY)?;
        let name = required(tags, TAG_NAME)?;
        let raw_expiry = required(tags, TAG_EXPIRES_AT)?;
        let expires_at = parse_expiry(raw_expiry).ok_or_else(|| TagSchemaError::InvalidExpiry {
            key: TAG_EXPIRES_AT,
            value: raw_expiry.to_string(),
        })?;

        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
            expires_at,
        })
    }

    /// Whether the certificate expires before `now + horizon`
    pub fn is_due(&self, now: DateTime<Utc>, horizon: Duration) -> bool {
        self.expires_at < now + horizon
    }
}

fn required<'a>(
    tags: &'a BTreeMap<String, String>,
    key: &'static str,
) -> Result<&'a str, TagSchemaError> {
    tags.get(key)
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
        .ok_or(TagSchemaError::MissingTag { key })
}

/// Format a timestamp for the `ExpiresAt` tag
pub fn format_expiry(at: DateTime<Utc>) -> String {
    at.format(EXPIRY_FORMAT).to_string()
}

/// Parse an `ExpiresAt` value. Accepts the native format (read as UTC) and RFC 3339.
pub fn parse_expiry(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, EXPIRY_FORMAT) {
        return Some(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
