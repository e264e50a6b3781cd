//! Canonical domain sets.
//!
//! A certificate is identified by the set of host names it covers. The set
//! is normalized (trimmed, lowercased, de-duplicated, sorted) so the same
//! hosts always produce the same name, whatever order a caller lists them in.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Separator between hosts in a canonical certificate name
pub const NAME_SEPARATOR: char = ':';

/// Errors raised while building a [`DomainSet`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainSetError {
    /// No host names were given
    #[error("domain set must contain at least one host name")]
    Empty,

    /// A host name is blank or contains characters that break the name format
    #[error("invalid host name '{0}'")]
    InvalidHost(String),
}

/// Ordered, de-duplicated, sorted list of host names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct DomainSet(Vec<String>);

impl DomainSet {
    /// Build a canonical set from host names in any order
    pub fn new<I, S>(hosts: I) -> Result<Self, DomainSetError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized = Vec::new();
        for host in hosts {
            let host = host.as_ref().trim().to_ascii_lowercase();
            if host.is_empty()
                || host
                    .chars()
                    .any(|c| c == NAME_SEPARATOR || c == '/' || c.is_whitespace())
            {
                return Err(DomainSetError::InvalidHost(host));
            }
            normalized.push(host);
        }

        normalized.sort();
        normalized.dedup();

        if normalized.is_empty() {
            return Err(DomainSetError::Empty);
        }

        Ok(Self(normalized))
    }

    /// Rebuild a set from a stored canonical name (`a.example.com:b.example.com`)
    pub fn from_name(name: &str) -> Result<Self, DomainSetError> {
        Self::new(name.split(NAME_SEPARATOR))
    }

    /// Canonical name: the sorted hosts joined with `:`
    pub fn name(&self) -> String {
        self.0.join(&NAME_SEPARATOR.to_string())
    }

    /// Hosts in canonical order
    pub fn hosts(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl fmt::Display for DomainSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl TryFrom<Vec<String>> for DomainSet {
    type Error = DomainSetError;

    fn try_from(hosts: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(hosts)
    }
}

impl From<DomainSet> for Vec<String> {
    fn from(set: DomainSet) -> Self {
        set.0
    }
}
