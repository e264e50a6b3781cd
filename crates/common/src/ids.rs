//! Type-safe identifier newtypes for certward.
//!
//! Certificate stores hand out opaque handles (an ARN, a directory name, a
//! map key). Wrapping them keeps a handle from being mixed up with a
//! certificate name or a challenge token.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque handle of a record in the certificate store.
///
/// A handle is assigned on first import and reused on renewal, so a renewed
/// certificate keeps the identity that load balancers and listeners refer to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CertificateHandle(String);

impl CertificateHandle {
    /// Generate a fresh random handle (`cert-<uuid>`)
    pub fn generate() -> Self {
        Self(format!("cert-{}", Uuid::new_v4()))
    }

    /// Create from an existing string
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert to owned String
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CertificateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CertificateHandle {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CertificateHandle {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_handles_are_unique() {
        let a = CertificateHandle::generate();
        let b = CertificateHandle::generate();

        assert_ne!(a, b);
        assert!(a.as_str().starts_with("cert-"));
    }

    #[test]
    fn test_handle_from_string() {
        let handle = CertificateHandle::from_string("arn:aws:acm:eu-west-1:1:certificate/abc");
        assert_eq!(handle.as_str(), "arn:aws:acm:eu-west-1:1:certificate/abc");
        assert_eq!(handle.to_string(), handle.clone().into_string());
    }
}
