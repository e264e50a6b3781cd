//! Certward certificate manager
//!
//! Issues and renews public TLS certificates over ACME HTTP-01 and keeps
//! them in a certificate store, tracking ownership and expiry through tags
//! on each record rather than a separate database.
//!
//! - **Issuance**: [`CertManager::add_certificate`] canonicalizes the domain
//!   list, skips domain sets that already have a record, and otherwise drives
//!   a full ACME order
//! - **Renewal**: [`CertManager::renew_certificates`] re-orders every owned
//!   certificate expiring within 30 days, reusing the record's handle
//! - **Challenge endpoint**: [`server::router`] serves pending challenge
//!   responses to validators
//!
//! # Example
//!
//! ```ignore
//! use certward::{challenge_store, CertManager};
//! use certward_config::Config;
//!
//! let config = Config::load(Some("certward.kdl".as_ref()))?;
//! let challenges = challenge_store(&config.storage)?;
//! let manager = CertManager::connect(&config, challenges).await?;
//!
//! manager.add_certificate(&["www.example.com", "example.com"]).await?;
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod acme;
pub mod manager;
pub mod server;

#[cfg(test)]
pub(crate) mod testutil;

// ============================================================================
// Public API Re-exports
// ============================================================================

pub use acme::{AcmeError, AcmeResult, IssuedCertificate, RenewalReport, StorageError};
pub use manager::{challenge_store, CertManager, IssueOutcome};

pub use certward_common::{CertificateHandle, CertificateTags, DomainSet};
