//! ACME error types

use std::io;
use thiserror::Error;

use certward_common::{DomainSetError, TagSchemaError};

/// Errors that can occur while issuing or renewing a certificate
#[derive(Debug, Error)]
pub enum AcmeError {
    /// Failed to create or load the ACME account
    #[error("Failed to create ACME account: {0}")]
    AccountCreation(String),

    /// The ACME server rejected the order or its authorizations could not be fetched
    #[error("Failed to create certificate order: {0}")]
    OrderCreation(String),

    /// An authorization was rejected by the ACME server
    #[error("Authorization failed for domain '{domain}': {message}")]
    Authorization { domain: String, message: String },

    /// An authorization offers no HTTP-01 challenge
    #[error("Unsupported challenge type for domain '{domain}': {offered}")]
    UnsupportedChallengeType { domain: String, offered: String },

    /// The challenge response never became publicly reachable
    #[error("Endpoint for {domain} not serving challenge")]
    ChallengeUnreachable { domain: String },

    /// The last reachability attempt failed at the network level
    #[error("Failed to fetch challenge from {domain}: {message}")]
    ChallengeProbe { domain: String, message: String },

    /// Certificate finalization failed
    #[error("Failed to finalize certificate: {0}")]
    Finalization(String),

    /// Key or CSR generation failed
    #[error("Failed to build certificate request: {0}")]
    Csr(String),

    /// Storage operation failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// ACME protocol error from instant-acme
    #[error("ACME protocol error: {0}")]
    Protocol(String),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Certificate parsing error
    #[error("Failed to parse certificate: {0}")]
    CertificateParse(String),

    /// Account secret could not be read or decoded
    #[error("Account secret error: {0}")]
    Secret(String),

    /// The requested domain list is not a valid domain set
    #[error("Invalid domain list: {0}")]
    InvalidDomains(#[from] DomainSetError),

    /// A store record violates the tag schema
    #[error("Certificate record anomaly: {0}")]
    RecordAnomaly(#[from] TagSchemaError),
}

/// Errors specific to the challenge and certificate stores
#[derive(Debug, Error)]
pub enum StorageError {
    /// IO error during file operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Failed to serialize/deserialize data
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Record not found
    #[error("Certificate not found: {handle}")]
    NotFound { handle: String },

    /// Token unusable as a storage key
    #[error("Invalid challenge token: {0:?}")]
    InvalidToken(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

impl From<instant_acme::Error> for AcmeError {
    fn from(e: instant_acme::Error) -> Self {
        AcmeError::Protocol(e.to_string())
    }
}

/// Result type for ACME operations
pub type AcmeResult<T> = Result<T, AcmeError>;

/// Result type for store operations
pub type StorageResult<T> = Result<T, StorageError>;
