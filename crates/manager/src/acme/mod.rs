//! ACME certificate issuance and renewal
//!
//! # Architecture
//!
//! - [`ChallengeStore`] - Pending HTTP-01 responses, keyed by token
//! - [`ValidationPoller`] - Confirms a response is publicly served, then asks
//!   the ACME server to validate it
//! - [`OrderOrchestrator`] - Drives one order from creation to signed chain
//! - [`CertificateTagger`] - Stores certificates with owner/name/expiry tags
//! - [`RenewalScanner`] - Re-orders certificates close to expiry
//!
//! # Challenge Flow
//!
//! When a certificate needs to be obtained or renewed:
//!
//! 1. [`AcmeService`] creates a new order for the domain set
//! 2. For each domain, the order offers an HTTP-01 challenge token
//! 3. [`ChallengeStore`] records the token and key authorization
//! 4. [`ValidationPoller`] fetches `/.well-known/acme-challenge/<token>` from
//!    every domain until all of them serve the key authorization
//! 5. The ACME server is told to validate; the record is then removed
//! 6. Once every challenge is validated, the order is finalized with a fresh
//!    key and CSR
//! 7. [`CertificateTagger`] imports the certificate and applies its tags

mod challenge;
mod client;
mod error;
mod order;
mod poller;
mod scheduler;
mod secrets;
mod storage;
mod tagger;

pub use challenge::{
    validate_token, ChallengeStore, FileChallengeStore, MemoryChallengeStore,
    ACME_CHALLENGE_PREFIX,
};
pub use client::{
    decode_credentials, encode_credentials, AcmeOrder, AcmeService, AuthorizationInfo,
    AuthorizationState, ChallengeOffer, Http01Challenge, InstantAcmeService, HTTP01,
};
pub use error::{AcmeError, AcmeResult, StorageError, StorageResult};
pub use order::{build_csr, split_chain, IssuedCertificate, OrderOrchestrator};
pub use poller::{
    ChallengeProbe, HttpProbe, PollPolicy, ProbeError, ValidationPoller, ATTEMPT_DELAY,
    MAX_ATTEMPTS, PROBE_TIMEOUT,
};
pub use scheduler::{
    renewal_horizon, RenewalReport, RenewalScanner, RenewalScheduler, DEFAULT_CHECK_INTERVAL,
    RENEWAL_HORIZON_DAYS,
};
pub use secrets::{FileSecretSource, SecretSource};
pub use storage::{
    CertificateStore, FileCertificateStore, ImportRequest, MemoryCertificateStore,
    StoredCertificate, TagQuery, TaggedResource, CERTIFICATE_RESOURCE_TYPE,
};
pub use tagger::CertificateTagger;
