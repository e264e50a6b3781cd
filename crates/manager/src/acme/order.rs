//! Certificate order orchestration
//!
//! One call drives one ACME order: create it, collect an HTTP-01 challenge
//! per authorization, resolve all challenges concurrently, then finalize with
//! a fresh key and CSR.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use pem::{EncodeConfig, LineEnding};
use rcgen::{CertificateParams, DistinguishedName, KeyPair};
use tracing::{debug, info, warn};

use certward_common::DomainSet;

use super::client::{AcmeService, AuthorizationState, Http01Challenge};
use super::error::{AcmeError, AcmeResult};
use super::poller::ValidationPoller;

/// A freshly issued certificate and its private key
#[derive(Clone)]
pub struct IssuedCertificate {
    chain_pem: String,
    key_pem: String,
    leaf_pem: String,
    issuers_pem: String,
    not_after: DateTime<Utc>,
}

impl IssuedCertificate {
    /// Split and inspect a chain as returned by the CA (leaf first)
    pub fn new(chain_pem: String, key_pem: String) -> AcmeResult<Self> {
        let (leaf_pem, issuers_pem, leaf_der) = split_chain(&chain_pem)?;
        let not_after = parse_not_after(&leaf_der)?;

        Ok(Self {
            chain_pem,
            key_pem,
            leaf_pem,
            issuers_pem,
            not_after,
        })
    }

    /// Full chain, leaf first
    pub fn chain_pem(&self) -> &str {
        &self.chain_pem
    }

    pub fn key_pem(&self) -> &str {
        &self.key_pem
    }

    /// Leaf certificate only
    pub fn leaf_pem(&self) -> &str {
        &self.leaf_pem
    }

    /// Issuer certificates only, leaf excluded
    pub fn issuers_pem(&self) -> &str {
        &self.issuers_pem
    }

    /// Leaf NotAfter
    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }
}

impl std::fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("not_after", &self.not_after)
            .field("chain_len", &self.chain_pem.len())
            .finish_non_exhaustive()
    }
}

/// Split a PEM chain into (leaf PEM, issuers PEM, leaf DER)
pub fn split_chain(chain_pem: &str) -> AcmeResult<(String, String, Vec<u8>)> {
    let blocks = pem::parse_many(chain_pem)
        .map_err(|e| AcmeError::CertificateParse(format!("Failed to parse PEM: {}", e)))?;

    let mut certs = blocks.into_iter().filter(|p| p.tag() == "CERTIFICATE");
    let leaf = certs
        .next()
        .ok_or_else(|| AcmeError::CertificateParse("No certificate in chain".to_string()))?;
    let issuers: Vec<pem::Pem> = certs.collect();

    let leaf_der = leaf.contents().to_vec();
    let config = || EncodeConfig::new().set_line_ending(LineEnding::LF);
    let issuers_pem = if issuers.is_empty() {
        String::new()
    } else {
        pem::encode_many_config(&issuers, config())
    };

    Ok((pem::encode_config(&leaf, config()), issuers_pem, leaf_der))
}

fn parse_not_after(der: &[u8]) -> AcmeResult<DateTime<Utc>> {
    let (_, cert) = x509_parser::parse_x509_certificate(der)
        .map_err(|e| AcmeError::CertificateParse(format!("Failed to parse certificate: {}", e)))?;

    let timestamp = cert.validity().not_after.timestamp();
    DateTime::from_timestamp(timestamp, 0)
        .ok_or_else(|| AcmeError::CertificateParse("Invalid expiry timestamp".to_string()))
}

/// Generate a fresh key and a CSR for exactly these domains
///
/// Returns (key PEM, CSR DER).
pub fn build_csr(domains: &DomainSet) -> AcmeResult<(String, Vec<u8>)> {
    let key = KeyPair::generate()
        .map_err(|e| AcmeError::Csr(format!("Failed to generate key: {}", e)))?;

    let mut params = CertificateParams::new(domains.hosts().to_vec())
        .map_err(|e| AcmeError::Csr(format!("Failed to create CSR params: {}", e)))?;
    params.distinguished_name = DistinguishedName::new();

    let csr = params
        .serialize_request(&key)
        .map_err(|e| AcmeError::Csr(format!("Failed to serialize CSR: {}", e)))?;

    Ok((key.serialize_pem(), csr.der().to_vec()))
}

/// Drives ACME orders end to end
#[derive(Debug, Clone)]
pub struct OrderOrchestrator {
    acme: Arc<dyn AcmeService>,
    poller: ValidationPoller,
}

impl OrderOrchestrator {
    pub fn new(acme: Arc<dyn AcmeService>, poller: ValidationPoller) -> Self {
        Self { acme, poller }
    }

    /// Order a certificate for the domain set.
    ///
    /// Every challenge record written during the order is gone by the time
    /// this returns, whether the order succeeded or not.
    pub async fn order_certificate(&self, domains: &DomainSet) -> AcmeResult<IssuedCertificate> {
        let order = self.acme.new_order(domains).await?;
        let authorizations = order.authorizations().await?;

        let mut challenges: Vec<Http01Challenge> = Vec::with_capacity(authorizations.len());
        for authz in &authorizations {
            match authz.state {
                AuthorizationState::Valid => {
                    debug!(domain = %authz.domain, "Authorization already valid");
                    continue;
                }
                AuthorizationState::Invalid => {
                    return Err(AcmeError::Authorization {
                        domain: authz.domain.clone(),
                        message: "authorization is no longer pending".to_string(),
                    });
                }
                AuthorizationState::Pending => {}
            }

            let challenge = authz
                .http01()
                .ok_or_else(|| AcmeError::UnsupportedChallengeType {
                    domain: authz.domain.clone(),
                    offered: authz.offered_types(),
                })?;
            challenges.push(challenge);
        }

        info!(
            domains = %domains,
            challenges = challenges.len(),
            "Resolving HTTP-01 challenges"
        );

        // All resolutions run to completion, so all records are deleted
        // before any failure is reported.
        let results = join_all(
            challenges
                .iter()
                .map(|challenge| self.poller.resolve(challenge, domains, order.as_ref())),
        )
        .await;

        let mut first_error = None;
        for (challenge, result) in challenges.iter().zip(results) {
            if let Err(e) = result {
                warn!(domain = %challenge.domain, error = %e, "Challenge failed");
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        let (key_pem, csr_der) = build_csr(domains)?;
        let chain_pem = order.finalize(&csr_der).await?;
        let issued = IssuedCertificate::new(chain_pem, key_pem)?;

        info!(
            domains = %domains,
            expires = %issued.not_after(),
            "Certificate issued successfully"
        );
        Ok(issued)
    }
}
