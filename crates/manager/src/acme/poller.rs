//! Challenge reachability polling
//!
//! Before the ACME server is asked to validate a challenge, every domain of
//! the order must already serve the key authorization at
//! `http://{domain}/.well-known/acme-challenge/{token}`. ACME-side validation
//! attempts are rate limited; local checks are not.

use std::fmt::Debug;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use certward_common::DomainSet;

use super::challenge::{ChallengeStore, ACME_CHALLENGE_PREFIX};
use super::client::{AcmeOrder, Http01Challenge};
use super::error::{AcmeError, AcmeResult};

/// Reachability attempts per challenge
pub const MAX_ATTEMPTS: u32 = 5;
/// Delay before each attempt
pub const ATTEMPT_DELAY: Duration = Duration::from_secs(1);
/// Per-request timeout; keeps one slow domain inside the attempt cadence
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Network-level failure fetching a challenge response
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ProbeError(pub String);

/// Fetches what a domain currently serves for a challenge token
#[async_trait]
pub trait ChallengeProbe: Send + Sync + Debug {
    async fn fetch(&self, domain: &str, token: &str) -> Result<Vec<u8>, ProbeError>;
}

/// Plain-HTTP probe of the public well-known path
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    /// Probe with the standard per-request timeout
    pub fn new() -> AcmeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .map_err(|e| AcmeError::Protocol(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Probe using a caller-built client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn challenge_url(domain: &str, token: &str) -> String {
        format!("http://{}{}{}", domain, ACME_CHALLENGE_PREFIX, token)
    }
}

#[async_trait]
impl ChallengeProbe for HttpProbe {
    async fn fetch(&self, domain: &str, token: &str) -> Result<Vec<u8>, ProbeError> {
        let url = Self::challenge_url(domain, token);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProbeError(e.to_string()))?;

        trace!(url = %url, status = %response.status(), "Fetched challenge response");

        let body = response
            .bytes()
            .await
            .map_err(|e| ProbeError(e.to_string()))?;
        Ok(body.to_vec())
    }
}

/// Attempt budget for one challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            attempts: MAX_ATTEMPTS,
            delay: ATTEMPT_DELAY,
        }
    }
}

/// Result of checking one domain in one attempt
enum DomainCheck {
    Match,
    Mismatch,
    Failed(ProbeError),
}

/// Drives one challenge from "record written" to "validated by the server"
#[derive(Debug, Clone)]
pub struct ValidationPoller {
    store: Arc<dyn ChallengeStore>,
    probe: Arc<dyn ChallengeProbe>,
    policy: PollPolicy,
}

impl ValidationPoller {
    pub fn new(store: Arc<dyn ChallengeStore>, probe: Arc<dyn ChallengeProbe>) -> Self {
        Self::with_policy(store, probe, PollPolicy::default())
    }

    pub fn with_policy(
        store: Arc<dyn ChallengeStore>,
        probe: Arc<dyn ChallengeProbe>,
        policy: PollPolicy,
    ) -> Self {
        let policy = PollPolicy {
            attempts: policy.attempts.max(1),
            ..policy
        };
        Self {
            store,
            probe,
            policy,
        }
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Publish, confirm, validate, then remove the challenge record.
    ///
    /// The record is deleted on every exit path, including panics in the
    /// collaborators, before this returns or unwinds.
    pub async fn resolve(
        &self,
        challenge: &Http01Challenge,
        domains: &DomainSet,
        order: &dyn AcmeOrder,
    ) -> AcmeResult<()> {
        let outcome = AssertUnwindSafe(self.publish_and_validate(challenge, domains, order))
            .catch_unwind()
            .await;

        self.store.delete(&challenge.token).await;

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    async fn publish_and_validate(
        &self,
        challenge: &Http01Challenge,
        domains: &DomainSet,
        order: &dyn AcmeOrder,
    ) -> AcmeResult<()> {
        self.store
            .put(&challenge.token, &challenge.key_authorization)
            .await?;

        self.wait_until_served(challenge, domains).await?;

        order.validate(challenge).await
    }

    /// Poll every domain until all of them serve the key authorization
    pub async fn wait_until_served(
        &self,
        challenge: &Http01Challenge,
        domains: &DomainSet,
    ) -> AcmeResult<()> {
        let expected = challenge.key_authorization.as_bytes();
        let mut last_error = None;

        for attempt in 1..=self.policy.attempts {
            tokio::time::sleep(self.policy.delay).await;

            let checks = join_all(domains.iter().map(|domain| async move {
                let check = match self.probe.fetch(domain, &challenge.token).await {
                    Ok(body) if body == expected => DomainCheck::Match,
                    Ok(_) => DomainCheck::Mismatch,
                    Err(e) => DomainCheck::Failed(e),
                };
                (domain, check)
            }))
            .await;

            let mut failed = None;
            let mut mismatched = None;
            for (domain, check) in checks {
                match check {
                    DomainCheck::Match => {}
                    DomainCheck::Mismatch => {
                        mismatched.get_or_insert(domain);
                    }
                    DomainCheck::Failed(e) => {
                        failed.get_or_insert((domain, e));
                    }
                }
            }

            last_error = match (failed, mismatched) {
                (None, None) => {
                    info!(
                        token = %challenge.token,
                        domain = %challenge.domain,
                        attempt,
                        "Challenge response reachable on all domains"
                    );
                    return Ok(());
                }
                (Some((domain, e)), _) => {
                    debug!(
                        token = %challenge.token,
                        domain = %domain,
                        attempt,
                        error = %e,
                        "Challenge fetch failed"
                    );
                    Some(AcmeError::ChallengeProbe {
                        domain: domain.to_string(),
                        message: e.to_string(),
                    })
                }
                (None, Some(domain)) => {
                    debug!(
                        token = %challenge.token,
                        domain = %domain,
                        attempt,
                        "Challenge response not served yet"
                    );
                    Some(AcmeError::ChallengeUnreachable {
                        domain: domain.to_string(),
                    })
                }
            };
        }

        let err = last_error.unwrap_or_else(|| AcmeError::ChallengeUnreachable {
            domain: challenge.domain.clone(),
        });
        warn!(
            token = %challenge.token,
            attempts = self.policy.attempts,
            error = %err,
            "Giving up on challenge reachability"
        );
        Err(err)
    }
}
