//! ACME collaborator seam and its `instant-acme` implementation
//!
//! The orchestrator only talks to [`AcmeService`] / [`AcmeOrder`]; wire-level
//! concerns (JWS, nonces, resource fetching) stay inside `instant-acme`.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, LetsEncrypt,
    NewAccount, NewOrder, Order, OrderStatus,
};
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace};

use certward_common::DomainSet;

use super::error::{AcmeError, AcmeResult};
use super::secrets::SecretSource;

/// Challenge type label for HTTP-01
pub const HTTP01: &str = "http-01";

/// Timeout for the ACME server to validate one challenge
const CHALLENGE_TIMEOUT: Duration = Duration::from_secs(120);
/// Timeout for certificate issuance after finalization
const FINALIZE_TIMEOUT: Duration = Duration::from_secs(60);
/// Interval between ACME status polls
const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Authorization state as reported by the ACME server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationState {
    Pending,
    Valid,
    Invalid,
}

/// A challenge offered for one authorization
#[derive(Debug, Clone)]
pub struct ChallengeOffer {
    /// Challenge type label (`http-01`, `dns-01`, ...)
    pub kind: String,
    pub token: String,
    pub key_authorization: String,
    pub url: String,
}

/// One per-domain authorization within an order
#[derive(Debug, Clone)]
pub struct AuthorizationInfo {
    pub domain: String,
    pub state: AuthorizationState,
    pub challenges: Vec<ChallengeOffer>,
}

impl AuthorizationInfo {
    /// The HTTP-01 challenge, if the server offered one
    pub fn http01(&self) -> Option<Http01Challenge> {
        self.challenges
            .iter()
            .find(|c| c.kind == HTTP01)
            .map(|c| Http01Challenge {
                domain: self.domain.clone(),
                token: c.token.clone(),
                key_authorization: c.key_authorization.clone(),
                url: c.url.clone(),
            })
    }

    /// Comma-separated list of offered challenge types
    pub fn offered_types(&self) -> String {
        if self.challenges.is_empty() {
            return "none".to_string();
        }
        self.challenges
            .iter()
            .map(|c| c.kind.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// An HTTP-01 challenge selected for fulfillment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Http01Challenge {
    /// Domain this challenge is for
    pub domain: String,
    /// Challenge token (appears in URL path)
    pub token: String,
    /// Key authorization (the response content)
    pub key_authorization: String,
    /// Challenge URL for validation notification
    pub url: String,
}

/// Account-level ACME operations
#[async_trait]
pub trait AcmeService: Send + Sync + Debug {
    /// Create an order for exactly these domains
    async fn new_order(&self, domains: &DomainSet) -> AcmeResult<Box<dyn AcmeOrder>>;
}

/// Operations on one in-flight order.
///
/// Methods take `&self` so per-domain validations can run concurrently
/// against the same order.
#[async_trait]
pub trait AcmeOrder: Send + Sync {
    /// Fetch the order's authorizations, one per domain
    async fn authorizations(&self) -> AcmeResult<Vec<AuthorizationInfo>>;

    /// Tell the server the challenge is ready and wait for its verdict
    async fn validate(&self, challenge: &Http01Challenge) -> AcmeResult<()>;

    /// Submit the CSR and return the issued chain (leaf first, PEM)
    async fn finalize(&self, csr_der: &[u8]) -> AcmeResult<String>;
}

// ============================================================================
// instant-acme implementation
// ============================================================================

/// [`AcmeService`] backed by an `instant-acme` account.
///
/// The account is fully initialized before the value exists; there is no
/// lazily created account to race against.
#[derive(Clone)]
pub struct InstantAcmeService {
    account: Account,
    staging: bool,
}

impl InstantAcmeService {
    /// Load the account from the secret source, or register a new one and
    /// store its credentials.
    pub async fn connect(
        email: &str,
        staging: bool,
        secrets: &dyn SecretSource,
    ) -> AcmeResult<Self> {
        if let Some(encoded) = secrets.fetch().await? {
            info!("Loading existing ACME account from secret store");
            let credentials = decode_credentials(&encoded)?;
            let account = Account::from_credentials(credentials)
                .await
                .map_err(|e| AcmeError::AccountCreation(e.to_string()))?;
            info!("ACME account loaded successfully");
            return Ok(Self { account, staging });
        }

        info!(email = %email, staging, "Creating new ACME account");

        let directory = if staging {
            LetsEncrypt::Staging
        } else {
            LetsEncrypt::Production
        };

        let contact = format!("mailto:{}", email);
        let (account, credentials) = Account::create(
            &NewAccount {
                contact: &[&contact],
                terms_of_service_agreed: true,
                only_return_existing: false,
            },
            directory.url(),
            None,
        )
        .await
        .map_err(|e| AcmeError::AccountCreation(e.to_string()))?;

        secrets.store(&encode_credentials(&credentials)?).await?;
        info!("ACME account created successfully");

        Ok(Self { account, staging })
    }
}

#[async_trait]
impl AcmeService for InstantAcmeService {
    async fn new_order(&self, domains: &DomainSet) -> AcmeResult<Box<dyn AcmeOrder>> {
        let identifiers: Vec<Identifier> = domains
            .iter()
            .map(|d| Identifier::Dns(d.to_string()))
            .collect();

        info!(domains = %domains, "Creating certificate order");

        let order = self
            .account
            .new_order(&NewOrder {
                identifiers: &identifiers,
            })
            .await
            .map_err(|e| AcmeError::OrderCreation(e.to_string()))?;

        Ok(Box::new(InstantOrder {
            order: Mutex::new(order),
        }))
    }
}

impl std::fmt::Debug for InstantAcmeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstantAcmeService")
            .field("staging", &self.staging)
            .finish()
    }
}

/// `instant-acme` order; the lock is only held for individual requests
struct InstantOrder {
    order: Mutex<Order>,
}

impl InstantOrder {
    async fn wait_for_status(&self, wanted: OrderStatus, timeout: Duration) -> AcmeResult<()> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            {
                let mut order = self.order.lock().await;
                let state = order.refresh().await?;

                match state.status {
                    OrderStatus::Valid => return Ok(()),
                    OrderStatus::Invalid => {
                        error!("Order became invalid");
                        return Err(AcmeError::OrderCreation("Order became invalid".to_string()));
                    }
                    ref status if *status == wanted => return Ok(()),
                    ref status => trace!(status = ?status, "Order not ready yet, waiting..."),
                }
            }

            if tokio::time::Instant::now() > deadline {
                return Err(AcmeError::Timeout(format!(
                    "Timed out waiting for order to become {:?}",
                    wanted
                )));
            }
            tokio::time::sleep(STATUS_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl AcmeOrder for InstantOrder {
    async fn authorizations(&self) -> AcmeResult<Vec<AuthorizationInfo>> {
        let mut order = self.order.lock().await;
        let authorizations = order
            .authorizations()
            .await
            .map_err(|e| AcmeError::OrderCreation(format!("Failed to get authorizations: {}", e)))?;

        let mut infos = Vec::with_capacity(authorizations.len());
        for authz in &authorizations {
            let domain = match &authz.identifier {
                Identifier::Dns(domain) => domain.clone(),
                #[allow(unreachable_patterns)]
                _ => continue,
            };

            let state = match authz.status {
                AuthorizationStatus::Valid => AuthorizationState::Valid,
                AuthorizationStatus::Pending => AuthorizationState::Pending,
                _ => AuthorizationState::Invalid,
            };

            let challenges = authz
                .challenges
                .iter()
                .map(|c| ChallengeOffer {
                    kind: challenge_kind(&c.r#type),
                    token: c.token.clone(),
                    key_authorization: order.key_authorization(c).as_str().to_string(),
                    url: c.url.clone(),
                })
                .collect();

            debug!(domain = %domain, status = ?authz.status, "Processing authorization");
            infos.push(AuthorizationInfo {
                domain,
                state,
                challenges,
            });
        }

        Ok(infos)
    }

    async fn validate(&self, challenge: &Http01Challenge) -> AcmeResult<()> {
        debug!(domain = %challenge.domain, url = %challenge.url, "Setting challenge ready");
        {
            let mut order = self.order.lock().await;
            order
                .set_challenge_ready(&challenge.url)
                .await
                .map_err(|e| AcmeError::Authorization {
                    domain: challenge.domain.clone(),
                    message: e.to_string(),
                })?;
        }

        let deadline = tokio::time::Instant::now() + CHALLENGE_TIMEOUT;
        loop {
            tokio::time::sleep(STATUS_POLL_INTERVAL).await;

            let authorizations = {
                let mut order = self.order.lock().await;
                order.authorizations().await?
            };

            let authz = authorizations.iter().find(|a| match &a.identifier {
                Identifier::Dns(domain) => *domain == challenge.domain,
                #[allow(unreachable_patterns)]
                _ => false,
            });

            let Some(authz) = authz else {
                return Err(AcmeError::Authorization {
                    domain: challenge.domain.clone(),
                    message: "authorization disappeared from order".to_string(),
                });
            };

            match authz.status {
                AuthorizationStatus::Valid => {
                    info!(domain = %challenge.domain, "Challenge validated");
                    return Ok(());
                }
                AuthorizationStatus::Pending => {
                    if tokio::time::Instant::now() > deadline {
                        return Err(AcmeError::Timeout(format!(
                            "Timed out waiting for validation of {}",
                            challenge.domain
                        )));
                    }
                    trace!(domain = %challenge.domain, "Authorization still pending");
                }
                ref status => {
                    let message = authz
                        .challenges
                        .iter()
                        .find(|c| c.url == challenge.url)
                        .and_then(|c| c.error.as_ref())
                        .map(|problem| problem.to_string())
                        .unwrap_or_else(|| format!("authorization {:?}", status));
                    return Err(AcmeError::Authorization {
                        domain: challenge.domain.clone(),
                        message,
                    });
                }
            }
        }
    }

    async fn finalize(&self, csr_der: &[u8]) -> AcmeResult<String> {
        self.wait_for_status(OrderStatus::Ready, CHALLENGE_TIMEOUT)
            .await?;

        info!("Finalizing certificate order");
        {
            let mut order = self.order.lock().await;
            order
                .finalize(csr_der)
                .await
                .map_err(|e| AcmeError::Finalization(format!("Failed to finalize order: {}", e)))?;
        }

        self.wait_for_status(OrderStatus::Valid, FINALIZE_TIMEOUT)
            .await
            .map_err(|e| match e {
                AcmeError::OrderCreation(message) => AcmeError::Finalization(message),
                other => other,
            })?;

        let mut order = self.order.lock().await;
        let chain = order
            .certificate()
            .await
            .map_err(|e| AcmeError::Finalization(format!("Failed to get certificate: {}", e)))?;

        chain.ok_or_else(|| AcmeError::Finalization("No certificate in response".to_string()))
    }
}

fn challenge_kind(kind: &ChallengeType) -> String {
    match kind {
        ChallengeType::Http01 => HTTP01.to_string(),
        ChallengeType::Dns01 => "dns-01".to_string(),
        ChallengeType::TlsAlpn01 => "tls-alpn-01".to_string(),
        #[allow(unreachable_patterns)]
        other => format!("{:?}", other),
    }
}

/// Encode account credentials for the secret store (base64 of the JSON form)
pub fn encode_credentials(credentials: &AccountCredentials) -> AcmeResult<String> {
    let json = serde_json::to_vec(credentials)
        .map_err(|e| AcmeError::Secret(format!("Failed to serialize credentials: {}", e)))?;
    Ok(STANDARD.encode(json))
}

/// Decode account credentials read from the secret store
pub fn decode_credentials(encoded: &str) -> AcmeResult<AccountCredentials> {
    let json = STANDARD
        .decode(encoded.trim())
        .map_err(|e| AcmeError::Secret(format!("Account key is not valid base64: {}", e)))?;
    serde_json::from_slice(&json)
        .map_err(|e| AcmeError::Secret(format!("Failed to deserialize credentials: {}", e)))
}
