//! Scripted collaborators for unit tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use rcgen::{CertificateParams, KeyPair};

use certward_common::DomainSet;

use crate::acme::{
    AcmeError, AcmeOrder, AcmeResult, AcmeService, AuthorizationInfo, AuthorizationState,
    ChallengeOffer, ChallengeProbe, ChallengeStore, Http01Challenge, MemoryChallengeStore,
    ProbeError, StorageError, StorageResult, HTTP01,
};

/// Token the scripted server hands out for a domain's HTTP-01 challenge
pub(crate) fn token_for(domain: &str) -> String {
    format!("tok-{}", domain.replace('.', "-"))
}

pub(crate) fn challenge_for(domain: &str, token: &str) -> Http01Challenge {
    Http01Challenge {
        domain: domain.to_string(),
        token: token.to_string(),
        key_authorization: format!("{}.thumbprint", token),
        url: format!("https://acme.test/chall/{}", token),
    }
}

fn self_signed(host: &str, days: i64) -> String {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::new(vec![host.to_string()]).unwrap();
    let not_after = (Utc::now() + chrono::Duration::days(days)).date_naive();
    params.not_after =
        rcgen::date_time_ymd(not_after.year(), not_after.month() as u8, not_after.day() as u8);
    params.self_signed(&key).unwrap().pem()
}

/// Leaf + one issuer, leaf expiring in roughly `days` days
pub(crate) fn test_chain(days: i64) -> String {
    format!(
        "{}{}",
        self_signed("leaf.example.com", days),
        self_signed("issuer.example.net", 3 * 365)
    )
}

/// Records whether a challenge record was live when the server validated it
#[derive(Debug, Clone)]
pub(crate) struct StoreBackedChallengeCheck {
    store: MemoryChallengeStore,
    present: Arc<AtomicUsize>,
}

impl StoreBackedChallengeCheck {
    pub(crate) fn new(store: &MemoryChallengeStore) -> Self {
        Self {
            store: store.clone(),
            present: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn observe(&self, token: &str) {
        if self.store.contains(token) {
            self.present.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub(crate) fn seen_present(&self) -> usize {
        self.present.load(Ordering::SeqCst)
    }
}

/// Challenge store whose backend is down: every write fails
#[derive(Debug, Default)]
pub(crate) struct UnavailableChallengeStore {
    deleted: Mutex<Vec<String>>,
}

impl UnavailableChallengeStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChallengeStore for UnavailableChallengeStore {
    async fn put(&self, _token: &str, _response: &str) -> StorageResult<()> {
        Err(StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "challenge table unreachable",
        )))
    }

    async fn get(&self, _token: &str) -> StorageResult<Option<String>> {
        Ok(None)
    }

    async fn delete(&self, token: &str) {
        self.deleted.lock().unwrap().push(token.to_string());
    }
}

// ============================================================================
// Scripted ACME server
// ============================================================================

#[derive(Debug, Default)]
struct ScriptState {
    rejected: HashSet<String>,
    panics: HashSet<String>,
    delays: HashMap<String, Duration>,
    offers: HashMap<String, Vec<String>>,
    valid: HashSet<String>,
    new_order_failure: Option<String>,
    validity_days: Option<i64>,
    check: Option<StoreBackedChallengeCheck>,
    ordered: Vec<DomainSet>,
    validated: Vec<String>,
    finalized: usize,
}

/// In-process ACME server whose behaviour is keyed by domain
#[derive(Debug, Default)]
pub(crate) struct ScriptedAcme {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedAcme {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on_validate(&self, check: StoreBackedChallengeCheck) {
        self.state.lock().unwrap().check = Some(check);
    }

    pub(crate) fn reject(&self, domain: &str) {
        self.state.lock().unwrap().rejected.insert(domain.to_string());
    }

    pub(crate) fn delay_validation(&self, domain: &str, delay: Duration) {
        self.state
            .lock()
            .unwrap()
            .delays
            .insert(domain.to_string(), delay);
    }

    pub(crate) fn offer_only(&self, domain: &str, kinds: &[&str]) {
        self.state.lock().unwrap().offers.insert(
            domain.to_string(),
            kinds.iter().map(|k| k.to_string()).collect(),
        );
    }

    pub(crate) fn already_valid(&self, domain: &str) {
        self.state.lock().unwrap().valid.insert(domain.to_string());
    }

    pub(crate) fn fail_new_order(&self, message: &str) {
        self.state.lock().unwrap().new_order_failure = Some(message.to_string());
    }

    pub(crate) fn issue_for_days(&self, days: i64) {
        self.state.lock().unwrap().validity_days = Some(days);
    }

    pub(crate) fn ordered(&self) -> Vec<DomainSet> {
        self.state.lock().unwrap().ordered.clone()
    }

    pub(crate) fn validated(&self) -> Vec<String> {
        self.state.lock().unwrap().validated.clone()
    }

    pub(crate) fn finalized(&self) -> usize {
        self.state.lock().unwrap().finalized
    }
}

#[async_trait]
impl AcmeService for ScriptedAcme {
    async fn new_order(&self, domains: &DomainSet) -> AcmeResult<Box<dyn AcmeOrder>> {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = &state.new_order_failure {
            return Err(AcmeError::OrderCreation(message.clone()));
        }
        state.ordered.push(domains.clone());

        Ok(Box::new(ScriptedOrder {
            domains: domains.hosts().to_vec(),
            state: self.state.clone(),
        }))
    }
}

/// Order handed out by [`ScriptedAcme`], or used on its own
#[derive(Debug, Default)]
pub(crate) struct ScriptedOrder {
    domains: Vec<String>,
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedOrder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reject(&self, domain: &str) {
        self.state.lock().unwrap().rejected.insert(domain.to_string());
    }

    pub(crate) fn panic_on(&self, domain: &str) {
        self.state.lock().unwrap().panics.insert(domain.to_string());
    }

    pub(crate) fn validated(&self) -> Vec<String> {
        self.state.lock().unwrap().validated.clone()
    }
}

#[async_trait]
impl AcmeOrder for ScriptedOrder {
    async fn authorizations(&self) -> AcmeResult<Vec<AuthorizationInfo>> {
        let state = self.state.lock().unwrap();

        Ok(self
            .domains
            .iter()
            .map(|domain| {
                let kinds = state
                    .offers
                    .get(domain)
                    .cloned()
                    .unwrap_or_else(|| vec![HTTP01.to_string()]);
                let challenges = kinds
                    .into_iter()
                    .map(|kind| {
                        let token = if kind == HTTP01 {
                            token_for(domain)
                        } else {
                            format!("{}-{}", token_for(domain), kind)
                        };
                        let template = challenge_for(domain, &token);
                        ChallengeOffer {
                            kind,
                            token,
                            key_authorization: template.key_authorization,
                            url: template.url,
                        }
                    })
                    .collect();

                AuthorizationInfo {
                    domain: domain.clone(),
                    state: if state.valid.contains(domain) {
                        AuthorizationState::Valid
                    } else {
                        AuthorizationState::Pending
                    },
                    challenges,
                }
            })
            .collect())
    }

    async fn validate(&self, challenge: &Http01Challenge) -> AcmeResult<()> {
        let (delay, rejected, panics) = {
            let mut state = self.state.lock().unwrap();
            state.validated.push(challenge.domain.clone());
            if let Some(check) = &state.check {
                check.observe(&challenge.token);
            }
            (
                state.delays.get(&challenge.domain).copied(),
                state.rejected.contains(&challenge.domain),
                state.panics.contains(&challenge.domain),
            )
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if panics {
            panic!("scripted validation panic for {}", challenge.domain);
        }
        if rejected {
            return Err(AcmeError::Authorization {
                domain: challenge.domain.clone(),
                message: "urn:ietf:params:acme:error:unauthorized".to_string(),
            });
        }
        Ok(())
    }

    async fn finalize(&self, csr_der: &[u8]) -> AcmeResult<String> {
        if csr_der.is_empty() {
            return Err(AcmeError::Finalization("empty CSR".to_string()));
        }
        let days = {
            let mut state = self.state.lock().unwrap();
            state.finalized += 1;
            state.validity_days.unwrap_or(90)
        };
        Ok(test_chain(days))
    }
}

// ============================================================================
// Scripted reachability probe
// ============================================================================

#[derive(Debug, Default)]
struct ProbeRules {
    mismatch_first: HashMap<String, usize>,
    fail_first: HashMap<String, usize>,
    always_mismatch: HashSet<String>,
    always_fail: HashSet<String>,
    mismatch_tokens: HashSet<String>,
}

enum Scripted {
    Fail,
    Stale,
    Serve,
}

/// Probe that answers from a challenge store, with scripted faults
#[derive(Debug)]
pub(crate) struct ScriptedProbe {
    store: MemoryChallengeStore,
    fetches: AtomicUsize,
    rules: Mutex<ProbeRules>,
}

impl ScriptedProbe {
    /// Every domain serves whatever the store holds
    pub(crate) fn serving(store: MemoryChallengeStore) -> Self {
        Self {
            store,
            fetches: AtomicUsize::new(0),
            rules: Mutex::new(ProbeRules::default()),
        }
    }

    pub(crate) fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub(crate) fn mismatch_first(&self, domain: &str, attempts: usize) {
        self.rules
            .lock()
            .unwrap()
            .mismatch_first
            .insert(domain.to_string(), attempts);
    }

    pub(crate) fn fail_first(&self, domain: &str, attempts: usize) {
        self.rules
            .lock()
            .unwrap()
            .fail_first
            .insert(domain.to_string(), attempts);
    }

    pub(crate) fn always_mismatch(&self, domain: &str) {
        self.rules
            .lock()
            .unwrap()
            .always_mismatch
            .insert(domain.to_string());
    }

    pub(crate) fn always_fail(&self, domain: &str) {
        self.rules
            .lock()
            .unwrap()
            .always_fail
            .insert(domain.to_string());
    }

    pub(crate) fn always_mismatch_token(&self, token: &str) {
        self.rules
            .lock()
            .unwrap()
            .mismatch_tokens
            .insert(token.to_string());
    }

    fn decide(&self, domain: &str, token: &str) -> Scripted {
        let mut rules = self.rules.lock().unwrap();

        if rules.always_fail.contains(domain) {
            return Scripted::Fail;
        }
        if let Some(remaining) = rules.fail_first.get_mut(domain) {
            if *remaining > 0 {
                *remaining -= 1;
                return Scripted::Fail;
            }
        }
        if rules.always_mismatch.contains(domain) || rules.mismatch_tokens.contains(token) {
            return Scripted::Stale;
        }
        if let Some(remaining) = rules.mismatch_first.get_mut(domain) {
            if *remaining > 0 {
                *remaining -= 1;
                return Scripted::Stale;
            }
        }
        Scripted::Serve
    }
}

#[async_trait]
impl ChallengeProbe for ScriptedProbe {
    async fn fetch(&self, domain: &str, token: &str) -> Result<Vec<u8>, ProbeError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        match self.decide(domain, token) {
            Scripted::Fail => Err(ProbeError("connection refused".to_string())),
            Scripted::Stale => Ok(b"stale".to_vec()),
            Scripted::Serve => match self.store.get(token).await {
                Ok(Some(response)) => Ok(response.into_bytes()),
                _ => Ok(b"Not Found".to_vec()),
            },
        }
    }
}
