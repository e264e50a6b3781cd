//! Certificate manager facade
//!
//! Wires the orchestrator, tagger and renewal scanner together for one
//! installation and exposes the two entry points: add a certificate for a
//! domain list, and renew whatever is close to expiry.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;

use certward_common::{CertificateHandle, DomainSet};
use certward_config::{Config, StorageConfig};

use crate::acme::{
    renewal_horizon, AcmeResult, AcmeService, CertificateTagger, ChallengeProbe, ChallengeStore,
    FileCertificateStore, FileChallengeStore, FileSecretSource, HttpProbe, InstantAcmeService,
    MemoryChallengeStore, OrderOrchestrator, RenewalReport, RenewalScanner, RenewalScheduler,
    ValidationPoller,
};

/// Result of asking for a certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueOutcome {
    /// A record for this domain set already exists; nothing was ordered
    Existing(CertificateHandle),
    /// A new certificate was issued and stored
    Issued {
        handle: CertificateHandle,
        expires_at: DateTime<Utc>,
    },
}

impl IssueOutcome {
    pub fn handle(&self) -> &CertificateHandle {
        match self {
            IssueOutcome::Existing(handle) => handle,
            IssueOutcome::Issued { handle, .. } => handle,
        }
    }
}

/// Challenge store selected by the storage configuration
///
/// A configured directory lets separate processes share records; without
/// one, records live in this process only.
pub fn challenge_store(config: &StorageConfig) -> AcmeResult<Arc<dyn ChallengeStore>> {
    Ok(match &config.challenges {
        Some(path) => Arc::new(FileChallengeStore::new(path)?),
        None => Arc::new(MemoryChallengeStore::new()),
    })
}

/// Certificate manager for one installation
#[derive(Debug, Clone)]
pub struct CertManager {
    orchestrator: Arc<OrderOrchestrator>,
    tagger: Arc<CertificateTagger>,
    scanner: Arc<RenewalScanner>,
    owner: String,
}

impl CertManager {
    pub fn new(orchestrator: OrderOrchestrator, tagger: CertificateTagger, owner: impl Into<String>) -> Self {
        let orchestrator = Arc::new(orchestrator);
        let tagger = Arc::new(tagger);
        let scanner = Arc::new(RenewalScanner::new(orchestrator.clone(), tagger.clone()));
        Self {
            orchestrator,
            tagger,
            scanner,
            owner: owner.into(),
        }
    }

    /// Assemble a manager from collaborators
    pub fn from_parts(
        acme: Arc<dyn AcmeService>,
        challenges: Arc<dyn ChallengeStore>,
        probe: Arc<dyn ChallengeProbe>,
        tagger: CertificateTagger,
        owner: impl Into<String>,
    ) -> Self {
        let poller = ValidationPoller::new(challenges, probe);
        Self::new(OrderOrchestrator::new(acme, poller), tagger, owner)
    }

    /// Build the production manager from configuration.
    ///
    /// The ACME account is loaded (or registered) before this returns.
    pub async fn connect(config: &Config, challenges: Arc<dyn ChallengeStore>) -> AcmeResult<Self> {
        let secrets = FileSecretSource::new(config.storage.account_secret_path());
        let acme = InstantAcmeService::connect(&config.acme.email, config.acme.staging, &secrets)
            .await?;
        let store = Arc::new(FileCertificateStore::new(&config.storage.certificates)?);

        info!(
            owner_tag = %config.owner_tag(),
            staging = config.acme.staging,
            "Certificate manager ready"
        );

        Ok(Self::from_parts(
            Arc::new(acme),
            challenges,
            Arc::new(HttpProbe::new()?),
            CertificateTagger::new(store),
            config.owner_tag(),
        ))
    }

    /// Owner tag stamped on managed records
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Ensure a certificate exists for the domain list.
    ///
    /// The list is canonicalized first; an existing record with the same
    /// name and owner short-circuits the order.
    pub async fn add_certificate<S: AsRef<str>>(&self, domains: &[S]) -> AcmeResult<IssueOutcome> {
        let domains = DomainSet::new(domains)?;
        let name = domains.name();

        if let Some(handle) = self.tagger.exists(&name, &self.owner).await? {
            info!(name = %name, handle = %handle, "Certificate already exists");
            return Ok(IssueOutcome::Existing(handle));
        }

        let issued = self.orchestrator.order_certificate(&domains).await?;
        let handle = self.tagger.save(&name, &issued, &self.owner, None).await?;

        Ok(IssueOutcome::Issued {
            handle,
            expires_at: issued.not_after(),
        })
    }

    /// Renew every owned certificate expiring within the renewal horizon
    pub async fn renew_certificates(&self, now: DateTime<Utc>) -> AcmeResult<RenewalReport> {
        self.scanner.scan(&self.owner, now, renewal_horizon()).await
    }

    /// Background scheduler running [`Self::renew_certificates`] periodically
    pub fn scheduler(&self, interval: Duration) -> RenewalScheduler {
        RenewalScheduler::new(self.scanner.clone(), self.owner.clone()).with_interval(interval)
    }
}
