//! Certificate renewal
//!
//! [`RenewalScanner`] walks the records owned by this installation and
//! renews those expiring within the horizon. [`RenewalScheduler`] runs the
//! scan on a fixed cadence for long-running deployments.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{interval, Instant};
use tracing::{debug, error, info, warn};

use certward_common::{CertificateHandle, CertificateTags, DomainSet};

use super::error::{AcmeError, AcmeResult};
use super::order::OrderOrchestrator;
use super::tagger::CertificateTagger;

/// Renew certificates expiring within this many days
pub const RENEWAL_HORIZON_DAYS: i64 = 30;

/// Default check interval (12 hours)
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(12 * 3600);

/// Minimum check interval (1 hour)
const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(3600);

/// Renewal horizon as a chrono duration
pub fn renewal_horizon() -> chrono::Duration {
    chrono::Duration::days(RENEWAL_HORIZON_DAYS)
}

/// Per-record outcome of one scan
#[derive(Debug, Default)]
pub struct RenewalReport {
    /// Records renewed in place
    pub renewed: Vec<CertificateHandle>,
    /// Records not yet due
    pub not_due: Vec<CertificateHandle>,
    /// Records skipped for violating the tag schema
    pub anomalies: Vec<(CertificateHandle, AcmeError)>,
    /// Records whose renewal failed
    pub failed: Vec<(CertificateHandle, AcmeError)>,
}

impl RenewalReport {
    /// Whether every due record was renewed
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Scans owned certificate records and renews those close to expiry
#[derive(Debug, Clone)]
pub struct RenewalScanner {
    orchestrator: Arc<OrderOrchestrator>,
    tagger: Arc<CertificateTagger>,
}

impl RenewalScanner {
    pub fn new(orchestrator: Arc<OrderOrchestrator>, tagger: Arc<CertificateTagger>) -> Self {
        Self {
            orchestrator,
            tagger,
        }
    }

    /// Scan every record tagged with `owner`.
    ///
    /// Only listing the records can fail the scan; a bad or failing record is
    /// reported and the scan moves on.
    pub async fn scan(
        &self,
        owner: &str,
        now: DateTime<Utc>,
        horizon: chrono::Duration,
    ) -> AcmeResult<RenewalReport> {
        let records = self.tagger.list_owned(owner).await?;
        let mut report = RenewalReport::default();

        info!(
            owner = %owner,
            record_count = records.len(),
            "Checking certificates for renewal"
        );

        for record in records {
            let handle = record.handle;

            let tags = match CertificateTags::from_map(&record.tags) {
                Ok(tags) => tags,
                Err(e) => {
                    warn!(handle = %handle, error = %e, "Skipping certificate record with invalid tags");
                    report.anomalies.push((handle, e.into()));
                    continue;
                }
            };

            if !tags.is_due(now, horizon) {
                debug!(
                    handle = %handle,
                    name = %tags.name,
                    expires = %tags.expires_at,
                    "Certificate is still valid"
                );
                report.not_due.push(handle);
                continue;
            }

            info!(
                handle = %handle,
                name = %tags.name,
                expires = %tags.expires_at,
                "Certificate needs renewal"
            );

            match self.renew(&handle, &tags).await {
                Ok(()) => report.renewed.push(handle),
                Err(e) => {
                    error!(handle = %handle, name = %tags.name, error = %e, "Certificate renewal failed");
                    report.failed.push((handle, e));
                }
            }
        }

        info!(
            renewed = report.renewed.len(),
            not_due = report.not_due.len(),
            anomalies = report.anomalies.len(),
            failed = report.failed.len(),
            "Renewal scan complete"
        );
        Ok(report)
    }

    async fn renew(&self, handle: &CertificateHandle, tags: &CertificateTags) -> AcmeResult<()> {
        let start = Instant::now();

        let domains = DomainSet::from_name(&tags.name)?;
        let issued = self.orchestrator.order_certificate(&domains).await?;
        self.tagger
            .save(&tags.name, &issued, &tags.owner, Some(handle))
            .await?;

        info!(
            handle = %handle,
            elapsed_secs = start.elapsed().as_secs(),
            expires = %issued.not_after(),
            "Certificate renewal completed"
        );
        Ok(())
    }
}

/// Background certificate renewal scheduler
///
/// Runs the renewal scan at the configured interval until the task is
/// dropped.
#[derive(Debug)]
pub struct RenewalScheduler {
    scanner: Arc<RenewalScanner>,
    owner: String,
    check_interval: Duration,
}

impl RenewalScheduler {
    pub fn new(scanner: Arc<RenewalScanner>, owner: impl Into<String>) -> Self {
        Self {
            scanner,
            owner: owner.into(),
            check_interval: DEFAULT_CHECK_INTERVAL,
        }
    }

    /// Set the check interval
    ///
    /// The interval is clamped to a minimum of 1 hour to avoid
    /// excessive polling.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval.max(MIN_CHECK_INTERVAL);
        self
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// Run the renewal scheduler loop
    ///
    /// The first tick fires immediately.
    pub async fn run(self) {
        info!(
            check_interval_hours = self.check_interval.as_secs() / 3600,
            "Starting certificate renewal scheduler"
        );

        let mut interval = interval(self.check_interval);

        loop {
            interval.tick().await;

            debug!("Running scheduled certificate renewal check");

            match self
                .scanner
                .scan(&self.owner, Utc::now(), renewal_horizon())
                .await
            {
                Ok(report) if !report.is_clean() => {
                    warn!(failed = report.failed.len(), "Some certificates failed to renew");
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "Certificate renewal check failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::challenge::MemoryChallengeStore;
    use crate::acme::poller::ValidationPoller;
    use crate::acme::storage::{MemoryCertificateStore, StoredCertificate};
    use crate::testutil::{ScriptedAcme, ScriptedProbe};
    use certward_common::{format_expiry, TAG_CREATED_BY, TAG_EXPIRES_AT, TAG_NAME};
    use std::collections::BTreeMap;

    const OWNER: &str = "certward-prod";

    struct Fixture {
        acme: Arc<ScriptedAcme>,
        store: Arc<MemoryCertificateStore>,
        challenges: MemoryChallengeStore,
        scanner: RenewalScanner,
    }

    fn fixture() -> Fixture {
        let acme = Arc::new(ScriptedAcme::new());
        let challenges = MemoryChallengeStore::new();
        let probe = Arc::new(ScriptedProbe::serving(challenges.clone()));
        let store = Arc::new(MemoryCertificateStore::new());
        let orchestrator = Arc::new(OrderOrchestrator::new(
            acme.clone(),
            ValidationPoller::new(Arc::new(challenges.clone()), probe),
        ));
        let tagger = Arc::new(CertificateTagger::new(store.clone()));
        Fixture {
            acme,
            store,
            challenges,
            scanner: RenewalScanner::new(orchestrator, tagger),
        }
    }

    fn seed(store: &MemoryCertificateStore, tags: &[(&str, String)]) -> CertificateHandle {
        let handle = CertificateHandle::generate();
        store.insert(
            handle.clone(),
            StoredCertificate {
                certificate_pem: "old-leaf".to_string(),
                chain_pem: "old-chain".to_string(),
                private_key_pem: "old-key".to_string(),
                tags: tags
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect::<BTreeMap<_, _>>(),
            },
        );
        handle
    }

    fn seed_expiring(
        store: &MemoryCertificateStore,
        name: &str,
        expires_at: DateTime<Utc>,
    ) -> CertificateHandle {
        seed(
            store,
            &[
                (TAG_CREATED_BY, OWNER.to_string()),
                (TAG_NAME, name.to_string()),
                (TAG_EXPIRES_AT, format_expiry(expires_at)),
            ],
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_29_vs_31_days() {
        let f = fixture();
        let now = Utc::now();
        let due = seed_expiring(&f.store, "due.example.com", now + chrono::Duration::days(29));
        let fresh = seed_expiring(&f.store, "fresh.example.com", now + chrono::Duration::days(31));

        let report = f.scanner.scan(OWNER, now, renewal_horizon()).await.unwrap();

        assert_eq!(report.renewed, vec![due.clone()]);
        assert_eq!(report.not_due, vec![fresh.clone()]);
        assert_eq!(
            f.acme.ordered(),
            vec![DomainSet::new(["due.example.com"]).unwrap()]
        );
        assert_eq!(f.store.get(&fresh).unwrap().certificate_pem, "old-leaf");
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_keeps_handle_and_updates_expiry() {
        let f = fixture();
        let now = Utc::now();
        let handle = seed_expiring(
            &f.store,
            "a.example.com:b.example.com",
            now + chrono::Duration::days(5),
        );

        let report = f.scanner.scan(OWNER, now, renewal_horizon()).await.unwrap();
        assert_eq!(report.renewed, vec![handle.clone()]);
        assert_eq!(f.store.len(), 1);

        let record = f.store.get(&handle).unwrap();
        assert_ne!(record.certificate_pem, "old-leaf");
        assert_eq!(record.tags.get(TAG_CREATED_BY).unwrap(), OWNER);
        assert_eq!(record.tags.get(TAG_NAME).unwrap(), "a.example.com:b.example.com");

        let tags = CertificateTags::from_map(&record.tags).unwrap();
        assert!(!tags.is_due(now, renewal_horizon()));
        assert_eq!(f.challenges.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_anomalies_are_skipped() {
        let f = fixture();
        let now = Utc::now();
        let no_expiry = seed(
            &f.store,
            &[
                (TAG_CREATED_BY, OWNER.to_string()),
                (TAG_NAME, "a.example.com".to_string()),
            ],
        );
        let no_name = seed(
            &f.store,
            &[
                (TAG_CREATED_BY, OWNER.to_string()),
                (TAG_EXPIRES_AT, format_expiry(now)),
            ],
        );
        let good = seed_expiring(&f.store, "c.example.com", now + chrono::Duration::days(1));

        let report = f.scanner.scan(OWNER, now, renewal_horizon()).await.unwrap();

        let mut skipped: Vec<_> = report.anomalies.iter().map(|(h, _)| h.clone()).collect();
        skipped.sort();
        let mut expected = vec![no_expiry, no_name];
        expected.sort();
        assert_eq!(skipped, expected);
        assert!(report
            .anomalies
            .iter()
            .all(|(_, e)| matches!(e, AcmeError::RecordAnomaly(_))));
        assert_eq!(report.renewed, vec![good]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_failure_does_not_stop_scan() {
        let f = fixture();
        let now = Utc::now();
        f.acme.reject("bad.example.com");
        let bad = seed_expiring(&f.store, "bad.example.com", now + chrono::Duration::days(2));
        let good = seed_expiring(&f.store, "good.example.com", now + chrono::Duration::days(2));

        let report = f.scanner.scan(OWNER, now, renewal_horizon()).await.unwrap();

        assert_eq!(report.renewed, vec![good]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, bad);
        assert!(!report.is_clean());
        assert_eq!(f.store.get(&bad).unwrap().certificate_pem, "old-leaf");
        assert_eq!(f.challenges.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_other_owners_are_ignored() {
        let f = fixture();
        let now = Utc::now();
        seed(
            &f.store,
            &[
                (TAG_CREATED_BY, "certward-other".to_string()),
                (TAG_NAME, "x.example.com".to_string()),
                (TAG_EXPIRES_AT, format_expiry(now)),
            ],
        );

        let report = f.scanner.scan(OWNER, now, renewal_horizon()).await.unwrap();

        assert!(report.renewed.is_empty());
        assert!(report.not_due.is_empty());
        assert!(f.acme.ordered().is_empty());
    }

    #[test]
    fn test_interval_is_clamped() {
        let f = fixture();
        let scheduler = RenewalScheduler::new(Arc::new(f.scanner), OWNER)
            .with_interval(Duration::from_secs(60));
        assert_eq!(scheduler.check_interval(), MIN_CHECK_INTERVAL);

        let scheduler = scheduler.with_interval(Duration::from_secs(7200));
        assert_eq!(scheduler.check_interval(), Duration::from_secs(7200));
    }
}
