use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::database::ResultStore;
use crate::guard::RunGuard;
use crate::probe::{CertificateProber, DnsProber};

/// The two independent probe families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeFamily {
    Certificate,
    Dns,
}

impl ProbeFamily {
    pub const ALL: [ProbeFamily; 2] = [ProbeFamily::Certificate, ProbeFamily::Dns];

    /// Key under which the family's run lock is stored
    pub fn lock_key(self) -> &'static str {
        match self {
            ProbeFamily::Certificate => "cert-family",
            ProbeFamily::Dns => "dns-family",
        }
    }
}

impl fmt::Display for ProbeFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeFamily::Certificate => write!(f, "certificate"),
            ProbeFamily::Dns => write!(f, "dns"),
        }
    }
}

impl FromStr for ProbeFamily {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cert" | "certs" | "certificate" | "certificates" | "ssl" => Ok(ProbeFamily::Certificate),
            "dns" => Ok(ProbeFamily::Dns),
            other => Err(anyhow!("unknown probe family: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerSettings {
    /// Upper bound on how long a crashed cycle can block the next one
    pub lock_ttl: Duration,
    pub certificate_timeout: Duration,
    pub dns_timeout: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(300),
            certificate_timeout: Duration::from_secs(10),
            dns_timeout: Duration::from_secs(5),
        }
    }
}

/// Counts for one completed cycle.
///
/// `succeeded` and `failed` only count persisted outcomes, so
/// `checked == succeeded + failed + write_errors`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub checked: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Outcomes the store rejected; these attempts are lost for the cycle
    pub write_errors: usize,
}

impl CycleSummary {
    fn record(&mut self, check_failed: bool, stored: bool) {
        self.checked += 1;
        match (stored, check_failed) {
            (false, _) => self.write_errors += 1,
            (true, true) => self.failed += 1,
            (true, false) => self.succeeded += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleReport {
    /// Another caller owns the family lock
    Skipped,
    Completed(CycleSummary),
}

/// Drives one cycle of a probe family: acquire, probe every enabled target,
/// write each outcome through, release.
pub struct ProbeRunner {
    guard: RunGuard,
    store: Arc<dyn ResultStore>,
    certificates: Arc<dyn CertificateProber>,
    dns: Arc<dyn DnsProber>,
    settings: RunnerSettings,
}

impl ProbeRunner {
    pub fn new(
        guard: RunGuard,
        store: Arc<dyn ResultStore>,
        certificates: Arc<dyn CertificateProber>,
        dns: Arc<dyn DnsProber>,
        settings: RunnerSettings,
    ) -> Self {
        Self { guard, store, certificates, dns, settings }
    }

    /// Trigger check for the external tick loop
    pub async fn should_run(&self, family: ProbeFamily, enabled: bool) -> bool {
        enabled && !self.guard.is_held(family.lock_key()).await
    }

    /// Run one cycle for `family`, or skip it when another caller holds the
    /// lock. The lock is released on every exit path.
    pub async fn run_cycle(&self, family: ProbeFamily) -> Result<CycleReport> {
        let body = async {
            match family {
                ProbeFamily::Certificate => self.run_certificates().await,
                ProbeFamily::Dns => self.run_dns().await,
            }
        };

        match self.guard.scoped(family.lock_key(), self.settings.lock_ttl, body).await {
            None => {
                debug!(%family, "Cycle already running elsewhere, skipping");
                Ok(CycleReport::Skipped)
            }
            Some(result) => {
                let summary = result.with_context(|| format!("{family} cycle aborted"))?;
                info!(
                    %family,
                    checked = summary.checked,
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    write_errors = summary.write_errors,
                    "Cycle completed"
                );
                Ok(CycleReport::Completed(summary))
            }
        }
    }

    async fn run_certificates(&self) -> Result<CycleSummary> {
        let targets = self.store.enabled_certificate_targets().await.context("loading certificate targets")?;
        let mut summary = CycleSummary::default();

        for target in targets {
            let outcome = self
                .certificates
                .check(&target.domain, target.port, self.settings.certificate_timeout)
                .await;
            let stored = self.store.upsert_certificate(&target.domain, target.port, &outcome).await;
            if let Err(e) = &stored {
                error!(domain = %target.domain, port = target.port, error = %e, "Failed to store certificate outcome");
            }
            summary.record(outcome.check_failed(), stored.is_ok());
        }

        Ok(summary)
    }

    async fn run_dns(&self) -> Result<CycleSummary> {
        let targets = self.store.enabled_dns_targets().await.context("loading DNS targets")?;
        let mut summary = CycleSummary::default();

        for target in targets {
            let outcome = self.dns.check(&target.domain, &target.dns_server, self.settings.dns_timeout).await;
            let stored = self.store.upsert_dns(&target.domain, &target.dns_server, &outcome).await;
            if let Err(e) = &stored {
                error!(
                    domain = %target.domain,
                    dns_server = %target.dns_server,
                    error = %e,
                    "Failed to store DNS outcome"
                );
            }
            summary.record(outcome.check_failed(), stored.is_ok());
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, SystemClock};
    use crate::database::test_support::create_test_pool;
    use crate::database::{
        CertificateQuery, CertificateRecord, CertificateTarget, DnsQuery, DnsRecord, DnsTarget, SqlResultStore,
    };
    use crate::guard::MemoryLockStore;
    use crate::probe::{CertificateDetails, CertificateOutcome, DnsOutcome};
    use chrono::Utc;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Certificate prober that fails for `broken` and captures a 60 day
    /// certificate everywhere else
    struct FakeCertificates {
        broken: &'static str,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl CertificateProber for FakeCertificates {
        async fn check(&self, domain: &str, _port: u16, _timeout: Duration) -> CertificateOutcome {
            tokio::time::sleep(self.delay).await;
            if domain == self.broken {
                return CertificateOutcome::failed("connection failed: connection refused");
            }
            let now = Utc::now();
            CertificateOutcome::Captured(CertificateDetails::evaluate(
                now - chrono::Duration::days(30),
                now + chrono::Duration::days(60),
                "Example CA".to_string(),
                now,
            ))
        }
    }

    struct FakeDns;

    #[async_trait::async_trait]
    impl DnsProber for FakeDns {
        async fn check(&self, domain: &str, dns_server: &str, _timeout: Duration) -> DnsOutcome {
            if dns_server == "192.0.2.1" {
                return DnsOutcome::failed(format!("DNS query timeout after 5s for {domain}"));
            }
            DnsOutcome::Resolved { resolved_ip: "93.184.216.34".to_string(), resolve_time_ms: 12.34 }
        }
    }

    /// Prober that must never be reached
    struct Unreachable;

    #[async_trait::async_trait]
    impl CertificateProber for Unreachable {
        async fn check(&self, _domain: &str, _port: u16, _timeout: Duration) -> CertificateOutcome {
            panic!("prober invoked");
        }
    }

    /// Delegates to a real store, rejecting writes for one domain and
    /// optionally failing target enumeration
    struct FlakyStore {
        inner: SqlResultStore,
        reject_writes_for: &'static str,
        fail_enumeration: bool,
        writes: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl ResultStore for FlakyStore {
        async fn enabled_certificate_targets(&self) -> Result<Vec<CertificateTarget>> {
            if self.fail_enumeration {
                return Err(anyhow!("database is locked"));
            }
            self.inner.enabled_certificate_targets().await
        }

        async fn enabled_dns_targets(&self) -> Result<Vec<DnsTarget>> {
            self.inner.enabled_dns_targets().await
        }

        async fn upsert_certificate(&self, domain: &str, port: u16, outcome: &CertificateOutcome) -> Result<()> {
            self.writes.lock().unwrap().push(domain.to_string());
            if domain == self.reject_writes_for {
                return Err(anyhow!("disk I/O error"));
            }
            self.inner.upsert_certificate(domain, port, outcome).await
        }

        async fn upsert_dns(&self, domain: &str, dns_server: &str, outcome: &DnsOutcome) -> Result<()> {
            self.inner.upsert_dns(domain, dns_server, outcome).await
        }

        async fn register_certificate_target(&self, target: &CertificateTarget) -> Result<bool> {
            self.inner.register_certificate_target(target).await
        }

        async fn register_dns_target(&self, target: &DnsTarget) -> Result<bool> {
            self.inner.register_dns_target(target).await
        }

        async fn certificate(&self, domain: &str) -> Result<Option<CertificateRecord>> {
            self.inner.certificate(domain).await
        }

        async fn dns_record(&self, domain: &str, dns_server: &str) -> Result<Option<DnsRecord>> {
            self.inner.dns_record(domain, dns_server).await
        }

        async fn list_certificates(&self, query: &CertificateQuery) -> Result<Vec<CertificateRecord>> {
            self.inner.list_certificates(query).await
        }

        async fn list_dns(&self, query: &DnsQuery) -> Result<Vec<DnsRecord>> {
            self.inner.list_dns(query).await
        }
    }

    struct Fixture {
        store: Arc<FlakyStore>,
        guard: RunGuard,
        _dir: TempDir,
    }

    async fn fixture(reject_writes_for: &'static str, fail_enumeration: bool) -> Result<Fixture> {
        let (pool, dir) = create_test_pool().await?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let inner = SqlResultStore::new(pool, clock.clone());

        for domain in ["a.example", "b.example", "c.example", "d.example"] {
            inner.register_certificate_target(&CertificateTarget::new(domain)).await?;
        }
        inner.register_certificate_target(&CertificateTarget::new("off.example").disabled()).await?;
        inner.register_dns_target(&DnsTarget::new("example.com", "8.8.8.8")).await?;
        inner.register_dns_target(&DnsTarget::new("example.com", "192.0.2.1")).await?;

        let store = Arc::new(FlakyStore {
            inner,
            reject_writes_for,
            fail_enumeration,
            writes: Mutex::new(Vec::new()),
        });
        let guard = RunGuard::new(Arc::new(MemoryLockStore::new(clock)));
        Ok(Fixture { store, guard, _dir: dir })
    }

    fn runner(fixture: &Fixture, certificates: Arc<dyn CertificateProber>) -> ProbeRunner {
        ProbeRunner::new(
            fixture.guard.clone(),
            fixture.store.clone(),
            certificates,
            Arc::new(FakeDns),
            RunnerSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_failing_target_does_not_stop_the_cycle() -> Result<()> {
        let fixture = fixture("", false).await?;
        let runner = runner(&fixture, Arc::new(FakeCertificates { broken: "b.example", delay: Duration::ZERO }));

        let report = runner.run_cycle(ProbeFamily::Certificate).await?;
        assert_eq!(
            report,
            CycleReport::Completed(CycleSummary { checked: 4, succeeded: 3, failed: 1, write_errors: 0 })
        );

        for domain in ["a.example", "b.example", "c.example", "d.example"] {
            let record = fixture.store.certificate(domain).await?.unwrap();
            assert_eq!(record.check_count, 1, "{domain} was not written");
        }
        let broken = fixture.store.certificate("b.example").await?.unwrap();
        assert!(broken.check_failed);
        assert_eq!(broken.error_message.as_deref(), Some("connection failed: connection refused"));

        let disabled = fixture.store.certificate("off.example").await?.unwrap();
        assert_eq!(disabled.check_count, 0);
        assert!(!fixture.guard.is_held(ProbeFamily::Certificate.lock_key()).await);
        Ok(())
    }

    #[tokio::test]
    async fn test_store_error_is_counted_and_skipped() -> Result<()> {
        let fixture = fixture("c.example", false).await?;
        let runner = runner(&fixture, Arc::new(FakeCertificates { broken: "", delay: Duration::ZERO }));

        let report = runner.run_cycle(ProbeFamily::Certificate).await?;
        assert_eq!(
            report,
            CycleReport::Completed(CycleSummary { checked: 4, succeeded: 3, failed: 0, write_errors: 1 })
        );
        assert_eq!(fixture.store.writes.lock().unwrap().len(), 4);
        assert_eq!(fixture.store.certificate("d.example").await?.unwrap().check_count, 1);
        assert_eq!(fixture.store.certificate("c.example").await?.unwrap().check_count, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_rejected_failure_is_not_counted_as_failed() -> Result<()> {
        let fixture = fixture("c.example", false).await?;
        let runner = runner(&fixture, Arc::new(FakeCertificates { broken: "c.example", delay: Duration::ZERO }));

        let report = runner.run_cycle(ProbeFamily::Certificate).await?;
        assert_eq!(
            report,
            CycleReport::Completed(CycleSummary { checked: 4, succeeded: 3, failed: 0, write_errors: 1 })
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_dns_cycle_records_failures() -> Result<()> {
        let fixture = fixture("", false).await?;
        let runner = runner(&fixture, Arc::new(Unreachable));

        let report = runner.run_cycle(ProbeFamily::Dns).await?;
        assert_eq!(
            report,
            CycleReport::Completed(CycleSummary { checked: 2, succeeded: 1, failed: 1, write_errors: 0 })
        );

        let ok = fixture.store.dns_record("example.com", "8.8.8.8").await?.unwrap();
        assert!(!ok.check_failed);
        assert_eq!(ok.resolve_time_ms, Some(12.34));

        let failed = fixture.store.dns_record("example.com", "192.0.2.1").await?.unwrap();
        assert!(failed.check_failed);
        assert_eq!(failed.resolved_ip, None);
        assert_eq!(failed.resolve_time_ms, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_held_lock_skips_without_probing() -> Result<()> {
        let fixture = fixture("", false).await?;
        let runner = runner(&fixture, Arc::new(Unreachable));
        let key = ProbeFamily::Certificate.lock_key();

        assert!(fixture.guard.try_acquire(key, Duration::from_secs(300)).await);
        assert!(!runner.should_run(ProbeFamily::Certificate, true).await);
        assert_eq!(runner.run_cycle(ProbeFamily::Certificate).await?, CycleReport::Skipped);

        // The skipped cycle must not release someone else's lock
        assert!(fixture.guard.is_held(key).await);
        fixture.guard.release(key).await;
        assert!(runner.should_run(ProbeFamily::Certificate, true).await);
        assert!(!runner.should_run(ProbeFamily::Certificate, false).await);
        Ok(())
    }

    #[tokio::test]
    async fn test_enumeration_error_releases_lock() -> Result<()> {
        let fixture = fixture("", true).await?;
        let runner = runner(&fixture, Arc::new(Unreachable));

        let err = runner.run_cycle(ProbeFamily::Certificate).await.unwrap_err();
        assert!(format!("{err:#}").contains("database is locked"));
        assert!(!fixture.guard.is_held(ProbeFamily::Certificate.lock_key()).await);

        // DNS family is independent of the certificate failure
        assert!(matches!(runner.run_cycle(ProbeFamily::Dns).await?, CycleReport::Completed(_)));
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_triggers_run_one_cycle() -> Result<()> {
        let fixture = fixture("", false).await?;
        let certificates: Arc<dyn CertificateProber> =
            Arc::new(FakeCertificates { broken: "", delay: Duration::from_millis(50) });
        let first = runner(&fixture, certificates.clone());
        let second = runner(&fixture, certificates);

        let (a, b) = tokio::join!(first.run_cycle(ProbeFamily::Certificate), second.run_cycle(ProbeFamily::Certificate));
        let reports = [a?, b?];

        assert_eq!(reports.iter().filter(|r| **r == CycleReport::Skipped).count(), 1);
        assert_eq!(fixture.store.certificate("a.example").await?.unwrap().check_count, 1);
        Ok(())
    }

    #[test]
    fn test_family_names() {
        assert_eq!("certificates".parse::<ProbeFamily>().unwrap(), ProbeFamily::Certificate);
        assert_eq!("DNS".parse::<ProbeFamily>().unwrap(), ProbeFamily::Dns);
        assert!("http".parse::<ProbeFamily>().is_err());
        assert_eq!(ProbeFamily::Certificate.lock_key(), "cert-family");
    }
}
