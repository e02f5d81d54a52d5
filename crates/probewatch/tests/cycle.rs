//! Full cycles against a real libsql file, a local TLS endpoint and a dead
//! resolver, wired the way the service wires them.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{TimeZone, Utc};
use probewatch::clock::{Clock, ManualClock};
use probewatch::database::{CertificateTarget, DnsTarget, ExpiryStatus, initialize_database};
use probewatch::pool::{LibsqlPool, open_pool};
use probewatch::{
    CertificateProbe, CycleReport, CycleSummary, DnsProbe, ProbeFamily, ProbeRunner, ResultStore, RunGuard,
    RunnerSettings, SqlLockStore, SqlResultStore,
};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

async fn database() -> Result<(LibsqlPool, TempDir)> {
    let dir = tempfile::tempdir()?;
    let pool = open_pool(dir.path().join("cycle.db")).await?;
    initialize_database(&*pool.get().await?).await?;
    Ok((pool, dir))
}

/// Serve a self-signed certificate issued by `org`, valid for 2025, on an
/// ephemeral port; accepts any number of handshakes
async fn tls_endpoint(org: &str) -> Result<u16> {
    let mut params = CertificateParams::new(vec!["localhost".to_string()])?;
    let mut name = DistinguishedName::new();
    name.push(DnType::OrganizationName, org);
    params.distinguished_name = name;
    params.not_before = rcgen::date_time_ymd(2025, 1, 1);
    params.not_after = rcgen::date_time_ymd(2025, 12, 31);
    let key = KeyPair::generate()?;
    let cert = params.self_signed(&key)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(
            vec![cert.der().clone()],
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der())),
        )?;
    let acceptor = TlsAcceptor::from(Arc::new(config));
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                if let Ok(mut tls) = acceptor.accept(stream).await {
                    let mut buf = [0u8; 16];
                    let _ = tls.read(&mut buf).await;
                }
            });
        }
    });

    Ok(port)
}

/// A port that refuses connections
async fn closed_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    Ok(listener.local_addr()?.port())
}

fn runner(pool: &LibsqlPool, clock: Arc<dyn Clock>, store: Arc<SqlResultStore>, holder: &str) -> Result<ProbeRunner> {
    let guard = RunGuard::new(Arc::new(SqlLockStore::new(pool.clone(), clock.clone()).with_holder(holder)));
    let settings = RunnerSettings {
        lock_ttl: Duration::from_secs(300),
        certificate_timeout: Duration::from_secs(3),
        dns_timeout: Duration::from_millis(500),
    };
    Ok(ProbeRunner::new(guard, store, Arc::new(CertificateProbe::new(clock)?), Arc::new(DnsProbe::new()), settings))
}

#[tokio::test]
async fn test_certificate_cycle_end_to_end() -> Result<()> {
    let (pool, _dir) = database().await?;
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 11, 1, 0, 0, 0).unwrap()));
    let store = Arc::new(SqlResultStore::new(pool.clone(), clock.clone()));

    let live = tls_endpoint("Sectigo Limited").await?;
    let dead = closed_port().await?;
    store.register_certificate_target(&CertificateTarget::new("127.0.0.1").with_port(live)).await?;
    store.register_certificate_target(&CertificateTarget::new("localhost").with_port(dead)).await?;

    let runner = runner(&pool, clock.clone(), store.clone(), "runner-a")?;
    let report = runner.run_cycle(ProbeFamily::Certificate).await?;
    assert_eq!(
        report,
        CycleReport::Completed(CycleSummary { checked: 2, succeeded: 1, failed: 1, write_errors: 0 })
    );

    let good = store.certificate("127.0.0.1").await?.unwrap();
    assert!(good.valid);
    assert!(!good.check_failed);
    assert_eq!(good.issuer.as_deref(), Some("Sectigo Limited"));
    assert_eq!(good.days_until_expires, Some(60));
    assert_eq!(good.expiry_status(clock.now()), ExpiryStatus::Valid);

    let down = store.certificate("localhost").await?.unwrap();
    assert!(down.check_failed);
    assert!(down.error_message.as_deref().unwrap().starts_with("connection failed:"));

    // Second cycle a year later: same rows, counters advanced, now expired
    clock.advance(chrono::Duration::days(365));
    runner.run_cycle(ProbeFamily::Certificate).await?;
    let good = store.certificate("127.0.0.1").await?.unwrap();
    assert_eq!(good.check_count, 2);
    assert!(!good.valid);
    assert_eq!(good.days_until_expires, Some(0));
    assert_eq!(good.expiry_status(clock.now()), ExpiryStatus::Expired);
    Ok(())
}

#[tokio::test]
async fn test_dns_cycle_against_dead_resolver() -> Result<()> {
    let (pool, _dir) = database().await?;
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()));
    let store = Arc::new(SqlResultStore::new(pool.clone(), clock.clone()));
    store.register_dns_target(&DnsTarget::new("example.com", "127.0.0.1:9")).await?;

    let runner = runner(&pool, clock, store.clone(), "runner-a")?;
    runner.run_cycle(ProbeFamily::Dns).await?;

    let record = store.dns_record("example.com", "127.0.0.1:9").await?.unwrap();
    assert!(record.check_failed);
    assert_eq!(record.resolved_ip, None);
    assert_eq!(record.resolve_time_ms, None);
    assert_eq!(record.check_count, 1);
    Ok(())
}

#[tokio::test]
async fn test_runners_sharing_a_database_exclude_each_other() -> Result<()> {
    let (pool, _dir) = database().await?;
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()));
    let store = Arc::new(SqlResultStore::new(pool.clone(), clock.clone()));

    let first = runner(&pool, clock.clone(), store.clone(), "runner-a")?;
    let second = runner(&pool, clock.clone(), store.clone(), "runner-b")?;

    // A crashed holder: lock taken and never released
    let crashed = RunGuard::new(Arc::new(SqlLockStore::new(pool.clone(), clock.clone()).with_holder("crashed")));
    assert!(crashed.try_acquire(ProbeFamily::Certificate.lock_key(), Duration::from_secs(300)).await);

    assert!(!first.should_run(ProbeFamily::Certificate, true).await);
    assert_eq!(second.run_cycle(ProbeFamily::Certificate).await?, CycleReport::Skipped);
    // The other family is unaffected
    assert!(first.should_run(ProbeFamily::Dns, true).await);

    clock.advance(chrono::Duration::seconds(301));
    assert!(first.should_run(ProbeFamily::Certificate, true).await);
    assert!(matches!(first.run_cycle(ProbeFamily::Certificate).await?, CycleReport::Completed(_)));
    Ok(())
}
