//! Batch import of check results produced elsewhere.
//!
//! Accepts the `ssl_check.json` and `dns_check.json` report files written by
//! the standalone checker scripts. Every entry is turned into the same outcome
//! value a probe would produce and written through the same upsert, so an
//! imported record cannot be told apart from a probed one.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use tracing::{error, warn};

use crate::database::ResultStore;
use crate::probe::certificate::CertificateError;
use crate::probe::{CertificateDetails, CertificateOutcome, DnsOutcome};

/// One domain entry of `ssl_check.json`
#[derive(Debug, Deserialize)]
struct SslEntry {
    #[serde(default)]
    valid: Option<String>,
    #[serde(default)]
    days_until_expires: Option<i64>,
    #[serde(default)]
    valid_from: Option<String>,
    #[serde(default)]
    valid_to: Option<String>,
    #[serde(default)]
    issuer: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// One `(server, domain)` entry of `dns_check.json`
#[derive(Debug, Deserialize)]
struct DnsEntry {
    #[serde(default)]
    resolved_ip: Option<String>,
    #[serde(default)]
    resolve_time_ms: Option<f64>,
    #[serde(default)]
    error: Option<String>,
}

/// Counts for one import pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    /// Entries stored as failed checks
    pub failed: usize,
    pub write_errors: usize,
}

/// Accepts RFC 3339 as well as the naive ISO form (taken as UTC)
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(time) = DateTime::parse_from_rfc3339(value) {
        return Some(time.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

fn certificate_outcome(entry: SslEntry) -> CertificateOutcome {
    if let Some(error) = entry.error.filter(|e| !e.is_empty()) {
        return CertificateOutcome::Failed { error };
    }

    let window = entry
        .valid_from
        .as_deref()
        .and_then(parse_timestamp)
        .zip(entry.valid_to.as_deref().and_then(parse_timestamp));

    match window {
        Some((valid_from, valid_to)) => CertificateOutcome::Captured(CertificateDetails {
            valid: entry.valid.as_deref().is_some_and(|v| v.eq_ignore_ascii_case("yes")),
            days_until_expires: entry.days_until_expires.unwrap_or(0).max(0),
            valid_from,
            valid_to,
            issuer: entry.issuer.unwrap_or_else(|| crate::probe::types::UNKNOWN_ISSUER.to_string()),
        }),
        None => CertificateOutcome::failed(CertificateError::Certificate),
    }
}

fn dns_outcome(entry: DnsEntry) -> DnsOutcome {
    if let Some(error) = entry.error.filter(|e| !e.is_empty()) {
        return DnsOutcome::Failed { error };
    }

    match (entry.resolved_ip, entry.resolve_time_ms) {
        (Some(resolved_ip), Some(ms)) if ms >= 0.0 => DnsOutcome::Resolved { resolved_ip, resolve_time_ms: ms },
        _ => DnsOutcome::failed("No answer received from DNS server"),
    }
}

/// Decode an `ssl_check.json` report into per-domain outcomes
pub fn parse_certificate_report(contents: &str) -> Result<Vec<(String, CertificateOutcome)>> {
    let report: BTreeMap<String, SslEntry> =
        serde_json::from_str(contents).context("decoding certificate report")?;

    Ok(report
        .into_iter()
        .map(|(domain, entry)| (domain.trim().to_string(), certificate_outcome(entry)))
        .filter(|(domain, _)| !domain.is_empty())
        .collect())
}

/// Decode a `dns_check.json` report into `(domain, server)` outcomes
pub fn parse_dns_report(contents: &str) -> Result<Vec<(String, String, DnsOutcome)>> {
    let report: BTreeMap<String, BTreeMap<String, DnsEntry>> =
        serde_json::from_str(contents).context("decoding DNS report")?;

    let mut outcomes = Vec::new();
    for (server, domains) in report {
        for (domain, entry) in domains {
            outcomes.push((domain.trim().to_string(), server.trim().to_string(), dns_outcome(entry)));
        }
    }
    outcomes.retain(|(domain, server, _)| !domain.is_empty() && !server.is_empty());
    Ok(outcomes)
}

/// Import an `ssl_check.json` report. Known domains keep their stored port;
/// new ones get `default_port`.
pub async fn import_certificates(
    store: &dyn ResultStore,
    contents: &str,
    default_port: u16,
) -> Result<ImportSummary> {
    let mut summary = ImportSummary::default();

    for (domain, outcome) in parse_certificate_report(contents)? {
        let port = match store.certificate(&domain).await {
            Ok(existing) => existing.map_or(default_port, |record| record.port),
            Err(e) => {
                warn!(domain = %domain, error = %e, "Could not look up stored port, using default");
                default_port
            }
        };

        match store.upsert_certificate(&domain, port, &outcome).await {
            Ok(()) => {
                summary.imported += 1;
                if outcome.check_failed() {
                    summary.failed += 1;
                }
            }
            Err(e) => {
                error!(domain = %domain, error = %e, "Failed to import certificate result");
                summary.write_errors += 1;
            }
        }
    }

    Ok(summary)
}

/// Import a `dns_check.json` report
pub async fn import_dns(store: &dyn ResultStore, contents: &str) -> Result<ImportSummary> {
    let mut summary = ImportSummary::default();

    for (domain, server, outcome) in parse_dns_report(contents)? {
        match store.upsert_dns(&domain, &server, &outcome).await {
            Ok(()) => {
                summary.imported += 1;
                if outcome.check_failed() {
                    summary.failed += 1;
                }
            }
            Err(e) => {
                error!(domain = %domain, dns_server = %server, error = %e, "Failed to import DNS result");
                summary.write_errors += 1;
            }
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::database::test_support::create_test_pool;
    use crate::database::{CertificateTarget, SqlResultStore};
    use chrono::TimeZone;
    use std::sync::Arc;

    const SSL_REPORT: &str = r#"{
        "good.example": {
            "valid": "yes",
            "days_until_expires": 47,
            "valid_from": "2025-01-01T00:00:00",
            "valid_to": "2025-06-26T12:00:00",
            "issuer": "Sectigo Limited",
            "lastChecked": "2025-05-10T08:00:00.123456"
        },
        "down.example": {
            "valid": "no",
            "days_until_expires": null,
            "valid_from": null,
            "valid_to": null,
            "issuer": null,
            "lastChecked": "2025-05-10T08:00:01",
            "error": "Connection refused"
        },
        "blank.example": {
            "valid": "no",
            "lastChecked": "2025-05-10T08:00:02"
        }
    }"#;

    const DNS_REPORT: &str = r#"{
        "8.8.8.8": {
            "example.com": {"resolved_ip": "93.184.216.34", "resolve_time_ms": 12.34, "timestamp": "2025-05-10T08:00:00", "error": null},
            "missing.example": {"resolved_ip": null, "resolve_time_ms": null, "timestamp": "2025-05-10T08:00:00", "error": "Domain does not exist (NXDOMAIN)"}
        },
        "1.1.1.1": {
            "example.com": {"resolved_ip": "93.184.216.34", "resolve_time_ms": 8.1, "timestamp": "2025-05-10T08:00:00", "error": null}
        }
    }"#;

    #[test]
    fn test_parse_timestamp_forms() {
        let expected = Utc.with_ymd_and_hms(2025, 6, 26, 12, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2025-06-26T12:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2025-06-26T12:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2025-06-26T14:00:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("Jun 26 12:00:00 2025 GMT"), None);
    }

    #[test]
    fn test_certificate_report_outcomes() -> Result<()> {
        let outcomes: BTreeMap<_, _> = parse_certificate_report(SSL_REPORT)?.into_iter().collect();

        let good = outcomes["good.example"].details().unwrap();
        assert!(good.valid);
        assert_eq!(good.days_until_expires, 47);
        assert_eq!(good.issuer, "Sectigo Limited");

        assert_eq!(outcomes["down.example"].error_message(), Some("Connection refused"));
        assert_eq!(
            outcomes["blank.example"].error_message(),
            Some("failed to retrieve/parse certificate")
        );
        Ok(())
    }

    #[test]
    fn test_malformed_report_is_an_error() {
        assert!(parse_certificate_report("[1, 2, 3]").is_err());
        assert!(parse_dns_report("{\"8.8.8.8\": []}").is_err());
    }

    #[tokio::test]
    async fn test_import_writes_through_the_store() -> Result<()> {
        let (pool, _dir) = create_test_pool().await?;
        let store = SqlResultStore::new(pool, Arc::new(SystemClock));
        store.register_certificate_target(&CertificateTarget::new("good.example").with_port(8443)).await?;

        let summary = import_certificates(&store, SSL_REPORT, 443).await?;
        assert_eq!(summary, ImportSummary { imported: 3, failed: 2, write_errors: 0 });

        let good = store.certificate("good.example").await?.unwrap();
        assert_eq!(good.port, 8443);
        assert_eq!(good.check_count, 1);
        assert!(!good.check_failed);

        let down = store.certificate("down.example").await?.unwrap();
        assert_eq!(down.port, 443);
        assert!(down.check_failed);

        let summary = import_dns(&store, DNS_REPORT).await?;
        assert_eq!(summary, ImportSummary { imported: 3, failed: 1, write_errors: 0 });

        let ok = store.dns_record("example.com", "8.8.8.8").await?.unwrap();
        assert_eq!(ok.resolved_ip.as_deref(), Some("93.184.216.34"));
        assert!(!ok.check_failed);

        let missing = store.dns_record("missing.example", "8.8.8.8").await?.unwrap();
        assert!(missing.check_failed);
        assert_eq!(missing.resolve_time_ms, None);

        // Re-importing counts as another attempt
        import_dns(&store, DNS_REPORT).await?;
        assert_eq!(store.dns_record("example.com", "1.1.1.1").await?.unwrap().check_count, 2);
        Ok(())
    }
}
