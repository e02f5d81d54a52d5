use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Issuer recorded when a certificate names neither an organization nor a
/// common name
pub const UNKNOWN_ISSUER: &str = "Unknown";

/// State derived from a captured peer certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateDetails {
    /// `now` lies inside `[valid_from, valid_to]`
    pub valid: bool,
    /// Whole days left before `valid_to`; 0 once it has passed
    pub days_until_expires: i64,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub issuer: String,
}

impl CertificateDetails {
    /// Derive validity and remaining days from the certificate window at `now`
    pub fn evaluate(
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
        issuer: String,
        now: DateTime<Utc>,
    ) -> Self {
        let valid = not_before <= now && now <= not_after;
        // num_days truncates toward zero, which is floor for a non-negative span
        let days_until_expires = if now <= not_after { (not_after - now).num_days() } else { 0 };

        Self { valid, days_until_expires, valid_from: not_before, valid_to: not_after, issuer }
    }
}

/// Result of one certificate probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CertificateOutcome {
    /// A certificate was captured and parsed; it may still be outside its
    /// validity window
    Captured(CertificateDetails),
    /// Nothing usable came back
    Failed { error: String },
}

impl CertificateOutcome {
    pub fn failed(error: impl std::fmt::Display) -> Self {
        CertificateOutcome::Failed { error: error.to_string() }
    }

    pub fn valid(&self) -> bool {
        matches!(self, CertificateOutcome::Captured(details) if details.valid)
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            CertificateOutcome::Captured(_) => None,
            CertificateOutcome::Failed { error } => Some(error),
        }
    }

    /// `!valid || error_message.is_some()`
    pub fn check_failed(&self) -> bool {
        !self.valid() || self.error_message().is_some()
    }

    pub fn details(&self) -> Option<&CertificateDetails> {
        match self {
            CertificateOutcome::Captured(details) => Some(details),
            CertificateOutcome::Failed { .. } => None,
        }
    }
}

/// Result of one DNS probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DnsOutcome {
    Resolved { resolved_ip: String, resolve_time_ms: f64 },
    Failed { error: String },
}

impl DnsOutcome {
    pub fn failed(error: impl std::fmt::Display) -> Self {
        DnsOutcome::Failed { error: error.to_string() }
    }

    pub fn check_failed(&self) -> bool {
        matches!(self, DnsOutcome::Failed { .. })
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            DnsOutcome::Resolved { .. } => None,
            DnsOutcome::Failed { error } => Some(error),
        }
    }

    pub fn resolved_ip(&self) -> Option<&str> {
        match self {
            DnsOutcome::Resolved { resolved_ip, .. } => Some(resolved_ip),
            DnsOutcome::Failed { .. } => None,
        }
    }

    pub fn resolve_time_ms(&self) -> Option<f64> {
        match self {
            DnsOutcome::Resolved { resolve_time_ms, .. } => Some(*resolve_time_ms),
            DnsOutcome::Failed { .. } => None,
        }
    }
}

/// Elapsed time in milliseconds, rounded to two decimals
pub fn round_millis(elapsed: Duration) -> f64 {
    (elapsed.as_micros() as f64 / 10.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 10, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_expired_certificate_reports_zero_days() {
        let now = now();
        let details = CertificateDetails::evaluate(
            now - ChronoDuration::days(365),
            now - ChronoDuration::days(1),
            "Let's Encrypt".to_string(),
            now,
        );

        assert!(!details.valid);
        assert_eq!(details.days_until_expires, 0);

        let outcome = CertificateOutcome::Captured(details);
        assert!(outcome.check_failed());
        assert_eq!(outcome.error_message(), None);
    }

    #[test]
    fn test_days_until_expires_floors_partial_days() {
        let now = now();
        let details = CertificateDetails::evaluate(
            now - ChronoDuration::days(30),
            now + ChronoDuration::days(47) + ChronoDuration::hours(23),
            "Sectigo Limited".to_string(),
            now,
        );

        assert!(details.valid);
        assert_eq!(details.days_until_expires, 47);
        assert!(!CertificateOutcome::Captured(details).check_failed());
    }

    #[test]
    fn test_not_yet_valid_certificate() {
        let now = now();
        let details = CertificateDetails::evaluate(
            now + ChronoDuration::days(1),
            now + ChronoDuration::days(90),
            "Example CA".to_string(),
            now,
        );

        assert!(!details.valid);
        assert_eq!(details.days_until_expires, 90);
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let now = now();
        assert!(CertificateDetails::evaluate(now, now, "CA".to_string(), now).valid);
        assert_eq!(CertificateDetails::evaluate(now, now, "CA".to_string(), now).days_until_expires, 0);
    }

    #[test]
    fn test_dns_outcome_accessors() {
        let ok = DnsOutcome::Resolved { resolved_ip: "93.184.216.34".to_string(), resolve_time_ms: 12.34 };
        assert!(!ok.check_failed());
        assert_eq!(ok.resolve_time_ms(), Some(12.34));

        let failed = DnsOutcome::failed("No nameservers available");
        assert!(failed.check_failed());
        assert_eq!(failed.resolved_ip(), None);
        assert_eq!(failed.resolve_time_ms(), None);
    }

    #[test]
    fn test_round_millis() {
        assert_eq!(round_millis(Duration::from_micros(12_346)), 12.35);
        assert_eq!(round_millis(Duration::from_micros(12_344)), 12.34);
        assert_eq!(round_millis(Duration::ZERO), 0.0);
    }
}
