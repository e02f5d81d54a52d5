use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::DEFAULT_TLS_PORT;

/// Days before expiry at which a certificate counts as expiring, unless the
/// target overrides it
pub const DEFAULT_ALERT_DAYS_BEFORE: i64 = 30;

/// Upper bound on a target's alert window (ten years)
pub const MAX_ALERT_DAYS_BEFORE: i64 = 3650;

/// Convert a timestamp to unix seconds for storage
pub fn to_unix(time: DateTime<Utc>) -> i64 {
    time.timestamp()
}

/// Convert stored unix seconds back to a timestamp
pub fn from_unix(timestamp: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(timestamp, 0)
}

/// A certificate probe target, as registered by configuration or import
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateTarget {
    pub domain: String,
    pub port: u16,
    pub enabled: bool,
    pub alert_on_expiring: bool,
    pub alert_days_before: i64,
    pub device: Option<String>,
}

impl CertificateTarget {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            port: DEFAULT_TLS_PORT,
            enabled: true,
            alert_on_expiring: true,
            alert_days_before: DEFAULT_ALERT_DAYS_BEFORE,
            device: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }
}

/// A DNS probe target: one domain checked against one resolver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsTarget {
    pub domain: String,
    pub dns_server: String,
    pub enabled: bool,
    pub device: Option<String>,
}

impl DnsTarget {
    pub fn new(domain: impl Into<String>, dns_server: impl Into<String>) -> Self {
        Self { domain: domain.into(), dns_server: dns_server.into(), enabled: true, device: None }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }
}

/// Expiry state of a stored certificate, judged from `valid_to` alone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpiryStatus {
    Unknown,
    Expired,
    Expiring,
    Valid,
}

impl std::fmt::Display for ExpiryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpiryStatus::Unknown => write!(f, "unknown"),
            ExpiryStatus::Expired => write!(f, "expired"),
            ExpiryStatus::Expiring => write!(f, "expiring"),
            ExpiryStatus::Valid => write!(f, "valid"),
        }
    }
}

/// Persisted certificate state for one domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateRecord {
    pub id: i64,
    pub domain: String,
    pub port: u16,
    pub valid: bool,
    pub days_until_expires: Option<i64>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    pub issuer: Option<String>,
    pub last_checked: Option<DateTime<Utc>>,
    pub check_count: u64,
    pub error_message: Option<String>,
    pub check_failed: bool,
    pub enabled: bool,
    pub alert_on_expiring: bool,
    pub alert_days_before: i64,
    pub device: Option<String>,
}

impl CertificateRecord {
    /// Expiry state at `now`.
    ///
    /// `valid_to` is the only input; the stored day count is clamped at zero
    /// and cannot distinguish "expires today" from "expired last year".
    pub fn expiry_status(&self, now: DateTime<Utc>) -> ExpiryStatus {
        // Rows written by older tools may carry any integer here
        let alert_until = Duration::try_days(self.alert_days_before.clamp(0, MAX_ALERT_DAYS_BEFORE))
            .and_then(|window| now.checked_add_signed(window));

        match self.valid_to {
            None => ExpiryStatus::Unknown,
            Some(valid_to) if valid_to < now => ExpiryStatus::Expired,
            Some(valid_to) if alert_until.is_some_and(|limit| valid_to <= limit) => ExpiryStatus::Expiring,
            Some(_) => ExpiryStatus::Valid,
        }
    }
}

/// Persisted DNS state for one `(domain, dns_server)` pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsRecord {
    pub id: i64,
    pub domain: String,
    pub dns_server: String,
    pub resolved_ip: Option<String>,
    pub resolve_time_ms: Option<f64>,
    pub last_checked: Option<DateTime<Utc>>,
    pub check_count: u64,
    pub error_message: Option<String>,
    pub check_failed: bool,
    pub enabled: bool,
    pub device: Option<String>,
}

impl DnsRecord {
    /// Whether the last measured latency exceeds `threshold_ms`
    pub fn is_slow(&self, threshold_ms: f64) -> bool {
        self.resolve_time_ms.is_some_and(|ms| ms > threshold_ms)
    }
}
