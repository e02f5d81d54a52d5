/// Probe implementations - one per probe family
///
/// Every probe turns its failures into an outcome value; nothing escapes a
/// probe call as an error, so one bad target never aborts a cycle.
pub mod certificate;
pub mod dns;
pub mod types;

pub use certificate::{CertificateError, CertificateProbe};
pub use dns::{DnsError, DnsProbe};
pub use types::{CertificateDetails, CertificateOutcome, DnsOutcome};

use std::time::Duration;

/// Inspects the peer certificate presented on `domain:port`
#[async_trait::async_trait]
pub trait CertificateProber: Send + Sync {
    async fn check(&self, domain: &str, port: u16, timeout: Duration) -> CertificateOutcome;
}

/// Times an A lookup for `domain` sent to one specific resolver
#[async_trait::async_trait]
pub trait DnsProber: Send + Sync {
    async fn check(&self, domain: &str, dns_server: &str, timeout: Duration) -> DnsOutcome;
}
