//! probewatch - certificate and DNS probe-and-reconcile engine
//!
//! Probes TLS certificate state on `domain:port` targets and DNS resolution
//! latency against specific resolvers, then folds each outcome into a
//! persisted record keyed by its natural key.

pub mod clock;
pub mod database;
pub mod guard;
pub mod import;
pub mod pool;
pub mod probe;
pub mod runner;
pub mod targets;

// Re-export main types
pub use clock::{Clock, ManualClock, SystemClock};
pub use database::{ResultStore, SqlResultStore};
pub use guard::{LockStore, MemoryLockStore, RunGuard, SqlLockStore};
pub use probe::{CertificateOutcome, CertificateProbe, DnsOutcome, DnsProbe};
pub use runner::{CycleReport, CycleSummary, ProbeFamily, ProbeRunner, RunnerSettings};

/// Re-export common error types
pub use anyhow;

/// probewatch result type using anyhow for error handling
pub type Result<T> = anyhow::Result<T>;

/// Default TLS port for certificate targets
pub const DEFAULT_TLS_PORT: u16 = 443;

/// Default port for DNS resolvers given without one
pub const DEFAULT_DNS_PORT: u16 = 53;
