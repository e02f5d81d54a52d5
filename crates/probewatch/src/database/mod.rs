/// Persistence layer
///
/// One row per natural key: `domain` for certificates, `(domain, dns_server)`
/// for DNS checks. Probe outcomes are folded into those rows by upsert.

pub mod migrations;
pub mod models;
pub mod query;
pub mod repository;

pub use models::{CertificateRecord, CertificateTarget, DnsRecord, DnsTarget, ExpiryStatus};
pub use query::{
    CertificateFilter, CertificateQuery, CertificateSortField, DnsFilter, DnsQuery, DnsSortField, QueryError,
    SortDirection,
};
pub use repository::{ResultStore, SqlResultStore};

use anyhow::Result;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}
