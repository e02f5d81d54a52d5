use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;
use libsql::{Row, Value, params};

use super::models::{
    CertificateRecord, CertificateTarget, DnsRecord, DnsTarget, MAX_ALERT_DAYS_BEFORE, from_unix, to_unix,
};
use super::query::{CertificateQuery, DnsQuery};
use crate::clock::Clock;
use crate::pool::LibsqlPool;
use crate::probe::{CertificateOutcome, DnsOutcome};

const CERTIFICATE_COLUMNS: &str = "id, domain, port, valid, days_until_expires, valid_from, valid_to, issuer, \
     last_checked, check_count, error_message, check_failed, enabled, alert_on_expiring, alert_days_before, device";

const DNS_COLUMNS: &str = "id, domain, dns_server, resolved_ip, resolve_time_ms, last_checked, check_count, \
     error_message, check_failed, enabled, device";

/// Record store shared by the probe runner, the importer and the read server
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Certificate targets with `enabled = 1`
    async fn enabled_certificate_targets(&self) -> Result<Vec<CertificateTarget>>;

    /// DNS targets with `enabled = 1`
    async fn enabled_dns_targets(&self) -> Result<Vec<DnsTarget>>;

    /// Fold a certificate outcome into the record for `domain`
    async fn upsert_certificate(&self, domain: &str, port: u16, outcome: &CertificateOutcome) -> Result<()>;

    /// Fold a DNS outcome into the record for `(domain, dns_server)`
    async fn upsert_dns(&self, domain: &str, dns_server: &str, outcome: &DnsOutcome) -> Result<()>;

    /// Create a certificate target if its domain is unknown. Returns whether a
    /// row was created; existing rows are left untouched.
    async fn register_certificate_target(&self, target: &CertificateTarget) -> Result<bool>;

    /// Create a DNS target if its `(domain, dns_server)` pair is unknown
    async fn register_dns_target(&self, target: &DnsTarget) -> Result<bool>;

    async fn certificate(&self, domain: &str) -> Result<Option<CertificateRecord>>;

    async fn dns_record(&self, domain: &str, dns_server: &str) -> Result<Option<DnsRecord>>;

    async fn list_certificates(&self, query: &CertificateQuery) -> Result<Vec<CertificateRecord>>;

    async fn list_dns(&self, query: &DnsQuery) -> Result<Vec<DnsRecord>>;
}

/// libsql-backed record store
pub struct SqlResultStore {
    pool: LibsqlPool,
    clock: Arc<dyn Clock>,
}

impl SqlResultStore {
    pub fn new(pool: LibsqlPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> Result<deadpool::managed::Object<crate::pool::LibsqlManager>> {
        Ok(self.pool.get().await?)
    }
}

fn nullable<T: Into<Value>>(value: Option<T>) -> Value {
    value.map_or(Value::Null, Into::into)
}

fn certificate_from_row(row: &Row) -> Result<CertificateRecord> {
    Ok(CertificateRecord {
        id: row.get(0)?,
        domain: row.get(1)?,
        port: u16::try_from(row.get::<i64>(2)?)?,
        valid: row.get::<i64>(3)? != 0,
        days_until_expires: row.get(4)?,
        valid_from: row.get::<Option<i64>>(5)?.and_then(from_unix),
        valid_to: row.get::<Option<i64>>(6)?.and_then(from_unix),
        issuer: row.get(7)?,
        last_checked: row.get::<Option<i64>>(8)?.and_then(from_unix),
        check_count: row.get::<i64>(9)? as u64,
        error_message: row.get(10)?,
        check_failed: row.get::<i64>(11)? != 0,
        enabled: row.get::<i64>(12)? != 0,
        alert_on_expiring: row.get::<i64>(13)? != 0,
        alert_days_before: row.get(14)?,
        device: row.get(15)?,
    })
}

fn dns_from_row(row: &Row) -> Result<DnsRecord> {
    Ok(DnsRecord {
        id: row.get(0)?,
        domain: row.get(1)?,
        dns_server: row.get(2)?,
        resolved_ip: row.get(3)?,
        resolve_time_ms: row.get(4)?,
        last_checked: row.get::<Option<i64>>(5)?.and_then(from_unix),
        check_count: row.get::<i64>(6)? as u64,
        error_message: row.get(7)?,
        check_failed: row.get::<i64>(8)? != 0,
        enabled: row.get::<i64>(9)? != 0,
        device: row.get(10)?,
    })
}

#[async_trait]
impl ResultStore for SqlResultStore {
    async fn enabled_certificate_targets(&self) -> Result<Vec<CertificateTarget>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT domain, port, enabled, alert_on_expiring, alert_days_before, device
                 FROM certificates WHERE enabled = 1 ORDER BY domain",
                (),
            )
            .await?;

        let mut targets = Vec::new();
        while let Some(row) = rows.next().await? {
            targets.push(CertificateTarget {
                domain: row.get(0)?,
                port: u16::try_from(row.get::<i64>(1)?)?,
                enabled: row.get::<i64>(2)? != 0,
                alert_on_expiring: row.get::<i64>(3)? != 0,
                alert_days_before: row.get(4)?,
                device: row.get(5)?,
            });
        }
        Ok(targets)
    }

    async fn enabled_dns_targets(&self) -> Result<Vec<DnsTarget>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT domain, dns_server, enabled, device
                 FROM dns_checks WHERE enabled = 1 ORDER BY domain, dns_server",
                (),
            )
            .await?;

        let mut targets = Vec::new();
        while let Some(row) = rows.next().await? {
            targets.push(DnsTarget {
                domain: row.get(0)?,
                dns_server: row.get(1)?,
                enabled: row.get::<i64>(2)? != 0,
                device: row.get(3)?,
            });
        }
        Ok(targets)
    }

    async fn upsert_certificate(&self, domain: &str, port: u16, outcome: &CertificateOutcome) -> Result<()> {
        let now = to_unix(self.clock.now());
        let details = outcome.details();

        let values = vec![
            Value::from(domain.to_string()),
            Value::Integer(i64::from(port)),
            Value::Integer(i64::from(outcome.valid())),
            nullable(details.map(|d| d.days_until_expires)),
            nullable(details.map(|d| to_unix(d.valid_from))),
            nullable(details.map(|d| to_unix(d.valid_to))),
            nullable(details.map(|d| d.issuer.clone())),
            Value::Integer(now),
            nullable(outcome.error_message().map(str::to_string)),
            Value::Integer(i64::from(outcome.check_failed())),
        ];

        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO certificates (
                domain, port, valid, days_until_expires, valid_from, valid_to, issuer,
                last_checked, check_count, error_message, check_failed, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9, ?10, ?8, ?8)
             ON CONFLICT(domain) DO UPDATE SET
                port = excluded.port,
                valid = excluded.valid,
                days_until_expires = excluded.days_until_expires,
                valid_from = excluded.valid_from,
                valid_to = excluded.valid_to,
                issuer = excluded.issuer,
                last_checked = excluded.last_checked,
                check_count = certificates.check_count + 1,
                error_message = excluded.error_message,
                check_failed = excluded.check_failed,
                updated_at = excluded.updated_at",
            values,
        )
        .await?;

        Ok(())
    }

    async fn upsert_dns(&self, domain: &str, dns_server: &str, outcome: &DnsOutcome) -> Result<()> {
        let now = to_unix(self.clock.now());

        let values = vec![
            Value::from(domain.to_string()),
            Value::from(dns_server.to_string()),
            nullable(outcome.resolved_ip().map(str::to_string)),
            nullable(outcome.resolve_time_ms()),
            Value::Integer(now),
            nullable(outcome.error_message().map(str::to_string)),
            Value::Integer(i64::from(outcome.check_failed())),
        ];

        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO dns_checks (
                domain, dns_server, resolved_ip, resolve_time_ms, last_checked, check_count,
                error_message, check_failed, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7, ?5, ?5)
             ON CONFLICT(domain, dns_server) DO UPDATE SET
                resolved_ip = excluded.resolved_ip,
                resolve_time_ms = excluded.resolve_time_ms,
                last_checked = excluded.last_checked,
                check_count = dns_checks.check_count + 1,
                error_message = excluded.error_message,
                check_failed = excluded.check_failed,
                updated_at = excluded.updated_at",
            values,
        )
        .await?;

        Ok(())
    }

    async fn register_certificate_target(&self, target: &CertificateTarget) -> Result<bool> {
        if !(0..=MAX_ALERT_DAYS_BEFORE).contains(&target.alert_days_before) {
            bail!(
                "alert_days_before for {} must be within 0..={MAX_ALERT_DAYS_BEFORE}, got {}",
                target.domain,
                target.alert_days_before
            );
        }

        let now = to_unix(self.clock.now());
        let values = vec![
            Value::from(target.domain.clone()),
            Value::Integer(i64::from(target.port)),
            Value::Integer(i64::from(target.enabled)),
            Value::Integer(i64::from(target.alert_on_expiring)),
            Value::Integer(target.alert_days_before),
            nullable(target.device.clone()),
            Value::Integer(now),
        ];

        let conn = self.get_conn().await?;
        let changed = conn
            .execute(
                "INSERT OR IGNORE INTO certificates (
                    domain, port, enabled, alert_on_expiring, alert_days_before, device, created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                values,
            )
            .await?;
        Ok(changed == 1)
    }

    async fn register_dns_target(&self, target: &DnsTarget) -> Result<bool> {
        let now = to_unix(self.clock.now());
        let values = vec![
            Value::from(target.domain.clone()),
            Value::from(target.dns_server.clone()),
            Value::Integer(i64::from(target.enabled)),
            nullable(target.device.clone()),
            Value::Integer(now),
        ];

        let conn = self.get_conn().await?;
        let changed = conn
            .execute(
                "INSERT OR IGNORE INTO dns_checks (domain, dns_server, enabled, device, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                values,
            )
            .await?;
        Ok(changed == 1)
    }

    async fn certificate(&self, domain: &str) -> Result<Option<CertificateRecord>> {
        let conn = self.get_conn().await?;
        let sql = format!("SELECT {CERTIFICATE_COLUMNS} FROM certificates WHERE domain = ?");
        let mut rows = conn.query(&sql, params![domain]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(certificate_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn dns_record(&self, domain: &str, dns_server: &str) -> Result<Option<DnsRecord>> {
        let conn = self.get_conn().await?;
        let sql = format!("SELECT {DNS_COLUMNS} FROM dns_checks WHERE domain = ? AND dns_server = ?");
        let mut rows = conn.query(&sql, params![domain, dns_server]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(dns_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_certificates(&self, query: &CertificateQuery) -> Result<Vec<CertificateRecord>> {
        let (tail, values) = query.to_sql(self.clock.now());
        let sql = format!("SELECT {CERTIFICATE_COLUMNS} FROM certificates {tail}");

        let conn = self.get_conn().await?;
        let mut rows = conn.query(&sql, values).await?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(certificate_from_row(&row)?);
        }
        Ok(records)
    }

    async fn list_dns(&self, query: &DnsQuery) -> Result<Vec<DnsRecord>> {
        let (tail, values) = query.to_sql();
        let sql = format!("SELECT {DNS_COLUMNS} FROM dns_checks {tail}");

        let conn = self.get_conn().await?;
        let mut rows = conn.query(&sql, values).await?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(dns_from_row(&row)?);
        }
        Ok(records)
    }
}
