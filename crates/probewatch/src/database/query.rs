//! Read-side selectors for stored records.
//!
//! Filters and sort fields are closed enums so only allow-listed columns ever
//! reach the generated SQL.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use libsql::Value;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::models::to_unix;

pub const DEFAULT_LIMIT: u32 = 100;
pub const MAX_LIMIT: u32 = 1000;

/// Upper bound on the `expiring` look-ahead window
const MAX_EXPIRING_DAYS: i64 = 36_500;

#[derive(Debug, Error, PartialEq)]
pub enum QueryError {
    #[error("unknown filter: {0}")]
    UnknownFilter(String),
    #[error("filter '{0}' requires a '{1}' parameter")]
    MissingParameter(&'static str, &'static str),
    #[error("invalid value for '{0}': must not be negative")]
    NegativeParameter(&'static str),
    #[error("unknown sort field: {0}")]
    UnknownSortField(String),
    #[error("unknown sort direction: {0}")]
    UnknownDirection(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    fn sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

impl FromStr for SortDirection {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            other => Err(QueryError::UnknownDirection(other.to_string())),
        }
    }
}

/// Certificate record selector
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum CertificateFilter {
    #[default]
    All,
    Valid,
    Invalid,
    /// `valid_to` falls between now and now + `days`
    Expiring { days: i64 },
    Failed,
}

impl CertificateFilter {
    /// Build a filter from its name and the optional `days` parameter
    pub fn parse(name: &str, days: Option<i64>) -> Result<Self, QueryError> {
        match name.to_ascii_lowercase().as_str() {
            "all" => Ok(CertificateFilter::All),
            "valid" => Ok(CertificateFilter::Valid),
            "invalid" => Ok(CertificateFilter::Invalid),
            "failed" => Ok(CertificateFilter::Failed),
            "expiring" => {
                let days = days.ok_or(QueryError::MissingParameter("expiring", "days"))?;
                if days < 0 {
                    return Err(QueryError::NegativeParameter("days"));
                }
                Ok(CertificateFilter::Expiring { days })
            }
            other => Err(QueryError::UnknownFilter(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CertificateSortField {
    #[default]
    Domain,
    DaysUntilExpires,
    ValidTo,
    Issuer,
    LastChecked,
    CheckCount,
}

impl CertificateSortField {
    fn column(self) -> &'static str {
        match self {
            CertificateSortField::Domain => "domain",
            CertificateSortField::DaysUntilExpires => "days_until_expires",
            CertificateSortField::ValidTo => "valid_to",
            CertificateSortField::Issuer => "issuer",
            CertificateSortField::LastChecked => "last_checked",
            CertificateSortField::CheckCount => "check_count",
        }
    }
}

impl FromStr for CertificateSortField {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "domain" => Ok(CertificateSortField::Domain),
            "days_until_expires" => Ok(CertificateSortField::DaysUntilExpires),
            "valid_to" => Ok(CertificateSortField::ValidTo),
            "issuer" => Ok(CertificateSortField::Issuer),
            "last_checked" => Ok(CertificateSortField::LastChecked),
            "check_count" => Ok(CertificateSortField::CheckCount),
            other => Err(QueryError::UnknownSortField(other.to_string())),
        }
    }
}

/// DNS record selector
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum DnsFilter {
    #[default]
    All,
    Ok,
    Failed,
    /// Successful lookups slower than `threshold_ms`
    Slow { threshold_ms: f64 },
}

impl DnsFilter {
    pub fn parse(name: &str, threshold_ms: Option<f64>) -> Result<Self, QueryError> {
        match name.to_ascii_lowercase().as_str() {
            "all" => Ok(DnsFilter::All),
            "ok" => Ok(DnsFilter::Ok),
            "failed" => Ok(DnsFilter::Failed),
            "slow" => {
                let threshold_ms =
                    threshold_ms.ok_or(QueryError::MissingParameter("slow", "threshold"))?;
                if threshold_ms < 0.0 {
                    return Err(QueryError::NegativeParameter("threshold"));
                }
                Ok(DnsFilter::Slow { threshold_ms })
            }
            other => Err(QueryError::UnknownFilter(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DnsSortField {
    #[default]
    Domain,
    DnsServer,
    ResolveTimeMs,
    LastChecked,
    CheckCount,
}

impl DnsSortField {
    fn column(self) -> &'static str {
        match self {
            DnsSortField::Domain => "domain",
            DnsSortField::DnsServer => "dns_server",
            DnsSortField::ResolveTimeMs => "resolve_time_ms",
            DnsSortField::LastChecked => "last_checked",
            DnsSortField::CheckCount => "check_count",
        }
    }
}

impl FromStr for DnsSortField {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "domain" => Ok(DnsSortField::Domain),
            "dns_server" => Ok(DnsSortField::DnsServer),
            "resolve_time_ms" => Ok(DnsSortField::ResolveTimeMs),
            "last_checked" => Ok(DnsSortField::LastChecked),
            "check_count" => Ok(DnsSortField::CheckCount),
            other => Err(QueryError::UnknownSortField(other.to_string())),
        }
    }
}

fn clamp_limit(limit: u32) -> u32 {
    limit.clamp(1, MAX_LIMIT)
}

#[derive(Debug, Clone, PartialEq)]
pub struct CertificateQuery {
    pub filter: CertificateFilter,
    pub sort: CertificateSortField,
    pub direction: SortDirection,
    pub limit: u32,
}

impl Default for CertificateQuery {
    fn default() -> Self {
        Self {
            filter: CertificateFilter::All,
            sort: CertificateSortField::Domain,
            direction: SortDirection::Asc,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl CertificateQuery {
    /// WHERE/ORDER BY/LIMIT tail and its parameters, evaluated at `now`
    pub(crate) fn to_sql(&self, now: DateTime<Utc>) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let condition = match self.filter {
            CertificateFilter::All => "1 = 1",
            CertificateFilter::Valid => "valid = 1",
            CertificateFilter::Invalid => "valid = 0",
            CertificateFilter::Failed => "check_failed = 1",
            CertificateFilter::Expiring { days } => {
                params.push(Value::Integer(to_unix(now)));
                params.push(Value::Integer(to_unix(now + Duration::days(days.min(MAX_EXPIRING_DAYS)))));
                "valid_to IS NOT NULL AND valid_to >= ? AND valid_to <= ?"
            }
        };
        params.push(Value::Integer(i64::from(clamp_limit(self.limit))));

        let sql = format!(
            "WHERE {} ORDER BY {} {}, domain ASC LIMIT ?",
            condition,
            self.sort.column(),
            self.direction.sql()
        );
        (sql, params)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DnsQuery {
    pub filter: DnsFilter,
    pub sort: DnsSortField,
    pub direction: SortDirection,
    pub limit: u32,
}

impl Default for DnsQuery {
    fn default() -> Self {
        Self {
            filter: DnsFilter::All,
            sort: DnsSortField::Domain,
            direction: SortDirection::Asc,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl DnsQuery {
    pub(crate) fn to_sql(&self) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let condition = match self.filter {
            DnsFilter::All => "1 = 1",
            DnsFilter::Ok => "check_failed = 0",
            DnsFilter::Failed => "check_failed = 1",
            DnsFilter::Slow { threshold_ms } => {
                params.push(Value::Real(threshold_ms));
                "check_failed = 0 AND resolve_time_ms > ?"
            }
        };
        params.push(Value::Integer(i64::from(clamp_limit(self.limit))));

        let sql = format!(
            "WHERE {} ORDER BY {} {}, domain ASC, dns_server ASC LIMIT ?",
            condition,
            self.sort.column(),
            self.direction.sql()
        );
        (sql, params)
    }
}
