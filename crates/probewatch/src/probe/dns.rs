use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::proto::op::ResponseCode;
use thiserror::Error;
use tracing::warn;

use super::DnsProber;
use super::types::{DnsOutcome, round_millis};
use crate::DEFAULT_DNS_PORT;

#[derive(Debug, Error, PartialEq)]
pub enum DnsError {
    #[error("invalid DNS server address: {0}")]
    InvalidServer(String),
    #[error("DNS query timeout after {} seconds", .0.as_secs_f64())]
    Timeout(Duration),
    #[error("Domain does not exist (NXDOMAIN)")]
    NxDomain,
    #[error("No answer received from DNS server")]
    NoAnswer,
    #[error("No nameservers available")]
    NoNameservers,
    #[error("DNS server returned {0}")]
    ServerFailure(String),
    #[error("DNS error: {0}")]
    Resolve(String),
}

/// Parse `ip` or `ip:port` (IPv6 with brackets when a port is given)
pub fn parse_dns_server(server: &str) -> Result<SocketAddr, DnsError> {
    let server = server.trim();
    if let Ok(addr) = server.parse::<SocketAddr>() {
        return Ok(addr);
    }
    server
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, DEFAULT_DNS_PORT))
        .map_err(|_| DnsError::InvalidServer(server.to_string()))
}

/// DNS latency probe.
///
/// Each check builds a resolver bound to exactly one name server with caching,
/// the hosts file and retries switched off, so the measured time is one round
/// trip to that server.
#[derive(Debug, Default, Clone, Copy)]
pub struct DnsProbe;

impl DnsProbe {
    pub fn new() -> Self {
        Self
    }

    fn resolver_for(server: SocketAddr, timeout: Duration) -> TokioAsyncResolver {
        let name_servers = NameServerConfigGroup::from_ips_clear(&[server.ip()], server.port(), true);
        let config = ResolverConfig::from_parts(None, vec![], name_servers);

        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        opts.attempts = 1;
        opts.cache_size = 0;
        opts.use_hosts_file = false;

        TokioAsyncResolver::tokio(config, opts)
    }

    async fn resolve(&self, domain: &str, dns_server: &str, limit: Duration) -> Result<(String, f64), DnsError> {
        let server = parse_dns_server(dns_server)?;
        let resolver = Self::resolver_for(server, limit);

        let start = Instant::now();
        let lookup = tokio::time::timeout(limit, resolver.ipv4_lookup(domain))
            .await
            .map_err(|_| DnsError::Timeout(limit))?
            .map_err(|e| classify(e, limit))?;
        let elapsed = start.elapsed();

        let ip = lookup.iter().next().ok_or(DnsError::NoAnswer)?;
        Ok((ip.to_string(), round_millis(elapsed)))
    }
}

fn classify(err: ResolveError, limit: Duration) -> DnsError {
    match err.kind() {
        ResolveErrorKind::NoRecordsFound { response_code, .. } => match *response_code {
            ResponseCode::NXDomain => DnsError::NxDomain,
            ResponseCode::NoError => DnsError::NoAnswer,
            code => DnsError::ServerFailure(format!("{code:?}")),
        },
        ResolveErrorKind::Timeout => DnsError::Timeout(limit),
        ResolveErrorKind::NoConnections => DnsError::NoNameservers,
        _ => DnsError::Resolve(err.to_string()),
    }
}

#[async_trait::async_trait]
impl DnsProber for DnsProbe {
    async fn check(&self, domain: &str, dns_server: &str, timeout: Duration) -> DnsOutcome {
        match self.resolve(domain, dns_server, timeout).await {
            Ok((resolved_ip, resolve_time_ms)) => DnsOutcome::Resolved { resolved_ip, resolve_time_ms },
            Err(e) => {
                warn!(domain, dns_server, error = %e, "DNS check failed");
                DnsOutcome::failed(e)
            }
        }
    }
}
