//! Target seeding from plain list files.
//!
//! A domain list holds one URL or bare domain per line; a resolver list holds
//! one DNS server address per line. Blank lines and `#` comments are skipped
//! in both.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, warn};
use url::Url;

use crate::database::{CertificateTarget, DnsTarget, ResultStore};
use crate::DEFAULT_DNS_PORT;
use crate::probe::dns::parse_dns_server;

/// Reduce a URL or bare `host[:port][/path]` entry to its host name
pub fn extract_domain(entry: &str) -> Option<String> {
    let entry = entry.trim();
    if entry.is_empty() {
        return None;
    }

    let with_scheme = if entry.contains("://") { entry.to_string() } else { format!("https://{entry}") };
    let url = Url::parse(&with_scheme).ok()?;
    let host = url.host_str()?.trim_end_matches('.').to_ascii_lowercase();
    (!host.is_empty()).then_some(host)
}

/// Non-empty, non-comment lines of a list file
fn list_entries(contents: &str) -> impl Iterator<Item = &str> {
    contents.lines().map(str::trim).filter(|line| !line.is_empty() && !line.starts_with('#'))
}

/// Unique domains from a domain list, in first-seen order
pub fn parse_domain_list(contents: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut domains = Vec::new();
    for entry in list_entries(contents) {
        match extract_domain(entry) {
            Some(domain) if seen.insert(domain.clone()) => domains.push(domain),
            Some(_) => {}
            None => warn!(entry, "Skipping unparseable domain entry"),
        }
    }
    domains
}

/// Unique resolver addresses from a resolver list, in first-seen order.
///
/// Entries are compared by socket address and written back in canonical form:
/// a bare IP when the port is 53, `ip:port` otherwise.
pub fn parse_resolver_list(contents: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut servers = Vec::new();
    for entry in list_entries(contents) {
        let addr = match parse_dns_server(entry) {
            Ok(addr) => addr,
            Err(e) => {
                warn!(entry, error = %e, "Skipping invalid resolver entry");
                continue;
            }
        };
        if seen.insert(addr) {
            servers.push(canonical_server(addr));
        }
    }
    servers
}

fn canonical_server(addr: SocketAddr) -> String {
    if addr.port() == DEFAULT_DNS_PORT { addr.ip().to_string() } else { addr.to_string() }
}

/// What a seeding pass created
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub certificate_targets: usize,
    pub dns_targets: usize,
}

/// Register a certificate target per domain and a DNS target for every
/// `(domain, resolver)` pair. Existing targets keep their settings.
pub async fn seed_targets(
    store: &dyn ResultStore,
    domains: &[String],
    resolvers: &[String],
    default_port: u16,
) -> Result<SeedSummary> {
    let mut summary = SeedSummary::default();

    for domain in domains {
        let target = CertificateTarget::new(domain.clone()).with_port(default_port);
        if store.register_certificate_target(&target).await? {
            debug!(domain = %domain, "Registered certificate target");
            summary.certificate_targets += 1;
        }

        for resolver in resolvers {
            if store.register_dns_target(&DnsTarget::new(domain.clone(), resolver.clone())).await? {
                debug!(domain = %domain, dns_server = %resolver, "Registered DNS target");
                summary.dns_targets += 1;
            }
        }
    }

    Ok(summary)
}

/// Read both list files and seed from them. A missing resolver file only
/// means no DNS targets.
pub async fn seed_from_files(
    store: &dyn ResultStore,
    domains_file: &Path,
    resolvers_file: Option<&Path>,
    default_port: u16,
) -> Result<SeedSummary> {
    let contents = tokio::fs::read_to_string(domains_file)
        .await
        .with_context(|| format!("reading domain list {}", domains_file.display()))?;
    let domains = parse_domain_list(&contents);

    let resolvers = match resolvers_file {
        Some(path) => {
            let contents = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading resolver list {}", path.display()))?;
            parse_resolver_list(&contents)
        }
        None => Vec::new(),
    };

    seed_targets(store, &domains, &resolvers, default_port).await
}
