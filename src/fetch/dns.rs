//! Cached DNS resolution with a fixed nameserver set

use hyper::client::connect::dns::Name;
use reqwest::dns::{Addrs, Resolve, Resolving};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use trust_dns_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

/// Answers kept by the resolver's internal cache
const DNS_CACHE_SIZE: usize = 4096;

/// A hostname could not be resolved
#[derive(Debug, Error)]
pub enum DnsError {
    #[error("lookup of {host} timed out after {}ms", .timeout.as_millis())]
    TimedOut { host: String, timeout: Duration },

    #[error("lookup of {host} failed: {message}")]
    Failed { host: String, message: String },

    #[error("no addresses found for {0}")]
    NoAddresses(String),
}

/// Resolver plugged into `reqwest` for every outbound connection
///
/// Answers are cached for their TTL by the underlying resolver; each lookup
/// is bounded by `timeout`.
#[derive(Clone)]
pub struct CachingResolver {
    resolver: TokioAsyncResolver,
    timeout: Duration,
}

impl CachingResolver {
    /// Creates a resolver that only queries the given nameservers
    pub fn new(nameservers: &[IpAddr], timeout: Duration) -> Self {
        let group = NameServerConfigGroup::from_ips_clear(nameservers, 53, true);
        let config = ResolverConfig::from_parts(None, vec![], group);

        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        opts.attempts = 2;
        opts.cache_size = DNS_CACHE_SIZE;

        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
            timeout,
        }
    }

    /// Resolves a hostname to its addresses
    pub async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, DnsError> {
        let lookup = tokio::time::timeout(self.timeout, self.resolver.lookup_ip(host))
            .await
            .map_err(|_| DnsError::TimedOut {
                host: host.to_string(),
                timeout: self.timeout,
            })?
            .map_err(|e| DnsError::Failed {
                host: host.to_string(),
                message: e.to_string(),
            })?;

        let ips: Vec<IpAddr> = lookup.iter().collect();
        if ips.is_empty() {
            return Err(DnsError::NoAddresses(host.to_string()));
        }

        Ok(ips)
    }
}

impl Resolve for CachingResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let this = self.clone();
        Box::pin(async move {
            let host = name.as_str().to_string();
            tracing::trace!("Resolving {}", host);

            let ips = this.lookup(&host).await?;
            // reqwest replaces the port with the one from the URL
            let addrs: Addrs = Box::new(ips.into_iter().map(|ip| SocketAddr::new(ip, 0)));
            Ok(addrs)
        })
    }
}

/// Parses configured nameserver strings, skipping invalid entries
pub fn parse_nameservers(nameservers: &[String]) -> Vec<IpAddr> {
    nameservers
        .iter()
        .filter_map(|s| match s.parse() {
            Ok(ip) => Some(ip),
            Err(_) => {
                tracing::warn!("Ignoring invalid nameserver '{}'", s);
                None
            }
        })
        .collect()
}

/// Shared handle used by the HTTP client builder
pub(crate) fn shared(nameservers: &[String], timeout: Duration) -> Arc<CachingResolver> {
    Arc::new(CachingResolver::new(&parse_nameservers(nameservers), timeout))
}
