//! Best-effort DNS cache in front of relay and probe connections.
//!
//! Literal addresses pass straight through. Failed lookups are never cached;
//! the caller gets the hostname back and lets the connect path try again.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use async_trait::async_trait;
use tokio::sync::Semaphore;
use crate::clock::Clock;
use crate::config::DnsConfig;
use crate::error::RelayError;

#[async_trait]
pub trait Resolver: Send + Sync + 'static {
    async fn lookup_ipv4(&self, host: &str) -> Result<Ipv4Addr, RelayError>;
}

/// Resolver backed by the OS through `tokio::net::lookup_host`
#[derive(Debug, Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn lookup_ipv4(&self, host: &str) -> Result<Ipv4Addr, RelayError> {
        let addrs = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|source| RelayError::DnsResolution {
                host: host.to_string(),
                source,
            })?;

        addrs
            .filter_map(|addr| match addr.ip() {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(_) => None,
            })
            .next()
            .ok_or_else(|| RelayError::DnsResolution {
                host: host.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no IPv4 address"),
            })
    }
}

#[derive(Debug, Clone)]
struct DnsCacheEntry {
    address: Ipv4Addr,
    resolved_at: Instant,
}

pub struct DnsCache {
    entries: Mutex<HashMap<String, DnsCacheEntry>>,
    resolver: Arc<dyn Resolver>,
    clock: Arc<dyn Clock>,
    lookups: Semaphore,
    ttl: Duration,
    retention: Duration,
}

impl DnsCache {
    pub fn new(config: &DnsConfig, resolver: Arc<dyn Resolver>, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            resolver,
            clock,
            lookups: Semaphore::new(config.max_concurrent_lookups.max(1)),
            ttl: config.ttl(),
            retention: config.retention(),
        }
    }

    /// Resolve `host` to an IPv4 address string. Literals come back bare
    /// (`[::1]` becomes `::1`); unresolvable names come back unchanged.
    pub async fn resolve(&self, host: &str) -> String {
        if let Some(literal) = ip_literal(host) {
            return literal.to_string();
        }

        if let Some(address) = self.fresh(host) {
            tracing::trace!(host, %address, "DNS cache hit");
            return address.to_string();
        }

        let Ok(_permit) = self.lookups.acquire().await else {
            return host.to_string();
        };

        // Another task may have filled the entry while we waited for a permit
        if let Some(address) = self.fresh(host) {
            return address.to_string();
        }

        match self.resolver.lookup_ipv4(host).await {
            Ok(address) => {
                tracing::debug!(host, %address, "Resolved host");
                self.lock().insert(
                    host.to_string(),
                    DnsCacheEntry {
                        address,
                        resolved_at: self.clock.now(),
                    },
                );
                address.to_string()
            }
            Err(e) => {
                tracing::warn!("{}; connecting by hostname", e);
                host.to_string()
            }
        }
    }

    /// Drop entries older than the retention window. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let retention = self.retention;
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| now.saturating_duration_since(entry.resolved_at) <= retention);
        before - entries.len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn fresh(&self, host: &str) -> Option<Ipv4Addr> {
        let now = self.clock.now();
        self.lock()
            .get(host)
            .filter(|entry| now.saturating_duration_since(entry.resolved_at) < self.ttl)
            .map(|entry| entry.address)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, DnsCacheEntry>> {
        // A poisoned map still holds valid entries
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// `host` without URL-style brackets, if it is an IP literal
fn ip_literal(host: &str) -> Option<&str> {
    let bare = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    bare.parse::<IpAddr>().ok().map(|_| bare)
}
