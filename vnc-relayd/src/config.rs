use std::path::Path;
use std::time::Duration;
use serde::Deserialize;
use anyhow::{Context, Result};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub dns: DnsConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Local address relay listeners bind to
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    /// Seconds without a connected client before a relay is reclaimed
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_gc_interval")]
    pub gc_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DnsConfig {
    /// Age after which a cached resolution is no longer trusted
    #[serde(default = "default_dns_ttl")]
    pub ttl_secs: u64,
    /// Age after which a cached resolution is dropped on the GC tick
    #[serde(default = "default_dns_retention")]
    pub retention_secs: u64,
    #[serde(default = "default_max_concurrent_lookups")]
    pub max_concurrent_lookups: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_probe_timeout")]
    pub default_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_bind_host() -> String {
    "127.0.0.1".to_string()
}

fn default_idle_timeout() -> u64 {
    15 * 60
}

fn default_gc_interval() -> u64 {
    60
}

fn default_dns_ttl() -> u64 {
    5 * 60
}

fn default_dns_retention() -> u64 {
    30 * 60
}

fn default_max_concurrent_lookups() -> usize {
    64
}

fn default_probe_timeout() -> u64 {
    3000
}

fn default_listen() -> String {
    "127.0.0.1:8059".to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            idle_timeout_secs: default_idle_timeout(),
            gc_interval_secs: default_gc_interval(),
        }
    }
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_dns_ttl(),
            retention_secs: default_dns_retention(),
            max_concurrent_lookups: default_max_concurrent_lookups(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_probe_timeout(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl RelayConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn gc_interval(&self) -> Duration {
        // tokio::time::interval panics on a zero period
        Duration::from_secs(self.gc_interval_secs.max(1))
    }
}

impl DnsConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

impl ProbeConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();

        assert_eq!(config.relay.bind_host, "127.0.0.1");
        assert_eq!(config.relay.idle_timeout(), Duration::from_secs(900));
        assert_eq!(config.relay.gc_interval(), Duration::from_secs(60));
        assert_eq!(config.dns.ttl(), Duration::from_secs(300));
        assert_eq!(config.dns.retention(), Duration::from_secs(1800));
        assert_eq!(config.dns.max_concurrent_lookups, 64);
        assert_eq!(config.probe.default_timeout(), Duration::from_millis(3000));
        assert_eq!(config.api.listen, "127.0.0.1:8059");
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::parse(
            r#"
            [relay]
            idle_timeout_secs = 60

            [dns]
            max_concurrent_lookups = 128
            "#,
        )
        .unwrap();

        assert_eq!(config.relay.idle_timeout_secs, 60);
        assert_eq!(config.relay.gc_interval_secs, 60);
        assert_eq!(config.dns.max_concurrent_lookups, 128);
        assert_eq!(config.dns.ttl_secs, 300);
    }

    #[test]
    fn test_zero_gc_interval_is_clamped() {
        let config = Config::parse("[relay]\ngc_interval_secs = 0\n").unwrap();
        assert_eq!(config.relay.gc_interval(), Duration::from_secs(1));
    }
}
