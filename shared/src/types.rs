use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use crate::protocol::DEFAULT_VNC_PORT;

/// A remote VNC target as described by the UI layer.
/// `id` is the stable connection identifier relays are keyed on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub id: String,

    /// Display name, only used in log lines
    #[serde(default, alias = "name")]
    pub display_name: Option<String>,

    /// Hostname or literal IP address
    #[serde(alias = "ip_address", alias = "ipAddress")]
    pub host: String,

    #[serde(default)]
    pub port: Option<u16>,
}

impl ServerInfo {
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            host: host.into(),
            port,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Target port, falling back to the standard VNC port
    pub fn target_port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_VNC_PORT)
    }

    /// Name to use in log lines
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }
}

/// Outcome of a successful reachability probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub connected: bool,
    pub timestamp: DateTime<Utc>,
    pub host: String,
    pub port: u16,
}

/// Snapshot of one live relay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySummary {
    pub connection_id: String,
    pub display_name: Option<String>,
    pub listen_port: u16,
    pub target_host: String,
    pub target_port: u16,
    pub active_clients: usize,
    /// Seconds since the last recorded activity
    pub idle_secs: u64,
}
