use std::time::Duration;
use chrono::Utc;
use tokio::net::TcpStream;
use shared::types::{ProbeResult, ServerInfo};
use crate::dns::DnsCache;

/// Check that the target accepts TCP connections.
///
/// A completed connect counts as reachable; the RFB handshake is not
/// attempted. Returns `None` on refusal, error, or timeout; the timeout
/// covers name resolution as well as the connect. No relay state is read or
/// written.
pub async fn capture_snapshot(
    dns: &DnsCache,
    info: &ServerInfo,
    timeout: Duration,
) -> Option<ProbeResult> {
    let port = info.target_port();
    let attempt = async {
        let host = dns.resolve(&info.host).await;
        let connected = TcpStream::connect((host.as_str(), port)).await;
        (host, connected)
    };

    match tokio::time::timeout(timeout, attempt).await {
        Ok((host, Ok(stream))) => {
            drop(stream);
            tracing::debug!(server = info.label(), %host, port, "Probe connected");
            Some(ProbeResult {
                connected: true,
                timestamp: Utc::now(),
                host,
                port,
            })
        }
        Ok((host, Err(e))) => {
            tracing::debug!(server = info.label(), %host, port, "Probe failed: {}", e);
            None
        }
        Err(_) => {
            tracing::debug!(server = info.label(), host = %info.host, port, ?timeout, "Probe timed out");
            None
        }
    }
}
