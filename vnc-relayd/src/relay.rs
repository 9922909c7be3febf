//! One relay: a local listener that upgrades incoming connections to
//! WebSockets and hands each one to a bridge session.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use shared::protocol::WS_BINARY_PROTOCOL;
use shared::types::RelaySummary;
use crate::bridge;
use crate::clock::Clock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayTarget {
    pub host: String,
    pub port: u16,
}

/// Connected-client count and last-activity stamp for one relay
pub struct Activity {
    clients: AtomicUsize,
    last_activity: Mutex<Instant>,
    clock: Arc<dyn Clock>,
}

impl Activity {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clients: AtomicUsize::new(0),
            last_activity: Mutex::new(clock.now()),
            clock,
        }
    }

    pub fn touch(&self) {
        *self.stamp() = self.clock.now();
    }

    pub fn last_activity(&self) -> Instant {
        *self.stamp()
    }

    pub fn active_clients(&self) -> usize {
        self.clients.load(Ordering::SeqCst)
    }

    /// Register a client; the count drops again when the guard is dropped
    pub fn client_connected(self: &Arc<Self>) -> ClientGuard {
        self.clients.fetch_add(1, Ordering::SeqCst);
        self.touch();
        ClientGuard {
            activity: Arc::clone(self),
        }
    }

    fn stamp(&self) -> std::sync::MutexGuard<'_, Instant> {
        self.last_activity.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct ClientGuard {
    activity: Arc<Activity>,
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.activity.clients.fetch_sub(1, Ordering::SeqCst);
    }
}

/// State shared between a relay and its bridge sessions
pub struct RelayContext {
    pub connection_id: String,
    pub target: RelayTarget,
    pub activity: Arc<Activity>,
    /// Cancelled when the relay is stopped; sessions abort on it
    pub cancel: CancellationToken,
    next_session: AtomicU64,
}

impl RelayContext {
    pub fn new(connection_id: String, target: RelayTarget, clock: Arc<dyn Clock>) -> Self {
        Self {
            connection_id,
            target,
            activity: Arc::new(Activity::new(clock)),
            cancel: CancellationToken::new(),
            next_session: AtomicU64::new(1),
        }
    }

    pub fn next_session_id(&self) -> u64 {
        self.next_session.fetch_add(1, Ordering::Relaxed)
    }
}

pub struct Relay {
    pub context: Arc<RelayContext>,
    pub display_name: Option<String>,
    pub listen_port: u16,
    server: JoinHandle<()>,
}

impl Relay {
    /// Start serving WebSocket upgrades on an already bound listener
    pub fn serve(
        listener: TcpListener,
        context: Arc<RelayContext>,
        display_name: Option<String>,
    ) -> std::io::Result<Self> {
        let listen_port = listener.local_addr()?.port();

        let app = Router::new()
            .fallback(upgrade)
            .with_state(Arc::clone(&context));

        let connection_id = context.connection_id.clone();
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(relay = %connection_id, "Relay listener failed: {}", e);
            }
        });

        Ok(Self {
            context,
            display_name,
            listen_port,
            server,
        })
    }

    /// Whether the serving task still owns its listener
    pub fn is_listening(&self) -> bool {
        !self.server.is_finished()
    }

    #[cfg(test)]
    pub fn abort_listener(&self) {
        self.server.abort();
    }

    /// Hard-stop every session and release the listening port
    pub async fn stop(self) {
        self.context.cancel.cancel();
        self.server.abort();
        // Resolves once the serve future, and with it the listener, is dropped
        let _ = self.server.await;
    }

    pub fn summary(&self, now: Instant) -> RelaySummary {
        let activity = &self.context.activity;
        RelaySummary {
            connection_id: self.context.connection_id.clone(),
            display_name: self.display_name.clone(),
            listen_port: self.listen_port,
            target_host: self.context.target.host.clone(),
            target_port: self.context.target.port,
            active_clients: activity.active_clients(),
            idle_secs: now.saturating_duration_since(activity.last_activity()).as_secs(),
        }
    }
}

/// noVNC may connect on `/` or `/websockify`, so every path is accepted
async fn upgrade(
    State(context): State<Arc<RelayContext>>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Ok(ws) = ws else {
        return StatusCode::UPGRADE_REQUIRED.into_response();
    };

    ws.protocols([WS_BINARY_PROTOCOL])
        .on_upgrade(move |socket| bridge::run_session(socket, context))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::clock::ManualClock;

    #[test]
    fn test_guard_tracks_client_count() {
        let clock = Arc::new(ManualClock::new());
        let activity = Arc::new(Activity::new(clock.clone()));
        let created = activity.last_activity();

        clock.advance(Duration::from_secs(30));
        let first = activity.client_connected();
        let second = activity.client_connected();
        assert_eq!(activity.active_clients(), 2);
        assert_eq!(activity.last_activity(), created + Duration::from_secs(30));

        drop(first);
        assert_eq!(activity.active_clients(), 1);
        drop(second);
        assert_eq!(activity.active_clients(), 0);
    }

    #[tokio::test]
    async fn test_plain_http_gets_upgrade_required() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let context = Arc::new(RelayContext::new(
            "plain".to_string(),
            RelayTarget { host: "127.0.0.1".to_string(), port: 9 },
            Arc::new(ManualClock::new()),
        ));
        let relay = Relay::serve(listener, context, None).unwrap();

        let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", relay.listen_port)).await.unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();

        let response = String::from_utf8_lossy(&response);
        assert!(response.starts_with("HTTP/1.1 426"), "unexpected response: {}", response);
        assert_eq!(relay.context.activity.active_clients(), 0);

        relay.stop().await;
    }

    #[tokio::test]
    async fn test_stop_releases_port() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let context = Arc::new(RelayContext::new(
            "release".to_string(),
            RelayTarget { host: "127.0.0.1".to_string(), port: 9 },
            Arc::new(ManualClock::new()),
        ));
        let relay = Relay::serve(listener, context.clone(), None).unwrap();
        let port = relay.listen_port;
        assert!(relay.is_listening());

        relay.stop().await;

        assert!(context.cancel.is_cancelled());
        TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    }
}
