//! WebSocket-to-VNC TCP bridge.
//!
//! Each accepted WebSocket gets its own TCP connection to the target. RFB
//! bytes are copied verbatim in both directions; when either side goes away
//! the other is torn down at once.

use std::sync::Arc;
use std::time::Duration;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use crate::error::RelayError;
use crate::relay::{RelayContext, RelayTarget};

/// Read size for target-to-client traffic; each read becomes one binary message
const READ_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    ClientClosed,
    TargetClosed,
    Terminated,
}

pub async fn run_session(socket: WebSocket, context: Arc<RelayContext>) {
    let session = context.next_session_id();
    let relay = context.connection_id.as_str();
    let _client = context.activity.client_connected();

    tracing::debug!(relay, session, "Client connected");

    let connected = tokio::select! {
        _ = context.cancel.cancelled() => return,
        result = connect_target(&context.target) => result,
    };

    let stream = match connected {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(relay, session, "{}", e);
            let _ = socket.close().await;
            return;
        }
    };

    let end = pump(socket, stream, &context.cancel).await;
    tracing::debug!(relay, session, ?end, "Session ended");
}

async fn connect_target(target: &RelayTarget) -> Result<TcpStream, RelayError> {
    let stream = TcpStream::connect((target.host.as_str(), target.port))
        .await
        .map_err(|source| RelayError::TargetUnreachable {
            host: target.host.clone(),
            port: target.port,
            source,
        })?;

    // Interactive traffic; small writes must not wait on Nagle
    let _ = stream.set_nodelay(true);
    // Reset on close instead of leaving the socket in TIME_WAIT
    #[allow(deprecated)]
    let _ = stream.set_linger(Some(Duration::ZERO));

    Ok(stream)
}

async fn pump(socket: WebSocket, stream: TcpStream, cancel: &CancellationToken) -> SessionEnd {
    let (mut tcp_read, mut tcp_write) = stream.into_split();
    let (mut ws_tx, mut ws_rx) = socket.split();

    let client_to_target = async {
        while let Some(message) = ws_rx.next().await {
            match message {
                Ok(Message::Binary(data)) => {
                    if tcp_write.write_all(&data).await.is_err() {
                        return SessionEnd::TargetClosed;
                    }
                }
                Ok(Message::Text(_)) => {
                    // RFB is binary-only
                    tracing::debug!("Ignoring text message from WebSocket client");
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    tracing::debug!("WebSocket receive error: {}", e);
                    break;
                }
            }
        }
        SessionEnd::ClientClosed
    };

    let target_to_client = async {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            match tcp_read.read(&mut buf).await {
                Ok(0) => return SessionEnd::TargetClosed,
                Ok(n) => {
                    if ws_tx.send(Message::Binary(buf[..n].to_vec())).await.is_err() {
                        return SessionEnd::ClientClosed;
                    }
                }
                Err(e) => {
                    tracing::debug!("TCP read error: {}", e);
                    return SessionEnd::TargetClosed;
                }
            }
        }
    };

    // Whichever side finishes first, both halves are dropped on return
    tokio::select! {
        _ = cancel.cancelled() => SessionEnd::Terminated,
        end = client_to_target => end,
        end = target_to_client => end,
    }
}
