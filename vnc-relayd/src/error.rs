use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid server info: {0}")]
    InvalidServerInfo(String),
    #[error("failed to bind relay listener on {bind_host}: {source}")]
    PortBind {
        bind_host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("target {host}:{port} unreachable: {source}")]
    TargetUnreachable {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to resolve {host}: {source}")]
    DnsResolution {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("relay manager is not running")]
    ManagerClosed,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl RelayError {
    fn status(&self) -> (StatusCode, &'static str) {
        match self {
            RelayError::InvalidServerInfo(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            RelayError::PortBind { .. } => (StatusCode::SERVICE_UNAVAILABLE, "port_bind_failed"),
            RelayError::TargetUnreachable { .. } => (StatusCode::BAD_GATEWAY, "target_unreachable"),
            RelayError::DnsResolution { .. } => (StatusCode::BAD_GATEWAY, "dns_resolution_failed"),
            RelayError::ManagerClosed => (StatusCode::SERVICE_UNAVAILABLE, "manager_closed"),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let (status, code) = self.status();
        let body = ErrorBody {
            code: code.to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
