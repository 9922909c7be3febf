use std::time::Duration;
use axum::{
    extract::{Path, State},
    routing::{delete, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use crate::error::RelayError;
use crate::manager::RelayHandle;
use shared::types::{ProbeResult, RelaySummary, ServerInfo};

#[derive(Clone)]
pub struct AppState {
    pub relays: RelayHandle,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartResponse {
    pub listen_port: u16,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StopResponse {
    pub removed: bool,
}

#[derive(Debug, Deserialize)]
pub struct ProbeRequest {
    #[serde(flatten)]
    pub server: ServerInfo,
    pub timeout_ms: Option<u64>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/relays", post(start_relay).get(list_relays))
        .route("/v1/relays/:id", delete(stop_relay))
        .route("/v1/probe", post(probe))
        .with_state(state)
}

async fn start_relay(
    State(state): State<AppState>,
    Json(info): Json<ServerInfo>,
) -> Result<Json<StartResponse>, RelayError> {
    let name = info.label().to_string();
    let listen_port = state.relays.start_proxy(info).await.map_err(|e| {
        tracing::error!("Unable to start remote session for {}: {}", name, e);
        e
    })?;
    Ok(Json(StartResponse { listen_port }))
}

async fn list_relays(State(state): State<AppState>) -> Result<Json<Vec<RelaySummary>>, RelayError> {
    state.relays.list().await.map(Json)
}

async fn stop_relay(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StopResponse>, RelayError> {
    let removed = state.relays.stop_proxy(&id).await?;
    Ok(Json(StopResponse { removed }))
}

async fn probe(
    State(state): State<AppState>,
    Json(request): Json<ProbeRequest>,
) -> Result<Json<Option<ProbeResult>>, RelayError> {
    let timeout = request.timeout_ms.map(Duration::from_millis);
    state
        .relays
        .capture_snapshot(&request.server, timeout)
        .await
        .map(Json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use tower::ServiceExt;
    use crate::clock::SystemClock;
    use crate::config::Config;
    use crate::dns::{DnsCache, SystemResolver};

    fn app() -> Router {
        let config = Config::default();
        let clock = Arc::new(SystemClock);
        let dns = Arc::new(DnsCache::new(&config.dns, Arc::new(SystemResolver), clock.clone()));
        router(AppState {
            relays: RelayHandle::spawn(&config, dns, clock),
        })
    }

    fn json_request(method: Method, uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_start_and_stop_relay() {
        let app = app();

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/v1/relays",
                r#"{"id":"srv-1","name":"Lab","ip_address":"127.0.0.1","port":5901}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let started = body_json(response).await;
        assert!(started["listen_port"].as_u64().unwrap() > 0);

        let response = app
            .clone()
            .oneshot(Request::get("/v1/relays").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let listed = body_json(response).await;
        assert_eq!(listed[0]["connection_id"], "srv-1");
        assert_eq!(listed[0]["target_port"], 5901);
        assert_eq!(listed[0]["display_name"], "Lab");

        let response = app
            .clone()
            .oneshot(json_request(Method::DELETE, "/v1/relays/srv-1", ""))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["removed"], true);

        let response = app
            .oneshot(json_request(Method::DELETE, "/v1/relays/srv-1", ""))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["removed"], false);
    }

    #[tokio::test]
    async fn test_invalid_server_info_is_bad_request() {
        let response = app()
            .oneshot(json_request(Method::POST, "/v1/relays", r#"{"id":"","host":"127.0.0.1"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "bad_request");
    }

    #[tokio::test]
    async fn test_probe_closed_port_is_null() {
        let port = {
            let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let body = format!(r#"{{"id":"p","host":"127.0.0.1","port":{},"timeout_ms":500}}"#, port);

        let response = app()
            .oneshot(json_request(Method::POST, "/v1/probe", &body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_json(response).await.is_null());
    }
}
