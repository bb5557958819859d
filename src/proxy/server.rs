//! Proxy server setup and routing

use anyhow::{Context, Result};
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, Method, Response, Uri},
    routing::{get, post},
    Json, Router,
};
use tokio::net::TcpListener;

use super::envelope::IngressEvent;
use super::handler::{handle_invocation, reject_malformed_event};
use super::state::ProxyState;

/// Routes: direct HTTP invocations, gateway events, health
pub fn router(state: ProxyState) -> Router {
    Router::new()
        .route("/invocations", post(invoke_http))
        .route("/chat", post(invoke_http))
        .route("/events", post(invoke_event))
        .route("/health", get(health))
        .with_state(state)
}

/// Start the proxy server; returns when `shutdown` resolves and in-flight
/// requests finish
pub async fn start_proxy(
    state: ProxyState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let bind_addr = state.config.bind_addr;
    let app = router(state);

    tracing::info!("Starting proxy on {}", bind_addr);

    let listener = TcpListener::bind(bind_addr)
        .await
        .context("Failed to bind to address")?;

    tracing::info!("Proxy listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")?;

    tracing::info!("Proxy server shut down gracefully");
    Ok(())
}

/// `POST /invocations` and `POST /chat`: identity comes from gateway headers
async fn invoke_http(
    State(state): State<ProxyState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response<Body> {
    let event = IngressEvent::from_http(method.as_str(), uri.path(), &headers, &body);
    handle_invocation(state, event).await
}

/// `POST /events`: a full gateway event with authorizer context
async fn invoke_event(State(state): State<ProxyState>, body: Bytes) -> Response<Body> {
    match serde_json::from_slice::<IngressEvent>(&body) {
        Ok(event) => handle_invocation(state, event).await,
        Err(e) => reject_malformed_event(&state, &e.to_string()),
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
