//! HTTP channel: stateless streamable-HTTP MCP endpoint on axum.
//!
//! ```text
//! POST {path}    JSON-RPC request  → 200 JSON response | 202 for notifications
//! GET  {path}    → 405 (no server-initiated stream)
//! GET  /health   → {"status": "ok", ...}
//! ```
//!
//! The [`CancellationToken`] is wired to axum's graceful shutdown.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::AppError;
use crate::subsystems::runtime::{Component, ComponentFuture};

use super::rpc;
use super::state::CommsState;

/// Router state injected into every handler. Cheap to clone.
#[derive(Clone)]
struct HttpState {
    pub channel_id: Arc<str>,
    pub comms: Arc<CommsState>,
}

pub struct HttpChannel {
    channel_id: String,
    bind_addr: String,
    path: String,
    state: Arc<CommsState>,
}

impl HttpChannel {
    pub fn new(
        channel_id: impl Into<String>,
        bind_addr: impl Into<String>,
        path: impl Into<String>,
        state: Arc<CommsState>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            bind_addr: bind_addr.into(),
            path: path.into(),
            state,
        }
    }
}

impl Component for HttpChannel {
    fn id(&self) -> &str {
        &self.channel_id
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(run_http(self.channel_id, self.bind_addr, self.path, self.state, shutdown))
    }
}

async fn run_http(
    channel_id: String,
    bind_addr: String,
    path: String,
    comms: Arc<CommsState>,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    let app = router(&channel_id, comms, &path);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| AppError::Transport(format!("http bind failed on {bind_addr}: {e}")))?;

    info!(%channel_id, %bind_addr, %path, "http channel listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| AppError::Transport(format!("http server error: {e}")))?;

    info!(%channel_id, "http channel shut down");
    Ok(())
}

/// The MCP router: `path` for JSON-RPC plus `/health`.
pub fn router(channel_id: &str, comms: Arc<CommsState>, path: &str) -> Router {
    let state = HttpState {
        channel_id: Arc::from(channel_id),
        comms,
    };
    Router::new()
        .route("/health", get(health))
        .route(path, post(mcp).get(|| async { StatusCode::METHOD_NOT_ALLOWED }))
        .with_state(state)
}

// ── Handlers ──────────────────────────────────────────────────────────────────

async fn health(State(state): State<HttpState>) -> Response {
    let info = state.comms.info();
    Json(json!({
        "status": "ok",
        "server": info.name,
        "version": info.version,
    }))
    .into_response()
}

async fn mcp(State(state): State<HttpState>, body: Bytes) -> Response {
    debug!(channel_id = %state.channel_id, bytes = body.len(), "mcp request");
    match rpc::handle_bytes(&state.comms, &state.channel_id, &body).await {
        Some(response) => (StatusCode::OK, Json(response)).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}
