//! Local HTTP surface for status and control.
//!
//! Bound to loopback; the router exposes a health probe, a JSON status
//! summary, the observed operating mode, and a control endpoint that
//! translates key/value requests into broadcast control commands on the
//! device link.

pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use log::info;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::protobuf::meshtastic::ToRadio;
use crate::state::SharedState;

/// Shared context handed to every handler.
pub struct ApiContext {
    pub state: Arc<SharedState>,
    pub to_device: mpsc::Sender<ToRadio>,
    /// When set, `GET /api/v1/mode` reports this instead of the observed mode.
    pub mode_override: Option<i32>,
    pub started: Instant,
}

pub fn router(ctx: Arc<ApiContext>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status))
        .route("/api/v1/mode", get(handlers::get_mode))
        .route("/api/v1/control", post(handlers::set_control_value))
        .with_state(ctx)
}

/// Serve the API until the cancellation token fires.
pub async fn serve(ctx: Arc<ApiContext>, port: u16, token: CancellationToken) -> Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", addr))?;
    info!("API listening on http://{}", addr);
    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
        .context("API server error")
}
