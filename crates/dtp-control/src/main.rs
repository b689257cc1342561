//! DTP control plane binary.
//!
//! Single axum server exposing the `/simulation/*` REST surface, the
//! `/comparison` table, and a `/ws` metrics feed, fronting exactly one
//! in-process simulation harness instance.

mod api;
mod state;
mod ws;

use std::net::SocketAddr;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ─────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── Shared state ────────────────────────────────────────────
    let state = AppState::default();

    // ── Router ──────────────────────────────────────────────────
    let app = Router::new()
        .merge(api::router())
        .route("/ws", axum::routing::get(ws::handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    // ── Listen ──────────────────────────────────────────────────
    let addr: SocketAddr = std::env::var("LISTEN_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8088".into())
        .parse()?;

    tracing::info!(%addr, "dtp-control listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
