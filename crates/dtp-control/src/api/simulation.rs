//! `/simulation/*` — start/stop/pause/resume a run, and poll its metrics.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use dtp_sim::{Mode, SimulationConfig};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/simulation/start", post(start))
        .route("/simulation/stop", post(stop))
        .route("/simulation/pause", post(pause))
        .route("/simulation/resume", post(resume))
        .route("/simulation/status", get(status))
        .route("/simulation/results", get(results))
}

/// Body of `POST /simulation/start`, matching the design's control-API
/// request shape. Anything not listed here keeps `SimulationConfig`'s
/// defaults.
#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub mode: Mode,
    #[serde(default)]
    pub critical_count: u32,
    #[serde(default)]
    pub high_count: u32,
    #[serde(default)]
    pub medium_count: u32,
    #[serde(default)]
    pub low_count: u32,
    #[serde(default)]
    pub simulate_congestion: bool,
    #[serde(default)]
    pub congestion_level: f32,
}

async fn start(
    State(state): State<AppState>,
    Json(req): Json<StartRequest>,
) -> (StatusCode, Json<Value>) {
    let config = SimulationConfig {
        mode: req.mode,
        critical_count: req.critical_count,
        high_count: req.high_count,
        medium_count: req.medium_count,
        low_count: req.low_count,
        simulate_congestion: req.simulate_congestion,
        congestion_level: req.congestion_level,
        ..SimulationConfig::default()
    };

    match state.start(config) {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "message": "simulation started" })),
        ),
        Err(message) => (StatusCode::CONFLICT, Json(json!({ "status": "error", "message": message }))),
    }
}

async fn stop(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    respond(state.stop(), "simulation stopped")
}

async fn pause(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    respond(state.pause(), "simulation paused")
}

async fn resume(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    respond(state.resume(), "simulation resumed")
}

fn respond(result: Result<(), String>, ok_message: &str) -> (StatusCode, Json<Value>) {
    match result {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok", "message": ok_message }))),
        Err(message) => (StatusCode::BAD_REQUEST, Json(json!({ "status": "error", "message": message }))),
    }
}

async fn status(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.status_snapshot() {
        Some(snapshot) => (
            StatusCode::OK,
            Json(json!({ "run_state": state.run_state(), "metrics": snapshot })),
        ),
        None => (
            StatusCode::OK,
            Json(json!({ "run_state": state.run_state(), "metrics": Value::Null })),
        ),
    }
}

async fn results(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.last_result() {
        Some(result) => (
            StatusCode::OK,
            Json(json!({
                "mode": result.mode.as_str(),
                "duration_ms": result.duration_ms,
                "metrics": result.snapshot,
                "comparison": result.comparison,
            })),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "status": "error", "message": "no completed run yet" })),
        ),
    }
}
