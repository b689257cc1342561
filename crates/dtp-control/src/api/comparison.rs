//! `/comparison` — merged results across scheduler variants, keyed by mode.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/comparison", get(get_comparison))
        .route("/comparison/clear", post(clear_comparison))
}

async fn get_comparison(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.comparisons()))
}

async fn clear_comparison(State(state): State<AppState>) -> Json<Value> {
    state.clear_comparisons();
    Json(json!({ "status": "ok", "message": "comparisons cleared" }))
}
