//! REST route tree for the simulation control surface.

pub mod comparison;
pub mod health;
pub mod simulation;

use axum::Router;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(simulation::router())
        .merge(comparison::router())
        .merge(health::router())
}
