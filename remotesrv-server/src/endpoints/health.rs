//! Liveness check.

use axum::response::IntoResponse;
use axum::{Router, routing};

use crate::state::ServiceState;

/// Liveness endpoint, served on every listener.
pub fn router() -> Router<ServiceState> {
    Router::new().route("/health", routing::get(health))
}

async fn health() -> impl IntoResponse {
    "OK"
}
