//! Liveness endpoint, served outside the protected scope.

use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;

use crate::AppState;

/// Health status response.
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    /// Always "healthy" while the process serves requests
    pub status: &'static str,
    /// Service version
    pub version: &'static str,
    /// Number of protected path prefixes
    pub protected_paths: usize,
}

#[tracing::instrument(name = "health.check", skip(state))]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthStatus {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        protected_paths: state.policies.len(),
    })
}
