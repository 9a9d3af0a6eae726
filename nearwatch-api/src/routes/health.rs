use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Submissions are accepted but notifications cannot be queued.
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    fn from_dependencies(database: bool, job_queue: bool) -> Self {
        match (database, job_queue) {
            (false, _) => Self::Unhealthy,
            (true, false) => Self::Degraded,
            (true, true) => Self::Healthy,
        }
    }

    fn http_status(self) -> StatusCode {
        match self {
            Self::Healthy | Self::Degraded => StatusCode::OK,
            Self::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub service: &'static str,
    pub version: &'static str,
    pub database: bool,
    pub job_queue: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The database probe goes through the settings cache, so it only fails once
/// the cached copy has expired and the refresh cannot reach the store.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Response {
    let (database, error) = match state.settings.get() {
        Ok(_) => (true, None),
        Err(e) => (false, Some(e.to_string())),
    };
    let job_queue = state.queue.is_ready();
    let status = HealthStatus::from_dependencies(database, job_queue);

    let body = HealthResponse {
        status,
        service: "nearwatch-api",
        version: env!("CARGO_PKG_VERSION"),
        database,
        job_queue,
        error,
    };
    (status.http_status(), Json(body)).into_response()
}

/// Returns Prometheus metrics.
pub async fn metrics(State(state): State<Arc<AppState>>) -> String {
    state
        .metrics_handle
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default()
}
