//! HTTP surface: Prometheus exposition and consumer status

use crate::consumer::StatusHandle;
use crate::metrics::Metrics;
use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod metrics;
pub mod status;

/// Application state shared across all handlers
///
/// All fields are cheap to clone.
#[derive(Clone)]
pub struct AppState {
    metrics: Arc<Metrics>,
    status: StatusHandle,
}

impl AppState {
    pub fn new(metrics: Arc<Metrics>, status: StatusHandle) -> Self {
        Self { metrics, status }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn status(&self) -> &StatusHandle {
        &self.status
    }
}

/// Build the HTTP router
///
/// `/` serves the status document and `metrics_path` the Prometheus text
/// exposition. `metrics_path` must not be `/` (enforced by `Config::validate`).
pub fn router(state: AppState, metrics_path: &str) -> Router {
    Router::new()
        .route("/", get(status::handler))
        .route(metrics_path, get(metrics::handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
