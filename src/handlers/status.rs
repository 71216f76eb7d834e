//! Consumer status document

use axum::{extract::State, http::StatusCode, http::header};

use crate::handlers::AppState;

/// Status handler
///
/// Returns the consumer status (brokers, closed flag, transport statistics)
/// as indented JSON. Never blocks on the transport.
pub async fn handler(
    State(state): State<AppState>,
) -> (StatusCode, [(header::HeaderName, &'static str); 1], String) {
    let status = state.status().status();
    match serde_json::to_string_pretty(&status) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize consumer status");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                format!("Failed to serialize status: {}", e),
            )
        }
    }
}
