// Metrics endpoint

use crate::core::state::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};

/// Poll counters and patch savings since startup
///
/// GET /metrics
pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    let snapshot = state.metrics.get_snapshot(&state.snapshots);
    (StatusCode::OK, Json(snapshot)).into_response()
}
