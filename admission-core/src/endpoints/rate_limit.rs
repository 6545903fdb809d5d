use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Serialize;
use serde_json::{Value, json};

use crate::gateway_util::{AppState, AppStateData};
use crate::rate_limiting::{QueueId, UsageSnapshot};

/// Current usage of the shared budget, for dashboards and alerting.
pub async fn usage_handler(State(AppStateData { reporter, .. }): AppState) -> Json<UsageSnapshot> {
    Json(reporter.report())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuePositionResponse {
    pub id: QueueId,
    pub position: usize,
    pub estimated_wait_seconds: u64,
}

/// Where a queued request currently stands.
///
/// Returns 404 if the id is not queued, either because it was never enqueued or because it has
/// already been admitted or cancelled.
pub async fn queue_position_handler(
    State(AppStateData { controller, .. }): AppState,
    Path(id): Path<String>,
) -> Result<Json<QueuePositionResponse>, (StatusCode, Json<Value>)> {
    let id = QueueId::new(id);
    // Two separate reads: the queue may move in between, which only makes the estimate stale.
    let position = controller.position(&id);
    let estimated_wait_seconds = controller.estimate_wait_seconds(&id);
    match (position, estimated_wait_seconds) {
        (Some(position), Some(estimated_wait_seconds)) => Ok(Json(QueuePositionResponse {
            id,
            position,
            estimated_wait_seconds,
        })),
        _ => Err((
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": format!("Request `{id}` is not queued"),
            })),
        )),
    }
}
