use axum::debug_handler;
use axum::extract::State;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::gateway_util::{AppState, AppStateData};

pub const ADMISSION_GATEWAY_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A handler for a simple liveness check
#[debug_handler]
pub async fn status_handler() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok".to_string(),
        version: ADMISSION_GATEWAY_VERSION.to_string(),
    })
}

#[derive(Debug, Deserialize, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub version: String,
}

/// A handler for a health check.
///
/// The gateway has no external dependencies, so it is healthy whenever it can take the
/// controller lock and answer. The queue length is included for quick triage.
pub async fn health_handler(State(AppStateData { reporter, .. }): AppState) -> Json<Value> {
    let snapshot = reporter.report();
    Json(json!({
        "gateway": "ok",
        "queueLength": snapshot.queue_length,
    }))
}
