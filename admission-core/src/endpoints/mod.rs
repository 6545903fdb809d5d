use axum::Router;
use axum::routing::get;

use crate::gateway_util::AppStateData;

pub mod fallback;
pub mod rate_limit;
pub mod status;

/// Builds the admission HTTP API over `app_state`.
///
/// A process that admits calls through its own [`crate::rate_limiting::AdmissionController`]
/// should build the state with [`AppStateData::new_with_controller`] and mount this router, so
/// the usage and queue endpoints report on the budget that is actually in use.
pub fn router(app_state: AppStateData) -> Router {
    Router::new()
        .route("/status", get(status::status_handler))
        .route("/health", get(status::health_handler))
        .route("/rate_limit/usage", get(rate_limit::usage_handler))
        .route(
            "/rate_limit/queue/{id}",
            get(rate_limit::queue_position_handler),
        )
        .fallback(fallback::handle_404)
        .with_state(app_state)
}
