use std::sync::Arc;

use crate::config::Config;
use crate::rate_limiting::{AdmissionController, UsageReporter};

/// State for the API
#[derive(Clone, Debug)]
pub struct AppStateData {
    pub config: Arc<Config>,
    pub controller: Arc<AdmissionController>,
    pub reporter: UsageReporter,
}
pub type AppState = axum::extract::State<AppStateData>;

impl AppStateData {
    pub fn new(config: Arc<Config>) -> Self {
        let controller = Arc::new(AdmissionController::new(config.rate_limiting.clone()));
        Self::new_with_controller(config, controller)
    }

    /// Builds the state around an existing controller, so that the process embedding the
    /// gateway can keep admitting calls through the same budget it reports on.
    pub fn new_with_controller(config: Arc<Config>, controller: Arc<AdmissionController>) -> Self {
        let reporter = UsageReporter::new(Arc::clone(&controller));
        Self {
            config,
            controller,
            reporter,
        }
    }
}
