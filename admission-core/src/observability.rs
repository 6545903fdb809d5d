//! Logging and metrics setup for the admission gateway.
//!
//! * `setup_observability` registers the global `tracing` subscriber and returns a handle that can
//!   turn on debug logs once the config file has been read.
//! * `setup_metrics` installs the Prometheus recorder and describes the admission metrics.

use clap::ValueEnum;
use metrics::{Unit, describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{Error, ErrorDetails};
use crate::rate_limiting::{
    ADMISSION_DECISIONS_METRIC, QUEUE_LENGTH_METRIC, SETTLED_TOKENS_METRIC,
};

#[derive(Clone, Debug, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Used when `RUST_LOG` is not set
const DEFAULT_NON_DEBUG_DIRECTIVES: &str = "warn,admission_gateway=info,admission_core=info";
/// Used when `gateway.debug` is `true` and `RUST_LOG` is not set
const DEFAULT_DEBUG_DIRECTIVES: &str = "warn,admission_gateway=debug,admission_core=debug";

pub struct DelayedDebugLogs {
    enable_cb: Box<dyn FnOnce() -> Result<(), Error> + Send + Sync>,
}

impl DelayedDebugLogs {
    pub fn enable_debug(self) -> Result<(), Error> {
        (self.enable_cb)()
    }
}

/// Lets the gateway raise the log level after the config file has been parsed.
/// Logging is set up before that, so that config errors are visible.
pub struct ObservabilityHandle {
    pub delayed_debug_logs: DelayedDebugLogs,
}

/// Registers the global `tracing` subscriber.
///
/// If `RUST_LOG` is set it is used verbatim and `gateway.debug` has no effect.
/// Otherwise we start with `DEFAULT_NON_DEBUG_DIRECTIVES`, which `DelayedDebugLogs` can later
/// swap for `DEFAULT_DEBUG_DIRECTIVES`.
pub fn setup_observability(log_format: LogFormat) -> Result<ObservabilityHandle, Error> {
    let env_var_name = "RUST_LOG";
    let has_env_var = std::env::var(env_var_name).is_ok();

    let default_debug_filter = EnvFilter::builder()
        .parse(DEFAULT_DEBUG_DIRECTIVES)
        .map_err(|e| {
            Error::new(ErrorDetails::InternalError {
                message: format!("Failed to parse internal debug directives: {e}"),
            })
        })?;

    let base_filter = if has_env_var {
        EnvFilter::builder()
            .with_env_var(env_var_name)
            .from_env()
            .map_err(|e| {
                Error::new(ErrorDetails::Observability {
                    message: format!("Invalid `{env_var_name}` environment variable: {e}"),
                })
            })?
    } else {
        EnvFilter::builder()
            .parse(DEFAULT_NON_DEBUG_DIRECTIVES)
            .map_err(|e| {
                Error::new(ErrorDetails::InternalError {
                    message: format!("Failed to parse internal non-debug directives: {e}"),
                })
            })?
    };

    let (log_level, update_log_level) = tracing_subscriber::reload::Layer::new(base_filter);

    let log_layer = match log_format {
        LogFormat::Pretty => {
            Box::new(tracing_subscriber::fmt::layer()) as Box<dyn Layer<_> + Send + Sync>
        }
        LogFormat::Json => Box::new(tracing_subscriber::fmt::layer().json()),
    };

    tracing_subscriber::registry()
        .with(log_level)
        .with(log_layer)
        .try_init()
        .map_err(|e| {
            Error::new(ErrorDetails::Observability {
                message: format!("Failed to register the tracing subscriber: {e}"),
            })
        })?;

    let delayed_debug_logs = if has_env_var {
        DelayedDebugLogs {
            enable_cb: Box::new(|| Ok(())),
        }
    } else {
        DelayedDebugLogs {
            enable_cb: Box::new(move || {
                update_log_level
                    .modify(move |l| {
                        *l = default_debug_filter;
                    })
                    .map_err(|e| {
                        Error::new(ErrorDetails::Observability {
                            message: format!("Failed to update log level: {e}"),
                        })
                    })
            }),
        }
    };
    Ok(ObservabilityHandle { delayed_debug_logs })
}

/// Set up Prometheus metrics exporter
pub fn setup_metrics() -> Result<PrometheusHandle, Error> {
    let metrics_handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
        Error::new(ErrorDetails::Observability {
            message: format!("Failed to install Prometheus exporter: {e}"),
        })
    })?;

    describe_counter!(
        ADMISSION_DECISIONS_METRIC,
        Unit::Count,
        "Admission decisions, labeled by `outcome`",
    );
    describe_counter!(
        SETTLED_TOKENS_METRIC,
        Unit::Count,
        "Tokens recorded against the shared budget",
    );
    describe_gauge!(
        QUEUE_LENGTH_METRIC,
        Unit::Count,
        "Requests currently waiting for admission",
    );

    Ok(metrics_handle)
}
