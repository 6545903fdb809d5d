use axum::Router;
use axum::routing::get;
use clap::Parser;
use std::fmt::Display;
use std::io::ErrorKind;
use std::sync::Arc;
use tokio::signal;
use tower_http::trace::{DefaultOnFailure, TraceLayer};
use tracing::Level;

use admission_core::config::Config;
use admission_core::endpoints;
use admission_core::endpoints::status::ADMISSION_GATEWAY_VERSION;
use admission_core::gateway_util::AppStateData;
use admission_core::observability;

mod cli;
use cli::GatewayArgs;

#[tokio::main]
async fn main() {
    let args = GatewayArgs::parse();
    // Set up logs and metrics immediately, so that config errors are visible.
    let observability_handle =
        observability::setup_observability(args.log_format).expect_pretty("Failed to set up logs");

    tracing::info!("Starting Admission Gateway {ADMISSION_GATEWAY_VERSION}");

    let metrics_handle = observability::setup_metrics().expect_pretty("Failed to set up metrics");

    let config = Arc::new(
        Config::load_from_path(&args.config_file)
            .ok() // Don't print the error here, since it was already printed when it was constructed
            .expect_pretty(&format!(
                "Failed to load config file `{}`",
                args.config_file.display()
            )),
    );

    if config.gateway.debug {
        observability_handle
            .delayed_debug_logs
            .enable_debug()
            .expect_pretty("Failed to enable debug logs");
    }

    let bind_address = config
        .gateway
        .resolve_bind_address(args.bind_address)
        .ok()
        .expect_pretty("Invalid bind address");

    // The standalone gateway owns its controller. Processes that admit calls themselves mount
    // `endpoints::router` over their own controller instead.
    let app_state = AppStateData::new(config.clone());

    let router = Router::new()
        .route(
            "/metrics",
            get(move || std::future::ready(metrics_handle.render())),
        )
        .merge(endpoints::router(app_state.clone()))
        // We log failed requests at 'DEBUG', since errors are already logged when they are constructed
        .layer(TraceLayer::new_for_http().on_failure(DefaultOnFailure::new().level(Level::DEBUG)));

    let listener = match tokio::net::TcpListener::bind(bind_address).await {
        Ok(listener) => listener,
        Err(e) if e.kind() == ErrorKind::AddrInUse => {
            tracing::error!(
                "Failed to bind to socket address {bind_address}: {e}. Tip: Ensure no other process is using port {} or try a different port.",
                bind_address.port()
            );
            std::process::exit(1);
        }
        Err(e) => {
            tracing::error!("Failed to bind to socket address {bind_address}: {e}");
            std::process::exit(1);
        }
    };

    // This will give us the chosen port if the user specified a port of 0
    let actual_bind_address = listener
        .local_addr()
        .expect_pretty("Failed to get bind address from listener");

    let rate_limiting = &config.rate_limiting;
    tracing::info!(
        "├ Budget: {} requests and {} tokens per {}s window",
        rate_limiting.request_limit(),
        rate_limiting.token_limit(),
        rate_limiting.window_seconds()
    );
    tracing::info!(
        "├ Queue wait: up to {}ms, polling every {}ms",
        rate_limiting.wait().max_wait_ms,
        rate_limiting.wait().poll_interval_ms
    );
    tracing::info!("└ Admission Gateway is listening on {actual_bind_address}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect_pretty("Failed to start server");

    let snapshot = app_state.reporter.report();
    tracing::info!(
        "Shut down with {} requests and {} tokens in the current window and {} queued",
        snapshot.requests_in_window,
        snapshot.tokens_in_window,
        snapshot.queue_length
    );
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect_pretty("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect_pretty("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM signal");
        }
    };
}

/// We don't allow panic, unwrap, or similar methods in the codebase,
/// except for the private `expect_pretty` method, which is to be used only in
/// main.rs during initialization. After initialization, we expect all code to
/// handle errors gracefully.
///
/// `expect_pretty` logs an error message and exits with a status code of 1.
trait ExpectPretty<T> {
    fn expect_pretty(self, msg: &str) -> T;
}

impl<T, E: Display> ExpectPretty<T> for Result<T, E> {
    fn expect_pretty(self, msg: &str) -> T {
        match self {
            Ok(value) => value,
            Err(err) => {
                tracing::error!("{msg}: {err}");
                std::process::exit(1);
            }
        }
    }
}

impl<T> ExpectPretty<T> for Option<T> {
    fn expect_pretty(self, msg: &str) -> T {
        match self {
            Some(value) => value,
            None => {
                tracing::error!("{msg}");
                std::process::exit(1);
            }
        }
    }
}
