#![allow(clippy::expect_used, clippy::unwrap_used, clippy::print_stdout)]

mod common;

use common::{start_gateway_expect_failure, start_gateway_on_random_port};
use serde_json::Value;

const SMALL_BUDGET: &str = r"
requests_per_window = 2
tokens_per_window = 1000
";

#[tokio::test]
async fn test_status_and_health() {
    let child_data = start_gateway_on_random_port(SMALL_BUDGET).await;

    let response = child_data.get("/status").await;
    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));

    let response = child_data.get("/health").await;
    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["gateway"], "ok");
    assert_eq!(body["queueLength"], 0);
}

#[tokio::test]
async fn test_usage_starts_empty() {
    let child_data = start_gateway_on_random_port(SMALL_BUDGET).await;

    let response = child_data.get("/rate_limit/usage").await;
    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["requests"], 0);
    assert_eq!(body["requestsLimit"], 2);
    assert_eq!(body["requestsAvailable"], 2);
    assert_eq!(body["tokens"], 0);
    assert_eq!(body["tokensLimit"], 1000);
    assert_eq!(body["tokensAvailable"], 1000);
    assert_eq!(body["queueLength"], 0);
}

#[tokio::test]
async fn test_unknown_queue_id_is_not_found() {
    let child_data = start_gateway_on_random_port(SMALL_BUDGET).await;

    let response = child_data.get("/rate_limit/queue/missing").await;
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    let response = child_data.get("/no/such/route").await;
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Route not found: GET /no/such/route");
}

#[tokio::test]
async fn test_metrics_endpoint_renders() {
    let child_data = start_gateway_on_random_port(SMALL_BUDGET).await;
    let response = child_data.get("/metrics").await;
    assert!(response.status().is_success());
    // Nothing has been admitted yet, so the body may be empty, but it must be text
    response.text().await.unwrap();
}

#[tokio::test]
async fn test_bind_address_cli_and_config_errors() {
    let output = start_gateway_expect_failure(
        r#"
        [gateway]
        bind_address = "127.0.0.1:0"

        [rate_limiting]
        requests_per_window = 2
        tokens_per_window = 1000
        "#,
        &["--bind-address", "127.0.0.1:0"],
    )
    .await;

    let error_logged = output.iter().any(|line| {
        line.contains("must not specify both `--bind-address` and `[gateway].bind_address`")
    });
    assert!(
        error_logged,
        "Expected error about specifying both CLI and config bind_address, output: {output:?}",
    );
}

#[tokio::test]
async fn test_invalid_budget_fails_startup() {
    let output = start_gateway_expect_failure(
        r"
        [rate_limiting]
        requests_per_window = 0
        tokens_per_window = 1000
        ",
        &[],
    )
    .await;

    let error_logged = output
        .iter()
        .any(|line| line.contains("`rate_limiting.requests_per_window` must be greater than zero"));
    assert!(error_logged, "Expected a config error, output: {output:?}");
}
