//! Read-only reporting over the shared budget.
//!
//! A [`UsageReporter`] holds the same controller the admission path uses, so every snapshot
//! reflects the calls admitted so far and the callers still waiting in the queue.

use std::sync::Arc;

use serde::Serialize;

use super::admission_controller::AdmissionController;
use super::usage_ledger::WindowUsage;
use crate::config::RateLimitConfig;

/// Point-in-time view of the shared budget.
///
/// Serialized with the camelCase field names that dashboards already consume.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UsageSnapshot {
    #[serde(rename = "requests")]
    pub requests_in_window: u64,
    #[serde(rename = "requestsLimit")]
    pub request_limit: u64,
    #[serde(rename = "requestsAvailable")]
    pub requests_available: u64,
    #[serde(rename = "tokens")]
    pub tokens_in_window: u64,
    #[serde(rename = "tokensLimit")]
    pub token_limit: u64,
    #[serde(rename = "tokensAvailable")]
    pub tokens_available: u64,
    #[serde(rename = "queueLength")]
    pub queue_length: usize,
    #[serde(rename = "requestsInFlight")]
    pub requests_in_flight: u64,
    #[serde(rename = "tokensInFlight")]
    pub tokens_in_flight: u64,
}

impl UsageSnapshot {
    pub(super) fn new(config: &RateLimitConfig, usage: WindowUsage, queue_length: usize) -> Self {
        // Usage recorded outside admission can push the window over its limit.
        Self {
            requests_in_window: usage.requests,
            request_limit: config.request_limit(),
            requests_available: config.request_limit().saturating_sub(usage.requests),
            tokens_in_window: usage.tokens,
            token_limit: config.token_limit(),
            tokens_available: config.token_limit().saturating_sub(usage.tokens),
            queue_length,
            requests_in_flight: usage.requests_in_flight,
            tokens_in_flight: usage.tokens_in_flight,
        }
    }
}

/// Read-only handle on an [`AdmissionController`] for health and monitoring surfaces.
#[derive(Clone, Debug)]
pub struct UsageReporter {
    controller: Arc<AdmissionController>,
}

impl UsageReporter {
    pub fn new(controller: Arc<AdmissionController>) -> Self {
        Self { controller }
    }

    pub fn report(&self) -> UsageSnapshot {
        self.controller.report()
    }
}
