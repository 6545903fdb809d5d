//! Admission control for a shared, time-windowed LLM provider budget.
//!
//! The pieces, bottom-up:
//! - [`UsageLedger`]: settled usage records plus provisional charges for in-flight calls.
//! - [`WaitQueue`]: denied calls ordered by `(priority DESC, enqueued_at ASC)`.
//! - [`AdmissionController`]: the single authority that decides whether a call may proceed,
//!   guarding the ledger and the queue with one lock.
//! - [`UsageReporter`]: read-only [`UsageSnapshot`]s for health and monitoring endpoints.
//!
//! Callers that are denied either poll the controller themselves or use [`wait_for_admission`].

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, ErrorDetails};

mod admission_controller;
mod usage_ledger;
mod usage_reporter;
mod wait_queue;
mod waiter;

pub use admission_controller::{Admission, AdmissionController, QueueAdmission, Reservation};
pub use usage_ledger::{ReservationId, UsageLedger, UsageRecord, WindowUsage};
pub use usage_reporter::{UsageReporter, UsageSnapshot};
pub use wait_queue::{QueuedRequest, WaitQueue};
pub use waiter::{AdmissionRequest, wait_for_admission};

pub(crate) const ADMISSION_DECISIONS_METRIC: &str = "admission_decisions_total";
pub(crate) const SETTLED_TOKENS_METRIC: &str = "admission_settled_tokens_total";
pub(crate) const QUEUE_LENGTH_METRIC: &str = "admission_queue_length";

/// The two budgets enforced per window.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitResource {
    Request,
    Token,
}

impl fmt::Display for RateLimitResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitResource::Request => write!(f, "requests"),
            RateLimitResource::Token => write!(f, "tokens"),
        }
    }
}

/// Caller-supplied identifier of a queued request.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct QueueId(String);

impl QueueId {
    pub fn new(id: impl Into<String>) -> Self {
        QueueId(id.into())
    }

    /// A fresh, time-ordered id for callers that do not have one of their own.
    pub fn generate() -> Self {
        QueueId(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for QueueId {
    fn from(id: &str) -> Self {
        QueueId(id.to_string())
    }
}

impl From<String> for QueueId {
    fn from(id: String) -> Self {
        QueueId(id)
    }
}

/// Converts a signed token count received from an outer layer into an estimate.
///
/// Negative counts are rejected rather than clamped to zero.
pub fn estimated_tokens_from_signed(value: i64) -> Result<u64, Error> {
    u64::try_from(value).map_err(|_| {
        Error::new(ErrorDetails::InvalidArgument {
            message: format!("estimated tokens must be non-negative, got {value}"),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_estimates_are_invalid_arguments() {
        let err = estimated_tokens_from_signed(-1).unwrap_err();
        assert!(matches!(
            err.get_details(),
            ErrorDetails::InvalidArgument { .. }
        ));
        assert_eq!(estimated_tokens_from_signed(0).unwrap(), 0);
        assert_eq!(estimated_tokens_from_signed(600).unwrap(), 600);
    }

    #[test]
    fn test_generated_queue_ids_are_unique() {
        let a = QueueId::generate();
        let b = QueueId::generate();
        assert_ne!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn test_resource_display() {
        assert_eq!(RateLimitResource::Request.to_string(), "requests");
        assert_eq!(RateLimitResource::Token.to_string(), "tokens");
    }
}
