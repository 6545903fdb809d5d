//! Admission control for calls to a rate-limited LLM provider.
//!
//! A process that shares one provider budget (requests and tokens per sliding window) across
//! many concurrent callers builds a single [`rate_limiting::AdmissionController`] and asks it
//! before every call. Denied callers wait in a priority queue. The `admission-gateway` binary
//! exposes the controller's usage over HTTP.

pub mod clock;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod gateway_util;
pub mod observability;
pub mod rate_limiting;
