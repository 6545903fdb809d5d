use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorDetails};

/// NOTE: this file deserializes the `[rate_limiting]` table of the config file
///
/// [rate_limiting]
/// window_seconds = 60
/// requests_per_window = 500
/// tokens_per_window = 200000
///
/// [rate_limiting.wait]
/// max_wait_ms = 120000
/// poll_interval_ms = 250
///
/// and validates it into a `RateLimitConfig`, which is immutable for the lifetime of the process.

pub const DEFAULT_WINDOW_SECONDS: u64 = 60;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct UninitializedRateLimitConfig {
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    pub requests_per_window: u64,
    pub tokens_per_window: u64,
    #[serde(default)]
    pub wait: WaitConfig,
}

fn default_window_seconds() -> u64 {
    DEFAULT_WINDOW_SECONDS
}

impl UninitializedRateLimitConfig {
    pub fn load(self) -> Result<RateLimitConfig, Error> {
        let UninitializedRateLimitConfig {
            window_seconds,
            requests_per_window,
            tokens_per_window,
            wait,
        } = self;
        wait.validate()?;
        let mut config = RateLimitConfig::new(window_seconds, requests_per_window, tokens_per_window)?;
        config.wait = wait;
        Ok(config)
    }
}

/// Process-wide rate limit budget.
///
/// Fields are private so that every instance has passed validation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RateLimitConfig {
    window_seconds: u64,
    request_limit: u64,
    token_limit: u64,
    wait: WaitConfig,
}

impl RateLimitConfig {
    pub fn new(window_seconds: u64, request_limit: u64, token_limit: u64) -> Result<Self, Error> {
        if window_seconds == 0 {
            return Err(Error::new(ErrorDetails::Config {
                message: "`rate_limiting.window_seconds` must be greater than zero".to_string(),
            }));
        }
        if request_limit == 0 {
            return Err(Error::new(ErrorDetails::Config {
                message: "`rate_limiting.requests_per_window` must be greater than zero"
                    .to_string(),
            }));
        }
        if token_limit == 0 {
            return Err(Error::new(ErrorDetails::Config {
                message: "`rate_limiting.tokens_per_window` must be greater than zero".to_string(),
            }));
        }
        Ok(Self {
            window_seconds,
            request_limit,
            token_limit,
            wait: WaitConfig::default(),
        })
    }

    pub fn window_seconds(&self) -> u64 {
        self.window_seconds
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    pub fn request_limit(&self) -> u64 {
        self.request_limit
    }

    pub fn token_limit(&self) -> u64 {
        self.token_limit
    }

    pub fn wait(&self) -> &WaitConfig {
        &self.wait
    }
}

/// Caller-side policy for waiting in the queue.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WaitConfig {
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            max_wait_ms: default_max_wait_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_max_wait_ms() -> u64 {
    120_000
}

fn default_poll_interval_ms() -> u64 {
    250
}

impl WaitConfig {
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.poll_interval_ms == 0 {
            return Err(Error::new(ErrorDetails::Config {
                message: "`rate_limiting.wait.poll_interval_ms` must be greater than zero"
                    .to_string(),
            }));
        }
        if self.max_wait_ms < self.poll_interval_ms {
            return Err(Error::new(ErrorDetails::Config {
                message: format!(
                    "`rate_limiting.wait.max_wait_ms` ({}) must be at least `rate_limiting.wait.poll_interval_ms` ({})",
                    self.max_wait_ms, self.poll_interval_ms
                ),
            }));
        }
        Ok(())
    }
}
