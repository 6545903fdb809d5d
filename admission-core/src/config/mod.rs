use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorDetails};

pub mod gateway;
pub mod rate_limiting;

pub use gateway::GatewayConfig;
pub use rate_limiting::{RateLimitConfig, UninitializedRateLimitConfig, WaitConfig};

#[derive(Clone, Debug, Serialize)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub rate_limiting: RateLimitConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UninitializedConfig {
    #[serde(default)]
    gateway: GatewayConfig,
    rate_limiting: UninitializedRateLimitConfig,
}

impl Config {
    /// Reads and validates the config file at `path`.
    pub fn load_from_path(path: &Path) -> Result<Config, Error> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::new(ErrorDetails::Config {
                message: format!("Failed to read config file `{}`: {e}", path.display()),
            })
        })?;
        Self::load_from_toml_str(&contents)
    }

    pub fn load_from_toml_str(contents: &str) -> Result<Config, Error> {
        let uninitialized: UninitializedConfig = toml::from_str(contents).map_err(|e| {
            Error::new(ErrorDetails::Config {
                message: format!("Failed to parse config: {e}"),
            })
        })?;
        Ok(Config {
            gateway: uninitialized.gateway,
            rate_limiting: uninitialized.rate_limiting.load()?,
        })
    }
}
