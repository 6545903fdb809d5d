use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorDetails};

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    #[serde(default)]
    pub bind_address: Option<SocketAddr>,
    /// If `true`, the default log filter includes debug logs from this workspace.
    #[serde(default)]
    pub debug: bool,
}

impl GatewayConfig {
    /// Picks the listen address from the `--bind-address` flag or the config file,
    /// falling back to `0.0.0.0:3000`. Setting both is an error.
    pub fn resolve_bind_address(
        &self,
        cli_bind_address: Option<SocketAddr>,
    ) -> Result<SocketAddr, Error> {
        match (cli_bind_address, self.bind_address) {
            (Some(_), Some(_)) => Err(Error::new(ErrorDetails::Config {
                message: "must not specify both `--bind-address` and `[gateway].bind_address`"
                    .to_string(),
            })),
            (Some(address), None) | (None, Some(address)) => Ok(address),
            (None, None) => Ok(SocketAddr::from(([0, 0, 0, 0], 3000))),
        }
    }
}
