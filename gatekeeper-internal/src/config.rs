use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;

use crate::error::{Error, ErrorDetails};

pub const DEFAULT_BIND_ADDRESS: ([u8; 4], u16) = ([0, 0, 0, 0], 3000);

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
}

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    pub bind_address: Option<SocketAddr>,
    /// Include internal error details in 5xx bodies and enable debug logs
    #[serde(default)]
    pub debug: bool,
    /// Periodically drop counters for rate limit windows that have already ended
    #[serde(default)]
    pub stale_bucket_sweep: bool,
}

impl GatewayConfig {
    pub fn bind_address(&self) -> SocketAddr {
        self.bind_address
            .unwrap_or_else(|| SocketAddr::from(DEFAULT_BIND_ADDRESS))
    }
}

impl Config {
    pub async fn load_from_path(path: &Path) -> Result<Config, Error> {
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::new(ErrorDetails::Config {
                message: format!("Failed to read config file `{}`: {e}", path.display()),
            })
        })?;
        let config = Self::from_toml_str(&contents)?;
        tracing::info!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Config, Error> {
        toml::from_str(contents).map_err(|e| {
            Error::new(ErrorDetails::Config {
                message: format!("Failed to parse config file: {e}"),
            })
        })
    }
}
