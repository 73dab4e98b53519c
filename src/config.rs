//! Configuration for the gateway client

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::GatewayError;

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway WebSocket URL
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,

    /// Timeout for establishing and authenticating the connection, in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Timeout for control-class calls (metadata, create/delete/rename), in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Timeout for transfer-class calls (read/write with progress), in milliseconds
    #[serde(default = "default_transfer_timeout_ms")]
    pub transfer_timeout_ms: u64,
}

fn default_gateway_url() -> String {
    "ws://localhost:8090/ws".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_transfer_timeout_ms() -> u64 {
    30_000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            gateway_url: default_gateway_url(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            transfer_timeout_ms: default_transfer_timeout_ms(),
        }
    }
}

impl GatewayConfig {
    /// Validate the configuration, returning it unchanged on success.
    pub fn validate(self) -> Result<Self, GatewayError> {
        let url = url::Url::parse(&self.gateway_url)
            .map_err(|e| GatewayError::Config(format!("Invalid gateway URL: {}", e)))?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(GatewayError::Config(format!(
                    "Unsupported URL scheme: {}",
                    other
                )));
            }
        }
        if self.request_timeout_ms == 0 {
            return Err(GatewayError::Config("request_timeout_ms must be > 0".into()));
        }
        Ok(self)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }
}
