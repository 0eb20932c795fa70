// src/config/models.rs
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use url::Url;

/// Tool configuration: which management APIs to talk to and how to
/// authenticate. Defaults live here, not in process-wide state.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Addresses of the load balancer management APIs.
    pub hosts: Vec<String>,

    /// Management API port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Management API version segment.
    #[serde(default = "default_api_version")]
    pub api_version: u8,

    /// HTTP Basic credentials attached to every request.
    pub username: String,
    pub password: String,
}

fn default_port() -> u16 {
    8989
}

fn default_api_version() -> u8 {
    6
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.hosts.is_empty() {
            bail!("config must list at least one management host");
        }
        if self.username.is_empty() || self.password.is_empty() {
            bail!("config must supply API credentials");
        }
        if self.port == 0 {
            bail!("config port must be non-zero");
        }
        Ok(())
    }

    /// Base URL of the management API on one host.
    pub fn base_url(&self, host: &str) -> Result<Url> {
        let raw = format!("http://{host}:{}/api/{}", self.port, self.api_version);
        raw.parse()
            .with_context(|| format!("invalid management URL: {raw}"))
    }
}
