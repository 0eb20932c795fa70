// src/config/mod.rs
mod models;

pub use models::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a file (YAML or JSON)
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read config file {}", path.display()))?;

    let extension = path.extension().and_then(|s| s.to_str());
    let config: Config = if matches!(extension, Some("yaml") | Some("yml")) {
        serde_yaml::from_str(&contents).context("failed to parse YAML config")?
    } else {
        serde_json::from_str(&contents).context("failed to parse JSON config")?
    };

    config.validate()?;
    Ok(config)
}
