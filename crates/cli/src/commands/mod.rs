//! CLI Commands

pub mod cases;
pub mod classify;
pub mod generate;
pub mod run;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use qarun_common::QarunConfig;
use qarun_e2e::TestRailClient;

/// Load the config file, apply `QARUN_*` overrides and validate
pub fn load_config(path: &Path) -> Result<QarunConfig> {
    let mut config = QarunConfig::load(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    config
        .apply_env_overrides()
        .context("Invalid QARUN_* environment override")?;
    Ok(config)
}

/// TestRail client for commands that talk to the remote service directly
pub fn testrail_client(config: &QarunConfig) -> Result<Arc<TestRailClient>> {
    if config.sync.url.trim().is_empty() {
        anyhow::bail!("sync.url is not configured");
    }
    Ok(Arc::new(
        TestRailClient::new(&config.sync).context("Failed to build TestRail client")?,
    ))
}
