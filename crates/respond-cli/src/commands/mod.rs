//! CLI command implementations for `respond`.
//!
//! - [`run`] -- Drive a scenario through the pipeline.
//! - [`check`] -- Validate a scenario file.

pub mod check;
pub mod run;

use std::path::Path;

use respond_types::config::ScenarioConfig;

/// Read, parse and validate the scenario file at `path`.
pub async fn load_scenario(path: &str) -> anyhow::Result<ScenarioConfig> {
    let file = Path::new(path);
    if !tokio::fs::try_exists(file).await.unwrap_or(false) {
        anyhow::bail!("scenario file not found: {path}");
    }
    let contents = tokio::fs::read_to_string(file)
        .await
        .map_err(|e| anyhow::anyhow!("failed to read scenario: {e}"))?;
    ScenarioConfig::from_json(&contents).map_err(|e| anyhow::anyhow!("invalid scenario {path}: {e}"))
}
