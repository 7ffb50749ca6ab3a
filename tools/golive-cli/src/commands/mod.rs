pub mod check;
pub mod config;
pub mod media;
pub mod probe;
pub mod record;
pub mod run;
pub mod session;
pub mod stream;

use std::path::Path;

use anyhow::Context;
use golive_common::config::AppConfig;
use golive_pipeline::PipelineSpec;

/// Config from `path`, or from the standard location when none is given.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config {}", path.display()))
        }
        None => Ok(AppConfig::load()),
    }
}

pub fn load_spec(path: &Path) -> anyhow::Result<PipelineSpec> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read spec {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse spec {}", path.display()))
}
