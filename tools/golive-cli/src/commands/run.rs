//! Run a pipeline spec file.

use std::path::PathBuf;

use golive_common::config::AppConfig;

use super::load_spec;
use super::session::run_until_interrupted;

pub async fn run(config: AppConfig, path: PathBuf) -> anyhow::Result<()> {
    let spec = load_spec(&path)?;
    spec.validate()?;
    println!("Running spec: {}", path.display());
    run_until_interrupted(config, spec).await
}
