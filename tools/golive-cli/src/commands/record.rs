//! Record to a local file.

use std::path::PathBuf;

use golive_common::config::AppConfig;
use golive_media_model::OutputTarget;

use super::media::MediaArgs;
use super::session::run_until_interrupted;

pub async fn run(config: AppConfig, output: PathBuf, media: MediaArgs) -> anyhow::Result<()> {
    let spec = media.into_spec(OutputTarget::file(output.clone()), &config.defaults)?;
    spec.validate()?;
    run_until_interrupted(config, spec).await?;
    println!("Recording saved to: {}", output.display());
    Ok(())
}
