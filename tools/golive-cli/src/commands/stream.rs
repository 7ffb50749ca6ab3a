//! Go live to a network ingest.

use golive_common::config::AppConfig;
use golive_media_model::OutputTarget;

use super::media::MediaArgs;
use super::session::run_until_interrupted;

pub async fn run(
    config: AppConfig,
    url: String,
    stream_key: Option<String>,
    media: MediaArgs,
) -> anyhow::Result<()> {
    let target = OutputTarget::network(url, stream_key)?;
    let spec = media.into_spec(target, &config.defaults)?;
    spec.validate()?;
    run_until_interrupted(config, spec).await
}
