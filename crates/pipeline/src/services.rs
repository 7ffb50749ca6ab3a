//! Registries the controller resolves sources, encoders and outputs from.

use golive_capture_engine::SourceRegistry;
use golive_common::config::AppConfig;
use golive_encoder::{probe_capabilities, BackendRegistry, Capabilities};
use golive_output::TransportRegistry;

#[derive(Debug, Clone)]
pub struct PipelineServices {
    pub sources: SourceRegistry,
    pub encoders: BackendRegistry,
    pub transports: TransportRegistry,
}

impl PipelineServices {
    pub fn new(sources: SourceRegistry, encoders: BackendRegistry, transports: TransportRegistry) -> Self {
        Self {
            sources,
            encoders,
            transports,
        }
    }

    /// Built-in implementations, with encoder backends filtered by what the
    /// transcoder reports. A failed probe leaves every backend to its own
    /// open check.
    pub async fn detect(config: &AppConfig) -> Self {
        let capabilities = match probe_capabilities(&config.transcoder).await {
            Ok(caps) => Some(caps),
            Err(e) => {
                tracing::warn!(error = %e, "Capability probe failed; backends will be checked individually");
                None
            }
        };
        Self::with_capabilities(config, capabilities)
    }

    pub fn with_capabilities(config: &AppConfig, capabilities: Option<Capabilities>) -> Self {
        Self::new(
            SourceRegistry::with_defaults(),
            BackendRegistry::with_transcoder(&config.transcoder, capabilities),
            TransportRegistry::with_defaults(&config.transcoder),
        )
    }
}
