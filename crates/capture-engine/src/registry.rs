//! Source constructor registry.
//!
//! Maps a source kind identifier (see [`SourceKind::registry_key`]) to a
//! constructor. Resolved once per `attach_source`.

use std::collections::BTreeMap;
use std::sync::Arc;

use golive_common::clock::SessionClock;
use golive_common::config::TranscoderConfig;
use golive_common::error::{GoliveError, GoliveResult};
use golive_media_model::{SourceConfig, SourceKind};

use crate::backend::{SourceBackend, TestPatternSource, TranscoderSource};

/// Shared inputs every source constructor receives.
#[derive(Debug, Clone)]
pub struct SourceContext {
    pub transcoder: TranscoderConfig,

    /// Timebase for sample PTS.
    pub clock: SessionClock,
}

impl SourceContext {
    pub fn new(transcoder: TranscoderConfig, clock: SessionClock) -> Self {
        Self { transcoder, clock }
    }
}

pub type SourceConstructor = Arc<
    dyn Fn(&SourceConfig, &SourceContext) -> GoliveResult<Box<dyn SourceBackend>> + Send + Sync,
>;

#[derive(Clone, Default)]
pub struct SourceRegistry {
    constructors: BTreeMap<String, SourceConstructor>,
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl SourceRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with every built-in source kind.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        let transcoder: SourceConstructor = Arc::new(|config, ctx| {
            Ok(Box::new(TranscoderSource::new(config.clone(), ctx.clone())?)
                as Box<dyn SourceBackend>)
        });
        for key in ["camera", "screen", "media_file", "network"] {
            registry.register(key, transcoder.clone());
        }
        registry.register(
            "test_pattern",
            Arc::new(|config, ctx| {
                let tone_hz = match &config.kind {
                    SourceKind::TestPattern { tone_hz } => *tone_hz,
                    _ => None,
                };
                Ok(Box::new(TestPatternSource::new(config.clone(), tone_hz, ctx.clock.clone()))
                    as Box<dyn SourceBackend>)
            }),
        );
        registry
    }

    /// Register or replace the constructor for `kind`.
    pub fn register(&mut self, kind: impl Into<String>, constructor: SourceConstructor) {
        self.constructors.insert(kind.into(), constructor);
    }

    pub fn kinds(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    pub fn build(
        &self,
        config: &SourceConfig,
        ctx: &SourceContext,
    ) -> GoliveResult<Box<dyn SourceBackend>> {
        let key = config.kind.registry_key();
        let constructor = self.constructors.get(key).ok_or_else(|| {
            GoliveError::unsupported(format!("No source backend registered for '{key}'"))
        })?;
        constructor(config, ctx)
    }
}
