//! Backend registry and ordered failover `open`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use golive_common::config::{QueueConfig, TranscoderConfig};
use golive_common::error::{GoliveError, GoliveResult};
use golive_media_model::{BackendFailure, BackendKind, EncoderConfig};

use crate::backend::{EncoderBackend, TranscoderBackend};
use crate::probe::Capabilities;
use crate::session::EncoderSession;

/// Maps backend kinds to implementations. Resolved once per `open`.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: BTreeMap<BackendKind, Arc<dyn EncoderBackend>>,
    open_timeout: Option<Duration>,
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.kinds())
            .field("open_timeout", &self.open_timeout)
            .finish()
    }
}

impl BackendRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every backend kind, each driving the external transcoder.
    pub fn with_transcoder(transcoder: &TranscoderConfig, capabilities: Option<Capabilities>) -> Self {
        let capabilities = capabilities.map(Arc::new);
        let mut registry = Self::empty().with_open_timeout(transcoder.probe_timeout());
        for kind in BackendKind::ALL {
            registry.register(Arc::new(TranscoderBackend::new(
                kind,
                transcoder.clone(),
                capabilities.clone(),
            )));
        }
        registry
    }

    /// Upper bound on each phase of opening one backend: the check and the
    /// start are timed separately.
    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = Some(timeout);
        self
    }

    /// Register (or replace) the implementation for its kind.
    pub fn register(&mut self, backend: Arc<dyn EncoderBackend>) {
        self.backends.insert(backend.kind(), backend);
    }

    pub fn kinds(&self) -> Vec<BackendKind> {
        self.backends.keys().copied().collect()
    }

    /// Open a session on the first backend in `config.backend_preference`
    /// that checks and starts successfully.
    ///
    /// Each failure is recorded and carried by the returned session. When
    /// every backend fails the result is `EncoderUnavailable` listing them.
    pub async fn open(&self, config: &EncoderConfig, queues: &QueueConfig) -> GoliveResult<EncoderSession> {
        config.validate().map_err(GoliveError::config)?;

        let mut failures: Vec<BackendFailure> = Vec::new();
        for &kind in &config.backend_preference {
            match self.try_backend(kind, config).await {
                Ok(streams) => {
                    if !failures.is_empty() {
                        tracing::info!(
                            backend = %kind,
                            skipped = failures.len(),
                            "Encoder opened after falling back"
                        );
                    }
                    return Ok(EncoderSession::start(kind, failures, streams, queues));
                }
                Err(e) => {
                    tracing::warn!(backend = %kind, error = %e, "Encoder backend unavailable");
                    failures.push(BackendFailure {
                        backend: kind,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let attempts = failures
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Err(GoliveError::EncoderUnavailable { attempts })
    }

    async fn try_backend(
        &self,
        kind: BackendKind,
        config: &EncoderConfig,
    ) -> GoliveResult<crate::backend::EncoderStreams> {
        let backend = self
            .backends
            .get(&kind)
            .ok_or_else(|| GoliveError::unsupported(format!("no {kind} backend registered")))?;

        bounded(kind, "check", self.open_timeout, backend.check(config)).await?;
        bounded(kind, "start", self.open_timeout, backend.start(config)).await
    }
}

async fn bounded<T>(
    kind: BackendKind,
    phase: &str,
    limit: Option<Duration>,
    attempt: impl std::future::Future<Output = GoliveResult<T>>,
) -> GoliveResult<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, attempt).await.map_err(|_| {
            GoliveError::timeout(format!(
                "{kind} did not open: {phase} exceeded {} ms",
                limit.as_millis()
            ))
        })?,
        None => attempt.await,
    }
}
