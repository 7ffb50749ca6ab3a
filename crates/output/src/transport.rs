//! Packet transports and the registry that builds them from targets.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use golive_common::config::TranscoderConfig;
use golive_common::error::{GoliveError, GoliveResult};
use golive_media_model::{EncodedPacket, OutputTarget};

use crate::file::FileTransport;
use crate::network::NetworkTransport;

/// How a sink reacts when a transport fails mid-session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Reconnect with backoff, dropping packets meanwhile.
    Reconnect,
    /// Fail the session immediately.
    Fatal,
}

/// Moves encoded packets to their destination.
#[async_trait]
pub trait PacketTransport: Send {
    fn failure_policy(&self) -> FailurePolicy;

    /// Open (or reopen after a failure) the destination.
    async fn connect(&mut self) -> GoliveResult<()>;

    async fn send(&mut self, packet: &EncodedPacket) -> GoliveResult<()>;

    /// Flush and release the destination. Safe to call when not connected.
    async fn shutdown(&mut self) -> GoliveResult<()>;
}

pub type TransportConstructor =
    Arc<dyn Fn(&OutputTarget) -> GoliveResult<Box<dyn PacketTransport>> + Send + Sync>;

/// Registry key for a target: `file` or `network`.
pub fn target_kind(target: &OutputTarget) -> &'static str {
    match target {
        OutputTarget::File { .. } => "file",
        OutputTarget::Network { .. } => "network",
    }
}

#[derive(Clone, Default)]
pub struct TransportRegistry {
    constructors: BTreeMap<&'static str, TransportConstructor>,
}

impl std::fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportRegistry")
            .field("kinds", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TransportRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// File writes plus transcoder-remuxed network streams.
    pub fn with_defaults(transcoder: &TranscoderConfig) -> Self {
        let mut registry = Self::empty();
        registry.register("file", |target| match target {
            OutputTarget::File { path, .. } => Ok(Box::new(FileTransport::new(path.clone()))),
            other => Err(GoliveError::config(format!(
                "file transport cannot write to {}",
                other.describe()
            ))),
        });
        let transcoder = transcoder.clone();
        registry.register("network", move |target| {
            Ok(Box::new(NetworkTransport::new(target.clone(), transcoder.clone())?))
        });
        registry
    }

    pub fn register<F>(&mut self, kind: &'static str, constructor: F)
    where
        F: Fn(&OutputTarget) -> GoliveResult<Box<dyn PacketTransport>> + Send + Sync + 'static,
    {
        self.constructors.insert(kind, Arc::new(constructor));
    }

    pub fn build(&self, target: &OutputTarget) -> GoliveResult<Box<dyn PacketTransport>> {
        let kind = target_kind(target);
        let constructor = self
            .constructors
            .get(kind)
            .ok_or_else(|| GoliveError::unsupported(format!("no {kind} transport registered")))?;
        constructor(target)
    }
}
