//! Source manager: attaches sources and runs one acquisition task per source.
//!
//! Each task reads from its backend independently of the render cadence and
//! hands samples over through bounded queues: drop-oldest for video so a slow
//! compositor never blocks capture, reject-new for audio so queued audio
//! stays continuous.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use golive_common::config::{QueueConfig, TimeoutConfig};
use golive_common::error::{GoliveError, GoliveResult};
use golive_common::queue::{BoundedQueue, OverflowPolicy, PushOutcome};
use golive_media_model::{
    AudioChunk, Frame, SourceCapability, SourceConfig, SourceHealth, SourceId, SourceState,
};
use tokio::task::JoinHandle;

use crate::backend::{SourceBackend, SourceSample};
use crate::guard::PtsGuard;
use crate::registry::{SourceContext, SourceRegistry};

/// Shared counters and state of one source.
#[derive(Debug, Default)]
pub struct SourceStatus {
    state: AtomicU8,
    anomalies: AtomicU64,
}

impl SourceStatus {
    pub fn state(&self) -> SourceState {
        match self.state.load(Ordering::Acquire) {
            0 => SourceState::Idle,
            1 => SourceState::Active,
            2 => SourceState::Stalled,
            _ => SourceState::Closed,
        }
    }

    /// Store `state`, returning the previous one.
    fn set_state(&self, state: SourceState) -> SourceState {
        let raw = match state {
            SourceState::Idle => 0,
            SourceState::Active => 1,
            SourceState::Stalled => 2,
            SourceState::Closed => 3,
        };
        let prev = self.state.swap(raw, Ordering::AcqRel);
        match prev {
            0 => SourceState::Idle,
            1 => SourceState::Active,
            2 => SourceState::Stalled,
            _ => SourceState::Closed,
        }
    }

    pub fn anomalies(&self) -> u64 {
        self.anomalies.load(Ordering::Relaxed)
    }
}

/// Consumer-side view of an attached source.
#[derive(Debug, Clone)]
pub struct SourceHandle {
    id: SourceId,
    capability: SourceCapability,
    video: Option<BoundedQueue<Frame>>,
    audio: Option<BoundedQueue<AudioChunk>>,
    status: Arc<SourceStatus>,
}

impl SourceHandle {
    fn new(config: &SourceConfig, queues: &QueueConfig) -> Self {
        let capability = config.capability();
        Self {
            id: config.id.clone(),
            capability,
            video: capability.has_video().then(|| {
                BoundedQueue::new(queues.source_video_frames, OverflowPolicy::DropOldest)
                    .with_name(format!("{}-video", config.id))
            }),
            audio: capability.has_audio().then(|| {
                BoundedQueue::new(queues.source_audio_chunks, OverflowPolicy::RejectNew)
                    .with_name(format!("{}-audio", config.id))
            }),
            status: Arc::new(SourceStatus::default()),
        }
    }

    pub fn id(&self) -> &SourceId {
        &self.id
    }

    pub fn capability(&self) -> SourceCapability {
        self.capability
    }

    pub fn state(&self) -> SourceState {
        self.status.state()
    }

    pub fn video_queue(&self) -> Option<&BoundedQueue<Frame>> {
        self.video.as_ref()
    }

    pub fn audio_queue(&self) -> Option<&BoundedQueue<AudioChunk>> {
        self.audio.as_ref()
    }

    pub fn health(&self) -> SourceHealth {
        let video = self.video.as_ref().map(|q| q.stats()).unwrap_or_default();
        let audio = self.audio.as_ref().map(|q| q.stats()).unwrap_or_default();
        SourceHealth {
            id: self.id.clone(),
            state: self.state(),
            frames_accepted: video.pushed,
            frames_dropped: video.dropped,
            audio_chunks_accepted: audio.pushed,
            audio_chunks_rejected: audio.rejected,
            anomalies: self.status.anomalies(),
        }
    }

    fn close_queues(&self) {
        if let Some(q) = &self.video {
            q.close();
        }
        if let Some(q) = &self.audio {
            q.close();
        }
    }
}

struct AttachedSource {
    handle: SourceHandle,
    stop: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Owns every attached source and its acquisition task.
pub struct SourceManager {
    registry: SourceRegistry,
    ctx: SourceContext,
    queues: QueueConfig,
    timeouts: TimeoutConfig,
    /// Pipeline-wide cancellation flag.
    stop: Arc<AtomicBool>,
    sources: BTreeMap<SourceId, AttachedSource>,
}

impl SourceManager {
    pub fn new(
        registry: SourceRegistry,
        ctx: SourceContext,
        queues: QueueConfig,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            registry,
            ctx,
            queues,
            timeouts,
            stop: Arc::new(AtomicBool::new(false)),
            sources: BTreeMap::new(),
        }
    }

    /// Observe an external cancellation flag in every acquisition loop.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// Open a source and start its acquisition task.
    pub async fn attach_source(&mut self, config: SourceConfig) -> GoliveResult<SourceHandle> {
        if self.sources.contains_key(&config.id) {
            return Err(GoliveError::config(format!(
                "Source {} is already attached",
                config.id
            )));
        }

        let mut backend = self.registry.build(&config, &self.ctx)?;
        backend.open().await?;

        let handle = SourceHandle::new(&config, &self.queues);
        handle.status.set_state(SourceState::Active);
        let stop = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(acquisition_loop(
            backend,
            handle.clone(),
            stop.clone(),
            self.stop.clone(),
            self.timeouts.clone(),
        ));

        tracing::info!(
            source = %config.id,
            kind = config.kind.registry_key(),
            capability = ?handle.capability(),
            "Source attached"
        );

        self.sources.insert(
            config.id.clone(),
            AttachedSource {
                handle: handle.clone(),
                stop,
                task,
            },
        );
        Ok(handle)
    }

    /// Stop a source's task and release its backend.
    pub async fn detach_source(&mut self, id: &SourceId) -> GoliveResult<()> {
        let attached = self
            .sources
            .remove(id)
            .ok_or_else(|| GoliveError::config(format!("Source {id} is not attached")))?;
        stop_attached(attached, self.timeouts.shutdown_grace()).await;
        tracing::info!(source = %id, "Source detached");
        Ok(())
    }

    /// Oldest queued frame of `handle`, if any.
    pub fn poll_frame(&self, handle: &SourceHandle) -> Option<Frame> {
        handle.video.as_ref().and_then(|q| q.try_pop())
    }

    /// Oldest queued audio chunk of `handle`, if any.
    pub fn poll_audio(&self, handle: &SourceHandle) -> Option<AudioChunk> {
        handle.audio.as_ref().and_then(|q| q.try_pop())
    }

    pub fn handle(&self, id: &SourceId) -> Option<SourceHandle> {
        self.sources.get(id).map(|s| s.handle.clone())
    }

    pub fn handles(&self) -> Vec<SourceHandle> {
        self.sources.values().map(|s| s.handle.clone()).collect()
    }

    pub fn health(&self) -> Vec<SourceHealth> {
        self.sources.values().map(|s| s.handle.health()).collect()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Detach every source, each within the shutdown grace period.
    pub async fn shutdown(&mut self) {
        let grace = self.timeouts.shutdown_grace();
        let sources = std::mem::take(&mut self.sources);
        // Flags are set first so all loops wind down concurrently.
        for attached in sources.values() {
            attached.stop.store(true, Ordering::SeqCst);
        }
        for (id, attached) in sources {
            stop_attached(attached, grace).await;
            tracing::debug!(source = %id, "Source stopped");
        }
    }
}

impl Drop for SourceManager {
    fn drop(&mut self) {
        for attached in self.sources.values() {
            attached.stop.store(true, Ordering::SeqCst);
            attached.task.abort();
        }
    }
}

async fn stop_attached(attached: AttachedSource, grace: Duration) {
    attached.stop.store(true, Ordering::SeqCst);
    let AttachedSource {
        handle, mut task, ..
    } = attached;
    if tokio::time::timeout(grace, &mut task).await.is_err() {
        tracing::warn!(source = %handle.id, "Source task did not exit in time; aborting");
        task.abort();
    }
    handle.status.set_state(SourceState::Closed);
    handle.close_queues();
}

async fn acquisition_loop(
    mut backend: Box<dyn SourceBackend>,
    handle: SourceHandle,
    stop: Arc<AtomicBool>,
    pipeline_stop: Arc<AtomicBool>,
    timeouts: TimeoutConfig,
) {
    let mut video_guard = PtsGuard::new(timeouts.anomaly_threshold);
    let mut audio_guard = PtsGuard::new(timeouts.anomaly_threshold);
    let stall = timeouts.source_stall();
    let id = handle.id.clone();

    while !stop.load(Ordering::SeqCst) && !pipeline_stop.load(Ordering::SeqCst) {
        match tokio::time::timeout(stall, backend.read()).await {
            Err(_) => {
                if handle.status.set_state(SourceState::Stalled) != SourceState::Stalled {
                    tracing::warn!(
                        source = %id,
                        stall_ms = stall.as_millis() as u64,
                        "Source stopped delivering; marked stalled"
                    );
                }
            }
            Ok(Ok(None)) => {
                tracing::info!(source = %id, "Source reached end of stream");
                break;
            }
            Ok(Ok(Some(sample))) => {
                let guard = match &sample {
                    SourceSample::Video(_) => &mut video_guard,
                    SourceSample::Audio(_) => &mut audio_guard,
                };
                match guard.check(sample.pts_ns()) {
                    Ok(()) => {
                        deliver(&handle, sample);
                        if handle.status.set_state(SourceState::Active) == SourceState::Stalled {
                            tracing::info!(source = %id, "Source recovered");
                        }
                    }
                    Err(anomaly) => {
                        handle.status.anomalies.fetch_add(1, Ordering::Relaxed);
                        let err = GoliveError::source_anomaly(
                            id.as_str(),
                            format!(
                                "non-monotonic pts {} after {}",
                                anomaly.pts_ns, anomaly.last_pts_ns
                            ),
                        );
                        tracing::warn!(
                            source = %id,
                            consecutive = anomaly.consecutive,
                            error = %err,
                            "Rejected sample"
                        );
                        if anomaly.persistent
                            && handle.status.set_state(SourceState::Stalled) != SourceState::Stalled
                        {
                            tracing::warn!(source = %id, "Persistent anomalies; marked stalled");
                        }
                    }
                }
            }
            Ok(Err(e)) => {
                handle.status.anomalies.fetch_add(1, Ordering::Relaxed);
                handle.status.set_state(SourceState::Stalled);
                tracing::warn!(source = %id, error = %e, "Source read failed");
                tokio::time::sleep(stall.min(Duration::from_millis(100))).await;
            }
        }
    }

    if let Err(e) = backend.close().await {
        tracing::warn!(source = %id, error = %e, "Source close failed");
    }
    handle.status.set_state(SourceState::Closed);
    handle.close_queues();
    tracing::debug!(source = %id, "Acquisition loop exited");
}

fn deliver(handle: &SourceHandle, sample: SourceSample) {
    match sample {
        SourceSample::Video(frame) => {
            if let Some(q) = &handle.video {
                if q.push(frame.into_rgba()) == PushOutcome::DroppedOldest {
                    tracing::trace!(source = %handle.id, "Dropped oldest queued frame");
                }
            }
        }
        SourceSample::Audio(chunk) => {
            if let Some(q) = &handle.audio {
                if q.push(chunk) == PushOutcome::Rejected {
                    tracing::debug!(source = %handle.id, "Audio queue full; chunk rejected");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use golive_common::clock::SessionClock;
    use golive_common::config::TranscoderConfig;
    use golive_media_model::SourceKind;
    use std::collections::VecDeque;

    /// Replays a scripted list of PTS values, then ends or goes silent.
    struct ScriptedSource {
        pts: VecDeque<u64>,
        then_end: bool,
    }

    #[async_trait::async_trait]
    impl SourceBackend for ScriptedSource {
        fn name(&self) -> &str {
            "scripted"
        }

        fn capability(&self) -> SourceCapability {
            SourceCapability::Video
        }

        async fn open(&mut self) -> GoliveResult<()> {
            Ok(())
        }

        async fn read(&mut self) -> GoliveResult<Option<SourceSample>> {
            if self.pts.is_empty() && !self.then_end {
                std::future::pending::<()>().await;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
            Ok(self
                .pts
                .pop_front()
                .map(|pts| SourceSample::Video(Frame::solid(pts, 2, 2, [1, 2, 3, 255]))))
        }

        async fn close(&mut self) -> GoliveResult<()> {
            Ok(())
        }
    }

    /// Never yields a sample.
    struct SilentSource;

    #[async_trait::async_trait]
    impl SourceBackend for SilentSource {
        fn name(&self) -> &str {
            "silent"
        }

        fn capability(&self) -> SourceCapability {
            SourceCapability::Video
        }

        async fn open(&mut self) -> GoliveResult<()> {
            Ok(())
        }

        async fn read(&mut self) -> GoliveResult<Option<SourceSample>> {
            std::future::pending().await
        }

        async fn close(&mut self) -> GoliveResult<()> {
            Ok(())
        }
    }

    fn manager(registry: SourceRegistry, video_frames: usize) -> SourceManager {
        SourceManager::new(
            registry,
            SourceContext::new(TranscoderConfig::default(), SessionClock::start()),
            QueueConfig {
                source_video_frames: video_frames,
                ..Default::default()
            },
            TimeoutConfig {
                source_stall_ms: 50,
                anomaly_threshold: 2,
                shutdown_grace_ms: 500,
            },
        )
    }

    fn config(id: &str) -> SourceConfig {
        SourceConfig::new(id, SourceKind::Network { url: "udp://x".into() }, 2, 2, 30)
    }

    fn scripted_registry(pts: Vec<u64>, then_end: bool) -> SourceRegistry {
        let mut registry = SourceRegistry::empty();
        registry.register(
            "network",
            Arc::new(move |_, _| {
                Ok(Box::new(ScriptedSource {
                    pts: pts.clone().into(),
                    then_end,
                }) as Box<dyn SourceBackend>)
            }),
        );
        registry
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_monotonic_frames_are_rejected() {
        let mut manager = manager(scripted_registry(vec![10, 20, 15, 30], true), 8);
        let handle = manager.attach_source(config("cam")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut seen = Vec::new();
        while let Some(frame) = manager.poll_frame(&handle) {
            seen.push(frame.pts_ns());
        }
        assert_eq!(seen, vec![10, 20, 30]);
        assert_eq!(handle.health().anomalies, 1);
        assert_eq!(handle.state(), SourceState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_anomalies_mark_stalled() {
        let mut manager = manager(scripted_registry(vec![100, 50, 60, 70], false), 8);
        let handle = manager.attach_source(config("cam")).await.unwrap();
        // Well inside the 50 ms stall timeout, so only anomalies can stall it.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.health().anomalies, 3);
        assert_eq!(handle.health().frames_accepted, 1);
        assert_eq!(handle.state(), SourceState::Stalled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_video_queue_drops_oldest() {
        let mut manager = manager(scripted_registry((1..=10).collect(), true), 3);
        let handle = manager.attach_source(config("cam")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut seen = Vec::new();
        while let Some(frame) = manager.poll_frame(&handle) {
            seen.push(frame.pts_ns());
        }
        assert_eq!(seen, vec![8, 9, 10]);
        assert_eq!(handle.health().frames_dropped, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_source_marked_stalled_then_detached() {
        let mut registry = SourceRegistry::empty();
        registry.register(
            "network",
            Arc::new(|_, _| Ok(Box::new(SilentSource) as Box<dyn SourceBackend>)),
        );
        let mut manager = manager(registry, 3);
        let handle = manager.attach_source(config("remote")).await.unwrap();
        assert_eq!(handle.state(), SourceState::Active);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(handle.state(), SourceState::Stalled);

        manager.detach_source(handle.id()).await.unwrap();
        assert_eq!(handle.state(), SourceState::Closed);
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_attach_rejected() {
        let mut manager = manager(scripted_registry(vec![], true), 3);
        manager.attach_source(config("a")).await.unwrap();
        assert!(manager.attach_source(config("a")).await.is_err());
    }
}
