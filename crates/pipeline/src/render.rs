//! The render task: one composite pass per output frame interval.
//!
//! Each cycle applies pending scene edits, moves queued source frames into
//! the compositor, asks the synchronizer how many frames to produce against
//! the master clock, and submits them to the encoder. A full encoder queue
//! skips the cycle instead of queueing more.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use golive_capture_engine::SourceHandle;
use golive_common::clock::MasterClock;
use golive_common::error::{GoliveError, GoliveResult};
use golive_encoder::{EncoderInput, SubmitOutcome};
use golive_media_model::{frame_interval_ns, QualityLevel, RenderStats};
use golive_render_engine::{Compositor, CompositorConfig, Correction, SceneGraph, SceneUpdates, Synchronizer};
use tokio::time::{Instant, MissedTickBehavior};

use crate::overload::{OverloadEvent, OverloadTracker};
use crate::quality::{QualityGovernor, QualityStatus};

/// Cycles folded into one overload ratio for the quality governor.
const QUALITY_WINDOW: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub tolerance_frames: f64,
    pub overload_cycles: u32,
}

/// What one cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub produced: usize,
    /// The encoder queue was full; nothing was composited.
    pub skipped: bool,
    pub correction: Correction,
}

/// Shared, read-only views of the render task for health reporting.
#[derive(Debug, Clone, Default)]
pub struct RenderMonitor {
    stats: Arc<Mutex<RenderStats>>,
    quality: Arc<Mutex<Option<QualityStatus>>>,
}

impl RenderMonitor {
    pub fn stats(&self) -> RenderStats {
        *self.stats.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn quality(&self) -> Option<QualityStatus> {
        *self.quality.lock().unwrap_or_else(|p| p.into_inner())
    }
}

pub struct RenderLoop {
    settings: RenderSettings,
    compositor: Compositor,
    graph: SceneGraph,
    updates: SceneUpdates,
    sync: Synchronizer,
    overload: OverloadTracker,
    governor: Option<QualityGovernor>,
    clock: Arc<MasterClock>,
    encoder: EncoderInput,
    sources: Vec<SourceHandle>,
    /// Session time at which the master clock read zero.
    source_origin_ns: u64,
    stats: RenderStats,
    window_cycles: u32,
    window_skipped: u32,
    monitor: RenderMonitor,
}

impl RenderLoop {
    pub fn new(
        settings: RenderSettings,
        graph: SceneGraph,
        updates: SceneUpdates,
        clock: Arc<MasterClock>,
        encoder: EncoderInput,
    ) -> Self {
        Self {
            compositor: Compositor::new(CompositorConfig::new(settings.width, settings.height)),
            sync: Synchronizer::new(settings.fps, settings.tolerance_frames),
            overload: OverloadTracker::new(settings.overload_cycles),
            settings,
            graph,
            updates,
            governor: None,
            clock,
            encoder,
            sources: Vec::new(),
            source_origin_ns: 0,
            stats: RenderStats::default(),
            window_cycles: 0,
            window_skipped: 0,
            monitor: RenderMonitor::default(),
        }
    }

    /// Composite frames from `handle`, drawing a placeholder of the given
    /// size until its first frame arrives.
    pub fn add_source(&mut self, handle: SourceHandle, width: u32, height: u32) {
        if handle.video_queue().is_none() {
            return;
        }
        self.compositor.declare_source(handle.id().clone(), width, height);
        self.sources.push(handle);
    }

    /// Source frames are stamped on the session clock; the master clock
    /// started `origin_ns` later. Frames are shifted onto the master clock's
    /// timeline as they are pulled.
    pub fn with_source_origin(mut self, origin_ns: u64) -> Self {
        self.source_origin_ns = origin_ns;
        self
    }

    /// Track overload against the ladder, starting from `level`.
    pub fn with_quality(mut self, level: QualityLevel) -> Self {
        self.governor = Some(QualityGovernor::new(level, std::time::Instant::now()));
        *self.monitor.quality.lock().unwrap_or_else(|p| p.into_inner()) = Some(QualityStatus {
            current: level,
            recommended: level,
        });
        self
    }

    pub fn monitor(&self) -> RenderMonitor {
        self.monitor.clone()
    }

    pub fn graph(&self) -> &SceneGraph {
        &self.graph
    }

    fn pull_source_frames(&mut self) {
        let origin = self.source_origin_ns;
        for handle in &self.sources {
            let Some(queue) = handle.video_queue() else {
                continue;
            };
            let frames = queue.drain();
            // Everything captured before the master clock started lands on
            // its first tick; only the newest such frame is kept.
            let first = frames
                .iter()
                .rposition(|frame| frame.pts_ns() <= origin)
                .unwrap_or(0);
            for frame in frames.into_iter().skip(first) {
                let pts = frame.pts_ns().saturating_sub(origin);
                self.compositor.submit(handle.id(), frame.with_pts(pts));
            }
        }
    }

    /// Run one render cycle.
    pub fn cycle(&mut self) -> GoliveResult<CycleReport> {
        // Scene edits only land between passes.
        self.updates.apply_pending(&mut self.graph);
        self.pull_source_frames();

        let at_capacity = self.encoder.is_backpressured();
        match self.overload.record(at_capacity) {
            Some(OverloadEvent::Started) => {
                let overload = GoliveError::EncoderOverload {
                    depth: self.encoder.queue_depth(),
                    capacity: self.encoder.queue_capacity(),
                };
                tracing::warn!(error = %overload, "Skipping frames until the encoder catches up");
            }
            Some(OverloadEvent::Ended { cycles }) => {
                tracing::info!(cycles, "Encoder overload cleared");
            }
            None => {}
        }
        self.stats.overload_episodes = self.overload.episodes();
        self.window_cycles += 1;

        let report = if at_capacity {
            self.window_skipped += 1;
            self.stats.frames_skipped_backpressure += 1;
            CycleReport {
                produced: 0,
                skipped: true,
                correction: Correction::None,
            }
        } else {
            self.produce()?
        };

        self.sync.record_into(&mut self.stats);
        *self.monitor.stats.lock().unwrap_or_else(|p| p.into_inner()) = self.stats;
        Ok(report)
    }

    fn produce(&mut self) -> GoliveResult<CycleReport> {
        // This task is the only producer, so the room can only grow before
        // the submits below.
        let room = self
            .encoder
            .queue_capacity()
            .saturating_sub(self.encoder.queue_depth());
        let plan = self.sync.plan_cycle_with_room(self.clock.now_ns(), room);
        let mut produced = 0;
        for target in plan.targets {
            let output = self.compositor.composite(&self.graph, target)?;
            match self.encoder.submit_video(output.frame) {
                SubmitOutcome::Accepted => {
                    produced += 1;
                    self.stats.frames_composited += 1;
                    self.stats.last_pts_ns = Some(target);
                }
                SubmitOutcome::Backpressured => {
                    self.stats.frames_skipped_backpressure += 1;
                    break;
                }
                SubmitOutcome::Closed => {
                    return Err(GoliveError::encoder("Encoder video input closed"));
                }
            }
        }
        Ok(CycleReport {
            produced,
            skipped: false,
            correction: plan.correction,
        })
    }

    fn close_quality_window(&mut self) {
        let cycles = std::mem::take(&mut self.window_cycles);
        let skipped = std::mem::take(&mut self.window_skipped);
        let Some(governor) = self.governor.as_mut() else {
            return;
        };
        if cycles == 0 {
            return;
        }
        governor.observe(skipped as f64 / cycles as f64, std::time::Instant::now());
        *self.monitor.quality.lock().unwrap_or_else(|p| p.into_inner()) = Some(governor.status());
    }

    /// Tick at the output frame rate until `stop` is raised.
    pub async fn run(mut self, stop: Arc<AtomicBool>) -> GoliveResult<()> {
        let period = Duration::from_nanos(frame_interval_ns(self.settings.fps).max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut window_start = Instant::now();

        tracing::info!(
            width = self.settings.width,
            height = self.settings.height,
            fps = self.settings.fps,
            sources = self.sources.len(),
            "Render task started"
        );

        while !stop.load(Ordering::Acquire) {
            ticker.tick().await;
            if stop.load(Ordering::Acquire) {
                break;
            }
            self.cycle()?;

            if window_start.elapsed() >= QUALITY_WINDOW {
                self.close_quality_window();
                window_start = Instant::now();
            }
        }

        tracing::info!(
            frames = self.stats.frames_composited,
            skipped = self.stats.frames_skipped_backpressure,
            duplicated = self.stats.frames_duplicated,
            dropped = self.stats.frames_dropped_sync,
            "Render task stopped"
        );
        Ok(())
    }
}
