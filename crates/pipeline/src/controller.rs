//! Pipeline controller.
//!
//! Owns the run state and is the only thing that changes it:
//!
//! ```text
//! Idle ─start─▶ Starting ─▶ Running ◀──▶ Reconnecting
//!                  │           │              │
//!                  │           └─stop─▶ Stopping ─▶ Idle
//!                  └──────────┴──────────────┴─▶ Failed ─reset─▶ Idle
//! ```
//!
//! Starting opens the encoder, the sources and the output, in that order.
//! Once running, a supervisor task watches the output, render and encoder
//! tasks and either mirrors the output's reconnects or fails the pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use golive_audio_engine::{spawn_mixer, AudioMixer, MixerHandle};
use golive_capture_engine::{SourceContext, SourceHandle, SourceManager};
use golive_common::clock::{MasterClock, SessionClock};
use golive_common::config::AppConfig;
use golive_common::error::{FailureCause, GoliveError, GoliveResult};
use golive_encoder::EncoderSession;
use golive_media_model::{
    ConnectionState, EncoderHealth, MixerStats, OutputHealth, PipelineHealth, PipelineState,
};
use golive_output::{OutputSink, SinkMonitor};
use golive_render_engine::{scene_channel, SceneCommand, SceneEditor};
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;

use crate::quality::closest_level;
use crate::render::{RenderLoop, RenderMonitor, RenderSettings};
use crate::services::PipelineServices;
use crate::spec::PipelineSpec;
use crate::state::StateCell;

const SUPERVISE_INTERVAL: Duration = Duration::from_millis(250);

/// Live views of a run, kept after it ends for the final report.
#[derive(Debug, Clone)]
struct RunMonitors {
    session: SessionClock,
    sources: Vec<SourceHandle>,
    output: SinkMonitor,
    render: RenderMonitor,
    encoder: Arc<Mutex<EncoderHealth>>,
    mixer: Arc<Mutex<MixerStats>>,
}

impl RunMonitors {
    fn fill(&self, health: &mut PipelineHealth) {
        health.started_at = Some(self.session.started_at());
        health.sources = self.sources.iter().map(SourceHandle::health).collect();
        health.output = self.output.health();
        health.render = self.render.stats();
        health.encoder = self.encoder.lock().unwrap_or_else(|p| p.into_inner()).clone();
        health.mixer = *self.mixer.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(quality) = self.render.quality() {
            health.current_quality = Some(quality.current);
            health.recommended_quality = Some(quality.recommended);
        }
    }
}

struct ActiveRun {
    stop: Arc<AtomicBool>,
    shutdown: Option<oneshot::Sender<()>>,
    supervisor: JoinHandle<()>,
    scene: SceneEditor,
}

/// Everything a running pipeline owns. Moved into the supervisor task.
struct RunParts {
    sources: SourceManager,
    mixer: MixerHandle,
    encoder: EncoderSession,
    render: JoinHandle<GoliveResult<()>>,
    output: JoinHandle<GoliveResult<OutputHealth>>,
    output_state: watch::Receiver<ConnectionState>,
    stop: Arc<AtomicBool>,
    grace: Duration,
}

enum RunExit {
    StopRequested,
    OutputEnded(GoliveResult<OutputHealth>),
    RenderEnded(GoliveResult<()>),
    Failed(GoliveError),
}

pub struct PipelineController {
    config: AppConfig,
    services: PipelineServices,
    state: StateCell,
    spec: Option<PipelineSpec>,
    run: Option<ActiveRun>,
    monitors: Option<RunMonitors>,
}

impl std::fmt::Debug for PipelineController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineController")
            .field("state", &self.state.get())
            .field("running", &self.run.is_some())
            .finish()
    }
}

impl PipelineController {
    pub fn new(config: AppConfig, services: PipelineServices) -> Self {
        Self {
            config,
            services,
            state: StateCell::new(),
            spec: None,
            run: None,
            monitors: None,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state.get()
    }

    /// Observe the latest state. Rapid changes may be coalesced.
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    /// Observe every transition in order, starting after this call.
    pub fn transitions(&self) -> broadcast::Receiver<PipelineState> {
        self.state.transitions()
    }

    pub fn failure(&self) -> Option<FailureCause> {
        self.state.failure()
    }

    /// The [`PipelineSpec`] of the current or most recent run.
    pub fn spec(&self) -> Option<&PipelineSpec> {
        self.spec.as_ref()
    }

    pub fn health(&self) -> PipelineHealth {
        let mut health = PipelineHealth {
            state: self.state.get(),
            failure: self.state.failure(),
            ..Default::default()
        };
        if let Some(monitors) = &self.monitors {
            monitors.fill(&mut health);
        }
        health
    }

    /// Editor for the live scene. `None` unless running.
    pub fn scene_editor(&self) -> Option<SceneEditor> {
        self.run.as_ref().map(|run| run.scene.clone())
    }

    pub fn edit_scene(&self, command: SceneCommand) -> GoliveResult<()> {
        match &self.run {
            Some(run) => run.scene.send(command),
            None => Err(GoliveError::invalid_state("pipeline is not running")),
        }
    }

    /// Open everything and start streaming `spec`.
    ///
    /// Any failure while starting leaves the controller in `Failed` and
    /// releases whatever had already been opened.
    pub async fn start(&mut self, spec: PipelineSpec) -> GoliveResult<()> {
        spec.validate()?;
        self.state.transition(PipelineState::Starting)?;
        self.spec = Some(spec.clone());
        self.monitors = None;

        match self.launch(&spec).await {
            Ok(run) => {
                self.run = Some(run);
                Ok(())
            }
            Err(e) => {
                self.state.fail(&e);
                Err(e)
            }
        }
    }

    async fn launch(&mut self, spec: &PipelineSpec) -> GoliveResult<ActiveRun> {
        let config = &self.config;
        let encoder_config = spec.effective_encoder();
        let stop = Arc::new(AtomicBool::new(false));
        let grace = config.timeouts.shutdown_grace();

        let mut encoder = self
            .services
            .encoders
            .open(&encoder_config, &config.queues)
            .await?;
        tracing::info!(backend = %encoder.backend(), skipped = encoder.failures().len(), "Encoder opened");

        let session = SessionClock::start();
        let mut sources = SourceManager::new(
            self.services.sources.clone(),
            SourceContext::new(config.transcoder.clone(), session.clone()),
            config.queues.clone(),
            config.timeouts.clone(),
        )
        .with_stop_flag(stop.clone());

        let mut handles = Vec::with_capacity(spec.sources.len());
        for source in &spec.sources {
            match sources.attach_source(source.clone()).await {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    sources.shutdown().await;
                    encoder.abort().await;
                    return Err(e);
                }
            }
        }

        let sink = match OutputSink::open(&spec.output, &self.services.transports, config.reconnect.clone()).await {
            Ok(sink) => sink,
            Err(e) => {
                sources.shutdown().await;
                encoder.abort().await;
                return Err(e);
            }
        };

        let Some(packets) = encoder.take_packets() else {
            sources.shutdown().await;
            encoder.abort().await;
            return Err(GoliveError::invalid_state("encoder packet stream already taken"));
        };
        let sink_monitor = sink.monitor();
        let output_state = sink_monitor.subscribe();
        let output = tokio::spawn(sink.run(packets, stop.clone()));

        // The master clock reads zero from here on; source frames stamped
        // earlier on the session clock are rebased against this point.
        let source_origin_ns = session.elapsed_ns();
        let clock = Arc::new(MasterClock::new(encoder_config.sample_rate));
        let chunk_frames = config.defaults.audio_chunk_frames.max(1) as usize;
        let mixer = spawn_mixer(
            AudioMixer::new(clock.clone(), encoder_config.channels, chunk_frames),
            chunk_frames,
            encoder.audio_queue(),
            stop.clone(),
        );
        for handle in &handles {
            if let Some(queue) = handle.audio_queue() {
                mixer.add_input(handle.id().clone(), queue.clone());
            }
        }

        let (scene, updates) = scene_channel();
        let mut render = RenderLoop::new(
            RenderSettings {
                width: encoder_config.width,
                height: encoder_config.height,
                fps: encoder_config.fps,
                tolerance_frames: config.sync.tolerance_frames,
                overload_cycles: config.queues.overload_cycles,
            },
            spec.scene.clone(),
            updates,
            clock,
            encoder.input(),
        )
        .with_source_origin(source_origin_ns)
        .with_quality(spec.quality.unwrap_or_else(|| closest_level(&encoder_config)));
        for (handle, source) in handles.iter().zip(&spec.sources) {
            render.add_source(handle.clone(), source.width, source.height);
        }
        let render_monitor = render.monitor();
        let render = tokio::spawn(render.run(stop.clone()));

        let monitors = RunMonitors {
            session,
            sources: handles,
            output: sink_monitor,
            render: render_monitor,
            encoder: Arc::new(Mutex::new(encoder.health())),
            mixer: Arc::new(Mutex::new(MixerStats::default())),
        };
        self.monitors = Some(monitors.clone());

        self.state.transition(PipelineState::Running)?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let parts = RunParts {
            sources,
            mixer,
            encoder,
            render,
            output,
            output_state,
            stop: stop.clone(),
            grace,
        };
        let supervisor = tokio::spawn(supervise(parts, self.state.clone(), shutdown_rx, monitors));

        Ok(ActiveRun {
            stop,
            shutdown: Some(shutdown_tx),
            supervisor,
            scene,
        })
    }

    /// Drain the encoder, close the output and sources, and return to
    /// `Idle`. If the run fails while draining, the controller ends in
    /// `Failed` and the cause is returned.
    pub async fn stop(&mut self) -> GoliveResult<()> {
        let Some(mut run) = self.run.take() else {
            return match self.state.get() {
                PipelineState::Idle => Ok(()),
                other => Err(GoliveError::invalid_state(format!("cannot stop while {other}"))),
            };
        };

        if self.state.transition(PipelineState::Stopping).is_ok() {
            if let Some(shutdown) = run.shutdown.take() {
                let _ = shutdown.send(());
            }
        } else {
            // Already failed; make sure everything is winding down.
            run.stop.store(true, Ordering::SeqCst);
        }

        let limit = self.config.timeouts.shutdown_grace() * 4;
        if tokio::time::timeout(limit, &mut run.supervisor).await.is_err() {
            run.supervisor.abort();
            self.state.fail(&GoliveError::timeout(format!(
                "pipeline did not stop within {} ms",
                limit.as_millis()
            )));
        }

        match self.state.get() {
            PipelineState::Idle => Ok(()),
            _ => Err(self.failure_error()),
        }
    }

    /// Leave `Failed` so the pipeline can be started again.
    pub async fn reset(&mut self) -> GoliveResult<()> {
        if let Some(mut run) = self.run.take() {
            run.stop.store(true, Ordering::SeqCst);
            let limit = self.config.timeouts.shutdown_grace() * 4;
            if tokio::time::timeout(limit, &mut run.supervisor).await.is_err() {
                run.supervisor.abort();
            }
        }
        self.state.reset()
    }

    /// Switch to `spec`. A running pipeline is stopped and restarted.
    pub async fn reconfigure(&mut self, spec: PipelineSpec) -> GoliveResult<()> {
        spec.validate()?;
        match self.state.get() {
            PipelineState::Idle => {
                self.spec = Some(spec);
                Ok(())
            }
            PipelineState::Running | PipelineState::Reconnecting => {
                tracing::info!("Reconfiguring running pipeline");
                self.stop().await?;
                self.start(spec).await
            }
            other => Err(GoliveError::invalid_state(format!("cannot reconfigure while {other}"))),
        }
    }

    /// Wait until the pipeline reaches `Idle` or `Failed`.
    pub async fn wait_for_exit(&self) -> PipelineState {
        let mut rx = self.state.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            if matches!(state, PipelineState::Idle | PipelineState::Failed) {
                return state;
            }
            if rx.changed().await.is_err() {
                return self.state.get();
            }
        }
    }

    fn failure_error(&self) -> GoliveError {
        match self.state.failure() {
            Some(cause) => GoliveError::invalid_state(format!("pipeline failed: {cause}")),
            None => GoliveError::invalid_state(format!("pipeline is {}", self.state.get())),
        }
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        if let Some(run) = &self.run {
            run.stop.store(true, Ordering::SeqCst);
        }
    }
}

async fn supervise(
    mut parts: RunParts,
    state: StateCell,
    mut shutdown: oneshot::Receiver<()>,
    monitors: RunMonitors,
) {
    let mut tick = tokio::time::interval(SUPERVISE_INTERVAL);
    let mut watching_output = true;

    let exit = loop {
        tokio::select! {
            request = &mut shutdown => {
                if request.is_ok() {
                    break RunExit::StopRequested;
                }
                // Controller dropped without stopping.
                break RunExit::Failed(GoliveError::invalid_state("controller went away"));
            }
            result = &mut parts.output => {
                break RunExit::OutputEnded(result.unwrap_or_else(|e| {
                    Err(GoliveError::invalid_state(format!("output task panicked: {e}")))
                }));
            }
            result = &mut parts.render => {
                break RunExit::RenderEnded(result.unwrap_or_else(|e| {
                    Err(GoliveError::render(format!("render task panicked: {e}")))
                }));
            }
            changed = parts.output_state.changed(), if watching_output => {
                if changed.is_err() {
                    watching_output = false;
                    continue;
                }
                let connection = *parts.output_state.borrow_and_update();
                mirror_connection(&state, connection);
            }
            _ = tick.tick() => {
                if let Some(err) = parts.encoder.failure() {
                    break RunExit::Failed(err);
                }
                if parts.stop.load(Ordering::Acquire) {
                    break RunExit::Failed(GoliveError::invalid_state("run cancelled"));
                }
                refresh(&parts, &monitors);
            }
        }
    };

    refresh(&parts, &monitors);
    match exit {
        RunExit::StopRequested => stop_gracefully(parts, &state, &monitors).await,
        RunExit::OutputEnded(result) => {
            let err = match result {
                Err(e) => e,
                // The packet stream ended without a stop request.
                Ok(_) => parts
                    .encoder
                    .failure()
                    .unwrap_or_else(|| GoliveError::encoder("encoder output ended unexpectedly")),
            };
            teardown(parts, &monitors, false).await;
            state.fail(&err);
        }
        RunExit::RenderEnded(result) => {
            let err = parts.encoder.failure().unwrap_or_else(|| match result {
                Err(e) => e,
                Ok(()) => GoliveError::render("render task ended unexpectedly"),
            });
            teardown(parts, &monitors, true).await;
            state.fail(&err);
        }
        RunExit::Failed(err) => {
            teardown(parts, &monitors, true).await;
            state.fail(&err);
        }
    }
}

fn mirror_connection(state: &StateCell, connection: ConnectionState) {
    let next = match (state.get(), connection) {
        (PipelineState::Running, ConnectionState::Reconnecting) => PipelineState::Reconnecting,
        (PipelineState::Reconnecting, ConnectionState::Connected) => PipelineState::Running,
        _ => return,
    };
    if next == PipelineState::Reconnecting {
        tracing::warn!("Output lost its connection; still compositing and encoding");
    }
    if let Err(e) = state.transition(next) {
        tracing::debug!(error = %e, "Connection change not mirrored");
    }
}

fn refresh(parts: &RunParts, monitors: &RunMonitors) {
    *monitors.encoder.lock().unwrap_or_else(|p| p.into_inner()) = parts.encoder.health();
    *monitors.mixer.lock().unwrap_or_else(|p| p.into_inner()) = parts.mixer.stats();
}

/// Stopping: let the render task finish its cycle, drain the encoder, let
/// the output write what the encoder flushed, then close the sources.
async fn stop_gracefully(parts: RunParts, state: &StateCell, monitors: &RunMonitors) {
    let RunParts {
        mut sources,
        mixer,
        encoder,
        mut render,
        mut output,
        stop,
        grace,
        ..
    } = parts;

    stop.store(true, Ordering::SeqCst);
    if tokio::time::timeout(grace, &mut render).await.is_err() {
        tracing::warn!("Render task did not stop in time; aborting");
        render.abort();
    }

    *monitors.encoder.lock().unwrap_or_else(|p| p.into_inner()) = encoder.health();
    let drained = encoder.drain_and_close(grace).await;

    let delivered = match tokio::time::timeout(grace, &mut output).await {
        Ok(Ok(result)) => result.map(|_| ()),
        Ok(Err(e)) => Err(GoliveError::invalid_state(format!("output task panicked: {e}"))),
        Err(_) => {
            output.abort();
            Err(GoliveError::timeout("output did not finish writing in time"))
        }
    };

    sources.shutdown().await;
    *monitors.mixer.lock().unwrap_or_else(|p| p.into_inner()) = mixer.stats();
    mixer.join(grace).await;

    match drained.and(delivered) {
        Ok(()) => {
            if let Err(e) = state.transition(PipelineState::Idle) {
                tracing::debug!(error = %e, "Stop finished after another transition");
            }
        }
        Err(e) => state.fail(&e),
    }
}

/// Failure path: stop everything now, discarding queued media.
async fn teardown(parts: RunParts, monitors: &RunMonitors, abort_output: bool) {
    let RunParts {
        mut sources,
        mixer,
        encoder,
        render,
        output,
        stop,
        grace,
        ..
    } = parts;

    stop.store(true, Ordering::SeqCst);
    render.abort();
    if abort_output {
        output.abort();
    }
    *monitors.encoder.lock().unwrap_or_else(|p| p.into_inner()) = encoder.health();
    encoder.abort().await;
    sources.shutdown().await;
    mixer.join(grace).await;
}
