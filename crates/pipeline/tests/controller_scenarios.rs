//! End-to-end controller runs over test-pattern sources, an in-process
//! encoder backend and scripted transports.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use golive_capture_engine::SourceRegistry;
use golive_common::config::{AppConfig, ReconnectPolicy};
use golive_common::error::{FailureCause, GoliveError, GoliveResult};
use golive_encoder::{BackendRegistry, EncoderBackend, EncoderControl, EncoderStreams};
use golive_media_model::{
    BackendKind, EncodedPacket, EncoderConfig, OutputTarget, PipelineState, SourceConfig, SourceKind,
};
use golive_output::{FailurePolicy, PacketTransport, TransportRegistry};
use golive_pipeline::{PipelineController, PipelineServices, PipelineSpec};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;

const TS_PACKET: usize = 188;

/// Emits a TS-sized packet every few milliseconds until its video input
/// closes, draining both inputs meanwhile. Keeps the pixel at
/// [`SAMPLE_AT`] of every video frame it receives.
#[derive(Default)]
struct PacketizingBackend {
    sampled: Arc<Mutex<Vec<[u8; 4]>>>,
}

/// Inside the first color bar, clear of the moving marker.
const SAMPLE_AT: (usize, usize) = (4, 4);

struct NoopControl;

#[async_trait]
impl EncoderControl for NoopControl {
    async fn finish(&mut self, _grace: Duration) -> GoliveResult<()> {
        Ok(())
    }
    async fn abort(&mut self) {}
    fn diagnostics(&self) -> String {
        String::new()
    }
}

#[async_trait]
impl EncoderBackend for PacketizingBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Software
    }

    async fn check(&self, _config: &EncoderConfig) -> GoliveResult<()> {
        Ok(())
    }

    async fn start(&self, config: &EncoderConfig) -> GoliveResult<EncoderStreams> {
        let (video, mut video_peer) = tokio::io::duplex(256 * 1024);
        let (audio, mut audio_peer) = tokio::io::duplex(256 * 1024);
        let (mut out_peer, output) = tokio::io::duplex(256 * 1024);
        let video_done = Arc::new(AtomicBool::new(false));

        let done = video_done.clone();
        let sampled = self.sampled.clone();
        let width = config.width as usize;
        let mut frame = vec![0u8; width * config.height as usize * 4];
        tokio::spawn(async move {
            while video_peer.read_exact(&mut frame).await.is_ok() {
                let at = (SAMPLE_AT.1 * width + SAMPLE_AT.0) * 4;
                let mut px = [0u8; 4];
                px.copy_from_slice(&frame[at..at + 4]);
                sampled.lock().unwrap().push(px);
            }
            done.store(true, Ordering::SeqCst);
        });
        tokio::spawn(async move {
            let mut sink = Vec::new();
            let _ = audio_peer.read_to_end(&mut sink).await;
        });
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(2));
            while !video_done.load(Ordering::SeqCst) {
                ticker.tick().await;
                if out_peer.write_all(&[0x47; TS_PACKET]).await.is_err() {
                    break;
                }
            }
            let _ = out_peer.shutdown().await;
        });

        Ok(EncoderStreams {
            video: Box::new(video),
            audio: Box::new(audio),
            output: Box::new(output),
            control: Box::new(NoopControl),
        })
    }
}

struct BrokenBackend(BackendKind);

#[async_trait]
impl EncoderBackend for BrokenBackend {
    fn kind(&self) -> BackendKind {
        self.0
    }

    async fn check(&self, _config: &EncoderConfig) -> GoliveResult<()> {
        Err(GoliveError::unsupported(format!("{} not present", self.0)))
    }

    async fn start(&self, _config: &EncoderConfig) -> GoliveResult<EncoderStreams> {
        Err(GoliveError::encoder("never started"))
    }
}

#[derive(Clone)]
struct ScriptedTransport {
    policy: FailurePolicy,
    connects: Arc<Mutex<VecDeque<bool>>>,
    connect_delay: Duration,
    fail_seq: Option<u64>,
    failed: Arc<AtomicBool>,
    written: Arc<Mutex<Vec<u64>>>,
    shutdowns: Arc<Mutex<u32>>,
}

impl ScriptedTransport {
    fn new(policy: FailurePolicy, connects: &[bool], fail_seq: Option<u64>) -> Self {
        Self {
            policy,
            connects: Arc::new(Mutex::new(connects.iter().copied().collect())),
            connect_delay: Duration::ZERO,
            fail_seq,
            failed: Arc::default(),
            written: Arc::default(),
            shutdowns: Arc::default(),
        }
    }

    fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    fn written(&self) -> Vec<u64> {
        self.written.lock().unwrap().clone()
    }
}

#[async_trait]
impl PacketTransport for ScriptedTransport {
    fn failure_policy(&self) -> FailurePolicy {
        self.policy
    }

    async fn connect(&mut self) -> GoliveResult<()> {
        tokio::time::sleep(self.connect_delay).await;
        if self.connects.lock().unwrap().pop_front().unwrap_or(true) {
            Ok(())
        } else {
            Err(GoliveError::transcoder("connection refused"))
        }
    }

    async fn send(&mut self, packet: &EncodedPacket) -> GoliveResult<()> {
        // Fail once, at the first packet at or past `fail_seq`.
        if let Some(seq) = self.fail_seq {
            if packet.seq >= seq && !self.failed.swap(true, Ordering::SeqCst) {
                return Err(match self.policy {
                    FailurePolicy::Fatal => GoliveError::RecordingWriteFailure {
                        path: PathBuf::from("/recordings/show.mkv"),
                        message: "No space left on device".into(),
                    },
                    FailurePolicy::Reconnect => GoliveError::transcoder("broken pipe"),
                });
            }
            if packet.seq >= seq && self.policy == FailurePolicy::Fatal {
                panic!("write after a fatal failure");
            }
        }
        self.written.lock().unwrap().push(packet.seq);
        Ok(())
    }

    async fn shutdown(&mut self) -> GoliveResult<()> {
        *self.shutdowns.lock().unwrap() += 1;
        Ok(())
    }
}

fn app_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.timeouts.shutdown_grace_ms = 1_000;
    config.reconnect = ReconnectPolicy {
        initial_delay_ms: 50,
        factor: 2.0,
        max_delay_ms: 100,
        max_attempts: 5,
        connect_timeout_ms: 1_000,
    };
    config
}

fn services(encoders: BackendRegistry, transport: ScriptedTransport) -> PipelineServices {
    let mut transports = TransportRegistry::empty();
    for kind in ["file", "network"] {
        let transport = transport.clone();
        transports.register(kind, move |_target| Ok(Box::new(transport.clone()) as Box<dyn PacketTransport>));
    }
    PipelineServices::new(SourceRegistry::with_defaults(), encoders, transports)
}

fn working_encoders() -> BackendRegistry {
    let mut registry = BackendRegistry::empty();
    registry.register(Arc::new(PacketizingBackend::default()));
    registry
}

fn sampling_encoders() -> (BackendRegistry, Arc<Mutex<Vec<[u8; 4]>>>) {
    let backend = PacketizingBackend::default();
    let sampled = backend.sampled.clone();
    let mut registry = BackendRegistry::empty();
    registry.register(Arc::new(backend));
    (registry, sampled)
}

fn spec(output: OutputTarget) -> PipelineSpec {
    let sources = vec![
        SourceConfig::new("bars", SourceKind::TestPattern { tone_hz: Some(440.0) }, 32, 18, 30),
        SourceConfig::new("inset", SourceKind::TestPattern { tone_hz: None }, 16, 10, 30),
    ];
    let encoder = EncoderConfig {
        width: 64,
        height: 36,
        fps: 30,
        backend_preference: vec![BackendKind::Software],
        ..Default::default()
    };
    PipelineSpec::new(sources, encoder, output)
}

fn stream_target() -> OutputTarget {
    OutputTarget::network("rtmp://live.example.com/app", Some("secret-key".into())).unwrap()
}

/// Records the current state and every transition after it.
fn record_states(controller: &PipelineController) -> Arc<Mutex<Vec<PipelineState>>> {
    let mut rx = controller.transitions();
    let seen = Arc::new(Mutex::new(vec![controller.state()]));
    let out = seen.clone();
    tokio::spawn(async move {
        while let Ok(state) = rx.recv().await {
            out.lock().unwrap().push(state);
        }
    });
    seen
}

async fn wait_for(rx: &mut watch::Receiver<PipelineState>, want: PipelineState) {
    tokio::time::timeout(Duration::from_secs(10), rx.wait_for(|s| *s == want))
        .await
        .unwrap_or_else(|_| panic!("never reached {want}"))
        .unwrap();
}

#[tokio::test]
async fn test_start_then_stop_returns_to_idle() {
    let transport = ScriptedTransport::new(FailurePolicy::Fatal, &[], None);
    let mut controller = PipelineController::new(app_config(), services(working_encoders(), transport.clone()));
    let seen = record_states(&controller);

    controller.start(spec(OutputTarget::file("/recordings/show.mkv"))).await.unwrap();
    assert_eq!(controller.state(), PipelineState::Running);
    assert!(controller.scene_editor().is_some());

    tokio::time::sleep(Duration::from_millis(500)).await;
    let health = controller.health();
    assert_eq!(health.sources.len(), 2);
    assert_eq!(health.encoder.backend, Some(BackendKind::Software));
    let started = health.started_at.expect("run start time");
    assert!(started <= chrono::Utc::now());

    controller.stop().await.unwrap();
    assert_eq!(controller.state(), PipelineState::Idle);
    assert!(controller.failure().is_none());
    assert!(controller.scene_editor().is_none());

    let written = transport.written();
    assert!(!written.is_empty());
    assert_eq!(written, (0..written.len() as u64).collect::<Vec<_>>());
    assert_eq!(controller.health().output.packets_written, written.len() as u64);
    assert!(*transport.shutdowns.lock().unwrap() >= 1);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            PipelineState::Idle,
            PipelineState::Starting,
            PipelineState::Running,
            PipelineState::Stopping,
            PipelineState::Idle,
        ]
    );
}

#[tokio::test]
async fn test_recording_write_failure_fails_pipeline_without_further_writes() {
    let transport = ScriptedTransport::new(FailurePolicy::Fatal, &[], Some(100));
    let mut controller = PipelineController::new(app_config(), services(working_encoders(), transport.clone()));
    let mut rx = controller.subscribe();

    controller.start(spec(OutputTarget::file("/recordings/show.mkv"))).await.unwrap();
    wait_for(&mut rx, PipelineState::Failed).await;

    assert!(matches!(
        controller.failure(),
        Some(FailureCause::RecordingWriteFailure { .. })
    ));
    let written = transport.written();
    assert_eq!(written, (0..100).collect::<Vec<_>>());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(transport.written().len(), 100);

    // Only reset leaves Failed.
    assert!(controller.start(spec(OutputTarget::file("/recordings/show.mkv"))).await.is_err());
    controller.reset().await.unwrap();
    assert_eq!(controller.state(), PipelineState::Idle);
    assert!(controller.failure().is_none());
}

#[tokio::test]
async fn test_no_usable_encoder_fails_without_running() {
    let mut encoders = BackendRegistry::empty();
    encoders.register(Arc::new(BrokenBackend(BackendKind::Nvenc)));
    encoders.register(Arc::new(BrokenBackend(BackendKind::Software)));
    let transport = ScriptedTransport::new(FailurePolicy::Reconnect, &[], None);
    let mut controller = PipelineController::new(app_config(), services(encoders, transport.clone()));
    let seen = record_states(&controller);

    let mut spec = spec(stream_target());
    spec.encoder.backend_preference = vec![BackendKind::Nvenc, BackendKind::Software];
    let err = controller.start(spec).await.unwrap_err();

    assert!(matches!(err, GoliveError::EncoderUnavailable { .. }));
    assert_eq!(controller.state(), PipelineState::Failed);
    assert!(matches!(
        controller.failure(),
        Some(FailureCause::EncoderUnavailable { .. })
    ));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!seen.lock().unwrap().contains(&PipelineState::Running));
    assert!(transport.written().is_empty());
}

#[tokio::test]
async fn test_network_drop_reconnects_and_keeps_streaming() {
    // Initial connect, one refused retry, then back.
    let transport = ScriptedTransport::new(FailurePolicy::Reconnect, &[true, false, true], Some(20));
    let mut controller = PipelineController::new(app_config(), services(working_encoders(), transport.clone()));
    let seen = record_states(&controller);
    let mut rx = controller.subscribe();

    controller.start(spec(stream_target())).await.unwrap();
    wait_for(&mut rx, PipelineState::Reconnecting).await;
    wait_for(&mut rx, PipelineState::Running).await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    let health = controller.health();
    assert_eq!(health.output.reconnects, 1);
    assert!(health.output.packets_dropped >= 1);
    assert!(transport.written().iter().any(|seq| *seq > 20));

    controller.stop().await.unwrap();
    let seen = seen.lock().unwrap().clone();
    let running = seen.iter().filter(|s| **s == PipelineState::Running).count();
    assert_eq!(running, 2);
    assert_eq!(seen.last(), Some(&PipelineState::Idle));
}

async fn sampled_pixels_with_connect_delay(delay: Duration) -> Vec<[u8; 4]> {
    let transport = ScriptedTransport::new(FailurePolicy::Reconnect, &[], None).with_connect_delay(delay);
    let (encoders, sampled) = sampling_encoders();
    let mut controller = PipelineController::new(app_config(), services(encoders, transport));

    let mut spec = spec(stream_target());
    spec.sources = vec![SourceConfig::new(
        "bars",
        SourceKind::TestPattern { tone_hz: None },
        64,
        36,
        30,
    )];
    spec.scene = golive_pipeline::tiled_scene(&spec.sources, 64, 36);

    controller.start(spec).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    controller.stop().await.unwrap();

    let sampled = sampled.lock().unwrap().clone();
    sampled
}

#[tokio::test]
async fn test_source_pixels_reach_encoder_after_slow_output_connect() {
    const FIRST_BAR: [u8; 4] = [235, 235, 235, 255];

    for delay in [Duration::ZERO, Duration::from_millis(600)] {
        let sampled = sampled_pixels_with_connect_delay(delay).await;
        assert!(sampled.len() >= 30, "only {} frames with {delay:?}", sampled.len());
        let bars = sampled.iter().filter(|px| **px == FIRST_BAR).count();
        assert!(
            bars * 4 >= sampled.len() * 3,
            "{bars} of {} frames showed the source with {delay:?}",
            sampled.len()
        );
    }
}

#[tokio::test]
async fn test_invalid_spec_is_rejected_before_starting() {
    let transport = ScriptedTransport::new(FailurePolicy::Fatal, &[], None);
    let mut controller = PipelineController::new(app_config(), services(working_encoders(), transport));

    let mut spec = spec(OutputTarget::file("/recordings/show.mkv"));
    spec.sources.clear();
    assert!(matches!(controller.start(spec).await, Err(GoliveError::Config { .. })));
    assert_eq!(controller.state(), PipelineState::Idle);
    assert!(controller.stop().await.is_ok());
}
