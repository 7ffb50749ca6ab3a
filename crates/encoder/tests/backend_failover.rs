//! Ordered failover across encoder backends, using in-process fakes
//! registered the same way the transcoder backends are.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use golive_common::config::QueueConfig;
use golive_common::error::{GoliveError, GoliveResult};
use golive_encoder::{BackendRegistry, EncoderBackend, EncoderControl, EncoderStreams};
use golive_media_model::{BackendKind, EncoderConfig, Frame};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

struct Unavailable {
    kind: BackendKind,
    checks: Arc<AtomicUsize>,
}

#[async_trait]
impl EncoderBackend for Unavailable {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn check(&self, _config: &EncoderConfig) -> GoliveResult<()> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        Err(GoliveError::unsupported(format!("{} not present", self.kind)))
    }

    async fn start(&self, _config: &EncoderConfig) -> GoliveResult<EncoderStreams> {
        Err(GoliveError::encoder("never started"))
    }
}

/// Echoes every byte of video input back as output.
struct Loopback {
    kind: BackendKind,
}

struct LoopbackControl;

#[async_trait]
impl EncoderControl for LoopbackControl {
    async fn finish(&mut self, _grace: Duration) -> GoliveResult<()> {
        Ok(())
    }
    async fn abort(&mut self) {}
    fn diagnostics(&self) -> String {
        String::new()
    }
}

#[async_trait]
impl EncoderBackend for Loopback {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn check(&self, _config: &EncoderConfig) -> GoliveResult<()> {
        Ok(())
    }

    async fn start(&self, _config: &EncoderConfig) -> GoliveResult<EncoderStreams> {
        let (video, mut video_peer) = tokio::io::duplex(64 * 1024);
        let (audio, mut audio_peer) = tokio::io::duplex(64 * 1024);
        let (mut out_peer, output) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            while let Ok(n) = video_peer.read(&mut buf).await {
                if n == 0 || out_peer.write_all(&buf[..n]).await.is_err() {
                    break;
                }
            }
        });
        tokio::spawn(async move {
            let mut sink = Vec::new();
            let _ = audio_peer.read_to_end(&mut sink).await;
        });
        Ok(EncoderStreams {
            video: Box::new(video),
            audio: Box::new(audio),
            output: Box::new(output),
            control: Box::new(LoopbackControl),
        })
    }
}

fn config(preference: Vec<BackendKind>) -> EncoderConfig {
    EncoderConfig {
        width: 4,
        height: 2,
        backend_preference: preference,
        ..Default::default()
    }
}

#[tokio::test]
async fn third_backend_is_used_when_first_two_are_unavailable() {
    let checks = Arc::new(AtomicUsize::new(0));
    let mut registry = BackendRegistry::empty();
    registry.register(Arc::new(Unavailable {
        kind: BackendKind::Nvenc,
        checks: checks.clone(),
    }));
    registry.register(Arc::new(Unavailable {
        kind: BackendKind::Qsv,
        checks: checks.clone(),
    }));
    registry.register(Arc::new(Loopback {
        kind: BackendKind::Software,
    }));

    let mut session = registry
        .open(
            &config(vec![BackendKind::Nvenc, BackendKind::Qsv, BackendKind::Software]),
            &QueueConfig::default(),
        )
        .await
        .unwrap();

    assert_eq!(session.backend(), BackendKind::Software);
    assert_eq!(checks.load(Ordering::SeqCst), 2);
    let failed: Vec<BackendKind> = session.failures().iter().map(|f| f.backend).collect();
    assert_eq!(failed, vec![BackendKind::Nvenc, BackendKind::Qsv]);
    assert!(session.failures()[0].reason.contains("nvenc not present"));
    assert_eq!(session.health().failures.len(), 2);

    // The session works normally on the fallback backend.
    session.submit_video(Frame::solid(7, 4, 2, [9, 9, 9, 255]));
    let packet = session.next_packet().await.unwrap();
    assert_eq!(packet.data[..4], [9, 9, 9, 255]);

    session.abort().await;
}

#[tokio::test]
async fn every_backend_failing_is_encoder_unavailable() {
    let checks = Arc::new(AtomicUsize::new(0));
    let mut registry = BackendRegistry::empty();
    registry.register(Arc::new(Unavailable {
        kind: BackendKind::Nvenc,
        checks: checks.clone(),
    }));

    // Software is preferred but never registered.
    let err = registry
        .open(
            &config(vec![BackendKind::Nvenc, BackendKind::Software]),
            &QueueConfig::default(),
        )
        .await
        .unwrap_err();

    match err {
        GoliveError::EncoderUnavailable { attempts } => {
            assert!(attempts.contains("nvenc"));
            assert!(attempts.contains("software"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn invalid_config_is_rejected_before_any_backend_runs() {
    let checks = Arc::new(AtomicUsize::new(0));
    let mut registry = BackendRegistry::empty();
    registry.register(Arc::new(Unavailable {
        kind: BackendKind::Software,
        checks: checks.clone(),
    }));

    let mut bad = config(vec![BackendKind::Software]);
    bad.width = 3;
    assert!(matches!(
        registry.open(&bad, &QueueConfig::default()).await,
        Err(GoliveError::Config { .. })
    ));
    assert_eq!(checks.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn hanging_backend_times_out_and_falls_back() {
    struct Hangs;

    #[async_trait]
    impl EncoderBackend for Hangs {
        fn kind(&self) -> BackendKind {
            BackendKind::Vaapi
        }
        async fn check(&self, _config: &EncoderConfig) -> GoliveResult<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
        async fn start(&self, _config: &EncoderConfig) -> GoliveResult<EncoderStreams> {
            Err(GoliveError::encoder("unreachable"))
        }
    }

    let mut registry = BackendRegistry::empty().with_open_timeout(Duration::from_secs(10));
    registry.register(Arc::new(Hangs));
    registry.register(Arc::new(Loopback {
        kind: BackendKind::Software,
    }));

    let session = registry
        .open(
            &config(vec![BackendKind::Vaapi, BackendKind::Software]),
            &QueueConfig::default(),
        )
        .await
        .unwrap();
    assert_eq!(session.backend(), BackendKind::Software);
    assert!(session.failures()[0].reason.contains("did not open"));
    session.abort().await;
}

#[tokio::test(start_paused = true)]
async fn slow_check_leaves_start_its_own_time_budget() {
    struct Slow(Loopback);

    #[async_trait]
    impl EncoderBackend for Slow {
        fn kind(&self) -> BackendKind {
            self.0.kind
        }
        async fn check(&self, config: &EncoderConfig) -> GoliveResult<()> {
            tokio::time::sleep(Duration::from_secs(7)).await;
            self.0.check(config).await
        }
        async fn start(&self, config: &EncoderConfig) -> GoliveResult<EncoderStreams> {
            tokio::time::sleep(Duration::from_secs(7)).await;
            self.0.start(config).await
        }
    }

    let mut registry = BackendRegistry::empty().with_open_timeout(Duration::from_secs(10));
    registry.register(Arc::new(Slow(Loopback {
        kind: BackendKind::Nvenc,
    })));

    let session = registry
        .open(&config(vec![BackendKind::Nvenc]), &QueueConfig::default())
        .await
        .unwrap();
    assert_eq!(session.backend(), BackendKind::Nvenc);
    assert!(session.failures().is_empty());
    session.abort().await;
}
