//! Encoder backends.
//!
//! A backend turns raw RGBA frames and `f32le` audio into a muxed byte
//! stream. Sessions only see the three streams and a control handle, so
//! callers never learn which backend is underneath.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use golive_common::config::TranscoderConfig;
use golive_common::error::{GoliveError, GoliveResult};
use golive_common::transcoder::{run_to_completion, Pipes, TranscoderProcess};
use golive_media_model::{BackendKind, EncoderConfig};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;

use crate::args::{session_args, test_encode_args};
use crate::probe::Capabilities;

pub type VideoSink = Box<dyn AsyncWrite + Send + Unpin>;
pub type AudioSink = Box<dyn AsyncWrite + Send + Unpin>;
pub type PacketSource = Box<dyn AsyncRead + Send + Unpin>;

/// Lifecycle of a running backend.
#[async_trait]
pub trait EncoderControl: Send {
    /// Wait up to `grace` for the backend to flush and exit after its inputs
    /// are closed. An unclean exit is an error.
    async fn finish(&mut self, grace: Duration) -> GoliveResult<()>;

    async fn abort(&mut self);

    /// Whatever the backend reported about its most recent failure.
    fn diagnostics(&self) -> String;
}

/// The I/O of a started backend.
pub struct EncoderStreams {
    pub video: VideoSink,
    pub audio: AudioSink,
    pub output: PacketSource,
    pub control: Box<dyn EncoderControl>,
}

#[async_trait]
pub trait EncoderBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Verify the backend can encode with `config` on this host.
    async fn check(&self, config: &EncoderConfig) -> GoliveResult<()>;

    async fn start(&self, config: &EncoderConfig) -> GoliveResult<EncoderStreams>;
}

#[async_trait]
impl EncoderControl for TranscoderProcess {
    async fn finish(&mut self, grace: Duration) -> GoliveResult<()> {
        self.shutdown(grace).await
    }

    async fn abort(&mut self) {
        self.kill().await;
    }

    fn diagnostics(&self) -> String {
        self.stderr_tail()
    }
}

/// Backend that drives the external transcoder with a given encoder.
#[derive(Debug, Clone)]
pub struct TranscoderBackend {
    kind: BackendKind,
    transcoder: TranscoderConfig,
    capabilities: Option<Arc<Capabilities>>,
}

impl TranscoderBackend {
    pub fn new(
        kind: BackendKind,
        transcoder: TranscoderConfig,
        capabilities: Option<Arc<Capabilities>>,
    ) -> Self {
        Self {
            kind,
            transcoder,
            capabilities,
        }
    }
}

#[async_trait]
impl EncoderBackend for TranscoderBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn check(&self, config: &EncoderConfig) -> GoliveResult<()> {
        let encoder = self.kind.encoder_name(config.codec);
        if let Some(caps) = &self.capabilities {
            if !caps.has_encoder(encoder) {
                return Err(GoliveError::unsupported(format!(
                    "transcoder has no {encoder} encoder"
                )));
            }
        }
        run_to_completion(
            &self.transcoder.path,
            &test_encode_args(self.kind, config),
            self.transcoder.probe_timeout(),
        )
        .await
        .map(|_| ())
    }

    async fn start(&self, config: &EncoderConfig) -> GoliveResult<EncoderStreams> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let port = listener.local_addr()?.port();

        let mut process = TranscoderProcess::spawn(
            &self.transcoder.path,
            &session_args(self.kind, config, port),
            format!("encoder-{}", self.kind),
            Pipes {
                stdin: true,
                stdout: true,
            },
            self.transcoder.stderr_tail_lines,
        )?;

        // The transcoder opens the audio input first and connects back to us.
        let accepted = tokio::time::timeout(self.transcoder.probe_timeout(), listener.accept()).await;
        let audio = match accepted {
            Ok(Ok((stream, _))) => {
                stream.set_nodelay(true)?;
                stream
            }
            Ok(Err(e)) => {
                process.kill().await;
                return Err(GoliveError::encoder(format!("Audio input accept failed: {e}")));
            }
            Err(_) => {
                let detail = match process.try_exited()? {
                    Some(status) => process.exit_error(status).to_string(),
                    None => "transcoder never connected its audio input".to_string(),
                };
                process.kill().await;
                return Err(GoliveError::timeout(detail));
            }
        };

        let video = process
            .take_stdin()
            .ok_or_else(|| GoliveError::encoder("Encoder stdin not piped"))?;
        let output = process
            .take_stdout()
            .ok_or_else(|| GoliveError::encoder("Encoder stdout not piped"))?;

        tracing::info!(
            backend = %self.kind,
            encoder = self.kind.encoder_name(config.codec),
            width = config.width,
            height = config.height,
            fps = config.fps,
            bitrate_kbps = config.effective_bitrate_kbps(),
            "Encoder backend started"
        );

        Ok(EncoderStreams {
            video: Box::new(video),
            audio: Box::new(audio),
            output: Box::new(output),
            control: Box::new(process),
        })
    }
}
