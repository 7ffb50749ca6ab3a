//! Network transport: a transcoder process that rewraps the encoder's
//! MPEG-TS stream for the target protocol and pushes it to the server.

use std::time::Duration;

use async_trait::async_trait;
use golive_common::config::TranscoderConfig;
use golive_common::error::{GoliveError, GoliveResult};
use golive_common::transcoder::{Pipes, TranscoderProcess};
use golive_media_model::{EncodedPacket, OutputTarget, StreamProtocol};
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;

use crate::transport::{FailurePolicy, PacketTransport};

/// The remux process must survive this long for a connect to count.
const CONNECT_SETTLE: Duration = Duration::from_millis(500);

/// Socket read/write timeout handed to the transcoder, in microseconds.
const RW_TIMEOUT_US: &str = "15000000";

/// Remux arguments: MPEG-TS on stdin, stream copy, protocol muxer out.
pub fn remux_args(protocol: StreamProtocol, connect_url: &str) -> Vec<String> {
    let mut args: Vec<String> = [
        "-hide_banner",
        "-loglevel",
        "warning",
        "-f",
        "mpegts",
        "-i",
        "pipe:0",
        "-c",
        "copy",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    if matches!(protocol, StreamProtocol::Rtmp | StreamProtocol::Rtmps) {
        args.extend(["-rtmp_live".to_string(), "live".to_string()]);
    }
    args.extend(["-rw_timeout".to_string(), RW_TIMEOUT_US.to_string()]);
    args.extend([
        "-f".to_string(),
        protocol.mux().transcoder_format().to_string(),
        connect_url.to_string(),
    ]);
    args
}

pub struct NetworkTransport {
    protocol: StreamProtocol,
    connect_url: String,
    description: String,
    transcoder: TranscoderConfig,
    process: Option<TranscoderProcess>,
    stdin: Option<ChildStdin>,
}

impl std::fmt::Debug for NetworkTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkTransport")
            .field("target", &self.description)
            .field("connected", &self.stdin.is_some())
            .finish()
    }
}

impl NetworkTransport {
    pub fn new(target: OutputTarget, transcoder: TranscoderConfig) -> GoliveResult<Self> {
        let description = target.describe();
        match (&target, target.connect_url()) {
            (OutputTarget::Network { protocol, .. }, Some(connect_url)) => Ok(Self {
                protocol: *protocol,
                connect_url,
                description,
                transcoder,
                process: None,
                stdin: None,
            }),
            _ => Err(GoliveError::config(format!(
                "network transport cannot stream to {description}"
            ))),
        }
    }

    fn diagnostics(&self) -> String {
        self.process
            .as_ref()
            .map(TranscoderProcess::stderr_tail)
            .unwrap_or_default()
    }

    async fn teardown(&mut self) {
        self.stdin = None;
        if let Some(mut process) = self.process.take() {
            process.kill().await;
        }
    }
}

#[async_trait]
impl PacketTransport for NetworkTransport {
    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Reconnect
    }

    async fn connect(&mut self) -> GoliveResult<()> {
        self.teardown().await;

        let mut process = TranscoderProcess::spawn(
            &self.transcoder.path,
            &remux_args(self.protocol, &self.connect_url),
            "output-remux",
            Pipes {
                stdin: true,
                stdout: false,
            },
            self.transcoder.stderr_tail_lines,
        )?;

        // A refused or unresolvable server makes the transcoder exit almost
        // immediately.
        tokio::time::sleep(CONNECT_SETTLE).await;
        if let Some(status) = process.try_exited()? {
            let err = process.exit_error(status);
            return Err(GoliveError::output_unreachable(&self.description, err.to_string()));
        }

        self.stdin = process.take_stdin();
        self.process = Some(process);
        tracing::info!(output = %self.description, "Output connected");
        Ok(())
    }

    async fn send(&mut self, packet: &EncodedPacket) -> GoliveResult<()> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(GoliveError::transcoder("output is not connected"));
        };
        if let Err(e) = stdin.write_all(&packet.data).await {
            let detail = self.diagnostics();
            self.teardown().await;
            return Err(GoliveError::transcoder(if detail.is_empty() {
                e.to_string()
            } else {
                format!("{e}: {detail}")
            }));
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> GoliveResult<()> {
        // Closing stdin lets the remux flush its trailer.
        self.stdin = None;
        match self.process.take() {
            Some(mut process) => process.shutdown(Duration::from_secs(3)).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has_pair(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|w| w[0] == flag && w[1] == value)
    }

    #[test]
    fn test_rtmp_remux_goes_to_flv() {
        let args = remux_args(StreamProtocol::Rtmp, "rtmp://live.example.com/app/key");
        assert!(has_pair(&args, "-c", "copy"));
        assert!(has_pair(&args, "-rtmp_live", "live"));
        assert!(has_pair(&args, "-f", "flv"));
        assert_eq!(args.last().map(String::as_str), Some("rtmp://live.example.com/app/key"));
    }

    #[test]
    fn test_srt_stays_mpegts() {
        let args = remux_args(StreamProtocol::Srt, "srt://ingest:9000");
        assert!(!args.iter().any(|a| a == "-rtmp_live"));
        assert_eq!(args.iter().filter(|a| *a == "mpegts").count(), 2);
    }

    #[test]
    fn test_file_target_is_rejected() {
        let err = NetworkTransport::new(OutputTarget::file("/tmp/a.mp4"), TranscoderConfig::default())
            .unwrap_err();
        assert!(matches!(err, GoliveError::Config { .. }));
    }

    #[tokio::test]
    async fn test_missing_transcoder_cannot_connect() {
        let target = OutputTarget::network("rtmp://127.0.0.1/app", None).unwrap();
        let mut transport = NetworkTransport::new(
            target,
            TranscoderConfig {
                path: "/nonexistent/golive-transcoder".into(),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(transport.connect().await.is_err());
    }
}
