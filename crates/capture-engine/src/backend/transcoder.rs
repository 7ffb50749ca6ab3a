//! Transcoder-backed sources: camera, screen, media file, and network input.
//!
//! Video is read as raw RGBA frames from one transcoder process and audio as
//! interleaved `f32le` PCM from a second one. Each pipe has its own reader
//! task feeding a small channel, which keeps [`SourceBackend::read`]
//! cancel-safe.

use std::sync::Arc;
use std::time::Duration;

use golive_common::clock::{samples_to_ns, SessionClock};
use golive_common::error::{GoliveError, GoliveResult};
use golive_common::transcoder::{Pipes, TranscoderProcess};
use golive_media_model::{
    AudioChunk, Frame, PixelFormat, SourceCapability, SourceConfig, SourceKind,
};
use tokio::io::AsyncReadExt;
use tokio::process::ChildStdout;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{SourceBackend, SourceSample};
use crate::registry::SourceContext;

/// Audio frames per chunk read from the PCM pipe.
const AUDIO_CHUNK_FRAMES: usize = 1024;

pub struct TranscoderSource {
    config: SourceConfig,
    ctx: SourceContext,
    processes: Vec<TranscoderProcess>,
    readers: Vec<JoinHandle<()>>,
    rx: Option<mpsc::Receiver<GoliveResult<SourceSample>>>,
}

impl TranscoderSource {
    pub fn new(config: SourceConfig, ctx: SourceContext) -> GoliveResult<Self> {
        if matches!(config.kind, SourceKind::TestPattern { .. }) {
            return Err(GoliveError::config(
                "Test patterns are generated in-process, not by the transcoder",
            ));
        }
        if !config.video && !config.audio {
            return Err(GoliveError::config(format!(
                "Source {} requests neither video nor audio",
                config.id
            )));
        }
        Ok(Self {
            config,
            ctx,
            processes: Vec::new(),
            readers: Vec::new(),
            rx: None,
        })
    }

    fn spawn(&self, args: Vec<String>, stream: &str) -> GoliveResult<TranscoderProcess> {
        TranscoderProcess::spawn(
            &self.ctx.transcoder.path,
            &args,
            format!("source {} {stream}", self.config.id),
            Pipes {
                stdin: false,
                stdout: true,
            },
            self.ctx.transcoder.stderr_tail_lines,
        )
    }
}

/// Input arguments (everything before `-i` and the input itself) for video.
pub fn video_input_args(config: &SourceConfig) -> GoliveResult<Vec<String>> {
    let fps = config.fps.max(1).to_string();
    let size = format!("{}x{}", config.width, config.height);
    let args: Vec<String> = match &config.kind {
        SourceKind::Camera { device } => {
            if cfg!(target_os = "macos") {
                strings(&["-f", "avfoundation", "-framerate", fps.as_str(), "-i", format!("{device}:none").as_str()])
            } else if cfg!(target_os = "windows") {
                strings(&["-f", "dshow", "-framerate", fps.as_str(), "-i", format!("video={device}").as_str()])
            } else {
                strings(&["-f", "v4l2", "-framerate", fps.as_str(), "-video_size", size.as_str(), "-i", device.as_str()])
            }
        }
        SourceKind::Screen { display, region } => {
            if cfg!(target_os = "macos") {
                strings(&[
                    "-f",
                    "avfoundation",
                    "-framerate",
                    fps.as_str(),
                    "-capture_cursor",
                    "1",
                    "-i",
                    format!("{display}:none").as_str(),
                ])
            } else if cfg!(target_os = "windows") {
                let mut args = strings(&["-f", "gdigrab", "-framerate", fps.as_str()]);
                if let Some(r) = region {
                    args.extend(strings(&[
                        "-offset_x",
                        r.x.to_string().as_str(),
                        "-offset_y",
                        r.y.to_string().as_str(),
                        "-video_size",
                        format!("{}x{}", r.width, r.height).as_str(),
                    ]));
                }
                args.extend(strings(&["-i", "desktop"]));
                args
            } else {
                let mut args = strings(&["-f", "x11grab", "-framerate", fps.as_str()]);
                let input = match region {
                    Some(r) => {
                        args.extend(strings(&["-video_size", format!("{}x{}", r.width, r.height).as_str()]));
                        format!(":{display}.0+{},{}", r.x, r.y)
                    }
                    None => format!(":{display}.0"),
                };
                args.extend(strings(&["-i", input.as_str()]));
                args
            }
        }
        SourceKind::MediaFile { path, looped } => {
            let mut args = strings(&["-re"]);
            if *looped {
                args.extend(strings(&["-stream_loop", "-1"]));
            }
            args.extend(strings(&["-thread_queue_size", "1024", "-i"]));
            args.push(path.display().to_string());
            args
        }
        SourceKind::Network { url } => strings(&[
            "-rw_timeout",
            "15000000",
            "-thread_queue_size",
            "1024",
            "-i",
            url.as_str(),
        ]),
        SourceKind::TestPattern { .. } => {
            return Err(GoliveError::unsupported("Test patterns have no transcoder input"))
        }
    };
    Ok(args)
}

/// Input arguments for the audio process.
///
/// Files and network inputs carry their own audio; devices use the platform's
/// default capture input.
pub fn audio_input_args(config: &SourceConfig) -> GoliveResult<Vec<String>> {
    match &config.kind {
        SourceKind::MediaFile { .. } | SourceKind::Network { .. } => video_input_args(config),
        SourceKind::Camera { .. } | SourceKind::Screen { .. } => {
            if cfg!(target_os = "macos") {
                Ok(strings(&["-f", "avfoundation", "-i", ":0"]))
            } else if cfg!(target_os = "windows") {
                Err(GoliveError::unsupported(
                    "Device audio on Windows needs a named dshow input; attach it as a network or file source",
                ))
            } else {
                Ok(strings(&["-f", "pulse", "-i", "default"]))
            }
        }
        SourceKind::TestPattern { .. } => {
            Err(GoliveError::unsupported("Test patterns have no transcoder input"))
        }
    }
}

/// Full argument list for the raw RGBA video process.
pub fn video_process_args(config: &SourceConfig) -> GoliveResult<Vec<String>> {
    let mut args = strings(&["-hide_banner", "-loglevel", "warning", "-nostdin"]);
    args.extend(video_input_args(config)?);
    args.extend(strings(&[
        "-map",
        "0:v:0",
        "-an",
        "-vf",
        format!(
            "scale={}:{},fps={}",
            config.width, config.height, config.fps
        )
        .as_str(),
        "-pix_fmt",
        PixelFormat::Rgba8.transcoder_name(),
        "-f",
        "rawvideo",
        "pipe:1",
    ]));
    Ok(args)
}

/// Full argument list for the `f32le` audio process.
pub fn audio_process_args(config: &SourceConfig) -> GoliveResult<Vec<String>> {
    let mut args = strings(&["-hide_banner", "-loglevel", "warning", "-nostdin"]);
    args.extend(audio_input_args(config)?);
    args.extend(strings(&[
        "-map",
        "0:a:0",
        "-vn",
        "-ac",
        config.channels.to_string().as_str(),
        "-ar",
        config.sample_rate.to_string().as_str(),
        "-f",
        "f32le",
        "pipe:1",
    ]));
    Ok(args)
}

fn strings(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

async fn read_video(
    mut stdout: ChildStdout,
    config: Arc<SourceConfig>,
    clock: SessionClock,
    tx: mpsc::Sender<GoliveResult<SourceSample>>,
) {
    let len = Frame::byte_len(config.width, config.height, PixelFormat::Rgba8);
    loop {
        let mut buf = vec![0u8; len];
        match stdout.read_exact(&mut buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => {
                let _ = tx
                    .send(Err(GoliveError::capture(format!(
                        "Video pipe for {} failed: {e}",
                        config.id
                    ))))
                    .await;
                break;
            }
        }
        let sample = Frame::new(
            clock.elapsed_ns(),
            config.width,
            config.height,
            PixelFormat::Rgba8,
            buf,
        )
        .map(SourceSample::Video);
        if tx.send(sample).await.is_err() {
            break;
        }
    }
}

async fn read_audio(
    mut stdout: ChildStdout,
    config: Arc<SourceConfig>,
    clock: SessionClock,
    tx: mpsc::Sender<GoliveResult<SourceSample>>,
) {
    let channels = config.channels.max(1) as usize;
    let mut buf = vec![0u8; AUDIO_CHUNK_FRAMES * channels * 4];
    let mut base_ns: Option<u64> = None;
    let mut frames_read: u64 = 0;
    loop {
        match stdout.read_exact(&mut buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => {
                let _ = tx
                    .send(Err(GoliveError::capture(format!(
                        "Audio pipe for {} failed: {e}",
                        config.id
                    ))))
                    .await;
                break;
            }
        }
        // Audio PTS follows the sample count from the first chunk's arrival.
        let base = *base_ns.get_or_insert_with(|| clock.elapsed_ns());
        let pts = base + samples_to_ns(frames_read, config.sample_rate);
        frames_read += AUDIO_CHUNK_FRAMES as u64;

        let samples = buf
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        let sample = AudioChunk::new(pts, config.sample_rate, config.channels, samples)
            .map(SourceSample::Audio);
        if tx.send(sample).await.is_err() {
            break;
        }
    }
}

#[async_trait::async_trait]
impl SourceBackend for TranscoderSource {
    fn name(&self) -> &str {
        self.config.id.as_str()
    }

    fn capability(&self) -> SourceCapability {
        self.config.capability()
    }

    async fn open(&mut self) -> GoliveResult<()> {
        let (tx, rx) = mpsc::channel(8);
        let shared = Arc::new(self.config.clone());

        if self.config.video {
            let mut process = self.spawn(video_process_args(&self.config)?, "video")?;
            let stdout = process
                .take_stdout()
                .ok_or_else(|| GoliveError::capture("Failed to capture video pipe"))?;
            self.readers.push(tokio::spawn(read_video(
                stdout,
                shared.clone(),
                self.ctx.clock.clone(),
                tx.clone(),
            )));
            self.processes.push(process);
        }

        if self.config.audio {
            let mut process = self.spawn(audio_process_args(&self.config)?, "audio")?;
            let stdout = process
                .take_stdout()
                .ok_or_else(|| GoliveError::capture("Failed to capture audio pipe"))?;
            self.readers.push(tokio::spawn(read_audio(
                stdout,
                shared,
                self.ctx.clock.clone(),
                tx.clone(),
            )));
            self.processes.push(process);
        }

        // Catch inputs that fail immediately (missing device, bad URL).
        tokio::time::sleep(Duration::from_millis(200)).await;
        for process in &mut self.processes {
            if let Some(status) = process.try_exited()? {
                if !status.success() {
                    return Err(GoliveError::capture(
                        process.exit_error(status).to_string(),
                    ));
                }
            }
        }

        self.rx = Some(rx);
        tracing::info!(
            source = %self.config.id,
            kind = self.config.kind.registry_key(),
            processes = self.processes.len(),
            "Transcoder source opened"
        );
        Ok(())
    }

    async fn read(&mut self) -> GoliveResult<Option<SourceSample>> {
        let rx = self
            .rx
            .as_mut()
            .ok_or_else(|| GoliveError::invalid_state("Source read before open"))?;
        match rx.recv().await {
            Some(sample) => sample.map(Some),
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> GoliveResult<()> {
        self.rx = None;
        for reader in self.readers.drain(..) {
            reader.abort();
        }
        for mut process in self.processes.drain(..) {
            match process.try_exited()? {
                Some(status) if !status.success() => {
                    tracing::warn!(
                        source = %self.config.id,
                        error = %process.exit_error(status),
                        "Source transcoder exited with an error"
                    );
                }
                Some(_) => {}
                None => process.kill().await,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use golive_media_model::Region;
    use std::path::PathBuf;

    #[test]
    fn test_media_file_args_loop_and_realtime() {
        let config = SourceConfig::new(
            "clip",
            SourceKind::MediaFile {
                path: PathBuf::from("/media/intro.mp4"),
                looped: true,
            },
            1280,
            720,
            30,
        );
        let args = video_process_args(&config).unwrap();
        let joined = args.join(" ");
        assert!(joined.contains("-re -stream_loop -1"));
        assert!(joined.contains("-i /media/intro.mp4"));
        assert!(joined.contains("scale=1280:720,fps=30"));
        assert!(joined.ends_with("-pix_fmt rgba -f rawvideo pipe:1"));
    }

    #[test]
    fn test_audio_args_request_interleaved_float() {
        let config = SourceConfig::new(
            "remote",
            SourceKind::Network {
                url: "srt://ingest:9000".into(),
            },
            640,
            360,
            25,
        )
        .with_audio(44_100, 1);
        let joined = audio_process_args(&config).unwrap().join(" ");
        assert!(joined.contains("-i srt://ingest:9000"));
        assert!(joined.contains("-ac 1 -ar 44100 -f f32le pipe:1"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_screen_region_uses_x11_offset() {
        let config = SourceConfig::new(
            "desk",
            SourceKind::Screen {
                display: 0,
                region: Some(Region {
                    x: 100,
                    y: 50,
                    width: 800,
                    height: 600,
                }),
            },
            800,
            600,
            30,
        );
        let joined = video_input_args(&config).unwrap().join(" ");
        assert!(joined.contains("-f x11grab"));
        assert!(joined.contains("-video_size 800x600 -i :0.0+100,50"));
    }

    #[test]
    fn test_rejects_test_pattern_kind() {
        let config = SourceConfig::new("bars", SourceKind::TestPattern { tone_hz: None }, 16, 16, 30);
        let ctx = SourceContext::new(Default::default(), SessionClock::start());
        assert!(TranscoderSource::new(config, ctx).is_err());
    }
}
