//! Application configuration.
//!
//! Every tunable that affects pacing, retries, or queue bounds lives here so
//! it can be changed without recompiling.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Default output parameters.
    pub defaults: OutputDefaults,

    /// External transcoder settings.
    pub transcoder: TranscoderConfig,

    /// Audio/video drift correction.
    pub sync: SyncConfig,

    /// Network output reconnection policy.
    pub reconnect: ReconnectPolicy,

    /// Queue capacities between pipeline tasks.
    pub queues: QueueConfig,

    /// Stall detection and shutdown timing.
    pub timeouts: TimeoutConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default output parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputDefaults {
    pub width: u32,
    pub height: u32,
    pub fps: u32,

    /// Master audio sample rate. The master clock counts samples at this rate.
    pub audio_sample_rate: u32,

    pub audio_channels: u16,

    /// Frames (per channel) in one mixed audio chunk.
    pub audio_chunk_frames: u32,

    pub video_codec: String,
}

/// External transcoder process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscoderConfig {
    /// Transcoder executable (looked up on PATH when not absolute).
    pub path: PathBuf,

    /// Upper bound on each phase (check, start) of opening one backend.
    pub probe_timeout_ms: u64,

    /// Number of stderr lines retained for error reports.
    pub stderr_tail_lines: usize,
}

/// Drift correction parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Drift (in frames) tolerated before a correction is issued.
    pub tolerance_frames: f64,
}

/// Exponential reconnect backoff for network outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub initial_delay_ms: u64,
    pub factor: f64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,

    /// Upper bound on one connect attempt.
    pub connect_timeout_ms: u64,
}

/// Capacities of the bounded queues between tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Per-source video frames (drop-oldest).
    pub source_video_frames: usize,

    /// Per-source audio chunks (reject-new).
    pub source_audio_chunks: usize,

    /// Encoder video submissions before backpressure.
    pub encoder_video_frames: usize,

    /// Encoder audio submissions before rejecting.
    pub encoder_audio_chunks: usize,

    /// Encoded packets buffered toward the output sink.
    pub output_packets: usize,

    /// Consecutive full-queue cycles before an overload episode is reported.
    pub overload_cycles: u32,
}

/// Stall detection and shutdown timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// A source with no accepted sample for this long is marked stalled.
    pub source_stall_ms: u64,

    /// Consecutive rejected samples that mark a source stalled.
    pub anomaly_threshold: u32,

    /// Time every task gets to exit cleanly before forced teardown.
    pub shutdown_grace_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "golive=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for OutputDefaults {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 30,
            audio_sample_rate: 48000,
            audio_channels: 2,
            audio_chunk_frames: 1024,
            video_codec: "h264".to_string(),
        }
    }
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("ffmpeg"),
            probe_timeout_ms: 10_000,
            stderr_tail_lines: 40,
        }
    }
}

impl TranscoderConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tolerance_frames: 1.0,
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            factor: 2.0,
            max_delay_ms: 30_000,
            max_attempts: 8,
            connect_timeout_ms: 10_000,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given (zero-based) reconnect attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let initial = self.initial_delay_ms as f64;
        let factor = self.factor.max(1.0);
        let delay = initial * factor.powi(attempt.min(i32::MAX as u32) as i32);
        Duration::from_millis(delay.min(self.max_delay_ms as f64) as u64)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            source_video_frames: 3,
            source_audio_chunks: 16,
            encoder_video_frames: 8,
            encoder_audio_chunks: 64,
            output_packets: 256,
            overload_cycles: 5,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            source_stall_ms: 2_000,
            anomaly_threshold: 5,
            shutdown_grace_ms: 5_000,
        }
    }
}

impl TimeoutConfig {
    pub fn source_stall(&self) -> Duration {
        Duration::from_millis(self.source_stall_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("golive").join("config.json")
}
