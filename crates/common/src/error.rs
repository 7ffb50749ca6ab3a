//! Error types shared across GoLive crates.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level error type for GoLive operations.
#[derive(Debug, thiserror::Error)]
pub enum GoliveError {
    /// A source delivered non-monotonic timestamps or stopped delivering.
    #[error("Source anomaly on {source_id}: {message}")]
    SourceAnomaly { source_id: String, message: String },

    /// Every encoder backend in the preference list failed to open.
    #[error("No encoder backend could be opened: {attempts}")]
    EncoderUnavailable { attempts: String },

    /// The encoder submission queue is at capacity.
    #[error("Encoder overloaded: {depth}/{capacity} queued")]
    EncoderOverload { depth: usize, capacity: usize },

    /// An opened encoder session stopped producing output.
    #[error("Encoder error: {message}")]
    Encoder { message: String },

    /// The output target could not be reached when opening.
    #[error("Output unreachable ({target}): {message}")]
    OutputUnreachable { target: String, message: String },

    /// The output connection dropped mid-session.
    #[error("Output dropped after {attempts} reconnect attempts: {message}")]
    OutputDropped { attempts: u32, message: String },

    /// Writing to a recording file failed.
    #[error("Recording write failed ({path}): {message}")]
    RecordingWriteFailure { path: PathBuf, message: String },

    #[error("Capture error: {message}")]
    Capture { message: String },

    #[error("Render error: {message}")]
    Render { message: String },

    #[error("Audio error: {message}")]
    Audio { message: String },

    #[error("Transcoder error: {message}")]
    Transcoder { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    #[error("Timed out: {message}")]
    Timeout { message: String },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using GoliveError.
pub type GoliveResult<T> = Result<T, GoliveError>;

/// Why the pipeline controller entered `Failed`.
///
/// This is the only error surface exposed to whatever drives the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureCause {
    EncoderUnavailable { message: String },
    EncoderFailed { message: String },
    OutputUnreachable { message: String },
    OutputDropped { message: String },
    RecordingWriteFailure { message: String },
    SourceFailed { message: String },
    Internal { message: String },
}

impl FailureCause {
    pub fn message(&self) -> &str {
        match self {
            Self::EncoderUnavailable { message }
            | Self::EncoderFailed { message }
            | Self::OutputUnreachable { message }
            | Self::OutputDropped { message }
            | Self::RecordingWriteFailure { message }
            | Self::SourceFailed { message }
            | Self::Internal { message } => message,
        }
    }
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::EncoderUnavailable { .. } => "encoder unavailable",
            Self::EncoderFailed { .. } => "encoder failed",
            Self::OutputUnreachable { .. } => "output unreachable",
            Self::OutputDropped { .. } => "output dropped",
            Self::RecordingWriteFailure { .. } => "recording write failure",
            Self::SourceFailed { .. } => "source failed",
            Self::Internal { .. } => "internal error",
        };
        write!(f, "{label}: {}", self.message())
    }
}

impl GoliveError {
    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture {
            message: msg.into(),
        }
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render {
            message: msg.into(),
        }
    }

    pub fn audio(msg: impl Into<String>) -> Self {
        Self::Audio {
            message: msg.into(),
        }
    }

    pub fn encoder(msg: impl Into<String>) -> Self {
        Self::Encoder {
            message: msg.into(),
        }
    }

    pub fn transcoder(msg: impl Into<String>) -> Self {
        Self::Transcoder {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState {
            message: msg.into(),
        }
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }

    pub fn source_anomaly(source_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::SourceAnomaly {
            source_id: source_id.into(),
            message: msg.into(),
        }
    }

    pub fn output_unreachable(target: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::OutputUnreachable {
            target: target.into(),
            message: msg.into(),
        }
    }

    /// Map this error to the cause recorded by the controller when it fails.
    pub fn failure_cause(&self) -> FailureCause {
        let message = self.to_string();
        match self {
            Self::EncoderUnavailable { .. } => FailureCause::EncoderUnavailable { message },
            Self::Encoder { .. } | Self::EncoderOverload { .. } | Self::Transcoder { .. } => {
                FailureCause::EncoderFailed { message }
            }
            Self::OutputUnreachable { .. } => FailureCause::OutputUnreachable { message },
            Self::OutputDropped { .. } => FailureCause::OutputDropped { message },
            Self::RecordingWriteFailure { .. } => FailureCause::RecordingWriteFailure { message },
            Self::SourceAnomaly { .. } | Self::Capture { .. } => {
                FailureCause::SourceFailed { message }
            }
            _ => FailureCause::Internal { message },
        }
    }
}
