//! Pipeline state, quality levels, and health snapshots.

use chrono::{DateTime, Utc};
use golive_common::error::FailureCause;
use serde::{Deserialize, Serialize};

use crate::encoder::{BackendFailure, BackendKind};
use crate::output::ConnectionState;
use crate::source::{SourceId, SourceState};

/// Run state of the pipeline. Only the controller changes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    #[default]
    Idle,
    Starting,
    Running,
    /// Running, with the output sink recovering a dropped connection.
    Reconnecting,
    Stopping,
    /// Terminal until an explicit reset.
    Failed,
}

impl PipelineState {
    /// Whether the composite/encode loop is live.
    pub fn is_running(self) -> bool {
        matches!(self, Self::Running | Self::Reconnecting)
    }

    /// Legal controller transitions.
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Idle, Starting)
                | (Starting, Running)
                | (Starting, Stopping)
                | (Starting, Failed)
                | (Running, Reconnecting)
                | (Reconnecting, Running)
                | (Running, Stopping)
                | (Reconnecting, Stopping)
                | (Running, Failed)
                | (Reconnecting, Failed)
                | (Stopping, Idle)
                | (Stopping, Failed)
                | (Failed, Idle)
        )
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Reconnecting => "reconnecting",
            Self::Stopping => "stopping",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Output quality ladder, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityLevel {
    Ultra,
    High,
    Medium,
    Low,
}

/// Output parameters for one [`QualityLevel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityPreset {
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub bitrate_kbps: u32,
}

impl QualityLevel {
    pub const LADDER: [QualityLevel; 4] = [Self::Ultra, Self::High, Self::Medium, Self::Low];

    pub fn preset(self) -> QualityPreset {
        match self {
            Self::Ultra => QualityPreset {
                fps: 60,
                width: 1920,
                height: 1080,
                bitrate_kbps: 8_000,
            },
            Self::High => QualityPreset {
                fps: 30,
                width: 1920,
                height: 1080,
                bitrate_kbps: 6_000,
            },
            Self::Medium => QualityPreset {
                fps: 30,
                width: 1280,
                height: 720,
                bitrate_kbps: 4_000,
            },
            Self::Low => QualityPreset {
                fps: 24,
                width: 1280,
                height: 720,
                bitrate_kbps: 2_500,
            },
        }
    }

    /// Position on the ladder, 0 = best.
    pub fn rank(self) -> usize {
        self as usize
    }

    pub fn from_rank(rank: usize) -> Self {
        Self::LADDER[rank.min(Self::LADDER.len() - 1)]
    }

    pub fn lower(self) -> Self {
        Self::from_rank(self.rank() + 1)
    }

    pub fn higher(self) -> Self {
        Self::from_rank(self.rank().saturating_sub(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceHealth {
    pub id: SourceId,
    pub state: SourceState,
    pub frames_accepted: u64,
    pub frames_dropped: u64,
    pub audio_chunks_accepted: u64,
    pub audio_chunks_rejected: u64,
    pub anomalies: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderHealth {
    pub backend: Option<BackendKind>,
    pub failures: Vec<BackendFailure>,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub packets: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputHealth {
    pub target: String,
    pub state: ConnectionState,
    pub reconnects: u32,
    pub packets_written: u64,
    pub packets_dropped: u64,
    pub bytes_written: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderStats {
    pub frames_composited: u64,
    pub frames_skipped_backpressure: u64,
    pub frames_duplicated: u64,
    pub frames_dropped_sync: u64,
    pub overload_episodes: u64,
    pub last_pts_ns: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixerStats {
    pub chunks_mixed: u64,
    pub clipped_samples: u64,
    pub clock_ns: u64,
}

/// Everything the controller exposes for display.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineHealth {
    pub state: PipelineState,
    pub failure: Option<FailureCause>,
    /// Wall-clock start of the current or most recent run.
    pub started_at: Option<DateTime<Utc>>,
    pub sources: Vec<SourceHealth>,
    pub encoder: EncoderHealth,
    pub output: OutputHealth,
    pub render: RenderStats,
    pub mixer: MixerStats,
    pub current_quality: Option<QualityLevel>,
    pub recommended_quality: Option<QualityLevel>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_only_leaves_via_reset() {
        use PipelineState::*;
        for next in [Starting, Running, Reconnecting, Stopping, Failed] {
            assert!(!Failed.can_transition_to(next));
        }
        assert!(Failed.can_transition_to(Idle));
    }

    #[test]
    fn test_cannot_run_without_starting() {
        assert!(!PipelineState::Idle.can_transition_to(PipelineState::Running));
        assert!(PipelineState::Starting.can_transition_to(PipelineState::Running));
    }

    #[test]
    fn test_quality_ladder_saturates() {
        assert_eq!(QualityLevel::Low.lower(), QualityLevel::Low);
        assert_eq!(QualityLevel::Ultra.higher(), QualityLevel::Ultra);
        assert_eq!(QualityLevel::High.lower(), QualityLevel::Medium);
        assert_eq!(QualityLevel::Medium.preset().height, 720);
    }
}
