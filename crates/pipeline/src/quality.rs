//! Adaptive quality recommendations from render-loop overload.
//!
//! The governor only recommends. Applying a level is an explicit
//! reconfigure by whoever drives the controller.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use golive_media_model::{EncoderConfig, QualityLevel};

/// Overload ratio above which the level drops two steps.
const SEVERE_OVERLOAD: f64 = 0.5;
/// Overload ratio above which the level drops one step.
const OVERLOAD: f64 = 0.1;
/// Overload ratio below which the level may rise one step.
const HEADROOM: f64 = 0.01;

const HISTORY: usize = 10;
const MIN_SAMPLES: usize = 3;
const MULTI_STEP_HOLD: Duration = Duration::from_secs(5);
const SINGLE_STEP_HOLD: Duration = Duration::from_secs(10);

/// Best ladder level that fits inside `config`'s resolution and frame rate.
pub fn closest_level(config: &EncoderConfig) -> QualityLevel {
    QualityLevel::LADDER
        .into_iter()
        .find(|level| {
            let preset = level.preset();
            preset.height <= config.height && preset.fps <= config.fps
        })
        .unwrap_or(QualityLevel::Low)
}

/// `config` with the resolution, frame rate and bitrate of `level`.
pub fn apply_level(config: &EncoderConfig, level: QualityLevel) -> EncoderConfig {
    let preset = level.preset();
    EncoderConfig {
        width: preset.width,
        height: preset.height,
        fps: preset.fps,
        bitrate_kbps: preset.bitrate_kbps,
        ..config.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityStatus {
    pub current: QualityLevel,
    pub recommended: QualityLevel,
}

#[derive(Debug, Clone)]
pub struct QualityGovernor {
    current: QualityLevel,
    recommended: QualityLevel,
    history: VecDeque<f64>,
    last_change: Instant,
}

impl QualityGovernor {
    pub fn new(current: QualityLevel, now: Instant) -> Self {
        Self {
            current,
            recommended: current,
            history: VecDeque::with_capacity(HISTORY),
            last_change: now,
        }
    }

    pub fn status(&self) -> QualityStatus {
        QualityStatus {
            current: self.current,
            recommended: self.recommended,
        }
    }

    /// Feed one window's overload ratio (skipped cycles / cycles).
    ///
    /// Returns the new recommendation when it changes.
    pub fn observe(&mut self, overload_ratio: f64, now: Instant) -> Option<QualityLevel> {
        if self.history.len() == HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(overload_ratio.clamp(0.0, 1.0));
        if self.history.len() < MIN_SAMPLES {
            return None;
        }

        let average = self.history.iter().sum::<f64>() / self.history.len() as f64;
        let target = if average > SEVERE_OVERLOAD {
            self.recommended.lower().lower()
        } else if average > OVERLOAD {
            self.recommended.lower()
        } else if average < HEADROOM {
            self.recommended.higher()
        } else {
            self.recommended
        };
        // Never recommend above what the session was configured for.
        let target = target.max(self.current);

        if target == self.recommended || !self.may_change(target, now) {
            return None;
        }

        tracing::info!(
            from = ?self.recommended,
            to = ?target,
            overload_ratio = average,
            "Quality recommendation changed"
        );
        self.recommended = target;
        self.last_change = now;
        self.history.clear();
        Some(target)
    }

    fn may_change(&self, target: QualityLevel, now: Instant) -> bool {
        let held = now.saturating_duration_since(self.last_change);
        let steps = target.rank().abs_diff(self.recommended.rank());
        if steps >= 2 {
            held >= MULTI_STEP_HOLD
        } else {
            held >= SINGLE_STEP_HOLD
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(governor: &mut QualityGovernor, ratio: f64, start: Instant, secs: &[u64]) -> Vec<QualityLevel> {
        secs.iter()
            .filter_map(|s| governor.observe(ratio, start + Duration::from_secs(*s)))
            .collect()
    }

    #[test]
    fn test_sustained_overload_steps_down_after_hold() {
        let start = Instant::now();
        let mut governor = QualityGovernor::new(QualityLevel::High, start);
        // Single step: nothing before 10 s.
        assert!(feed(&mut governor, 0.2, start, &[2, 4, 6, 8]).is_empty());
        assert_eq!(feed(&mut governor, 0.2, start, &[10]), vec![QualityLevel::Medium]);
        assert_eq!(governor.status().recommended, QualityLevel::Medium);
    }

    #[test]
    fn test_severe_overload_jumps_two_levels_after_five_seconds() {
        let start = Instant::now();
        let mut governor = QualityGovernor::new(QualityLevel::Ultra, start);
        assert!(feed(&mut governor, 0.9, start, &[1, 2]).is_empty());
        assert!(feed(&mut governor, 0.9, start, &[3]).is_empty());
        assert_eq!(feed(&mut governor, 0.9, start, &[5]), vec![QualityLevel::Medium]);
    }

    #[test]
    fn test_headroom_never_exceeds_configured_level() {
        let start = Instant::now();
        let mut governor = QualityGovernor::new(QualityLevel::High, start);
        assert!(feed(&mut governor, 0.0, start, &[10, 20, 30, 40]).is_empty());
        assert_eq!(governor.status().recommended, QualityLevel::High);
    }

    #[test]
    fn test_recovers_after_overload_clears() {
        let start = Instant::now();
        let mut governor = QualityGovernor::new(QualityLevel::High, start);
        assert_eq!(feed(&mut governor, 0.3, start, &[10, 11, 12]), vec![QualityLevel::Medium]);
        assert!(feed(&mut governor, 0.0, start, &[14, 16, 18]).is_empty());
        assert_eq!(feed(&mut governor, 0.0, start, &[22]), vec![QualityLevel::High]);
    }

    #[test]
    fn test_closest_level_fits_config() {
        let config = EncoderConfig {
            width: 1280,
            height: 720,
            fps: 30,
            ..Default::default()
        };
        assert_eq!(closest_level(&config), QualityLevel::Medium);
        let applied = apply_level(&config, QualityLevel::Low);
        assert_eq!((applied.width, applied.fps, applied.bitrate_kbps), (1280, 24, 2_500));
    }
}
