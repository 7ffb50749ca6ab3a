//! Clock and timing utilities for stream synchronization.
//!
//! Two clocks exist per pipeline run:
//! - [`MasterClock`]: advanced only by the audio mixer as it consumes samples.
//!   It is the single timing reference for output PTS and is read lock-free.
//! - [`SessionClock`]: a monotonic wall clock anchored at pipeline start, used
//!   to stamp captured samples and to detect stalls.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};

pub const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Convert a sample count at `sample_rate` to nanoseconds.
pub fn samples_to_ns(samples: u64, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    ((samples as u128 * NANOS_PER_SEC as u128) / sample_rate as u128) as u64
}

/// Audio-derived master clock.
///
/// Only the mixer task calls [`MasterClock::advance`]; every other task reads
/// a [`ClockSnapshot`]. The sample counter is published with release ordering
/// so readers observe a value no newer than the mixed audio it describes.
#[derive(Debug)]
pub struct MasterClock {
    sample_rate: u32,
    samples: AtomicU64,
}

/// A consistent reading of the master clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSnapshot {
    pub samples: u64,
    pub sample_rate: u32,
}

impl ClockSnapshot {
    pub fn pts_ns(&self) -> u64 {
        samples_to_ns(self.samples, self.sample_rate)
    }
}

impl MasterClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            samples: AtomicU64::new(0),
        }
    }

    /// Record that `frames` audio frames (per channel) were consumed.
    /// Returns the PTS of the first consumed frame.
    pub fn advance(&self, frames: u64) -> u64 {
        let before = self.samples.fetch_add(frames, Ordering::AcqRel);
        samples_to_ns(before, self.sample_rate)
    }

    pub fn snapshot(&self) -> ClockSnapshot {
        ClockSnapshot {
            samples: self.samples.load(Ordering::Acquire),
            sample_rate: self.sample_rate,
        }
    }

    /// Current master time in nanoseconds.
    pub fn now_ns(&self) -> u64 {
        self.snapshot().pts_ns()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// A monotonic clock anchored at pipeline start, used to stamp captured
/// samples. Also remembers the wall-clock time it was started.
#[derive(Debug, Clone)]
pub struct SessionClock {
    epoch: Instant,
    started_at: DateTime<Utc>,
}

impl SessionClock {
    /// Create a new session clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            started_at: Utc::now(),
        }
    }

    /// Nanoseconds elapsed since the clock started.
    pub fn elapsed_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_clock_elapsed_and_start_time() {
        let before = Utc::now();
        let clock = SessionClock::start();
        assert!(clock.elapsed_ns() < 1_000_000_000);
        assert!(clock.started_at() >= before);
        assert!(clock.started_at() <= Utc::now());
    }

    #[test]
    fn test_master_clock_counts_samples() {
        let clock = MasterClock::new(48_000);
        assert_eq!(clock.advance(1024), 0);
        assert_eq!(clock.advance(47_000 - 24), samples_to_ns(1024, 48_000));
        assert_eq!(clock.now_ns(), 1_000_000_000);
        assert_eq!(clock.snapshot().samples, 48_000);
    }
}
