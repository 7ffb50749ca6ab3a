//! Video/audio synchronizer.
//!
//! Video output PTS are always consecutive multiples of the frame interval.
//! Each render cycle compares the next video PTS with the master (audio)
//! clock. Within tolerance one frame is produced; otherwise at most one
//! frame is dropped (video ahead) or duplicated (video behind) that cycle.

use golive_media_model::{frame_pts_ns, RenderStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correction {
    None,
    /// Video was behind the clock: this cycle emits one extra frame.
    Duplicate,
    /// Video was ahead of the clock: this cycle emits nothing.
    Drop,
}

/// What the render loop should produce this cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CyclePlan {
    /// Output PTS to composite, in order. Zero, one, or two entries.
    pub targets: Vec<u64>,
    pub correction: Correction,
    /// Drift before correction, in frames. Positive means video is ahead.
    pub drift_frames: f64,
}

#[derive(Debug, Clone)]
pub struct Synchronizer {
    fps: u32,
    tolerance_frames: f64,
    next_index: u64,
    last_drift_frames: f64,
    duplicated: u64,
    dropped: u64,
}

impl Synchronizer {
    pub fn new(fps: u32, tolerance_frames: f64) -> Self {
        Self {
            fps: fps.max(1),
            tolerance_frames: tolerance_frames.max(0.0),
            next_index: 0,
            last_drift_frames: 0.0,
            duplicated: 0,
            dropped: 0,
        }
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// PTS of the next frame to be produced.
    pub fn next_target_pts(&self) -> u64 {
        frame_pts_ns(self.next_index, self.fps)
    }

    pub fn frames_emitted(&self) -> u64 {
        self.next_index
    }

    /// `next_index` minus the clock position in frames.
    pub fn drift_frames(&self, clock_ns: u64) -> f64 {
        let clock_frames = clock_ns as f64 * self.fps as f64 / 1e9;
        self.next_index as f64 - clock_frames
    }

    pub fn last_drift_frames(&self) -> f64 {
        self.last_drift_frames
    }

    /// Decide this cycle's output given the master clock reading.
    pub fn plan_cycle(&mut self, clock_ns: u64) -> CyclePlan {
        self.plan_cycle_with_room(clock_ns, usize::MAX)
    }

    /// Like [`Self::plan_cycle`], but never plans more than `room` frames.
    /// A duplicate that does not fit is deferred to a later cycle rather
    /// than consuming a PTS that cannot be delivered.
    pub fn plan_cycle_with_room(&mut self, clock_ns: u64, room: usize) -> CyclePlan {
        let drift = self.drift_frames(clock_ns);
        self.last_drift_frames = drift;

        let (mut count, mut correction) = if drift > self.tolerance_frames {
            (0, Correction::Drop)
        } else if drift < -self.tolerance_frames {
            (2, Correction::Duplicate)
        } else {
            (1, Correction::None)
        };
        if count > room {
            count = room;
            if correction == Correction::Duplicate {
                tracing::trace!(room, "No room for a duplicate this cycle");
                correction = Correction::None;
            }
        }

        match correction {
            Correction::Drop => {
                self.dropped += 1;
                tracing::debug!(drift_frames = drift, "Video ahead of audio clock; dropping a frame");
            }
            Correction::Duplicate => {
                self.duplicated += 1;
                tracing::debug!(drift_frames = drift, "Video behind audio clock; duplicating a frame");
            }
            Correction::None => {}
        }

        let targets = (0..count)
            .map(|_| {
                let pts = self.next_target_pts();
                self.next_index += 1;
                pts
            })
            .collect();

        CyclePlan {
            targets,
            correction,
            drift_frames: drift,
        }
    }

    /// Fold this synchronizer's correction counts into `stats`.
    pub fn record_into(&self, stats: &mut RenderStats) {
        stats.frames_duplicated = self.duplicated;
        stats.frames_dropped_sync = self.dropped;
    }

    pub fn reset(&mut self) {
        self.next_index = 0;
        self.last_drift_frames = 0.0;
        self.duplicated = 0;
        self.dropped = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME_30: u64 = 33_333_333;

    #[test]
    fn test_duplicate_is_deferred_without_room() {
        let mut sync = Synchronizer::new(30, 1.0);
        let clock = frame_pts_ns(3, 30);

        let plan = sync.plan_cycle_with_room(clock, 1);
        assert_eq!(plan.correction, Correction::None);
        assert_eq!(plan.targets, vec![0]);

        let plan = sync.plan_cycle_with_room(clock, 4);
        assert_eq!(plan.correction, Correction::Duplicate);
        assert_eq!(plan.targets, vec![frame_pts_ns(1, 30), frame_pts_ns(2, 30)]);
        assert_eq!(sync.frames_emitted(), 3);

        let mut stats = RenderStats::default();
        sync.record_into(&mut stats);
        assert_eq!(stats.frames_duplicated, 1);
    }

    #[test]
    fn test_in_step_emits_one_frame_per_cycle() {
        let mut sync = Synchronizer::new(30, 1.0);
        let mut emitted = Vec::new();
        for i in 0..30u64 {
            let plan = sync.plan_cycle(frame_pts_ns(i, 30));
            assert_eq!(plan.correction, Correction::None);
            emitted.extend(plan.targets);
        }
        assert_eq!(emitted.len(), 30);
        assert_eq!(emitted[1], FRAME_30);
        assert_eq!(sync.next_target_pts(), 1_000_000_000);
    }

    #[test]
    fn test_clock_running_ahead_duplicates_once_per_cycle() {
        let mut sync = Synchronizer::new(30, 1.0);
        // Clock already 5 frames in.
        let plan = sync.plan_cycle(frame_pts_ns(5, 30));
        assert_eq!(plan.correction, Correction::Duplicate);
        assert_eq!(plan.targets, vec![0, FRAME_30]);
        assert!((plan.drift_frames + 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_stalled_clock_drops() {
        let mut sync = Synchronizer::new(30, 1.0);
        sync.plan_cycle(0);
        sync.plan_cycle(0);
        let plan = sync.plan_cycle(0);
        assert_eq!(plan.correction, Correction::Drop);
        assert!(plan.targets.is_empty());

        let mut stats = RenderStats::default();
        sync.record_into(&mut stats);
        assert_eq!(stats.frames_dropped_sync, 1);
    }

    #[test]
    fn test_recovers_gradually() {
        let mut sync = Synchronizer::new(30, 1.0);
        let mut cycles = 0;
        // The clock keeps advancing one frame per cycle; each duplicate
        // cycle closes the gap by exactly one frame.
        while sync.plan_cycle(frame_pts_ns(10 + cycles, 30)).correction == Correction::Duplicate {
            cycles += 1;
        }
        assert_eq!(cycles, 9);
    }
}
