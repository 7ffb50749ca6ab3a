//! Encoder overload episode detection.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverloadEvent {
    /// The queue has been at capacity for the configured number of cycles.
    Started,
    /// The queue drained after an episode that lasted `cycles`.
    Ended { cycles: u32 },
}

/// Counts consecutive render cycles that found the encoder queue full.
#[derive(Debug, Clone)]
pub struct OverloadTracker {
    threshold: u32,
    consecutive: u32,
    in_episode: bool,
    episodes: u64,
}

impl OverloadTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive: 0,
            in_episode: false,
            episodes: 0,
        }
    }

    pub fn record(&mut self, at_capacity: bool) -> Option<OverloadEvent> {
        if at_capacity {
            self.consecutive = self.consecutive.saturating_add(1);
            if !self.in_episode && self.consecutive >= self.threshold {
                self.in_episode = true;
                self.episodes += 1;
                return Some(OverloadEvent::Started);
            }
            return None;
        }

        let cycles = std::mem::take(&mut self.consecutive);
        if std::mem::take(&mut self.in_episode) {
            return Some(OverloadEvent::Ended { cycles });
        }
        None
    }

    pub fn in_episode(&self) -> bool {
        self.in_episode
    }

    pub fn episodes(&self) -> u64 {
        self.episodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_episode_needs_consecutive_cycles() {
        let mut tracker = OverloadTracker::new(3);
        assert_eq!(tracker.record(true), None);
        assert_eq!(tracker.record(true), None);
        assert_eq!(tracker.record(false), None);
        assert_eq!(tracker.record(true), None);
        assert_eq!(tracker.record(true), None);
        assert_eq!(tracker.record(true), Some(OverloadEvent::Started));
        assert_eq!(tracker.record(true), None);
        assert!(tracker.in_episode());
        assert_eq!(tracker.record(false), Some(OverloadEvent::Ended { cycles: 4 }));
        assert_eq!(tracker.episodes(), 1);
    }
}
