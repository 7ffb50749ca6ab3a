//! Per-stream timestamp monotonicity check.

/// A rejected sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtsAnomaly {
    pub last_pts_ns: u64,
    pub pts_ns: u64,
    /// Rejections in a row, including this one.
    pub consecutive: u32,
    /// Whether `consecutive` reached the stall threshold.
    pub persistent: bool,
}

/// Accepts only strictly increasing PTS.
#[derive(Debug, Clone)]
pub struct PtsGuard {
    last: Option<u64>,
    consecutive_rejects: u32,
    threshold: u32,
}

impl PtsGuard {
    pub fn new(threshold: u32) -> Self {
        Self {
            last: None,
            consecutive_rejects: 0,
            threshold: threshold.max(1),
        }
    }

    pub fn check(&mut self, pts_ns: u64) -> Result<(), PtsAnomaly> {
        match self.last {
            Some(last) if pts_ns <= last => {
                self.consecutive_rejects += 1;
                Err(PtsAnomaly {
                    last_pts_ns: last,
                    pts_ns,
                    consecutive: self.consecutive_rejects,
                    persistent: self.consecutive_rejects >= self.threshold,
                })
            }
            _ => {
                self.last = Some(pts_ns);
                self.consecutive_rejects = 0;
                Ok(())
            }
        }
    }

    pub fn last_pts_ns(&self) -> Option<u64> {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_equal_and_decreasing() {
        let mut guard = PtsGuard::new(3);
        assert!(guard.check(10).is_ok());
        assert!(guard.check(10).is_err());
        assert!(guard.check(5).is_err());
        assert!(guard.check(11).is_ok());
        assert_eq!(guard.last_pts_ns(), Some(11));
    }

    #[test]
    fn test_persistent_after_threshold() {
        let mut guard = PtsGuard::new(2);
        guard.check(100).unwrap();
        assert!(!guard.check(50).unwrap_err().persistent);
        assert!(guard.check(60).unwrap_err().persistent);
        guard.check(101).unwrap();
        assert_eq!(guard.check(1).unwrap_err().consecutive, 1);
    }
}
