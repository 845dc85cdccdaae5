//! Synthetic progress for one attempt.
//!
//! Progress is cosmetic: it lets a UI show a bar that moves while the
//! scheduler waits. It fills linearly to [`WAIT_CEILING`] during the delay,
//! then creeps toward 99 while the operation is in flight. Only success
//! reaches 100.

use std::time::Duration;

/// Highest value reached while waiting out the delay.
pub const WAIT_CEILING: u8 = 90;

/// Highest value reached before the operation resolves.
pub const CREEP_CEILING: u8 = 99;

/// Progress of a single attempt. Never decreases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    percent: u8,
}

impl Progress {
    /// Progress at the start of an attempt.
    pub fn new() -> Self {
        Self { percent: 0 }
    }

    /// Current value in [0, 100].
    pub fn percent(&self) -> u8 {
        self.percent
    }

    /// Advance for `waited` out of `total` delay.
    ///
    /// Returns the new value if it changed.
    pub fn waiting(&mut self, waited: Duration, total: Duration) -> Option<u8> {
        let target = if total.is_zero() {
            WAIT_CEILING
        } else {
            let waited = waited.as_nanos().min(total.as_nanos());
            (waited * u128::from(WAIT_CEILING) / total.as_nanos()) as u8
        };
        self.raise_to(target)
    }

    /// Creep halfway toward [`CREEP_CEILING`], by at least one point.
    ///
    /// Returns the new value if it changed.
    ///
    /// ```rust
    /// use samenactief_recovery::retry::Progress;
    ///
    /// let mut progress = Progress::new();
    /// assert_eq!(progress.creep(), Some(49));
    /// assert_eq!(progress.creep(), Some(74));
    /// ```
    pub fn creep(&mut self) -> Option<u8> {
        let gap = CREEP_CEILING.saturating_sub(self.percent);
        self.raise_to(self.percent + (gap / 2).max(1).min(gap))
    }

    /// Snap to 100.
    pub fn complete(&mut self) -> Option<u8> {
        self.raise_to(100)
    }

    fn raise_to(&mut self, target: u8) -> Option<u8> {
        if target > self.percent {
            self.percent = target.min(100);
            Some(self.percent)
        } else {
            None
        }
    }
}
