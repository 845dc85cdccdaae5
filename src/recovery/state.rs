//! Observable states of a recovery run.

use std::fmt;
use std::time::Duration;

use crate::retry::RetryConfig;

/// The attempt a run is on.
///
/// Written only by the state machine, from the scheduler's events.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RetryAttempt {
    /// 1-indexed attempt number; 0 when the run never started.
    pub attempt_number: u32,
    /// Attempts allowed in this run.
    pub max_attempts: u32,
    /// Delay that precedes this attempt.
    #[cfg_attr(
        feature = "serde",
        serde(rename = "delay_ms", serialize_with = "serialize_millis")
    )]
    pub delay: Duration,
    /// Synthetic progress in [0, 100].
    pub progress_percent: u8,
}

impl RetryAttempt {
    /// The first attempt of a run with `config`.
    pub fn first(config: &RetryConfig) -> Self {
        Self {
            attempt_number: 1,
            max_attempts: config.max_attempts(),
            delay: config.delay_for_attempt(1),
            progress_percent: 0,
        }
    }

    /// The attempt recorded for a run that could not start.
    pub fn unstarted(config: &RetryConfig) -> Self {
        Self {
            attempt_number: 0,
            max_attempts: config.max_attempts(),
            delay: config.delay(),
            progress_percent: 0,
        }
    }

    /// Returns true if no attempts remain after this one.
    pub fn is_last(&self) -> bool {
        self.attempt_number >= self.max_attempts
    }

    /// Attempts left after this one.
    pub fn remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempt_number)
    }
}

#[cfg(feature = "serde")]
fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Snapshot of a [`RecoveryStateMachine`](super::RecoveryStateMachine).
///
/// Within one run states only move forward:
/// `Idle → Retrying(1) → … → Retrying(n) → Succeeded | Failed(n)`.
/// Only reset and cancellation go back to `Idle`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(
    feature = "serde",
    serde(tag = "state", content = "attempt", rename_all = "snake_case")
)]
pub enum RecoveryState {
    /// Nothing is happening.
    #[default]
    Idle,
    /// An attempt is being waited out or is in flight.
    Retrying(RetryAttempt),
    /// The operation succeeded. Terminal.
    Succeeded,
    /// Every attempt failed, or the run could not start. Terminal.
    Failed(RetryAttempt),
}

impl RecoveryState {
    /// Returns true for `Idle`.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns true for `Retrying`.
    pub fn is_retrying(&self) -> bool {
        matches!(self, Self::Retrying(_))
    }

    /// Returns true for `Succeeded` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(_))
    }

    /// The attempt, for `Retrying` and `Failed`.
    pub fn attempt(&self) -> Option<&RetryAttempt> {
        match self {
            Self::Retrying(attempt) | Self::Failed(attempt) => Some(attempt),
            Self::Idle | Self::Succeeded => None,
        }
    }

    /// A stable snake_case name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Retrying(_) => "retrying",
            Self::Succeeded => "succeeded",
            Self::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for RecoveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retrying(a) | Self::Failed(a) => {
                write!(f, "{}({}/{})", self.name(), a.attempt_number, a.max_attempts)
            }
            Self::Idle | Self::Succeeded => f.write_str(self.name()),
        }
    }
}
