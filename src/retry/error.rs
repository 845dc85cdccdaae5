//! Error types for retry runs.

use std::time::Duration;

/// A retry configuration that cannot be started.
///
/// Reported synchronously by [`RetryScheduler::start`](super::RetryScheduler::start),
/// before anything is scheduled.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// `max_attempts` must be at least 1.
    InvalidMaxAttempts(i64),
    /// A delay given in milliseconds was negative.
    NegativeDelay(i64),
    /// The progress tick must be non-zero.
    ZeroProgressInterval,
    /// A proportional jitter factor outside [0, 1].
    InvalidJitter(f64),
    /// The delay cap is smaller than the base delay.
    MaxDelayBelowDelay {
        /// The base delay.
        delay: Duration,
        /// The cap.
        max_delay: Duration,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidMaxAttempts(n) => {
                write!(f, "invalid config: max_attempts must be at least 1, got {}", n)
            }
            Self::NegativeDelay(ms) => {
                write!(f, "invalid config: delay must not be negative, got {}ms", ms)
            }
            Self::ZeroProgressInterval => {
                write!(f, "invalid config: progress interval must be non-zero")
            }
            Self::InvalidJitter(factor) => {
                write!(f, "invalid config: jitter factor {} is outside [0, 1]", factor)
            }
            Self::MaxDelayBelowDelay { delay, max_delay } => write!(
                f,
                "invalid config: max delay {:?} is below the base delay {:?}",
                max_delay, delay
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Error returned when a run cannot be started.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerError {
    /// The configuration failed validation.
    InvalidConfig(ConfigError),
    /// A run is already active and the conflict policy is `Reject`.
    AlreadyRunning,
    /// There is no Tokio runtime to drive the run.
    NoRuntime,
}

impl SchedulerError {
    /// Returns true if this is a configuration error.
    pub fn is_invalid_config(&self) -> bool {
        matches!(self, Self::InvalidConfig(_))
    }

    /// The configuration error, if that is what this is.
    pub fn config_error(&self) -> Option<&ConfigError> {
        match self {
            Self::InvalidConfig(e) => Some(e),
            Self::AlreadyRunning | Self::NoRuntime => None,
        }
    }
}

impl From<ConfigError> for SchedulerError {
    fn from(e: ConfigError) -> Self {
        Self::InvalidConfig(e)
    }
}

impl std::fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidConfig(e) => write!(f, "{}", e),
            Self::AlreadyRunning => write!(f, "a recovery run is already active"),
            Self::NoRuntime => write!(f, "no tokio runtime available to drive the recovery run"),
        }
    }
}

impl std::error::Error for SchedulerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidConfig(e) => Some(e),
            Self::AlreadyRunning | Self::NoRuntime => None,
        }
    }
}

#[cfg(test)]
mod error_tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidMaxAttempts(0);
        assert!(err.to_string().contains("max_attempts must be at least 1"));

        let err = ConfigError::NegativeDelay(-10);
        assert!(err.to_string().contains("-10ms"));
    }

    #[test]
    fn test_scheduler_error_wraps_config_error() {
        let err = SchedulerError::from(ConfigError::ZeroProgressInterval);
        assert!(err.is_invalid_config());
        assert_eq!(err.config_error(), Some(&ConfigError::ZeroProgressInterval));
        assert!(err.source().is_some());
        assert_eq!(
            err.to_string(),
            ConfigError::ZeroProgressInterval.to_string()
        );
    }

    #[test]
    fn test_already_running_has_no_source() {
        let err = SchedulerError::AlreadyRunning;
        assert!(!err.is_invalid_config());
        assert!(err.source().is_none());
        assert!(err.to_string().contains("already active"));
    }
}
