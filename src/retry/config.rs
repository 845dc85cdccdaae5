//! Retry configuration.

use std::time::Duration;

use super::error::ConfigError;

/// Progress tick used when none is configured.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(50);

/// Configuration for one recovery run.
///
/// A config is pure data: it describes how many attempts to make and how
/// long to wait before each one. It is validated when a run starts, so
/// building an invalid config is allowed but starting one is not.
///
/// # Examples
///
/// ```rust
/// use samenactief_recovery::retry::{Backoff, RetryConfig};
/// use std::time::Duration;
///
/// let config = RetryConfig::new(3, Duration::from_millis(100));
///
/// // Every attempt, including the first, waits 100ms.
/// assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
/// assert_eq!(config.delay_for_attempt(3), Duration::from_millis(100));
///
/// let config = config.with_backoff(Backoff::Exponential);
/// assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "RawRetryConfig"))]
pub struct RetryConfig {
    max_attempts: u32,
    delay: Duration,
    backoff: Backoff,
    max_delay: Option<Duration>,
    jitter: JitterStrategy,
    progress_interval: Option<Duration>,
    on_conflict: ConflictPolicy,
}

/// How the delay grows from one attempt to the next.
///
/// The configured delay is the base; `n` below is the 1-indexed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Backoff {
    /// Same delay before every attempt.
    #[default]
    Constant,
    /// base * n
    Linear,
    /// base * 2^(n-1)
    Exponential,
    /// base * fib(n)
    Fibonacci,
}

/// Strategy for adding randomness to delays.
///
/// Without the `jitter` feature every strategy behaves like `None`.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum JitterStrategy {
    /// No jitter applied.
    #[default]
    None,
    /// Add ±factor randomness to the delay. The factor must lie in [0, 1].
    Proportional(f64),
    /// Random delay between 0 and the calculated delay.
    Full,
    /// Random delay between the calculated delay and 3x the previous one.
    Decorrelated,
}

/// What happens when a run is started while another is still active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ConflictPolicy {
    /// Refuse the new run; the active one continues.
    #[default]
    Reject,
    /// Cancel the active run and start the new one.
    Replace,
}

impl RetryConfig {
    /// Create a config with a constant delay before each attempt.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            backoff: Backoff::Constant,
            max_delay: None,
            jitter: JitterStrategy::None,
            progress_interval: Some(DEFAULT_PROGRESS_INTERVAL),
            on_conflict: ConflictPolicy::Reject,
        }
    }

    /// Create a config from raw integers, as they arrive from a form or a
    /// JSON payload.
    ///
    /// ```rust
    /// use samenactief_recovery::retry::{ConfigError, RetryConfig};
    ///
    /// assert!(RetryConfig::try_from_millis(3, 100).is_ok());
    /// assert_eq!(
    ///     RetryConfig::try_from_millis(3, -1),
    ///     Err(ConfigError::NegativeDelay(-1))
    /// );
    /// assert_eq!(
    ///     RetryConfig::try_from_millis(0, 100),
    ///     Err(ConfigError::InvalidMaxAttempts(0))
    /// );
    /// ```
    pub fn try_from_millis(max_attempts: i64, delay_ms: i64) -> Result<Self, ConfigError> {
        let max_attempts = u32::try_from(max_attempts)
            .ok()
            .filter(|n| *n >= 1)
            .ok_or(ConfigError::InvalidMaxAttempts(max_attempts))?;
        let delay_ms = u64::try_from(delay_ms).map_err(|_| ConfigError::NegativeDelay(delay_ms))?;
        Ok(Self::new(max_attempts, Duration::from_millis(delay_ms)))
    }

    /// Set the backoff strategy.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Cap every delay at `max_delay`.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Add ±`factor` proportional jitter.
    ///
    /// Unlike a clamp, an out-of-range factor is kept and reported by
    /// [`validate`](Self::validate).
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter = JitterStrategy::Proportional(factor);
        self
    }

    /// Set the jitter strategy.
    pub fn with_jitter_strategy(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Emit synthetic progress every `interval` while waiting.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = Some(interval);
        self
    }

    /// Disable synthetic progress. Only the final snap to 100 is reported.
    pub fn without_progress(mut self) -> Self {
        self.progress_interval = None;
        self
    }

    /// Set the policy for starting a run while another is active.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.on_conflict = policy;
        self
    }

    /// Maximum number of attempts, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Base delay.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Backoff strategy.
    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Delay cap.
    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay
    }

    /// Jitter strategy.
    pub fn jitter(&self) -> &JitterStrategy {
        &self.jitter
    }

    /// Progress tick, if progress is enabled.
    pub fn progress_interval(&self) -> Option<Duration> {
        self.progress_interval
    }

    /// Conflict policy.
    pub fn conflict_policy(&self) -> ConflictPolicy {
        self.on_conflict
    }

    /// The delay before `attempt` (1-indexed), without jitter.
    ///
    /// ```rust
    /// use samenactief_recovery::retry::{Backoff, RetryConfig};
    /// use std::time::Duration;
    ///
    /// let config = RetryConfig::new(6, Duration::from_millis(100))
    ///     .with_backoff(Backoff::Fibonacci)
    ///     .with_max_delay(Duration::from_millis(400));
    ///
    /// // fib: 1, 1, 2, 3, 5 -> capped at 400ms
    /// assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
    /// assert_eq!(config.delay_for_attempt(2), Duration::from_millis(100));
    /// assert_eq!(config.delay_for_attempt(3), Duration::from_millis(200));
    /// assert_eq!(config.delay_for_attempt(4), Duration::from_millis(300));
    /// assert_eq!(config.delay_for_attempt(5), Duration::from_millis(400));
    /// ```
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let index = attempt.saturating_sub(1);
        let base = match self.backoff {
            Backoff::Constant => self.delay,
            Backoff::Linear => self.delay.saturating_mul(index.saturating_add(1)),
            Backoff::Exponential => self.delay.saturating_mul(2u32.saturating_pow(index)),
            Backoff::Fibonacci => self.delay.saturating_mul(fibonacci(index.saturating_add(1))),
        };

        match self.max_delay {
            Some(max) => base.min(max),
            None => base,
        }
    }

    /// The delay before `attempt` with jitter applied.
    ///
    /// `max_delay` caps the jittered value too, so jitter never stretches a
    /// wait past it.
    pub(crate) fn delay_with_jitter(&self, attempt: u32, prev_delay: Option<Duration>) -> Duration {
        let delay = self
            .jitter
            .randomize(self.delay_for_attempt(attempt), prev_delay);
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }

    /// Check the config.
    ///
    /// ```rust
    /// use samenactief_recovery::retry::{ConfigError, RetryConfig};
    /// use std::time::Duration;
    ///
    /// assert!(RetryConfig::new(1, Duration::ZERO).validate().is_ok());
    /// assert_eq!(
    ///     RetryConfig::new(0, Duration::ZERO).validate(),
    ///     Err(ConfigError::InvalidMaxAttempts(0))
    /// );
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(0));
        }
        if self.progress_interval == Some(Duration::ZERO) {
            return Err(ConfigError::ZeroProgressInterval);
        }
        if let JitterStrategy::Proportional(factor) = self.jitter {
            if !(0.0..=1.0).contains(&factor) {
                return Err(ConfigError::InvalidJitter(factor));
            }
        }
        if let Some(max_delay) = self.max_delay {
            if max_delay < self.delay {
                return Err(ConfigError::MaxDelayBelowDelay {
                    delay: self.delay,
                    max_delay,
                });
            }
        }
        Ok(())
    }
}

impl Default for RetryConfig {
    /// Three attempts, one second apart.
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

impl JitterStrategy {
    /// Draw a delay from this strategy's range around `base`.
    ///
    /// Without the `jitter` feature every strategy returns `base`.
    pub fn randomize(&self, base: Duration, prev_delay: Option<Duration>) -> Duration {
        match self.bounds(base, prev_delay) {
            Some((low, high)) => draw(low, high).unwrap_or(base),
            None => base,
        }
    }

    /// The inclusive range a delay is drawn from, or `None` for no jitter.
    fn bounds(&self, base: Duration, prev_delay: Option<Duration>) -> Option<(Duration, Duration)> {
        match *self {
            JitterStrategy::None => None,
            JitterStrategy::Proportional(factor) => {
                let factor = if factor.is_nan() { 0.0 } else { factor.clamp(0.0, 1.0) };
                let spread = base.mul_f64(factor);
                Some((base.saturating_sub(spread), base.saturating_add(spread)))
            }
            JitterStrategy::Full => Some((Duration::ZERO, base)),
            JitterStrategy::Decorrelated => {
                let ceiling = prev_delay.unwrap_or(base).saturating_mul(3);
                Some((base, ceiling.max(base)))
            }
        }
    }
}

#[cfg(feature = "jitter")]
fn draw(low: Duration, high: Duration) -> Option<Duration> {
    use rand::Rng;
    if low >= high {
        return Some(low);
    }
    Some(rand::rng().random_range(low..=high))
}

#[cfg(not(feature = "jitter"))]
fn draw(_low: Duration, _high: Duration) -> Option<Duration> {
    None
}

/// `fib(n)` with `fib(0) = 0` and `fib(1) = 1`, saturating at `u32::MAX`.
fn fibonacci(n: u32) -> u32 {
    std::iter::successors(Some((0u32, 1u32)), |&(a, b)| Some((b, a.saturating_add(b))))
        .nth(n as usize)
        .map_or(u32::MAX, |(a, _)| a)
}

/// Wire shape of a [`RetryConfig`].
///
/// Integers are signed so that negative input is reported as a
/// [`ConfigError`] instead of a generic type mismatch.
#[cfg(feature = "serde")]
#[derive(Debug, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRetryConfig {
    max_attempts: i64,
    delay_ms: i64,
    #[serde(default)]
    backoff: Backoff,
    #[serde(default)]
    max_delay_ms: Option<i64>,
    #[serde(default)]
    jitter: JitterStrategy,
    #[serde(default)]
    progress_interval_ms: Option<u64>,
    #[serde(default)]
    on_conflict: ConflictPolicy,
}

#[cfg(feature = "serde")]
impl TryFrom<RawRetryConfig> for RetryConfig {
    type Error = ConfigError;

    fn try_from(raw: RawRetryConfig) -> Result<Self, Self::Error> {
        let mut config = RetryConfig::try_from_millis(raw.max_attempts, raw.delay_ms)?
            .with_backoff(raw.backoff)
            .with_jitter_strategy(raw.jitter)
            .with_conflict_policy(raw.on_conflict);
        if let Some(ms) = raw.max_delay_ms {
            let ms = u64::try_from(ms).map_err(|_| ConfigError::NegativeDelay(ms))?;
            config = config.with_max_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = raw.progress_interval_ms {
            config = config.with_progress_interval(Duration::from_millis(ms));
        }
        config.validate()?;
        Ok(config)
    }
}
