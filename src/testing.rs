//! Test helpers for code built on the recovery subsystem.
//!
//! # Examples
//!
//! ## Stepping time by hand
//!
//! ```rust
//! use samenactief_recovery::clock::Clock;
//! use samenactief_recovery::testing::ManualClock;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let clock = ManualClock::new();
//! let sleep = clock.sleep(Duration::from_secs(5));
//! assert_eq!(clock.pending_sleepers(), 1);
//!
//! clock.advance(Duration::from_secs(5));
//! sleep.await;
//! assert_eq!(clock.elapsed(), Duration::from_secs(5));
//! # });
//! ```
//!
//! ## Recording transitions
//!
//! ```rust
//! use samenactief_recovery::recovery::RecoveryStateMachine;
//! use samenactief_recovery::retry::RetryConfig;
//! use samenactief_recovery::testing::StateRecorder;
//! use samenactief_recovery::assert_state;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let machine = RecoveryStateMachine::new();
//! let recorder = StateRecorder::new();
//! let _ = recorder.attach(&machine);
//!
//! machine
//!     .begin(&"Failed to fetch", || async { Ok::<_, String>(()) }, RetryConfig::new(2, Duration::ZERO))
//!     .unwrap();
//! machine.settled().await;
//!
//! assert_eq!(recorder.names(), vec!["retrying", "succeeded"]);
//! assert_state!(machine.current_state(), Succeeded);
//! # });
//! ```

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::channel::oneshot;
use futures::future::BoxFuture;

use crate::clock::Clock;
use crate::lock;
use crate::recovery::{RecoveryState, RecoveryStateMachine, Subscription};

/// A [`Clock`] that only moves when told to.
///
/// Clones share the same time, so a test can keep one clone and hand the
/// other to a scheduler.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualInner>>,
}

#[derive(Debug)]
struct ManualInner {
    origin: Instant,
    elapsed: Duration,
    sleepers: Vec<(Duration, oneshot::Sender<()>)>,
}

impl ManualClock {
    /// A clock at time zero.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManualInner {
                origin: Instant::now(),
                elapsed: Duration::ZERO,
                sleepers: Vec::new(),
            })),
        }
    }

    /// Move time forward, waking every sleep that is due.
    pub fn advance(&self, by: Duration) {
        let due = {
            let mut inner = lock(&self.inner);
            inner.elapsed = inner.elapsed.saturating_add(by);
            let now = inner.elapsed;
            let (due, waiting) = inner
                .sleepers
                .drain(..)
                .partition::<Vec<_>, _>(|(deadline, _)| *deadline <= now);
            inner.sleepers = waiting;
            due
        };
        for (_, wake) in due {
            let _ = wake.send(());
        }
    }

    /// Time advanced since creation.
    pub fn elapsed(&self) -> Duration {
        lock(&self.inner).elapsed
    }

    /// Sleeps that have not completed yet.
    pub fn pending_sleepers(&self) -> usize {
        lock(&self.inner)
            .sleepers
            .iter()
            .filter(|(_, wake)| !wake.is_canceled())
            .count()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let inner = lock(&self.inner);
        inner.origin + inner.elapsed
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        if duration.is_zero() {
            return Box::pin(futures::future::ready(()));
        }
        let (wake, woken) = oneshot::channel();
        {
            let mut inner = lock(&self.inner);
            let deadline = inner.elapsed.saturating_add(duration);
            inner.sleepers.push((deadline, wake));
        }
        Box::pin(async move {
            let _ = woken.await;
        })
    }
}

/// Records every state a machine transitions through.
#[derive(Debug, Clone, Default)]
pub struct StateRecorder {
    states: Arc<Mutex<Vec<RecoveryState>>>,
}

impl StateRecorder {
    /// An empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// A callback that records into this recorder.
    pub fn callback(&self) -> impl Fn(&RecoveryState) + Send + Sync + 'static {
        let states = self.states.clone();
        move |state: &RecoveryState| lock(&states).push(state.clone())
    }

    /// Subscribe to `machine`'s transitions.
    pub fn attach<C: Clock>(&self, machine: &RecoveryStateMachine<C>) -> Subscription {
        machine.on_change(self.callback())
    }

    /// The states seen so far.
    pub fn states(&self) -> Vec<RecoveryState> {
        lock(&self.states).clone()
    }

    /// The names of the states seen so far.
    pub fn names(&self) -> Vec<&'static str> {
        lock(&self.states).iter().map(RecoveryState::name).collect()
    }

    /// The `(attempt_number, max_attempts)` of every `Retrying` seen.
    pub fn retry_attempts(&self) -> Vec<(u32, u32)> {
        lock(&self.states)
            .iter()
            .filter_map(|state| match state {
                RecoveryState::Retrying(a) => Some((a.attempt_number, a.max_attempts)),
                _ => None,
            })
            .collect()
    }

    /// Forget everything recorded.
    pub fn clear(&self) {
        lock(&self.states).clear();
    }
}

/// A machine on a fresh [`ManualClock`], returning both.
pub fn manual_machine() -> (RecoveryStateMachine<ManualClock>, ManualClock) {
    let clock = ManualClock::new();
    (RecoveryStateMachine::with_clock(clock.clone()), clock)
}

/// Assert that a [`RecoveryState`] is a given variant.
///
/// `Retrying` and `Failed` optionally take the expected attempt number.
///
/// # Example
///
/// ```rust
/// use samenactief_recovery::assert_state;
/// use samenactief_recovery::recovery::{RecoveryState, RetryAttempt};
/// use samenactief_recovery::retry::RetryConfig;
///
/// let attempt = RetryAttempt::first(&RetryConfig::default());
/// assert_state!(RecoveryState::Retrying(attempt.clone()), Retrying(1));
/// assert_state!(RecoveryState::Failed(attempt), Failed);
/// assert_state!(RecoveryState::Idle, Idle);
/// ```
#[macro_export]
macro_rules! assert_state {
    ($state:expr, Idle) => {
        match $state {
            $crate::recovery::RecoveryState::Idle => {}
            other => panic!("Expected Idle, got {:?}", other),
        }
    };
    ($state:expr, Succeeded) => {
        match $state {
            $crate::recovery::RecoveryState::Succeeded => {}
            other => panic!("Expected Succeeded, got {:?}", other),
        }
    };
    ($state:expr, Retrying) => {
        match $state {
            $crate::recovery::RecoveryState::Retrying(_) => {}
            other => panic!("Expected Retrying, got {:?}", other),
        }
    };
    ($state:expr, Failed) => {
        match $state {
            $crate::recovery::RecoveryState::Failed(_) => {}
            other => panic!("Expected Failed, got {:?}", other),
        }
    };
    ($state:expr, Retrying($n:expr)) => {
        match $state {
            $crate::recovery::RecoveryState::Retrying(attempt) => {
                assert_eq!(attempt.attempt_number, $n, "Retrying on the wrong attempt");
            }
            other => panic!("Expected Retrying({}), got {:?}", $n, other),
        }
    };
    ($state:expr, Failed($n:expr)) => {
        match $state {
            $crate::recovery::RecoveryState::Failed(attempt) => {
                assert_eq!(attempt.attempt_number, $n, "Failed on the wrong attempt");
            }
            other => panic!("Expected Failed({}), got {:?}", $n, other),
        }
    };
}
