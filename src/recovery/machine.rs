//! The recovery state machine.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::state::{RecoveryState, RetryAttempt};
use super::subscription::{Registry, Subscription};
use crate::classify::{classify_with, Catalog, EnglishCatalog, ErrorCategory};
use crate::clock::{Clock, TokioClock};
use crate::lock;
use crate::retry::{
    ConflictPolicy, EventSink, RetryConfig, RetryScheduler, RunHandle, RunId, SchedulerError,
    SchedulerEvent,
};

type SharedCatalog = Arc<dyn Catalog + Send + Sync>;

/// Drives one recovery run at a time and tells subscribers about it.
///
/// ```text
/// Idle ──begin──▶ Retrying(1) ──err──▶ Retrying(2) ──err──▶ … ──err──▶ Failed(n)
///                     │                    │
///                     └────────ok──────────┴──────────▶ Succeeded
///
/// Succeeded | Failed ──reset──▶ Idle        any ──cancel──▶ Idle
/// ```
///
/// Transitions are announced to [`on_change`](Self::on_change) subscribers
/// synchronously, once each, in order. Progress within an attempt is not a
/// transition; it is announced to [`on_progress`](Self::on_progress)
/// subscribers and visible through [`current_state`](Self::current_state).
///
/// # Examples
///
/// ```rust
/// use samenactief_recovery::recovery::{RecoveryState, RecoveryStateMachine};
/// use samenactief_recovery::retry::RetryConfig;
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let machine = RecoveryStateMachine::new();
/// let _ = machine.on_change(|state| println!("recovery: {}", state));
///
/// machine
///     .begin(
///         &"Network Error",
///         || async { Ok::<(), String>(()) },
///         RetryConfig::new(3, Duration::from_millis(10)),
///     )
///     .unwrap();
///
/// assert_eq!(machine.settled().await, RecoveryState::Succeeded);
/// # });
/// ```
pub struct RecoveryStateMachine<C: Clock = TokioClock> {
    shared: Arc<Shared>,
    scheduler: RetryScheduler<C>,
    catalog: SharedCatalog,
}

struct Shared {
    inner: Mutex<Inner>,
    changes: Arc<Registry<RecoveryState>>,
    progress: Arc<Registry<RetryAttempt>>,
    watch: watch::Sender<RecoveryState>,
}

struct Inner {
    state: RecoveryState,
    run: Option<RunHandle>,
    category: Option<ErrorCategory>,
    last_attempt: Option<RetryAttempt>,
    pending: VecDeque<Notification>,
    delivering: bool,
}

enum Notification {
    Change(RecoveryState),
    Progress(RetryAttempt),
}

impl RecoveryStateMachine<TokioClock> {
    /// A machine on the Tokio clock with the English catalog.
    pub fn new() -> Self {
        Self::with_clock(TokioClock)
    }
}

impl Default for RecoveryStateMachine<TokioClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> RecoveryStateMachine<C> {
    /// A machine whose delays run on `clock`.
    pub fn with_clock(clock: C) -> Self {
        let (watch, _) = watch::channel(RecoveryState::Idle);
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: RecoveryState::Idle,
                    run: None,
                    category: None,
                    last_attempt: None,
                    pending: VecDeque::new(),
                    delivering: false,
                }),
                changes: Registry::new(),
                progress: Registry::new(),
                watch,
            }),
            scheduler: RetryScheduler::with_clock(clock),
            catalog: Arc::new(EnglishCatalog),
        }
    }

    /// Classify errors with `catalog` instead of the English one.
    pub fn with_catalog<K: Catalog + Send + Sync + 'static>(mut self, catalog: K) -> Self {
        self.catalog = Arc::new(catalog);
        self
    }

    /// Spawn runs onto `runtime` instead of the ambient one.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.scheduler.set_runtime(runtime);
        self
    }

    /// Start recovering from `error` by retrying `operation`.
    ///
    /// The machine moves to `Retrying(1)` before this returns. If a run is
    /// already active, the config's [`ConflictPolicy`] decides: `Reject`
    /// returns [`SchedulerError::AlreadyRunning`] and leaves the active run
    /// alone, `Replace` cancels it (announcing `Idle`) first. Starting from
    /// a terminal state resets to `Idle` first.
    ///
    /// An invalid config or a missing runtime moves the machine straight to
    /// `Failed` with `attempt_number = 0` and is returned as an error.
    /// Operation failures are never returned; they drive the state.
    pub fn begin<D, F, Fut, E>(
        &self,
        error: &D,
        operation: F,
        config: RetryConfig,
    ) -> Result<(), SchedulerError>
    where
        D: fmt::Display + ?Sized,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let category = classify_with(error, &*self.catalog);
        let result = {
            let mut inner = self.shared.lock();

            if inner.state.is_retrying() {
                match config.conflict_policy() {
                    ConflictPolicy::Reject => {
                        warn!(kind = %category.kind, "recovery already running, rejecting begin");
                        return Err(SchedulerError::AlreadyRunning);
                    }
                    ConflictPolicy::Replace => {
                        debug!("replacing active recovery run");
                        self.abandon(&mut inner);
                    }
                }
            } else if inner.state.is_terminal() {
                self.abandon(&mut inner);
            }

            debug!(kind = %category.kind, max_attempts = config.max_attempts(), "beginning recovery");
            inner.category = Some(category);

            let sink = MachineSink {
                shared: Arc::downgrade(&self.shared),
                catalog: self.catalog.clone(),
            };
            // Conflicts were settled above; a run the machine let go of may
            // still be unwinding inside the scheduler.
            let scheduled = config.clone().with_conflict_policy(ConflictPolicy::Replace);
            match self.scheduler.start(operation, scheduled, sink) {
                Ok(handle) => {
                    inner.run = Some(handle);
                    let first = RetryAttempt::first(&config);
                    inner.last_attempt = Some(first.clone());
                    self.shared.transition(&mut inner, RecoveryState::Retrying(first));
                    Ok(())
                }
                Err(e) => {
                    warn!(error = %e, "recovery could not start");
                    let attempt = RetryAttempt::unstarted(&config);
                    inner.last_attempt = Some(attempt.clone());
                    self.shared.transition(&mut inner, RecoveryState::Failed(attempt));
                    Err(e)
                }
            }
        };

        self.shared.deliver_pending();
        result
    }

    /// Return to `Idle`, abandoning any active run.
    ///
    /// Once this returns, nothing the abandoned run does can change the
    /// state. Safe to call from inside a subscriber callback. A no-op when
    /// already idle.
    pub fn reset(&self) {
        {
            let mut inner = self.shared.lock();
            self.abandon(&mut inner);
        }
        self.shared.deliver_pending();
    }

    /// Abandon the active run. Same as [`reset`](Self::reset).
    pub fn cancel(&self) {
        self.reset();
    }

    /// The current state.
    pub fn current_state(&self) -> RecoveryState {
        self.shared.lock().state.clone()
    }

    /// Classification of the error that started the run, refreshed with
    /// every failed attempt.
    pub fn category(&self) -> Option<ErrorCategory> {
        self.shared.lock().category.clone()
    }

    /// The most recent attempt, kept after the run ends.
    ///
    /// After `Succeeded` this tells which attempt succeeded.
    pub fn last_attempt(&self) -> Option<RetryAttempt> {
        self.shared.lock().last_attempt.clone()
    }

    /// Returns true while in `Retrying`.
    pub fn is_running(&self) -> bool {
        self.shared.lock().state.is_retrying()
    }

    /// Call `callback` after every state transition.
    pub fn on_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&RecoveryState) + Send + Sync + 'static,
    {
        self.shared.changes.subscribe(callback)
    }

    /// Call `callback` whenever the current attempt's progress moves.
    pub fn on_progress<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&RetryAttempt) + Send + Sync + 'static,
    {
        self.shared.progress.subscribe(callback)
    }

    /// Wait until the machine is not `Retrying`, and return that state.
    ///
    /// Returns immediately when idle or terminal.
    pub async fn settled(&self) -> RecoveryState {
        let mut rx = self.shared.watch.subscribe();
        loop {
            let state = rx.borrow_and_update().clone();
            if !state.is_retrying() {
                return state;
            }
            if rx.changed().await.is_err() {
                return self.current_state();
            }
        }
    }

    /// Stop the active run, if any, and move to `Idle`.
    fn abandon(&self, inner: &mut Inner) {
        // No waiting here: a delivery may be blocked on this lock. `apply`
        // drops whatever the released run still sends.
        if let Some(run) = inner.run.take() {
            self.scheduler.release(&run);
        }
        inner.category = None;
        if !inner.state.is_idle() {
            debug!(from = inner.state.name(), "recovery reset");
            self.shared.transition(inner, RecoveryState::Idle);
        }
    }
}

impl<C: Clock> Drop for RecoveryStateMachine<C> {
    fn drop(&mut self) {
        let mut inner = self.shared.lock();
        if let Some(run) = inner.run.take() {
            self.scheduler.release(&run);
        }
    }
}

impl<C: Clock> fmt::Debug for RecoveryStateMachine<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryStateMachine")
            .field("state", &self.current_state())
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        lock(&self.inner)
    }

    /// Change state and queue the notification. Caller holds the lock.
    fn transition(&self, inner: &mut Inner, next: RecoveryState) {
        inner.state = next.clone();
        self.watch.send_replace(next.clone());
        inner.pending.push_back(Notification::Change(next));
    }

    /// Apply one scheduler event of run `run`.
    ///
    /// Returns false if the run is no longer the machine's current run.
    fn apply(&self, run: RunId, event: SchedulerEvent, catalog: &dyn Catalog) -> bool {
        let mut inner = self.lock();
        if inner.run.as_ref().map(RunHandle::id) != Some(run) {
            return false;
        }

        let current = match &inner.state {
            RecoveryState::Retrying(attempt) => attempt.clone(),
            _ => return false,
        };

        match event {
            SchedulerEvent::AttemptStarted {
                attempt,
                max_attempts,
                delay,
            } => {
                let next = RetryAttempt {
                    attempt_number: attempt,
                    max_attempts,
                    delay,
                    progress_percent: 0,
                };
                inner.last_attempt = Some(next.clone());
                if attempt == current.attempt_number {
                    // The first attempt was announced by `begin`.
                    inner.state = RecoveryState::Retrying(next);
                } else {
                    self.transition(&mut inner, RecoveryState::Retrying(next));
                }
            }
            SchedulerEvent::Progress { attempt, percent } => {
                if attempt == current.attempt_number && percent > current.progress_percent {
                    let updated = RetryAttempt {
                        progress_percent: percent,
                        ..current
                    };
                    inner.last_attempt = Some(updated.clone());
                    inner.state = RecoveryState::Retrying(updated.clone());
                    self.watch.send_replace(inner.state.clone());
                    inner.pending.push_back(Notification::Progress(updated));
                }
            }
            SchedulerEvent::AttemptFailed { message, .. } => {
                inner.category = Some(classify_with(message.as_str(), catalog));
            }
            SchedulerEvent::Succeeded { .. } => {
                self.transition(&mut inner, RecoveryState::Succeeded);
            }
            SchedulerEvent::Exhausted { attempt, .. } => {
                let failed = RetryAttempt {
                    attempt_number: attempt,
                    ..current
                };
                inner.last_attempt = Some(failed.clone());
                self.transition(&mut inner, RecoveryState::Failed(failed));
            }
        }
        true
    }

    /// Deliver queued notifications, one at a time, outside the state lock.
    ///
    /// Whoever finds nobody delivering becomes the deliverer and drains the
    /// queue, including anything queued by callbacks meanwhile. Everyone
    /// else returns at once; their notifications are delivered in order by
    /// the active deliverer.
    fn deliver_pending(&self) {
        {
            let mut inner = self.lock();
            if inner.delivering {
                return;
            }
            inner.delivering = true;
        }

        let mut guard = DeliveryGuard {
            shared: self,
            armed: true,
        };
        loop {
            let next = {
                let mut inner = self.lock();
                match inner.pending.pop_front() {
                    Some(next) => next,
                    None => {
                        inner.delivering = false;
                        guard.armed = false;
                        return;
                    }
                }
            };
            match next {
                Notification::Change(state) => self.changes.notify(&state),
                Notification::Progress(attempt) => self.progress.notify(&attempt),
            }
        }
    }
}

/// Releases the deliverer role if a callback panics.
struct DeliveryGuard<'a> {
    shared: &'a Shared,
    armed: bool,
}

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.lock().delivering = false;
        }
    }
}

/// Routes scheduler events into the machine.
struct MachineSink {
    shared: Weak<Shared>,
    catalog: SharedCatalog,
}

impl EventSink for MachineSink {
    fn deliver(&self, run: RunId, event: SchedulerEvent) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        let applied = shared.apply(run, event, &*self.catalog);
        shared.deliver_pending();
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StateRecorder;
    use std::time::Duration;

    fn never_called() -> futures::future::Ready<Result<(), String>> {
        panic!("operation must not run")
    }

    fn sink_for(machine: &RecoveryStateMachine) -> MachineSink {
        MachineSink {
            shared: Arc::downgrade(&machine.shared),
            catalog: machine.catalog.clone(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_events_are_discarded() {
        let machine = RecoveryStateMachine::new();
        machine
            .begin(&"500", never_called, RetryConfig::new(3, Duration::from_secs(10)))
            .unwrap();
        let run = machine.shared.lock().run.as_ref().map(RunHandle::id).unwrap();

        machine.reset();

        let sink = sink_for(&machine);
        let applied = sink.deliver(
            run,
            SchedulerEvent::Succeeded {
                attempt: 1,
                elapsed: Duration::ZERO,
            },
        );

        assert!(!applied);
        assert_eq!(machine.current_state(), RecoveryState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_for_another_run_are_discarded() {
        let machine = RecoveryStateMachine::new();
        machine
            .begin(&"500", never_called, RetryConfig::new(3, Duration::from_secs(10)))
            .unwrap();
        let run = machine.shared.lock().run.as_ref().map(RunHandle::id).unwrap();

        let sink = sink_for(&machine);
        assert!(!sink.deliver(
            run + 1,
            SchedulerEvent::Exhausted {
                attempt: 3,
                elapsed: Duration::ZERO,
            },
        ));
        assert!(machine.current_state().is_retrying());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_outliving_machine() {
        let machine = RecoveryStateMachine::new();
        let sink = sink_for(&machine);
        drop(machine);

        assert!(!sink.deliver(
            1,
            SchedulerEvent::Progress {
                attempt: 1,
                percent: 10,
            },
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_is_not_a_transition() {
        let machine = RecoveryStateMachine::new();
        let recorder = StateRecorder::new();
        let _ = recorder.attach(&machine);

        machine
            .begin(&"500", never_called, RetryConfig::new(3, Duration::from_secs(10)))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5_025)).await;

        assert_eq!(recorder.names(), vec!["retrying"]);
        match machine.current_state() {
            RecoveryState::Retrying(attempt) => assert_eq!(attempt.progress_percent, 45),
            other => panic!("Expected Retrying, got {:?}", other),
        }
        machine.reset();
    }

    #[tokio::test(start_paused = true)]
    async fn test_catalog_is_used_for_category() {
        let machine = RecoveryStateMachine::new().with_catalog(crate::classify::DutchCatalog);
        machine
            .begin(&"403", never_called, RetryConfig::new(1, Duration::from_secs(10)))
            .unwrap();

        assert_eq!(machine.category().unwrap().title, "Geen toegang");
        machine.reset();
        assert_eq!(machine.category(), None);
    }
}
