//! Driving a bounded sequence of delayed, cancellable attempts.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, debug_span, trace, warn, Instrument};

use super::config::{ConflictPolicy, RetryConfig};
use super::error::SchedulerError;
use super::progress::Progress;
use crate::clock::{Clock, TokioClock};
use crate::lock;

/// Identifies one run. Ids are never reused by a scheduler; `0` means "no run".
pub type RunId = u64;

/// Something that happened during a run.
///
/// Events of one run arrive in order, from a single task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// An attempt began; its delay is now being waited out.
    AttemptStarted {
        /// 1-indexed attempt number.
        attempt: u32,
        /// Attempts allowed in this run.
        max_attempts: u32,
        /// Delay before the operation is invoked.
        delay: Duration,
    },
    /// Synthetic progress for the current attempt.
    Progress {
        /// 1-indexed attempt number.
        attempt: u32,
        /// Progress in [0, 100].
        percent: u8,
    },
    /// The operation failed.
    AttemptFailed {
        /// 1-indexed attempt number.
        attempt: u32,
        /// The operation's error, rendered with `Display`.
        message: String,
    },
    /// The operation succeeded. Terminal.
    Succeeded {
        /// The attempt that succeeded.
        attempt: u32,
        /// Time since the run started.
        elapsed: Duration,
    },
    /// Every attempt failed. Terminal.
    Exhausted {
        /// The number of attempts made.
        attempt: u32,
        /// Time since the run started.
        elapsed: Duration,
    },
}

impl SchedulerEvent {
    /// The attempt this event belongs to.
    pub fn attempt(&self) -> u32 {
        match self {
            Self::AttemptStarted { attempt, .. }
            | Self::Progress { attempt, .. }
            | Self::AttemptFailed { attempt, .. }
            | Self::Succeeded { attempt, .. }
            | Self::Exhausted { attempt, .. } => *attempt,
        }
    }

    /// Returns true for `Succeeded` and `Exhausted`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::Exhausted { .. })
    }
}

/// Receiver of scheduler events.
///
/// `deliver` runs on the run's task and must not block. Returning `false`
/// marks the run as stale and ends it. A sink may stop its own run.
pub trait EventSink: Send + Sync + 'static {
    /// Handle one event of run `run`.
    fn deliver(&self, run: RunId, event: SchedulerEvent) -> bool;
}

impl<F> EventSink for F
where
    F: Fn(RunId, SchedulerEvent) -> bool + Send + Sync + 'static,
{
    fn deliver(&self, run: RunId, event: SchedulerEvent) -> bool {
        self(run, event)
    }
}

/// Handle to a started run, used to stop it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHandle {
    id: RunId,
}

impl RunHandle {
    /// The run's id, as passed to the event sink.
    pub fn id(&self) -> RunId {
        self.id
    }
}

/// Drives one retry run at a time.
///
/// Each run is a spawned Tokio task that waits, invokes the operation, and
/// reports [`SchedulerEvent`]s to a sink. A generation id, checked under the
/// same lock that admits a delivery, makes sure that nothing is reported
/// for a run once [`stop`](Self::stop) has returned.
///
/// # Examples
///
/// ```rust
/// use samenactief_recovery::retry::{RetryConfig, RetryScheduler, RunId, SchedulerEvent};
/// use std::sync::{Arc, Mutex};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let events = Arc::new(Mutex::new(Vec::new()));
/// let sink = {
///     let events = events.clone();
///     move |_: RunId, event: SchedulerEvent| {
///         events.lock().unwrap().push(event);
///         true
///     }
/// };
///
/// let scheduler = RetryScheduler::new();
/// scheduler
///     .start(
///         || async { Ok::<_, String>(()) },
///         RetryConfig::new(3, Duration::from_millis(1)).without_progress(),
///         sink,
///     )
///     .unwrap();
///
/// while scheduler.is_running() {
///     tokio::time::sleep(Duration::from_millis(1)).await;
/// }
/// assert!(events.lock().unwrap().last().unwrap().is_terminal());
/// # });
/// ```
pub struct RetryScheduler<C = TokioClock> {
    clock: Arc<C>,
    runtime: Option<Handle>,
    gate: Arc<Gate>,
    next_id: AtomicU64,
    task: Mutex<Option<(RunId, JoinHandle<()>)>>,
}

impl RetryScheduler<TokioClock> {
    /// A scheduler on the Tokio clock, spawning onto the current runtime.
    pub fn new() -> Self {
        Self::with_clock(TokioClock)
    }
}

impl Default for RetryScheduler<TokioClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> RetryScheduler<C> {
    /// A scheduler driven by `clock`.
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock: Arc::new(clock),
            runtime: None,
            gate: Arc::new(Gate::default()),
            next_id: AtomicU64::new(0),
            task: Mutex::new(None),
        }
    }

    /// Spawn runs onto `runtime` instead of the ambient one.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.set_runtime(runtime);
        self
    }

    pub(crate) fn set_runtime(&mut self, runtime: Handle) {
        self.runtime = Some(runtime);
    }

    /// The scheduler's clock.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Returns true while a run has not reached a terminal event or been stopped.
    pub fn is_running(&self) -> bool {
        self.gate.live() != 0
    }

    /// Start a run.
    ///
    /// The config is validated first; an invalid config, a missing runtime,
    /// or a conflicting active run (under [`ConflictPolicy::Reject`]) is
    /// reported here and nothing is scheduled. Under
    /// [`ConflictPolicy::Replace`] the active run is stopped first, with the
    /// same guarantee as [`stop`](Self::stop).
    ///
    /// Operation errors never leave the run: they are rendered into
    /// [`SchedulerEvent::AttemptFailed`].
    pub fn start<F, Fut, E, S>(
        &self,
        operation: F,
        config: RetryConfig,
        sink: S,
    ) -> Result<RunHandle, SchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
        S: EventSink,
    {
        if let Err(e) = config.validate() {
            warn!(error = %e, "rejecting retry config");
            return Err(e.into());
        }

        let runtime = match &self.runtime {
            Some(runtime) => runtime.clone(),
            None => Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?,
        };

        let mut task = lock(&self.task);
        let mut replaced = false;
        if self.is_running() {
            match config.conflict_policy() {
                ConflictPolicy::Reject => {
                    debug!(active = self.gate.live(), "rejecting run, another is active");
                    return Err(SchedulerError::AlreadyRunning);
                }
                ConflictPolicy::Replace => {
                    self.gate.close(None);
                    if let Some((previous, join)) = task.take() {
                        join.abort();
                        debug!(run = previous, "replacing active run");
                    }
                    replaced = true;
                }
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.gate.open(id);
        debug!(
            run = id,
            max_attempts = config.max_attempts(),
            delay = ?config.delay(),
            "recovery run started"
        );

        let driver = Driver {
            id,
            clock: self.clock.clone(),
            gate: self.gate.clone(),
            sink,
            config,
        };
        let span = debug_span!("recovery_run", run = id);
        *task = Some((id, runtime.spawn(driver.run(operation).instrument(span))));
        drop(task);

        if replaced {
            self.gate.quiesce();
        }
        Ok(RunHandle { id })
    }

    /// Stop a run.
    ///
    /// Cancels the pending timer and the in-flight operation. Events the run
    /// would have produced afterwards are dropped, including the result of
    /// an operation that resolves concurrently with this call. A delivery
    /// already inside the sink on another thread is waited for, so the sink
    /// hears nothing from the run once this returns. Called from inside the
    /// sink, it does not wait for its own delivery.
    ///
    /// Returns true if the run was still live.
    pub fn stop(&self, handle: &RunHandle) -> bool {
        let was_live = self.release(handle);
        self.gate.quiesce();
        was_live
    }

    /// Stop a run without waiting for a delivery in progress.
    ///
    /// For callers that hold a lock their sink also takes.
    pub(crate) fn release(&self, handle: &RunHandle) -> bool {
        let mut task = lock(&self.task);
        let was_live = self.gate.close(Some(handle.id));

        if matches!(task.as_ref(), Some((id, _)) if *id == handle.id) {
            if let Some((_, join)) = task.take() {
                join.abort();
            }
        }

        if was_live {
            debug!(run = handle.id, "recovery run stopped");
        }
        was_live
    }
}

impl<C> Drop for RetryScheduler<C> {
    fn drop(&mut self) {
        self.gate.close(None);
        let task = self.task.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some((_, join)) = task.take() {
            join.abort();
        }
    }
}

impl<C> fmt::Debug for RetryScheduler<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryScheduler")
            .field("live", &self.gate.live())
            .field("next_id", &self.next_id.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// The live run id, and the threads currently inside the sink.
///
/// A delivery is admitted only while its run is live, and the check and
/// the admission happen under one lock. Closing the gate and then waiting
/// for `delivering` to drain means no delivery of the closed run is left.
#[derive(Default)]
struct Gate {
    state: Mutex<GateState>,
    drained: Condvar,
}

#[derive(Default)]
struct GateState {
    live: RunId,
    delivering: Vec<ThreadId>,
}

impl Gate {
    fn live(&self) -> RunId {
        lock(&self.state).live
    }

    fn open(&self, run: RunId) {
        lock(&self.state).live = run;
    }

    /// Close the gate for `run`, or for whichever run is live with `None`.
    ///
    /// Returns true if it was open.
    fn close(&self, run: Option<RunId>) -> bool {
        let mut state = lock(&self.state);
        let open = state.live != 0 && run.map_or(true, |run| state.live == run);
        if open {
            state.live = 0;
        }
        open
    }

    /// Wait until no other thread is inside the sink.
    fn quiesce(&self) {
        let me = thread::current().id();
        let mut state = lock(&self.state);
        while state.delivering.iter().any(|thread| *thread != me) {
            state = self
                .drained
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Run `deliver` if `run` is live. Returns false otherwise.
    fn admit(&self, run: RunId, deliver: impl FnOnce() -> bool) -> bool {
        let me = thread::current().id();
        {
            let mut state = lock(&self.state);
            if state.live != run {
                return false;
            }
            state.delivering.push(me);
        }
        let _inside = Inside { gate: self, thread: me };
        deliver()
    }
}

/// Marks a thread as inside the sink; leaving wakes `quiesce`.
struct Inside<'a> {
    gate: &'a Gate,
    thread: ThreadId,
}

impl Drop for Inside<'_> {
    fn drop(&mut self) {
        let mut state = lock(&self.gate.state);
        if let Some(at) = state.delivering.iter().position(|t| *t == self.thread) {
            state.delivering.swap_remove(at);
        }
        self.gate.drained.notify_all();
    }
}

/// Closes the gate for a run when its task ends, however it ends.
struct RunEnded<'a> {
    gate: &'a Gate,
    id: RunId,
}

impl Drop for RunEnded<'_> {
    fn drop(&mut self) {
        // A replacement run has a different id and is left alone.
        self.gate.close(Some(self.id));
    }
}

/// The body of one run.
struct Driver<C, S> {
    id: RunId,
    clock: Arc<C>,
    gate: Arc<Gate>,
    sink: S,
    config: RetryConfig,
}

impl<C: Clock, S: EventSink> Driver<C, S> {
    async fn run<F, Fut, E>(self, operation: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let _ended = RunEnded {
            gate: &self.gate,
            id: self.id,
        };
        self.drive(&operation).await;
    }

    async fn drive<F, Fut, E>(&self, operation: &F)
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: fmt::Display,
    {
        let started = self.clock.now();
        let max_attempts = self.config.max_attempts();
        let mut prev_delay = None;

        for attempt in 1..=max_attempts {
            let delay = self.config.delay_with_jitter(attempt, prev_delay);
            prev_delay = Some(delay);

            debug!(run = self.id, attempt, max_attempts, ?delay, "starting attempt");
            if !self.emit(SchedulerEvent::AttemptStarted {
                attempt,
                max_attempts,
                delay,
            }) {
                return;
            }

            let mut progress = Progress::new();
            if !self.wait(attempt, delay, &mut progress).await {
                return;
            }

            let Some(outcome) = self.call(attempt, operation, &mut progress).await else {
                return;
            };

            match outcome {
                Ok(()) => {
                    if let Some(percent) = progress.complete() {
                        if !self.emit(SchedulerEvent::Progress { attempt, percent }) {
                            return;
                        }
                    }
                    let elapsed = self.clock.now().saturating_duration_since(started);
                    debug!(run = self.id, attempt, ?elapsed, "operation succeeded");
                    self.emit(SchedulerEvent::Succeeded { attempt, elapsed });
                    return;
                }
                Err(message) => {
                    warn!(run = self.id, attempt, max_attempts, error = %message, "attempt failed");
                    if !self.emit(SchedulerEvent::AttemptFailed { attempt, message }) {
                        return;
                    }
                }
            }
        }

        let elapsed = self.clock.now().saturating_duration_since(started);
        warn!(run = self.id, attempts = max_attempts, ?elapsed, "retries exhausted");
        self.emit(SchedulerEvent::Exhausted {
            attempt: max_attempts,
            elapsed,
        });
    }

    /// Wait out `delay`, reporting progress on every tick.
    async fn wait(&self, attempt: u32, delay: Duration, progress: &mut Progress) -> bool {
        let Some(tick) = self.config.progress_interval() else {
            if !delay.is_zero() {
                self.clock.sleep(delay).await;
            }
            return true;
        };

        let mut waited = Duration::ZERO;
        while waited < delay {
            let step = tick.min(delay - waited);
            self.clock.sleep(step).await;
            waited += step;
            if let Some(percent) = progress.waiting(waited, delay) {
                trace!(run = self.id, attempt, percent, "waiting");
                if !self.emit(SchedulerEvent::Progress { attempt, percent }) {
                    return false;
                }
            }
        }
        true
    }

    /// Invoke the operation, creeping progress until it resolves.
    ///
    /// The error, or the panic that took the place of a result, comes back
    /// rendered as a message. Returns `None` if the run went stale while the
    /// operation was pending.
    async fn call<F, Fut, E>(
        &self,
        attempt: u32,
        operation: &F,
        progress: &mut Progress,
    ) -> Option<Result<(), String>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: fmt::Display,
    {
        let pending = match panic::catch_unwind(AssertUnwindSafe(operation)) {
            Ok(pending) => AssertUnwindSafe(pending).catch_unwind(),
            Err(payload) => return Some(Err(self.panicked(attempt, payload))),
        };
        tokio::pin!(pending);

        let outcome = match self.config.progress_interval() {
            None => pending.await,
            Some(tick) => loop {
                tokio::select! {
                    biased;
                    outcome = &mut pending => break outcome,
                    _ = self.clock.sleep(tick) => {
                        if let Some(percent) = progress.creep() {
                            trace!(run = self.id, attempt, percent, "operation pending");
                            if !self.emit(SchedulerEvent::Progress { attempt, percent }) {
                                return None;
                            }
                        }
                    }
                }
            },
        };

        Some(match outcome {
            Ok(result) => result.map_err(|error| error.to_string()),
            Err(payload) => Err(self.panicked(attempt, payload)),
        })
    }

    fn panicked(&self, attempt: u32, payload: Box<dyn Any + Send>) -> String {
        let detail = payload
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str));
        warn!(run = self.id, attempt, detail, "operation panicked");
        match detail {
            Some(detail) => format!("operation panicked: {}", detail),
            None => "operation panicked".to_string(),
        }
    }

    fn emit(&self, event: SchedulerEvent) -> bool {
        self.gate
            .admit(self.id, || self.sink.deliver(self.id, event))
    }
}
