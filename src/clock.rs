//! Injectable time source for the retry scheduler.
//!
//! The scheduler never calls `tokio::time` directly; it asks a [`Clock`]
//! for the current instant and for sleep futures. Production code uses
//! [`TokioClock`]. Tests either run `TokioClock` under Tokio's paused clock
//! or drive a [`ManualClock`](crate::testing::ManualClock) by hand.

use futures::future::BoxFuture;
use std::time::{Duration, Instant};

/// A source of time and timers.
///
/// Sleep futures must be `'static` so they can live inside a spawned run.
pub trait Clock: Send + Sync + 'static {
    /// The current instant.
    fn now(&self) -> Instant;

    /// A future that completes after `duration`.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        (**self).sleep(duration)
    }
}

/// Clock backed by `tokio::time`.
///
/// Honors `tokio::time::pause`, so tests built with
/// `#[tokio::test(start_paused = true)]` see virtual time.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_sleeps_in_virtual_time() {
        let clock = TokioClock;
        let start = clock.now();
        clock.sleep(Duration::from_secs(60)).await;
        assert!(clock.now() - start >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_arc_clock_delegates() {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock);
        let start = clock.now();
        clock.sleep(Duration::from_millis(250)).await;
        assert_eq!(clock.now() - start, Duration::from_millis(250));
    }
}
