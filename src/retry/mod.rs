//! Bounded, delayed, cancellable retries.
//!
//! - **Config is data**: [`RetryConfig`] describes attempts, delays and
//!   backoff, and is validated before a run starts.
//! - **The scheduler is the shell**: [`RetryScheduler`] spawns one task per
//!   run, waits, invokes the operation, and reports [`SchedulerEvent`]s.
//! - **Time is injected**: delays go through a [`Clock`](crate::clock::Clock).
//!
//! # Quick Start
//!
//! ```rust
//! use samenactief_recovery::retry::{RetryConfig, RetryScheduler, RunId, SchedulerEvent};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let scheduler = RetryScheduler::new();
//! let handle = scheduler
//!     .start(
//!         || async { Err::<(), _>("503 Service Unavailable") },
//!         RetryConfig::new(3, Duration::from_secs(1)),
//!         |_: RunId, event: SchedulerEvent| {
//!             println!("{:?}", event);
//!             true
//!         },
//!     )
//!     .unwrap();
//!
//! // Changed our mind: nothing is reported after this.
//! assert!(scheduler.stop(&handle));
//! assert!(!scheduler.is_running());
//! # });
//! ```
//!
//! # Backoff
//!
//! - **Constant** (default): the same delay before every attempt
//! - **Linear**: 100ms, 200ms, 300ms, ...
//! - **Exponential**: 100ms, 200ms, 400ms, ...
//! - **Fibonacci**: 100ms, 100ms, 200ms, 300ms, 500ms, ...
//!
//! Jitter is available behind the `jitter` feature.

mod config;
mod error;
mod progress;
mod scheduler;

pub use config::{Backoff, ConflictPolicy, JitterStrategy, RetryConfig, DEFAULT_PROGRESS_INTERVAL};
pub use error::{ConfigError, SchedulerError};
pub use progress::{Progress, CREEP_CEILING, WAIT_CEILING};
pub use scheduler::{EventSink, RetryScheduler, RunHandle, RunId, SchedulerEvent};
