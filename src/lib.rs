//! # SamenActief Recovery
//!
//! Error classification and recovery for the SamenActief community app.
//!
//! When a request fails, the app needs two things: a message the user can
//! act on, and a way to try again that the screen can follow. This crate
//! provides both:
//!
//! - [`classify`] turns a raw error into an [`ErrorCategory`] with a title,
//!   a message and a remedy.
//! - [`retry`] runs a bounded, delayed, cancellable sequence of attempts and
//!   reports synthetic progress while it waits.
//! - [`recovery`] ties the two together in a [`RecoveryStateMachine`] that
//!   screens subscribe to.
//!
//! ## Quick Example
//!
//! ```rust
//! use samenactief_recovery::prelude::*;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let category = classify(&"Request failed: 429 Too Many Requests");
//! assert_eq!(category.kind, ErrorKind::RateLimited);
//! assert_eq!(category.help_reference, None);
//!
//! let machine = RecoveryStateMachine::new();
//! let _ = machine.on_change(|state| println!("now {}", state));
//!
//! machine
//!     .begin(
//!         &"Request failed: 429 Too Many Requests",
//!         || async { Ok::<(), String>(()) },
//!         RetryConfig::new(3, Duration::from_millis(10)),
//!     )
//!     .unwrap();
//!
//! assert_eq!(machine.settled().await, RecoveryState::Succeeded);
//! # });
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod classify;
pub mod clock;
pub mod recovery;
pub mod retry;
pub mod testing;

// Re-exports
pub use classify::{classify, classify_with, Catalog, Classifier, ErrorCategory, ErrorKind};
pub use clock::{Clock, TokioClock};
pub use recovery::{RecoveryState, RecoveryStateMachine, RetryAttempt, Subscription};
pub use retry::{RetryConfig, RetryScheduler, SchedulerError};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::classify::{classify, ErrorCategory, ErrorKind};
    pub use crate::recovery::{RecoveryState, RecoveryStateMachine, RetryAttempt};
    pub use crate::retry::{Backoff, ConflictPolicy, RetryConfig, SchedulerError};
}

/// Lock a mutex, recovering the data if a callback panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
