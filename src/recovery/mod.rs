//! Observable recovery from a failed request.
//!
//! A [`RecoveryStateMachine`] takes the error that made a request fail,
//! classifies it, and retries the request on a [`RetryScheduler`]. Screens
//! subscribe to its [`RecoveryState`] to show what is going on:
//!
//! ```rust
//! use samenactief_recovery::recovery::{RecoveryState, RecoveryStateMachine};
//! use samenactief_recovery::retry::RetryConfig;
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let machine = RecoveryStateMachine::new();
//! let calls = Arc::new(AtomicU32::new(0));
//!
//! let operation = {
//!     let calls = calls.clone();
//!     move || {
//!         let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
//!         async move {
//!             if n < 2 {
//!                 Err("503 Service Unavailable")
//!             } else {
//!                 Ok(())
//!             }
//!         }
//!     }
//! };
//!
//! machine
//!     .begin(&"500 Internal Server Error", operation, RetryConfig::new(3, Duration::from_millis(5)))
//!     .unwrap();
//!
//! assert_eq!(machine.settled().await, RecoveryState::Succeeded);
//! assert_eq!(machine.last_attempt().unwrap().attempt_number, 2);
//! # });
//! ```
//!
//! [`RetryScheduler`]: crate::retry::RetryScheduler

mod machine;
mod state;
mod subscription;


pub use machine::RecoveryStateMachine;
pub use state::{RecoveryState, RetryAttempt};
pub use subscription::Subscription;
