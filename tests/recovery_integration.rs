//! End-to-end tests of recovery runs through the public API

use proptest::prelude::*;
use samenactief_recovery::assert_state;
use samenactief_recovery::prelude::*;
use samenactief_recovery::testing::StateRecorder;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Fails with `message` until call number `succeed_on` (never if 0).
fn operation(
    calls: &Arc<AtomicU32>,
    succeed_on: u32,
    message: &'static str,
) -> impl Fn() -> std::future::Ready<Result<(), &'static str>> + Send + Sync + 'static {
    let calls = calls.clone();
    move || {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        if succeed_on != 0 && n >= succeed_on {
            std::future::ready(Ok(()))
        } else {
            std::future::ready(Err(message))
        }
    }
}

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_fail_fail_succeed_takes_three_delays() {
    let calls = Arc::new(AtomicU32::new(0));
    let machine = RecoveryStateMachine::new();
    let recorder = StateRecorder::new();
    let _ = recorder.attach(&machine);

    let started = tokio::time::Instant::now();
    machine
        .begin(
            &"Request failed: 500",
            operation(&calls, 3, "Request failed: 500"),
            RetryConfig::new(3, Duration::from_millis(100)),
        )
        .unwrap();
    let end = machine.settled().await;

    assert_eq!(end, RecoveryState::Succeeded);
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(started.elapsed() < Duration::from_millis(400));

    let states = recorder.states();
    assert_eq!(states.len(), 4);
    assert_state!(states[0].clone(), Retrying(1));
    assert_state!(states[1].clone(), Retrying(2));
    assert_state!(states[2].clone(), Retrying(3));
    assert_state!(states[3].clone(), Succeeded);
}

#[tokio::test(start_paused = true)]
async fn test_failed_run_keeps_its_category_for_the_ui() {
    let calls = Arc::new(AtomicU32::new(0));
    let machine = RecoveryStateMachine::new();

    machine
        .begin(
            &"TypeError: Failed to fetch",
            operation(&calls, 0, "TypeError: Failed to fetch"),
            RetryConfig::new(2, Duration::from_millis(50)).with_backoff(Backoff::Exponential),
        )
        .unwrap();

    assert_state!(machine.settled().await, Failed(2));
    let category = machine.category().unwrap();
    assert_eq!(category.kind, ErrorKind::NetworkError);
    assert!(category.is_retryable());
}

#[tokio::test(start_paused = true)]
async fn test_exponential_backoff_spaces_attempts() {
    let calls = Arc::new(AtomicU32::new(0));
    let machine = RecoveryStateMachine::new();

    let started = tokio::time::Instant::now();
    machine
        .begin(
            &"500",
            operation(&calls, 0, "500"),
            RetryConfig::new(3, Duration::from_millis(100)).with_backoff(Backoff::Exponential),
        )
        .unwrap();
    machine.settled().await;

    // 100ms + 200ms + 400ms
    assert!(started.elapsed() >= Duration::from_millis(700));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_failure_starts_a_fresh_run() {
    let calls = Arc::new(AtomicU32::new(0));
    let machine = RecoveryStateMachine::new();
    let config = RetryConfig::new(1, Duration::from_millis(10));

    machine
        .begin(&"500", operation(&calls, 2, "500"), config.clone())
        .unwrap();
    assert_state!(machine.settled().await, Failed(1));

    // The user presses "try again".
    machine
        .begin(&"500", operation(&calls, 2, "500"), config)
        .unwrap();
    assert_eq!(machine.settled().await, RecoveryState::Succeeded);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_run_ends_after_the_right_number_of_attempts(
        max_attempts in 1u32..6,
        succeed_on in 0u32..8,
        delay_ms in 0u64..200,
    ) {
        let runtime = paused_runtime();
        let calls = Arc::new(AtomicU32::new(0));
        let machine = RecoveryStateMachine::new().with_runtime(runtime.handle().clone());
        let recorder = StateRecorder::new();
        let _ = recorder.attach(&machine);

        machine
            .begin(
                &"500",
                operation(&calls, succeed_on, "500"),
                RetryConfig::new(max_attempts, Duration::from_millis(delay_ms)),
            )
            .unwrap();
        let end = runtime.block_on(machine.settled());

        let succeeds = succeed_on != 0 && succeed_on <= max_attempts;
        let attempts = if succeeds { succeed_on } else { max_attempts };

        prop_assert_eq!(calls.load(Ordering::SeqCst), attempts);
        prop_assert_eq!(machine.last_attempt().unwrap().attempt_number, attempts);
        prop_assert_eq!(
            recorder.retry_attempts(),
            (1..=attempts).map(|n| (n, max_attempts)).collect::<Vec<_>>()
        );
        if succeeds {
            prop_assert_eq!(end, RecoveryState::Succeeded);
        } else {
            prop_assert!(matches!(end, RecoveryState::Failed(ref a) if a.attempt_number == max_attempts));
        }

        // Nothing happens after a terminal state.
        let seen = recorder.states().len();
        runtime.block_on(async { tokio::time::sleep(Duration::from_secs(60)).await });
        prop_assert_eq!(recorder.states().len(), seen);
    }

    #[test]
    fn prop_cancel_at_any_moment_is_final(
        cancel_after_ms in 0u64..1_000,
        takes_ms in 0u64..300,
    ) {
        let runtime = paused_runtime();
        let calls = Arc::new(AtomicU32::new(0));
        let machine = RecoveryStateMachine::new().with_runtime(runtime.handle().clone());
        let recorder = StateRecorder::new();
        let _ = recorder.attach(&machine);

        let slow = {
            let calls = calls.clone();
            move || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    tokio::time::sleep(Duration::from_millis(takes_ms)).await;
                    if n < 3 { Err("500") } else { Ok(()) }
                }
            }
        };

        machine
            .begin(&"500", slow, RetryConfig::new(3, Duration::from_millis(100)))
            .unwrap();
        runtime.block_on(async { tokio::time::sleep(Duration::from_millis(cancel_after_ms)).await });

        let before = recorder.states();
        machine.cancel();
        let after_cancel = recorder.states();
        runtime.block_on(async { tokio::time::sleep(Duration::from_secs(60)).await });

        prop_assert_eq!(recorder.states(), after_cancel.clone());
        prop_assert_eq!(machine.current_state(), RecoveryState::Idle);
        if before.last().is_some_and(|s| !s.is_idle()) {
            prop_assert_eq!(after_cancel.len(), before.len() + 1);
        }
    }
}
