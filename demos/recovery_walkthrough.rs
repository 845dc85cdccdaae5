//! Walks through the recovery states a screen would show
//!
//! Run with: cargo run --example recovery_walkthrough

use samenactief_recovery::classify::{classify_with, DutchCatalog};
use samenactief_recovery::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    // What the user sees for a few common failures
    for raw in [
        "Request failed with status code 401",
        "GET /activiteiten/42 returned 404",
        "TypeError: Failed to fetch",
        "Request failed: 429 Too Many Requests",
    ] {
        let category = classify(&raw);
        let dutch = classify_with(&raw, &DutchCatalog);
        println!("{:<40} -> {} | {}", raw, category, dutch.title);
    }

    println!();
    println!("Server hiccup, recovers on the third attempt:");
    run(3, "500 Internal Server Error").await;

    println!();
    println!("Offline, gives up after two attempts:");
    run(0, "NetworkError when attempting to fetch resource.").await;
}

async fn run(succeed_on: u32, error: &'static str) {
    let machine = RecoveryStateMachine::new();
    let calls = Arc::new(AtomicU32::new(0));

    let _ = machine.on_change(|state| println!("  state: {}", state));
    let _ = machine.on_progress(|attempt| {
        if attempt.progress_percent % 30 == 0 || attempt.progress_percent == 100 {
            println!("    progress: {}%", attempt.progress_percent);
        }
    });

    let operation = {
        let calls = calls.clone();
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                tokio::time::sleep(Duration::from_millis(80)).await;
                if succeed_on != 0 && n >= succeed_on {
                    Ok(())
                } else {
                    Err(error)
                }
            }
        }
    };

    let attempts = if succeed_on == 0 { 2 } else { 3 };
    if let Err(e) = machine.begin(
        &error,
        operation,
        RetryConfig::new(attempts, Duration::from_millis(300)),
    ) {
        println!("  could not start: {}", e);
        return;
    }

    let end = machine.settled().await;
    if let Some(category) = machine.category() {
        println!("  ended {} ({}: {})", end, category.title, category.remedy);
    }
}
