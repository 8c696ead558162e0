//! Guarded task execution
//!
//! Runs a future on its own tokio task and races it against a deadline and a
//! cancellation token. On timeout or cancellation the spawned task is aborted,
//! so the underlying agent call does not keep running in the background.

use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How a guarded task ended
#[derive(Debug)]
pub enum GuardedOutcome<T> {
    /// The future ran to completion
    Finished(T),
    /// The task panicked or was aborted from elsewhere
    Panicked(String),
    TimedOut(Duration),
    Cancelled,
}

/// Run `operation` with a deadline and cooperative cancellation.
pub async fn run_guarded<F, T>(
    operation_name: &str,
    deadline: Duration,
    cancellation_token: &CancellationToken,
    operation: F,
) -> GuardedOutcome<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    debug!(
        operation = %operation_name,
        timeout_ms = deadline.as_millis() as u64,
        "Starting guarded operation"
    );

    let started = Instant::now();
    let mut handle = tokio::spawn(operation);

    let outcome = tokio::select! {
        joined = &mut handle => match joined {
            Ok(value) => GuardedOutcome::Finished(value),
            Err(e) if e.is_panic() => GuardedOutcome::Panicked(panic_message(e.into_panic())),
            Err(e) => GuardedOutcome::Panicked(e.to_string()),
        },
        _ = tokio::time::sleep(deadline) => {
            handle.abort();
            GuardedOutcome::TimedOut(deadline)
        },
        _ = cancellation_token.cancelled() => {
            handle.abort();
            GuardedOutcome::Cancelled
        },
    };

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match &outcome {
        GuardedOutcome::Finished(_) => {
            debug!(operation = %operation_name, elapsed_ms, "Guarded operation finished")
        }
        GuardedOutcome::Panicked(message) => {
            warn!(operation = %operation_name, elapsed_ms, error = %message, "Guarded operation panicked")
        }
        GuardedOutcome::TimedOut(_) => {
            warn!(operation = %operation_name, elapsed_ms, "Guarded operation timed out")
        }
        GuardedOutcome::Cancelled => {
            warn!(operation = %operation_name, elapsed_ms, "Guarded operation cancelled")
        }
    }

    outcome
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}
