//! Guarded calls to external dependencies.
//!
//! A call is dispatched to a spawned task holding a worker slot and
//! awaited against a hard deadline. On expiry the task is abandoned,
//! not cancelled: it runs to completion (or not) on its own and its
//! result is dropped with the detached `JoinHandle`. The guarding
//! breaker records the timeout as a failure.

pub mod breaker;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

pub use breaker::{BreakerStatus, CircuitBreaker, CircuitState};

/// Result of a guarded call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome<T> {
    Ok(T),
    /// Deadline expired; the call was abandoned.
    Timeout,
    /// The breaker refused the call; nothing was dispatched.
    CircuitOpen,
    /// The call finished with an error (or panicked).
    Error(String),
}

impl<T> CallOutcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, CallOutcome::Ok(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CallOutcome::Timeout)
    }

    pub fn ok(self) -> Option<T> {
        match self {
            CallOutcome::Ok(v) => Some(v),
            _ => None,
        }
    }

    pub fn unwrap_or(self, default: T) -> T {
        self.ok().unwrap_or(default)
    }

    /// Short label for logs; the value itself is not shown.
    pub fn label(&self) -> String {
        match self {
            CallOutcome::Ok(_) => "ok".to_string(),
            CallOutcome::Timeout => "timeout".to_string(),
            CallOutcome::CircuitOpen => "circuit open".to_string(),
            CallOutcome::Error(e) => format!("error: {e}"),
        }
    }
}

impl<T> fmt::Display for CallOutcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Runs guarded calls on spawned tasks with a bounded number of slots.
#[derive(Debug, Clone)]
pub struct BoundedWorker {
    slots: Arc<Semaphore>,
    deadline: Duration,
}

impl BoundedWorker {
    pub fn new(slots: usize, deadline: Duration) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(slots.max(1))),
            deadline,
        }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Slots not held by running (or abandoned but still running) calls.
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Run `call` under `breaker` with the worker deadline. Waiting for a
    /// free slot counts against the same deadline.
    pub async fn call<T, F>(&self, breaker: &CircuitBreaker, call: F) -> CallOutcome<T>
    where
        T: Send + 'static,
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        if !breaker.can_execute() {
            debug!(breaker = breaker.name(), "Call skipped, circuit open");
            return CallOutcome::CircuitOpen;
        }

        let deadline = Instant::now() + self.deadline;

        let permit = match timeout_at(deadline, self.slots.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                breaker.record_failure();
                return CallOutcome::Error("worker pool closed".to_string());
            }
            Err(_) => {
                warn!(breaker = breaker.name(), "No worker slot before deadline");
                breaker.record_failure();
                return CallOutcome::Timeout;
            }
        };

        let handle = tokio::spawn(async move {
            let _permit = permit;
            call.await
        });

        match timeout_at(deadline, handle).await {
            Ok(Ok(Ok(value))) => {
                breaker.record_success();
                CallOutcome::Ok(value)
            }
            Ok(Ok(Err(e))) => {
                warn!(breaker = breaker.name(), error = %e, "Guarded call failed");
                breaker.record_failure();
                CallOutcome::Error(format!("{e:#}"))
            }
            Ok(Err(join)) => {
                warn!(breaker = breaker.name(), error = %join, "Guarded call panicked");
                breaker.record_failure();
                CallOutcome::Error(join.to_string())
            }
            Err(_) => {
                warn!(
                    breaker = breaker.name(),
                    deadline_ms = self.deadline.as_millis() as u64,
                    "Guarded call timed out, abandoning"
                );
                breaker.record_failure();
                CallOutcome::Timeout
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
