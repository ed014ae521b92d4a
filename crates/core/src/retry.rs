//! Bounded retry with linear backoff for outbound calls.
//!
//! Every attempt is bounded by `call_timeout`. After a failed attempt with
//! index `i` the harness waits `(1 + i) * unit` before moving on, so a call
//! that fails three times waits 1, 2 and 3 units in total. Exhaustion is a
//! value, never a panic: callers turn [`RetryExhausted`] into a soft failure
//! for the current symbol or cycle.

use crate::error::CallError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Backoff unit; the wait after attempt `i` is `(1 + i) * unit`.
    pub unit: Duration,
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            unit: Duration::from_secs(1),
            call_timeout: Duration::from_secs(40),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub const fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    #[must_use]
    pub const fn with_unit(mut self, unit: Duration) -> Self {
        self.unit = unit;
        self
    }

    /// Wait that follows the failed attempt with zero-based index `attempt`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.unit * (1 + attempt)
    }
}

/// All attempts failed. Carries the last error in the `{ok: false, error}` spirit.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{label} failed after {attempts} attempt(s): {error}")]
pub struct RetryExhausted {
    pub label: String,
    pub attempts: u32,
    pub error: CallError,
}

/// Runs `operation` until it succeeds, hits a non-retryable error, or runs out
/// of attempts.
///
/// # Errors
/// Returns [`RetryExhausted`] with the last error when no attempt succeeded.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T, RetryExhausted>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CallError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = CallError::Transport("no attempt made".to_string());

    for attempt in 0..max_attempts {
        let outcome = match tokio::time::timeout(policy.call_timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(CallError::Timeout(format!(
                "{label} exceeded {}s",
                policy.call_timeout.as_secs_f64()
            ))),
        };

        match outcome {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(call = %label, attempt = attempt + 1, "Call succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if !e.is_retryable() => {
                tracing::warn!(call = %label, error = %e, "Call failed, not retryable");
                return Err(RetryExhausted {
                    label: label.to_string(),
                    attempts: attempt + 1,
                    error: e,
                });
            }
            Err(e) => {
                tracing::warn!(
                    call = %label,
                    attempt = attempt + 1,
                    max_attempts,
                    error = %e,
                    "Call failed"
                );
                last_error = e;
            }
        }

        tokio::time::sleep(policy.backoff(attempt)).await;
    }

    tracing::error!(call = %label, error = %last_error, "Failed after retries");
    Err(RetryExhausted {
        label: label.to_string(),
        attempts: max_attempts,
        error: last_error,
    })
}
