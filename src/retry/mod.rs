//! Bounded exponential retry for calls into eventually-consistent backends.
//!
//! Every call into a storage provider or the queue may fail transiently;
//! callers wrap those calls in [`retry_with_backoff`]. The classification is
//! carried by the error type itself via [`Classify`]:
//!
//! - **Transient** failures are retried with exponential backoff and the last
//!   failure is surfaced unchanged once attempts are exhausted.
//! - **NotFound** is a domain signal, not an error: it is returned to the
//!   caller as a typed outcome on the first occurrence, never retried.
//! - **Permanent** failures are surfaced immediately.

use std::future::Future;
use std::time::Duration;

/// How an error should be treated by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Safe to retry with backoff: network failures, 5xx, timeouts.
    Transient,

    /// The addressed entity does not exist. Encodes "absent" in the
    /// processor's case analysis; returned to the caller, not retried.
    NotFound,

    /// Retrying cannot help; surfaced immediately.
    Permanent,
}

impl ErrorKind {
    pub fn is_retriable(&self) -> bool {
        matches!(self, ErrorKind::Transient)
    }
}

/// Implemented by error types that the retry loop can classify.
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}

/// Configuration for exponential backoff retry.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Total number of attempts, including the first.
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Cap for exponential growth.
    pub max_delay: Duration,

    /// Multiplier between consecutive delays.
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Default configuration: 3 attempts with 500ms, 1s delays between them.
    pub const DEFAULT: Self = Self {
        max_attempts: 3,
        initial_delay: Duration::from_millis(500),
        max_delay: Duration::from_secs(8),
        backoff_multiplier: 2.0,
    };

    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Fast configuration for tests: same attempt budget, negligible delays.
    pub fn fast() -> Self {
        Self::new(3, Duration::from_millis(1), Duration::from_millis(4), 2.0)
    }

    /// Computes the delay before retry number `retry` (0-indexed).
    ///
    /// Grows as `initial_delay * backoff_multiplier^retry`, capped at
    /// `max_delay`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let multiplier = self.backoff_multiplier.powi(retry as i32);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Outcome of a retried operation.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    /// The operation succeeded.
    Success(T),

    /// The operation reported the entity as absent.
    NotFound,

    /// A transient error persisted through every attempt.
    Exhausted {
        last_error: E,
        /// Attempts made, including the first.
        attempts: u32,
    },

    /// A permanent error occurred; no retries were made.
    Permanent(E),
}

impl<T, E> RetryOutcome<T, E> {
    /// Collapses the outcome into `Ok(Some(value))`, `Ok(None)` for
    /// NotFound, or the terminal error.
    pub fn into_result(self) -> Result<Option<T>, E> {
        match self {
            RetryOutcome::Success(v) => Ok(Some(v)),
            RetryOutcome::NotFound => Ok(None),
            RetryOutcome::Exhausted { last_error, .. } => Err(last_error),
            RetryOutcome::Permanent(e) => Err(e),
        }
    }

    /// Like [`RetryOutcome::into_result`], but maps NotFound through
    /// `on_not_found` for call sites where absence has a dedicated meaning.
    pub fn or_not_found(self, on_not_found: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
        match self {
            RetryOutcome::Success(v) => Ok(v),
            RetryOutcome::NotFound => on_not_found(),
            RetryOutcome::Exhausted { last_error, .. } => Err(last_error),
            RetryOutcome::Permanent(e) => Err(e),
        }
    }
}

/// Executes `operation` up to `config.max_attempts` times.
///
/// Transient errors sleep per the backoff schedule and retry; `NotFound` and
/// permanent errors return immediately as typed outcomes.
pub async fn retry_with_backoff<T, E, F, Fut>(config: RetryConfig, mut operation: F) -> RetryOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify,
{
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(value) => return RetryOutcome::Success(value),
            Err(e) => {
                attempt += 1;

                match e.kind() {
                    ErrorKind::NotFound => return RetryOutcome::NotFound,
                    ErrorKind::Permanent => return RetryOutcome::Permanent(e),
                    ErrorKind::Transient => {
                        if attempt >= config.max_attempts {
                            return RetryOutcome::Exhausted {
                                last_error: e,
                                attempts: attempt,
                            };
                        }
                        tokio::time::sleep(config.delay_for_retry(attempt - 1)).await;
                    }
                }
            }
        }
    }
}
