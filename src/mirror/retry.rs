//! Bounded retries for fetch and store calls
//!
//! The policy only counts attempts and spaces them out. Reconnecting is the
//! connection's job; a failed attempt is its chance to do so.

use crate::error::StoreError;
use std::thread;
use std::time::Duration;

/// Attempts per fetch and per store before a key is dead-lettered
pub const MAX_TRIES: u32 = 3;

/// How many times to try, and how long to wait in between
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_tries: u32,

    /// Delay after the first failed attempt
    pub initial_delay: Duration,

    /// Ceiling for the delay
    pub max_delay: Duration,

    /// Multiplier applied to the delay after each failure
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_tries: MAX_TRIES,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Retry without sleeping
    pub fn immediate(max_tries: u32) -> Self {
        Self {
            max_tries,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_factor: 1.0,
        }
    }

    pub fn with_max_tries(mut self, max_tries: u32) -> Self {
        self.max_tries = max_tries;
        self
    }

    /// Delay after failed attempt number `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if self.initial_delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(16) as i32;
        let scaled = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }

    /// Run `op` until it succeeds, fails fatally, or the budget is spent.
    /// `op` receives the 1-based attempt number.
    pub fn run<T, F>(&self, mut op: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Attempt<T>,
    {
        let max_tries = self.max_tries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_tries {
            match op(attempt) {
                Attempt::Success(value) => {
                    return RetryOutcome::Success {
                        value,
                        attempts: attempt,
                    }
                }
                Attempt::Fatal(error) => {
                    return RetryOutcome::Aborted {
                        attempts: attempt,
                        error,
                    }
                }
                Attempt::Retryable(error) => {
                    last_error = error;
                    if attempt < max_tries {
                        let delay = self.delay_after(attempt);
                        if !delay.is_zero() {
                            thread::sleep(delay);
                        }
                    }
                }
            }
        }

        RetryOutcome::Exhausted {
            attempts: max_tries,
            last_error,
        }
    }
}

/// Result of a single attempt
#[derive(Debug)]
pub enum Attempt<T> {
    Success(T),
    /// Worth trying again
    Retryable(String),
    /// Trying again cannot help
    Fatal(String),
}

impl<T> From<Result<T, StoreError>> for Attempt<T> {
    fn from(result: Result<T, StoreError>) -> Self {
        match result {
            Ok(value) => Attempt::Success(value),
            Err(e) if e.is_retryable() => Attempt::Retryable(e.to_string()),
            Err(e) => Attempt::Fatal(e.to_string()),
        }
    }
}

/// Result of a retried operation
#[derive(Debug, PartialEq)]
pub enum RetryOutcome<T> {
    Success { value: T, attempts: u32 },
    Exhausted { attempts: u32, last_error: String },
    Aborted { attempts: u32, error: String },
}
