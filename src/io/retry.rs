use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::IndicatorResult;

/// Exponential backoff for transient collaborator failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 0,
            backoff_multiplier: 1.0,
        }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(attempt.saturating_sub(1) as i32);
        Duration::from_millis((self.initial_backoff_ms as f64 * factor) as u64)
    }

    /// Run `op`, retrying transient errors. The last error is returned once
    /// attempts are exhausted; permanent errors are returned immediately.
    pub fn run<T, F>(&self, label: &str, mut op: F) -> IndicatorResult<T>
    where
        F: FnMut() -> IndicatorResult<T>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < attempts => {
                    let wait = self.backoff(attempt);
                    log::warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        label,
                        attempt,
                        attempts,
                        e,
                        wait
                    );
                    std::thread::sleep(wait);
                    attempt += 1;
                }
                Err(e) => {
                    log::error!("{} failed after {} attempt(s): {}", label, attempt, e);
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IndicatorError;

    fn transient() -> IndicatorError {
        IndicatorError::Collaborator {
            message: "quota".to_string(),
            transient: true,
        }
    }

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 1,
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn test_transient_errors_are_retried() {
        let mut calls = 0;
        let result = fast().run("query", || {
            calls += 1;
            if calls < 3 {
                Err(transient())
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let mut calls = 0;
        let result: IndicatorResult<()> = fast().run("query", || {
            calls += 1;
            Err(transient())
        });
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_permanent_errors_are_not_retried() {
        let mut calls = 0;
        let result: IndicatorResult<()> = fast().run("mask", || {
            calls += 1;
            Err(IndicatorError::JoinMismatch { key: "x".to_string() })
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_backoff_grows() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(3), Duration::from_millis(2000));
    }
}
