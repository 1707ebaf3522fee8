//! # Fibonacci Backoff
//!
//! Provides a Fibonacci-based backoff for reconcile errors. It grows more
//! slowly than exponential backoff, so a misconfigured InitTarget or a
//! briefly unreachable workspace is retried often at first without hammering
//! the API server later on.
//!
//! Sequence with the defaults (5s min, 300s max):
//! 5s, 5s, 10s, 15s, 25s, 40s, 65s, 105s, 170s, 275s, 300s (max)

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Calculate the Fibonacci backoff for a given number of consecutive errors
///
/// Error counts 0 and 1 both yield `min_seconds`; after that the sequence
/// is min, min, min*2, min*3, min*5, min*8, ... capped at `max_seconds`.
///
/// # Arguments
///
/// * `error_count` - The number of consecutive errors (0-indexed)
/// * `min_seconds` - Minimum backoff duration
/// * `max_seconds` - Maximum backoff duration (caps the sequence)
#[must_use]
pub fn fibonacci_delay(error_count: u32, min_seconds: u64, max_seconds: u64) -> Duration {
    if error_count <= 1 {
        return Duration::from_secs(std::cmp::min(min_seconds, max_seconds));
    }

    let mut prev = min_seconds;
    let mut current = min_seconds;

    for _ in 2..=error_count {
        let next = prev.saturating_add(current);
        prev = current;
        current = std::cmp::min(next, max_seconds);

        // Once capped it stays capped
        if current >= max_seconds {
            break;
        }
    }

    Duration::from_secs(current)
}

/// Per-object consecutive error counts, turned into Fibonacci delays.
///
/// Error policies only see the failing object, so the count has to live
/// next to the controller context rather than in a single backoff value.
#[derive(Debug)]
pub struct ErrorBackoff {
    min_seconds: u64,
    max_seconds: u64,
    errors: Mutex<HashMap<String, u32>>,
}

impl ErrorBackoff {
    /// Create a tracker with the given bounds in seconds
    #[must_use]
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            min_seconds,
            max_seconds,
            errors: Mutex::new(HashMap::new()),
        }
    }

    /// Record a failure for `key` and return how long to wait before retrying
    pub fn on_error(&self, key: &str) -> Duration {
        let mut errors = self.errors.lock().unwrap_or_else(PoisonError::into_inner);
        let count = errors.entry(key.to_string()).or_insert(0);
        let delay = fibonacci_delay(*count, self.min_seconds, self.max_seconds);
        *count = count.saturating_add(1);
        delay
    }

    /// Forget previous failures for `key`
    pub fn on_success(&self, key: &str) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}
