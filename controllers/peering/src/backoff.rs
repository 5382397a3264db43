//! # Fibonacci Backoff
//!
//! Requeue delays for failed reconciles. The sequence grows more slowly than
//! exponential backoff: 1m, 1m, 2m, 3m, 5m, 8m, then capped at 10m.
//!
//! [`BackoffTracker`] keeps one sequence per object key and resets it when a
//! reconcile of that object succeeds.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

const MIN_MINUTES: u64 = 1;
const MAX_MINUTES: u64 = 10;

/// Fibonacci backoff calculator
///
/// Each delay is the sum of the previous two, in minutes, capped at `max_minutes`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min_minutes: u64,
    prev_minutes: u64,
    current_minutes: u64,
    max_minutes: u64,
}

impl FibonacciBackoff {
    #[must_use]
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        Self {
            min_minutes,
            prev_minutes: 0,
            current_minutes: min_minutes,
            max_minutes,
        }
    }

    /// Returns the current delay and advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let delay = Duration::from_secs(self.current_minutes * 60);
        let next_minutes = self.prev_minutes + self.current_minutes;
        self.prev_minutes = self.current_minutes;
        self.current_minutes = next_minutes.min(self.max_minutes);
        delay
    }

    /// Restart from the minimum delay.
    pub fn reset(&mut self) {
        self.prev_minutes = 0;
        self.current_minutes = self.min_minutes;
    }
}

impl Default for FibonacciBackoff {
    fn default() -> Self {
        Self::new(MIN_MINUTES, MAX_MINUTES)
    }
}

#[derive(Debug, Clone, Default)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

/// Per-object backoff state (object key -> consecutive failures).
#[derive(Debug, Default)]
pub struct BackoffTracker {
    states: Mutex<HashMap<String, BackoffState>>,
}

impl BackoffTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure for `key` and returns the delay before the next attempt.
    pub fn on_error(&self, key: &str) -> Duration {
        let mut states = self.states.lock().unwrap_or_else(|p| p.into_inner());
        let state = states.entry(key.to_string()).or_default();
        state.error_count += 1;
        let delay = state.backoff.next_delay();
        debug!("{} failed {} time(s), retrying in {:?}", key, state.error_count, delay);
        delay
    }

    /// Forgets the failures of `key` after a successful reconcile.
    pub fn on_success(&self, key: &str) {
        let mut states = self.states.lock().unwrap_or_else(|p| p.into_inner());
        states.remove(key);
    }

    pub fn error_count(&self, key: &str) -> u32 {
        let states = self.states.lock().unwrap_or_else(|p| p.into_inner());
        states.get(key).map_or(0, |s| s.error_count)
    }
}
