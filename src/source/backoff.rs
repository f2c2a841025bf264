//! Reconnect backoff policy for the capture loop.

use std::time::Duration;

const DEFAULT_BASE: Duration = Duration::from_secs(1);
const DEFAULT_CAP: Duration = Duration::from_secs(60);

/// Exponential delay sequence: 1s, 2s, 4s, 8s, ... capped at 60s.
///
/// `reset` is called after a successful connection so the next failure
/// starts over at the base delay.
#[derive(Clone, Debug)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    next: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_BASE, DEFAULT_CAP)
    }

    /// Custom limits, used by tests to keep delays short.
    pub fn with_limits(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            next: base,
        }
    }

    /// The delay to wait before the next attempt. Doubles on each call up
    /// to the cap.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next.min(self.cap);
        self.next = (self.next * 2).min(self.cap);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.base;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}
