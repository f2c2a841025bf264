//! Cooperative cancellation shared by the capture and processing loops.
//!
//! A single `CancelToken` is checked at every suspension point in both
//! loops. Cancellation never interrupts an in-flight call; it is observed at
//! the next check. `Latch` is the reverse direction: a one-shot "the loop
//! has finished" signal the host can wait on with a deadline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Cloneable cancellation token. `cancel` is idempotent and reports whether
/// this call was the one that flipped the state.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

struct CancelInner {
    cancelled: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                lock: Mutex::new(()),
                wake: Condvar::new(),
            }),
        }
    }

    /// Request cancellation. Returns true if this call performed the
    /// transition, false if the token was already cancelled.
    pub fn cancel(&self) -> bool {
        let first = !self.inner.cancelled.swap(true, Ordering::SeqCst);
        if first {
            let _guard = self.inner.lock.lock().expect("cancel lock poisoned");
            self.inner.wake.notify_all();
        }
        first
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` unless cancelled first. Returns true if the
    /// sleep was cut short by cancellation.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = std::time::Instant::now() + duration;
        let mut guard = self.inner.lock.lock().expect("cancel lock poisoned");
        loop {
            if self.is_cancelled() {
                return true;
            }
            let now = std::time::Instant::now();
            let Some(remaining) = deadline.checked_duration_since(now).filter(|d| !d.is_zero())
            else {
                return self.is_cancelled();
            };
            let (next, _timeout) = self
                .inner
                .wake
                .wait_timeout(guard, remaining)
                .expect("cancel lock poisoned");
            guard = next;
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot completion latch set by the processing loop when it stops.
#[derive(Clone)]
pub struct Latch {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Latch {
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    pub fn set(&self) {
        let (lock, cvar) = &*self.inner;
        let mut done = lock.lock().expect("latch lock poisoned");
        *done = true;
        cvar.notify_all();
    }

    pub fn is_set(&self) -> bool {
        *self.inner.0.lock().expect("latch lock poisoned")
    }

    /// Wait until set or the deadline passes. Returns true if set.
    pub fn wait_timeout(&self, deadline: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let guard = lock.lock().expect("latch lock poisoned");
        let (done, _timeout) = cvar
            .wait_timeout_while(guard, deadline, |done| !*done)
            .expect("latch lock poisoned");
        *done
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn cancel_is_idempotent_and_reports_first_caller() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert!(token.cancel());
        assert!(!token.cancel());
        assert!(token.is_cancelled());
    }

    #[test]
    fn sleep_returns_early_on_cancellation() {
        let token = CancelToken::new();
        let waker = token.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            waker.cancel();
        });

        let started = Instant::now();
        let cancelled = token.sleep(Duration::from_secs(30));
        assert!(cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn sleep_runs_to_completion_without_cancellation() {
        let token = CancelToken::new();
        assert!(!token.sleep(Duration::from_millis(10)));
    }

    #[test]
    fn latch_wait_observes_set() {
        let latch = Latch::new();
        let setter = latch.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            setter.set();
        });
        assert!(latch.wait_timeout(Duration::from_secs(10)));
        assert!(latch.is_set());
    }

    #[test]
    fn latch_wait_times_out_when_unset() {
        let latch = Latch::new();
        assert!(!latch.wait_timeout(Duration::from_millis(10)));
    }
}
