//! Interruptible sleep for the delivery worker
//!
//! Every pause the worker takes goes through a [`Waiter`], so another thread
//! can cut it short:
//! - [`Waiter::release`] ends the wait currently in progress, if any
//! - [`Waiter::cancel`] ends the current wait and every later one until
//!   [`Waiter::reset`]

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// How a call to [`Waiter::wait`] ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The full duration elapsed
    TimedOut,
    /// `release()` was called while waiting
    Released,
    /// The waiter is cancelled
    Cancelled,
}

#[derive(Debug, Default)]
struct WaitState {
    waiting: bool,
    released: bool,
    cancelled: bool,
}

#[derive(Debug, Default)]
pub struct Waiter {
    state: Mutex<WaitState>,
    signal: Condvar,
}

impl Waiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, WaitState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block for up to `timeout`
    pub fn wait(&self, timeout: Duration) -> WaitOutcome {
        self.wait_unless(timeout, || false)
    }

    /// Block for up to `timeout`, unless `stale` already holds on entry
    ///
    /// `stale` is evaluated under the waiter's lock after the wait is
    /// registered. A caller that changes state and then calls `release()`
    /// is therefore either seen by `stale` or wakes the wait; it cannot slip
    /// in between.
    pub fn wait_unless<F>(&self, timeout: Duration, stale: F) -> WaitOutcome
    where
        F: FnOnce() -> bool,
    {
        tracing::debug!(timeout_ms = timeout.as_millis() as u64, "Entering waiting period");

        // A timeout too large to represent only ends on release or cancel
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.lock();
        state.released = stale();
        state.waiting = true;

        let outcome = loop {
            if state.cancelled {
                break WaitOutcome::Cancelled;
            }
            if state.released {
                break WaitOutcome::Released;
            }
            // Spurious wakeups fall through to the checks above
            state = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break WaitOutcome::TimedOut;
                    }
                    self.signal
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .signal
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        };

        state.waiting = false;
        state.released = false;
        drop(state);

        match outcome {
            WaitOutcome::TimedOut => tracing::debug!("Pause finished timely"),
            WaitOutcome::Released => tracing::info!("Pause finished on demand"),
            WaitOutcome::Cancelled => tracing::debug!("Pause cancelled"),
        }
        outcome
    }

    /// Wake the wait in progress
    ///
    /// Returns whether a wait was actually released. Without a wait in
    /// progress this is a no-op.
    pub fn release(&self) -> bool {
        let mut state = self.lock();
        if !state.waiting {
            return false;
        }
        state.released = true;
        self.signal.notify_all();
        true
    }

    /// End the current wait and make all later waits return immediately
    pub fn cancel(&self) {
        let mut state = self.lock();
        state.cancelled = true;
        self.signal.notify_all();
    }

    /// Undo [`Waiter::cancel`]
    pub fn reset(&self) {
        self.lock().cancelled = false;
    }

    /// True while a thread is blocked in [`Waiter::wait`]
    pub fn is_paused(&self) -> bool {
        self.lock().waiting
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn wait_until_paused(waiter: &Waiter) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !waiter.is_paused() {
            assert!(Instant::now() < deadline, "waiter never started waiting");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_wait_times_out() {
        let waiter = Waiter::new();
        let start = Instant::now();
        assert_eq!(waiter.wait(Duration::from_millis(30)), WaitOutcome::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert!(!waiter.is_paused());
    }

    #[test]
    fn test_release_wakes_waiter_early() {
        let waiter = Arc::new(Waiter::new());
        let handle = {
            let waiter = Arc::clone(&waiter);
            thread::spawn(move || {
                let start = Instant::now();
                (waiter.wait(Duration::from_secs(30)), start.elapsed())
            })
        };

        wait_until_paused(&waiter);
        assert!(waiter.release());

        let (outcome, elapsed) = handle.join().unwrap();
        assert_eq!(outcome, WaitOutcome::Released);
        assert!(elapsed < Duration::from_secs(5));
        assert!(!waiter.is_paused());
    }

    #[test]
    fn test_release_without_wait_has_no_effect() {
        let waiter = Waiter::new();
        assert!(!waiter.release());
        assert_eq!(waiter.wait(Duration::from_millis(10)), WaitOutcome::TimedOut);
    }

    #[test]
    fn test_stale_wait_returns_immediately() {
        let waiter = Waiter::new();
        let start = Instant::now();
        assert_eq!(
            waiter.wait_unless(Duration::from_secs(30), || true),
            WaitOutcome::Released
        );
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(
            waiter.wait_unless(Duration::from_millis(5), || false),
            WaitOutcome::TimedOut
        );
    }

    #[test]
    fn test_cancel_is_sticky_until_reset() {
        let waiter = Waiter::new();
        waiter.cancel();
        assert!(waiter.is_cancelled());
        assert_eq!(waiter.wait(Duration::from_secs(30)), WaitOutcome::Cancelled);
        assert_eq!(waiter.wait(Duration::from_secs(30)), WaitOutcome::Cancelled);

        waiter.reset();
        assert_eq!(waiter.wait(Duration::from_millis(5)), WaitOutcome::TimedOut);
    }

    #[test]
    fn test_unbounded_timeout_waits_for_release() {
        let waiter = Arc::new(Waiter::new());
        let handle = {
            let waiter = Arc::clone(&waiter);
            thread::spawn(move || waiter.wait(Duration::MAX))
        };

        wait_until_paused(&waiter);
        assert!(waiter.release());
        assert_eq!(handle.join().unwrap(), WaitOutcome::Released);
    }

    #[test]
    fn test_unbounded_timeout_ends_on_cancel() {
        let waiter = Arc::new(Waiter::new());
        let handle = {
            let waiter = Arc::clone(&waiter);
            thread::spawn(move || waiter.wait(Duration::from_secs(u64::MAX)))
        };

        wait_until_paused(&waiter);
        waiter.cancel();
        assert_eq!(handle.join().unwrap(), WaitOutcome::Cancelled);
    }

    #[test]
    fn test_cancel_wakes_waiter() {
        let waiter = Arc::new(Waiter::new());
        let handle = {
            let waiter = Arc::clone(&waiter);
            thread::spawn(move || waiter.wait(Duration::from_secs(30)))
        };

        wait_until_paused(&waiter);
        waiter.cancel();
        assert_eq!(handle.join().unwrap(), WaitOutcome::Cancelled);
    }
}
