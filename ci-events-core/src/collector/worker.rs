//! The delivery loop run by the events worker thread
//!
//! ```text
//!            buffer empty
//!         ┌──────────────┐
//!         ▼              │
//!       Idle ──────────► Sending ◄──► BackingOff
//!         ▲   pending      │  │
//!         │   events       │  │ retries exhausted / transport error
//!         │   200 OK       │  ▼
//!         └────────────────┘ Suspended ──► Idle
//! ```
//!
//! Shutdown is only observed between cycles and after a backoff pause; a
//! request already on the wire is never aborted.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::config::DeliveryConfig;
use crate::error::Error;

use super::buffer::EventBuffer;
use super::client::{Request, Transport};
use super::events::{CiEvent, EventsBatch};
use super::publisher::DeliveryStats;
use super::server::ServerContext;
use super::waiter::{WaitOutcome, Waiter};

/// What the worker is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Sleeping between cycles
    Idle,
    /// A request is in flight
    Sending,
    /// Pausing before retrying the same batch
    BackingOff,
    /// Cooling down after a failed campaign
    Suspended,
    /// The worker thread has exited (or never started)
    Stopped,
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeliveryState::Idle => "idle",
            DeliveryState::Sending => "sending",
            DeliveryState::BackingOff => "backing off",
            DeliveryState::Suspended => "suspended",
            DeliveryState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// How a send campaign ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Campaign {
    Delivered,
    Failed,
    Abandoned,
}

#[derive(Debug, Clone, Copy)]
struct RetryState {
    failed_retries: u32,
    pause_interval: Duration,
}

/// State shared between the worker thread and `EventsService`
pub(crate) struct DeliveryLoop {
    config: DeliveryConfig,
    server: Arc<dyn ServerContext>,
    transport: Arc<dyn Transport>,
    pub(crate) buffer: EventBuffer,
    pub(crate) waiter: Waiter,
    retry: Mutex<RetryState>,
    state: Mutex<DeliveryState>,
    stats: Mutex<DeliveryStats>,
    shutting_down: AtomicBool,
    /// Bumped by every `reactivate()`; waits started before the bump are stale
    activations: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DeliveryLoop {
    pub(crate) fn new(
        config: DeliveryConfig,
        server: Arc<dyn ServerContext>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let retry = RetryState {
            failed_retries: 0,
            pause_interval: config.initial_retry_pause(),
        };
        Self {
            config,
            server,
            transport,
            buffer: EventBuffer::new(),
            waiter: Waiter::new(),
            retry: Mutex::new(retry),
            state: Mutex::new(DeliveryState::Stopped),
            stats: Mutex::new(DeliveryStats::default()),
            shutting_down: AtomicBool::new(false),
            activations: AtomicU64::new(0),
        }
    }

    /// Worker thread body
    pub(crate) fn run(&self) {
        tracing::info!("Events worker started");
        let mut seen = self.activations.load(Ordering::SeqCst);

        while !self.is_shutting_down() {
            self.set_state(DeliveryState::Idle);
            self.pause(self.config.send_interval(), &mut seen);
            if self.is_shutting_down() {
                break;
            }
            if self.buffer.is_empty() {
                continue;
            }

            match self.send_pending(&mut seen) {
                Campaign::Failed => self.suspend(&mut seen),
                Campaign::Delivered | Campaign::Abandoned => {}
            }
        }

        self.set_state(DeliveryState::Stopped);
        tracing::info!("Events worker stopped");
    }

    /// Run one campaign over a snapshot of the buffer
    fn send_pending(&self, seen: &mut u64) -> Campaign {
        let snapshot = self.buffer.snapshot();
        if snapshot.is_empty() {
            return Campaign::Delivered;
        }
        self.set_state(DeliveryState::Sending);

        let endpoint = self.server.endpoint();
        let batch = EventsBatch::new(self.server.server_info(), snapshot);
        tracing::info!(
            url = %endpoint.url,
            events = batch.len(),
            "Sending [{}] event/s",
            batch.summary()
        );

        let request = match Request::events(&endpoint, &batch) {
            Ok(request) => request,
            Err(e) => return self.drop_snapshot(&batch.events, &e),
        };

        let max = self.config.max_send_retries;
        while self.failed_retries() < max {
            self.record(|stats| stats.attempts += 1);

            let response = match self.transport.execute(&request) {
                Ok(response) => response,
                Err(e) => return self.drop_snapshot(&batch.events, &e),
            };

            if response.is_ok() {
                self.buffer.remove_all(&batch.events);
                self.reset_counters();
                self.record(|stats| stats.events_sent += batch.len() as u64);
                tracing::info!("... done, left to send {} events", self.buffer.len());
                return Campaign::Delivered;
            }

            self.record(|stats| stats.failed_attempts += 1);
            let (failed, pause) = {
                let mut retry = lock(&self.retry);
                retry.failed_retries += 1;
                let pause = retry.pause_interval;
                if retry.failed_retries < max {
                    retry.pause_interval = pause.saturating_mul(2);
                }
                (retry.failed_retries, pause)
            };
            tracing::warn!(
                status = response.status,
                attempt = failed,
                max_retries = max,
                "Collector rejected events"
            );

            if failed < max {
                self.set_state(DeliveryState::BackingOff);
                self.pause(pause, seen);
                if self.is_shutting_down() {
                    tracing::info!(
                        events = batch.len(),
                        "Shutdown requested, abandoning delivery"
                    );
                    return Campaign::Abandoned;
                }
                self.set_state(DeliveryState::Sending);
            }
        }

        tracing::error!(max_retries = max, "Max number of retries reached");
        Campaign::Failed
    }

    fn drop_snapshot(&self, snapshot: &[Arc<CiEvent>], error: &Error) -> Campaign {
        tracing::error!(
            events = snapshot.len(),
            error = %error,
            "Failed to send snapshot of {} events; dropping them all",
            snapshot.len()
        );
        let dropped = self.buffer.remove_all(snapshot);
        self.record(|stats| {
            stats.failed_attempts += 1;
            stats.transport_errors += 1;
            stats.events_dropped += dropped as u64;
        });
        Campaign::Failed
    }

    /// Drop everything pending and cool down
    ///
    /// Leaves a single-attempt retry budget behind, so a campaign after a
    /// natural timeout re-suspends on its first failure. `reactivate()`
    /// restores the full budget.
    fn suspend(&self, seen: &mut u64) {
        let dropped = self.buffer.clear();
        {
            let mut retry = lock(&self.retry);
            if self.activations.load(Ordering::SeqCst) == *seen {
                retry.failed_retries = self.config.max_send_retries.saturating_sub(1);
            }
        }
        self.record(|stats| {
            stats.suspensions += 1;
            stats.events_dropped += dropped as u64;
        });
        self.set_state(DeliveryState::Suspended);
        tracing::warn!(
            dropped,
            suspend_secs = self.config.suspend_interval_secs,
            "Event delivery suspended"
        );

        match self.pause(self.config.suspend_interval(), seen) {
            WaitOutcome::TimedOut => tracing::info!("Suspension elapsed, resuming delivery"),
            WaitOutcome::Released => tracing::info!("Suspension lifted on reactivation"),
            WaitOutcome::Cancelled => {}
        }
    }

    /// Interruptible pause that also ends if a reactivation happened since `seen`
    fn pause(&self, duration: Duration, seen: &mut u64) -> WaitOutcome {
        let expected = *seen;
        let outcome = self.waiter.wait_unless(duration, || {
            self.activations.load(Ordering::SeqCst) != expected
        });
        *seen = self.activations.load(Ordering::SeqCst);
        outcome
    }

    fn reset_counters(&self) {
        let mut retry = lock(&self.retry);
        retry.failed_retries = 0;
        retry.pause_interval = self.config.initial_retry_pause();
    }

    /// Fresh retry budget, clear shutdown, wake any pause
    pub(crate) fn reactivate(&self) {
        self.shutting_down.store(false, Ordering::SeqCst);
        self.waiter.reset();
        {
            let mut retry = lock(&self.retry);
            retry.failed_retries = 0;
            retry.pause_interval = self.config.initial_retry_pause();
            self.activations.fetch_add(1, Ordering::SeqCst);
        }
        self.waiter.release();
    }

    /// Ask the loop to exit and cut short whatever it is waiting on
    pub(crate) fn request_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.waiter.cancel();
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub(crate) fn state(&self) -> DeliveryState {
        *lock(&self.state)
    }

    pub(crate) fn set_state(&self, state: DeliveryState) {
        *lock(&self.state) = state;
    }

    pub(crate) fn failed_retries(&self) -> u32 {
        lock(&self.retry).failed_retries
    }

    pub(crate) fn stats(&self) -> DeliveryStats {
        lock(&self.stats).clone()
    }

    pub(crate) fn record<F>(&self, update: F)
    where
        F: FnOnce(&mut DeliveryStats),
    {
        update(&mut lock(&self.stats));
    }
}
