//! Events service: the public face of the delivery worker
//!
//! Producers call [`EventsService::publish`] from any thread; a single
//! background thread batches whatever is pending and ships it to the
//! collector. Delivery problems are logged and never reach producers.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crate::config::DeliveryConfig;
use crate::error::Result;

use super::client::Transport;
use super::events::CiEvent;
use super::server::ServerContext;
use super::worker::{DeliveryLoop, DeliveryState};

const WORKER_THREAD_NAME: &str = "ci-events-worker";

/// Delivery statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Events acknowledged by the collector
    pub events_sent: u64,
    /// Events discarded after a failed campaign or transport error
    pub events_dropped: u64,
    /// Requests issued
    pub attempts: u64,
    /// Requests answered with a non-200 status or failed outright
    pub failed_attempts: u64,
    /// Requests that failed without a response
    pub transport_errors: u64,
    /// Times delivery entered the long cooldown
    pub suspensions: u64,
    /// Worker threads spawned over the service's lifetime
    pub worker_starts: u64,
}

/// Accepts CI events and delivers them in the background
///
/// Dropping the service disposes it.
pub struct EventsService {
    delivery: Arc<DeliveryLoop>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventsService {
    /// Create the service without starting the worker
    ///
    /// Events published before [`EventsService::activate`] wait in the buffer.
    pub fn new(
        config: DeliveryConfig,
        server: Arc<dyn ServerContext>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            delivery: Arc::new(DeliveryLoop::new(config, server, transport)),
            worker: Mutex::new(None),
        })
    }

    /// Create the service and start delivering immediately
    pub fn start(
        config: DeliveryConfig,
        server: Arc<dyn ServerContext>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let service = Self::new(config, server, transport)?;
        service.activate()?;
        Ok(service)
    }

    fn worker(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue an event for delivery
    pub fn publish(&self, event: CiEvent) {
        self.publish_shared(Arc::new(event));
    }

    /// Queue an already shared event; the buffer keeps this exact handle
    pub fn publish_shared(&self, event: Arc<CiEvent>) {
        tracing::trace!(event = %event.summary(), "Event published");
        self.delivery.buffer.append(event);
    }

    /// Reset the retry budget and make sure exactly one worker is running
    ///
    /// Cuts short any pause in progress, including a suspension, so delivery
    /// resumes on the next cycle. Safe to call concurrently and repeatedly.
    pub fn activate(&self) -> Result<()> {
        // Held across reset and spawn so `dispose` cannot interleave
        let mut worker = self.worker();
        self.delivery.reactivate();

        let alive = worker.as_ref().is_some_and(|handle| !handle.is_finished());
        if alive {
            return Ok(());
        }

        if let Some(finished) = worker.take() {
            if finished.join().is_err() {
                tracing::error!("Previous events worker panicked");
            }
        }

        let delivery = Arc::clone(&self.delivery);
        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || delivery.run())?;
        *worker = Some(handle);
        self.delivery.record(|stats| stats.worker_starts += 1);
        tracing::info!("Events worker thread spawned");

        Ok(())
    }

    /// Drop pending events and stop the worker, waiting for it to exit
    ///
    /// A request already in flight runs to completion first.
    pub fn dispose(&self) {
        let mut worker = self.worker();
        let cleared = self.delivery.buffer.clear();
        self.delivery.request_shutdown();

        match worker.take() {
            Some(handle) => {
                tracing::info!(cleared, "Shutting down events worker");
                if handle.join().is_err() {
                    tracing::error!("Events worker panicked during shutdown");
                }
            }
            None => tracing::debug!(cleared, "Events service disposed before activation"),
        }
        self.delivery.set_state(DeliveryState::Stopped);
    }

    /// Number of events waiting for delivery
    pub fn pending(&self) -> usize {
        self.delivery.buffer.len()
    }

    pub fn state(&self) -> DeliveryState {
        self.delivery.state()
    }

    /// True while the worker sleeps in any pause (cycle, backoff or suspension)
    pub fn is_paused(&self) -> bool {
        self.delivery.waiter.is_paused()
    }

    pub fn is_suspended(&self) -> bool {
        self.state() == DeliveryState::Suspended
    }

    pub fn is_running(&self) -> bool {
        self.worker()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Consecutive failed sends in the current campaign
    pub fn failed_retries(&self) -> u32 {
        self.delivery.failed_retries()
    }

    pub fn stats(&self) -> DeliveryStats {
        self.delivery.stats()
    }
}

impl Drop for EventsService {
    fn drop(&mut self) {
        let started = self
            .worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();
        if started {
            self.dispose();
        }
    }
}
