//! Pending events shared between producers and the delivery worker

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::events::CiEvent;

/// Thread-safe, unbounded, append-only queue of events awaiting delivery
///
/// Items are tracked by handle identity: [`EventBuffer::remove_all`] removes
/// the exact `Arc`s it is given, never merely equal events.
#[derive(Debug, Default)]
pub struct EventBuffer {
    events: Mutex<Vec<Arc<CiEvent>>>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<CiEvent>>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn append(&self, event: Arc<CiEvent>) {
        self.lock().push(event);
    }

    /// Independent copy of the current contents
    pub fn snapshot(&self) -> Vec<Arc<CiEvent>> {
        self.lock().clone()
    }

    /// Remove exactly the given items, keeping anything appended since
    pub fn remove_all(&self, sent: &[Arc<CiEvent>]) -> usize {
        if sent.is_empty() {
            return 0;
        }
        // Built outside the lock so producers only wait for the retain pass
        let sent: HashSet<*const CiEvent> = sent.iter().map(Arc::as_ptr).collect();

        let mut events = self.lock();
        let before = events.len();
        events.retain(|event| !sent.contains(&Arc::as_ptr(event)));
        before - events.len()
    }

    /// Drop everything, returning how many events were discarded
    pub fn clear(&self) -> usize {
        let mut events = self.lock();
        let dropped = events.len();
        events.clear();
        dropped
    }

    /// Current count; may be stale as soon as it is read
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
