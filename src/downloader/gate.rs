//! Session-wide admission gate bounding in-flight requests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Default)]
struct GateCounters {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// Counting gate shared by every request of a session, across batches.
///
/// Cloning yields another handle to the same gate.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    counters: Arc<GateCounters>,
}

impl AdmissionGate {
    /// Gate admitting at most `capacity` holders (clamped to at least 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            counters: Arc::new(GateCounters::default()),
        }
    }

    /// Wait for a slot. Returns `None` if the gate was closed.
    pub async fn acquire(&self) -> Option<GatePass> {
        let permit = self.semaphore.clone().acquire_owned().await.ok()?;
        let now = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak.fetch_max(now, Ordering::SeqCst);
        Some(GatePass {
            _permit: permit,
            counters: self.counters.clone(),
        })
    }

    /// Maximum simultaneous holders
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current holders
    pub fn in_flight(&self) -> usize {
        self.counters.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous holders observed
    pub fn peak(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }
}

/// Slot in an [`AdmissionGate`], released on drop.
#[derive(Debug)]
pub struct GatePass {
    _permit: OwnedSemaphorePermit,
    counters: Arc<GateCounters>,
}

impl Drop for GatePass {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
