//! Per-host admission control.
//!
//! One counted semaphore per host, sized to that host's
//! `max_concurrent`. The hard resource is GPU memory on the physical
//! node serving a host, not the type of task running on it, so the limit
//! is keyed by host name rather than task type.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

struct HostSlot {
    semaphore: Arc<Semaphore>,
    max_concurrent: u32,
}

/// Tracks in-flight task ids per host purely for the `in_flight()`
/// introspection operation; it carries no control-flow weight of its own.
#[derive(Default)]
struct InFlight {
    by_host: HashMap<String, Vec<uuid::Uuid>>,
}

pub struct ConcurrencyController {
    slots: std::sync::RwLock<HashMap<String, HostSlot>>,
    in_flight: std::sync::Mutex<InFlight>,
}

/// Owns the permit for one admitted task. Dropping this guard releases
/// the slot on every exit path, including panics, because
/// `OwnedSemaphorePermit`'s drop never unwinds.
pub struct Admission<'a> {
    _permit: OwnedSemaphorePermit,
    host: String,
    task_id: uuid::Uuid,
    controller: &'a ConcurrencyController,
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        self.controller.unregister(&self.host, self.task_id);
    }
}

impl ConcurrencyController {
    pub fn new() -> Self {
        Self {
            slots: std::sync::RwLock::new(HashMap::new()),
            in_flight: std::sync::Mutex::new(InFlight::default()),
        }
    }

    pub fn register_host(&self, host: &str, max_concurrent: u32) {
        let mut slots = self.slots.write().expect("concurrency slots lock poisoned");
        slots.entry(host.to_string()).or_insert_with(|| HostSlot {
            semaphore: Arc::new(Semaphore::new(max_concurrent as usize)),
            max_concurrent,
        });
    }

    fn semaphore_for(&self, host: &str) -> Arc<Semaphore> {
        {
            let slots = self.slots.read().expect("concurrency slots lock poisoned");
            if let Some(slot) = slots.get(host) {
                return slot.semaphore.clone();
            }
        }
        // Unknown host: behave like the reference dispatcher and grant a
        // single-slot semaphore rather than panicking admission.
        self.register_host(host, 1);
        self.slots
            .read()
            .expect("concurrency slots lock poisoned")
            .get(host)
            .expect("just registered")
            .semaphore
            .clone()
    }

    /// Non-blocking: used by the dispatch loop to decide whether to admit
    /// a task this tick without stalling on a full host.
    pub fn try_acquire(&self, host: &str, task_id: uuid::Uuid) -> Option<Admission<'_>> {
        let semaphore = self.semaphore_for(host);
        let permit = semaphore.try_acquire_owned().ok()?;
        self.register(host, task_id);
        Some(Admission { _permit: permit, host: host.to_string(), task_id, controller: self })
    }

    /// Blocking: used inside an executor once a task has committed to a
    /// host across a retry, where waiting for a slot is correct rather
    /// than deferring to the next tick.
    pub async fn acquire(&self, host: &str, task_id: uuid::Uuid) -> Admission<'_> {
        let semaphore = self.semaphore_for(host);
        let permit = semaphore.acquire_owned().await.expect("semaphore never closed");
        self.register(host, task_id);
        Admission { _permit: permit, host: host.to_string(), task_id, controller: self }
    }

    fn register(&self, host: &str, task_id: uuid::Uuid) {
        let mut in_flight = self.in_flight.lock().expect("in-flight lock poisoned");
        in_flight.by_host.entry(host.to_string()).or_default().push(task_id);
    }

    fn unregister(&self, host: &str, task_id: uuid::Uuid) {
        let mut in_flight = self.in_flight.lock().expect("in-flight lock poisoned");
        if let Some(ids) = in_flight.by_host.get_mut(host) {
            ids.retain(|id| *id != task_id);
        }
    }

    pub fn in_flight(&self) -> HashMap<String, Vec<uuid::Uuid>> {
        self.in_flight.lock().expect("in-flight lock poisoned").by_host.clone()
    }

    pub fn active_count(&self, host: &str) -> usize {
        self.in_flight
            .lock()
            .expect("in-flight lock poisoned")
            .by_host
            .get(host)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn max_concurrent(&self, host: &str) -> Option<u32> {
        self.slots
            .read()
            .expect("concurrency slots lock poisoned")
            .get(host)
            .map(|s| s.max_concurrent)
    }
}

impl Default for ConcurrencyController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn try_acquire_respects_capacity() {
        let controller = ConcurrencyController::new();
        controller.register_host("h1", 1);

        let t1 = uuid::Uuid::new_v4();
        let t2 = uuid::Uuid::new_v4();

        let a1 = controller.try_acquire("h1", t1);
        assert!(a1.is_some());
        assert!(controller.try_acquire("h1", t2).is_none());
        assert_eq!(controller.active_count("h1"), 1);

        drop(a1);
        assert_eq!(controller.active_count("h1"), 0);
        assert!(controller.try_acquire("h1", t2).is_some());
    }

    #[tokio::test]
    async fn unknown_host_gets_single_slot() {
        let controller = ConcurrencyController::new();
        let id = uuid::Uuid::new_v4();
        assert!(controller.try_acquire("never-registered", id).is_some());
        assert_eq!(controller.max_concurrent("never-registered"), Some(1));
    }

    #[tokio::test]
    async fn blocking_acquire_waits_for_release() {
        let controller = Arc::new(ConcurrencyController::new());
        controller.register_host("h1", 1);
        let t1 = uuid::Uuid::new_v4();
        let t2 = uuid::Uuid::new_v4();

        let first = controller.try_acquire("h1", t1).unwrap();

        let c2 = controller.clone();
        let waiter = tokio::spawn(async move {
            let _admission = c2.acquire("h1", t2).await;
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(first);
        waiter.await.unwrap();
    }
}
