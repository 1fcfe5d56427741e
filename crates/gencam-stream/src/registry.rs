//! Subscriber registry shared between connection tasks and the producer.
//!
//! One mutex guards the subscriber map; the condition variable paired with
//! it wakes the producer when the set goes from empty to populated (and on
//! shutdown). Fanout never sends under the lock: the producer snapshots the
//! map and iterates the copy.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

/// Stable identity of one WebSocket connection.
pub(crate) type SubscriberId = u64;

/// Close instruction routed to a connection task, jumping ahead of any
/// queued frames.
#[derive(Clone, Copy, Debug)]
pub(crate) struct CloseCommand {
    pub(crate) code: u16,
    pub(crate) reason: &'static str,
}

/// Per-connection senders held by the registry.
#[derive(Clone)]
pub(crate) struct SubscriberHandle {
    /// Bounded frame queue; its capacity is the backpressure limit.
    pub(crate) frames: mpsc::Sender<Bytes>,
    /// Unbounded control lane for close frames.
    pub(crate) control: mpsc::UnboundedSender<CloseCommand>,
}

pub(crate) struct SubscriberRegistry {
    inner: Mutex<HashMap<SubscriberId, SubscriberHandle>>,
    wake: Condvar,
}

impl SubscriberRegistry {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            wake: Condvar::new(),
        }
    }

    /// Insert a subscriber and wake the producer. Returns false when the
    /// connection was already subscribed (set semantics).
    pub(crate) fn add(&self, id: SubscriberId, handle: SubscriberHandle) -> bool {
        let inserted = self
            .inner
            .lock()
            .unwrap()
            .insert(id, handle)
            .is_none();
        self.wake.notify_all();
        inserted
    }

    pub(crate) fn remove(&self, id: SubscriberId) -> bool {
        self.inner.lock().unwrap().remove(&id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    /// Copy the current subscriber set. Sends happen on the copy so the
    /// lock is never held across socket operations.
    pub(crate) fn snapshot(&self) -> Vec<(SubscriberId, SubscriberHandle)> {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .map(|(id, handle)| (*id, handle.clone()))
            .collect()
    }

    /// Block until the set is non-empty or `stop` is raised. The wait is
    /// sliced so a missed notification cannot park the producer forever.
    pub(crate) fn park_while_empty(&self, stop: &AtomicBool, slice: Duration) {
        let mut guard = self.inner.lock().unwrap();
        while guard.is_empty() && !stop.load(Ordering::SeqCst) {
            let (next, _) = self.wake.wait_timeout(guard, slice).unwrap();
            guard = next;
        }
    }

    /// Park for at most `delay`, waking early on subscriber changes or
    /// shutdown. Used to pace camera-open retries.
    pub(crate) fn retry_delay(&self, stop: &AtomicBool, delay: Duration) {
        let guard = self.inner.lock().unwrap();
        if !stop.load(Ordering::SeqCst) {
            let _ = self.wake.wait_timeout(guard, delay).unwrap();
        }
    }

    /// Wake a parked producer without changing the set (shutdown path).
    pub(crate) fn notify_all(&self) {
        self.wake.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    fn handle() -> SubscriberHandle {
        let (frames, _frames_rx) = mpsc::channel(4);
        let (control, _control_rx) = mpsc::unbounded_channel();
        SubscriberHandle { frames, control }
    }

    #[test]
    fn add_has_set_semantics() {
        let registry = SubscriberRegistry::new();
        assert!(registry.add(7, handle()));
        assert!(!registry.add(7, handle()));
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(7));
        assert!(!registry.remove(7));
        assert!(registry.is_empty());
    }

    #[test]
    fn snapshot_is_a_copy() {
        let registry = SubscriberRegistry::new();
        registry.add(1, handle());
        registry.add(2, handle());
        let snapshot = registry.snapshot();
        registry.remove(1);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn add_wakes_a_parked_thread() {
        let registry = Arc::new(SubscriberRegistry::new());
        let stop = Arc::new(AtomicBool::new(false));

        let parked = {
            let registry = registry.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                let start = Instant::now();
                registry.park_while_empty(&stop, Duration::from_secs(5));
                start.elapsed()
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        registry.add(1, handle());
        let waited = parked.join().unwrap();
        assert!(waited < Duration::from_secs(2));
    }

    #[test]
    fn stop_flag_releases_a_parked_thread() {
        let registry = Arc::new(SubscriberRegistry::new());
        let stop = Arc::new(AtomicBool::new(false));

        let parked = {
            let registry = registry.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                registry.park_while_empty(&stop, Duration::from_secs(5));
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        stop.store(true, Ordering::SeqCst);
        registry.notify_all();
        parked.join().unwrap();
    }
}
