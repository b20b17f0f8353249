//! Publish/subscribe plumbing shared by the tracker and the layout store
//!
//! Two independent channels per publisher:
//! - registered callbacks, invoked synchronously in registration order, each
//!   isolated so an error or panic in one does not stop the rest
//! - a `tokio::sync::broadcast` stream for reactive subscribers

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Callback invoked for each published value
pub type Callback<T> = Arc<dyn Fn(&T) -> Result<()> + Send + Sync>;

/// Handle returned on registration, used to deregister
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Default buffer for lagging stream subscribers
pub const DEFAULT_STREAM_CAPACITY: usize = 256;

/// Callback list plus broadcast stream for one kind of value
pub struct Broadcaster<T> {
    label: &'static str,
    listeners: Mutex<Vec<(ListenerId, Callback<T>)>>,
    next_id: AtomicU64,
    stream: broadcast::Sender<T>,
}

impl<T: Clone + Send + 'static> Broadcaster<T> {
    /// Create a broadcaster; `label` only appears in log output
    pub fn new(label: &'static str) -> Self {
        Self::with_capacity(label, DEFAULT_STREAM_CAPACITY)
    }

    pub fn with_capacity(label: &'static str, capacity: usize) -> Self {
        let (stream, _) = broadcast::channel(capacity.max(1));
        Self {
            label,
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            stream,
        }
    }

    /// Register a callback. Callbacks run in registration order.
    pub fn add_listener<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&T) -> Result<()> + Send + Sync + 'static,
    {
        self.add_callback(Arc::new(callback))
    }

    /// Register an already shared callback
    pub fn add_callback(&self, callback: Callback<T>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, callback));
        debug!("Registered {} listener {:?}", self.label, id);
        id
    }

    /// Deregister a callback. Unknown ids are ignored.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        let removed = listeners.len() < before;
        if removed {
            debug!("Removed {} listener {:?}", self.label, id);
        }
        removed
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Subscribe to the broadcast stream
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.stream.subscribe()
    }

    /// Invoke every callback with `value`; returns the number that failed
    pub fn notify_listeners(&self, value: &T) -> usize {
        // Snapshot so callbacks may (de)register without deadlocking
        let snapshot: Vec<(ListenerId, Callback<T>)> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut failures = 0;
        for (id, callback) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| callback(value))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    warn!("{} listener {:?} failed: {}", self.label, id, e);
                }
                Err(panic) => {
                    failures += 1;
                    warn!("{} listener {:?} panicked: {}", self.label, id, panic_message(&panic));
                }
            }
        }
        failures
    }

    /// Notify callbacks, then push `value` onto the stream
    pub fn publish(&self, value: T) {
        self.notify_listeners(&value);
        // No subscribers is not an error
        let _ = self.stream.send(value);
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listeners_run_in_registration_order() {
        let bus: Broadcaster<u32> = Broadcaster::new("test");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s1 = seen.clone();
        bus.add_listener(move |v| {
            s1.lock().unwrap().push(("first", *v));
            Ok(())
        });
        let s2 = seen.clone();
        bus.add_listener(move |v| {
            s2.lock().unwrap().push(("second", *v));
            Ok(())
        });

        bus.publish(7);
        assert_eq!(*seen.lock().unwrap(), vec![("first", 7), ("second", 7)]);
    }

    #[tokio::test]
    async fn test_failing_listener_is_isolated() {
        let bus: Broadcaster<u32> = Broadcaster::new("test");
        let mut rx = bus.subscribe();
        let hits = Arc::new(AtomicU64::new(0));

        bus.add_listener(|_| anyhow::bail!("boom"));
        bus.add_listener(|_| panic!("listener panic"));
        let h = hits.clone();
        bus.add_listener(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(bus.notify_listeners(&1), 2);
        bus.publish(2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(rx.recv().await.unwrap(), 2);
    }

    #[test]
    fn test_remove_listener() {
        let bus: Broadcaster<u32> = Broadcaster::new("test");
        let id = bus.add_listener(|_| Ok(()));
        assert_eq!(bus.listener_count(), 1);
        assert!(bus.remove_listener(id));
        assert!(!bus.remove_listener(id));
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_listener_can_register_during_notify() {
        let bus: Arc<Broadcaster<u32>> = Arc::new(Broadcaster::new("test"));
        let inner = bus.clone();
        bus.add_listener(move |_| {
            inner.add_listener(|_| Ok(()));
            Ok(())
        });
        bus.publish(1);
        assert_eq!(bus.listener_count(), 2);
    }
}
