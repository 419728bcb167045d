use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Zero-argument "connection recovered" callback
pub type ReconnectListener = Arc<dyn Fn() + Send + Sync + 'static>;

/// Handle returned on registration, used to unregister
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// Result of one notification round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifyReport {
    pub invoked: usize,
    pub failed: usize,
}

/// Thread-safe ordered list of reconnect listeners
pub struct ListenerRegistry {
    entries: Mutex<Vec<(ListenerId, ReconnectListener)>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Add a listener. The same closure added twice gets two ids and runs twice per round.
    pub fn add(&self, listener: ReconnectListener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut entries = self.entries.lock();
        entries.push((id, listener));
        tracing::debug!("Reconnect listener {} added. Total: {}", id, entries.len());
        id
    }

    /// Remove a listener. Unknown ids are ignored.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        let removed = entries.len() != before;
        if removed {
            tracing::debug!("Reconnect listener {} removed. Remaining: {}", id, entries.len());
        }
        removed
    }

    /// Add a listener that is removed when the returned guard drops
    pub fn listen(self: &Arc<Self>, listener: ReconnectListener) -> ListenerGuard {
        let id = self.add(listener);
        ListenerGuard {
            registry: Arc::downgrade(self),
            id,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn contains(&self, id: ListenerId) -> bool {
        self.entries.lock().iter().any(|(entry_id, _)| *entry_id == id)
    }

    /// Invoke every listener registered at call time, in registration order.
    ///
    /// The list is snapshotted first and the lock released, so listeners may
    /// add or remove listeners; those changes apply to the next round. A
    /// panicking listener is logged and skipped.
    pub fn notify_all(&self) -> NotifyReport {
        self.snapshot().notify()
    }

    /// Listeners registered right now, in registration order
    pub fn snapshot(&self) -> ListenerSnapshot {
        ListenerSnapshot {
            entries: self.entries.lock().clone(),
        }
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Listener list frozen at the moment a round began
pub struct ListenerSnapshot {
    entries: Vec<(ListenerId, ReconnectListener)>,
}

impl ListenerSnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run the round. Must be called without any registry lock held.
    pub fn notify(self) -> NotifyReport {
        let mut report = NotifyReport::default();

        for (id, listener) in self.entries {
            report.invoked += 1;
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| listener())) {
                report.failed += 1;
                tracing::error!(
                    "Reconnect listener {} panicked: {}",
                    id,
                    panic_message(payload.as_ref())
                );
            }
        }

        report
    }
}

/// Registration that lasts as long as this guard
#[must_use = "the listener is removed as soon as the guard is dropped"]
pub struct ListenerGuard {
    registry: Weak<ListenerRegistry>,
    id: ListenerId,
}

impl ListenerGuard {
    pub fn id(&self) -> ListenerId {
        self.id
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, ReconnectListener) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, Arc::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[test]
    fn test_add_remove() {
        let registry = ListenerRegistry::new();
        let (_, listener) = counter();

        let id = registry.add(listener);
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(id));

        assert!(registry.remove(id));
        assert!(registry.is_empty());
        assert!(!registry.remove(id));
    }

    #[test]
    fn test_duplicate_registration_runs_twice() {
        let registry = ListenerRegistry::new();
        let (count, listener) = counter();

        let first = registry.add(Arc::clone(&listener));
        let second = registry.add(listener);
        assert_ne!(first, second);

        let report = registry.notify_all();
        assert_eq!(report.invoked, 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let registry = ListenerRegistry::new();
        let (count, listener) = counter();

        registry.add(Arc::new(|| panic!("refetch failed")));
        registry.add(listener);

        let report = registry.notify_all();
        assert_eq!(report, NotifyReport { invoked: 2, failed: 1 });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_added_during_round_waits_for_next() {
        let registry = Arc::new(ListenerRegistry::new());
        let (count, late) = counter();

        let reg = Arc::clone(&registry);
        registry.add(Arc::new(move || {
            reg.add(Arc::clone(&late));
        }));

        registry.notify_all();
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(registry.len(), 2);

        registry.notify_all();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_snapshot_ignores_later_registrations() {
        let registry = ListenerRegistry::new();
        let (early, first) = counter();
        let (late, second) = counter();

        registry.add(first);
        let snapshot = registry.snapshot();
        registry.add(second);

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.notify().invoked, 1);
        assert_eq!(early.load(Ordering::SeqCst), 1);
        assert_eq!(late.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_guard_removes_on_drop() {
        let registry = Arc::new(ListenerRegistry::new());
        let (_, listener) = counter();

        let guard = registry.listen(listener);
        assert!(registry.contains(guard.id()));
        drop(guard);
        assert!(registry.is_empty());
    }
}
