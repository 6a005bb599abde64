//! Listener registry
//!
//! Listeners are identified by `Arc` identity, so registering the same
//! handle twice for one kind keeps a single entry.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::event::{ClientEvent, EventKind};

/// Callback invoked for every event of the kind it is registered for
pub type Listener = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

/// Wrap a closure into a [`Listener`] handle
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&ClientEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

fn same_listener(a: &Listener, b: &Listener) -> bool {
    // Compare data pointers only; vtable pointers are not unique.
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Mapping from event kind to its registered listeners
#[derive(Default)]
pub struct ListenerRegistry {
    by_kind: HashMap<EventKind, Vec<Listener>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; returns false if it was already registered
    pub fn add(&mut self, kind: EventKind, listener: Listener) -> bool {
        let entries = self.by_kind.entry(kind).or_default();
        if entries.iter().any(|l| same_listener(l, &listener)) {
            return false;
        }
        entries.push(listener);
        true
    }

    /// Unregister a listener; returns false if it was not registered
    pub fn remove(&mut self, kind: EventKind, listener: &Listener) -> bool {
        let Some(entries) = self.by_kind.get_mut(&kind) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|l| !same_listener(l, listener));
        let removed = entries.len() != before;
        if entries.is_empty() {
            self.by_kind.remove(&kind);
        }
        removed
    }

    pub fn contains(&self, kind: EventKind, listener: &Listener) -> bool {
        self.by_kind
            .get(&kind)
            .is_some_and(|entries| entries.iter().any(|l| same_listener(l, listener)))
    }

    pub fn len(&self, kind: EventKind) -> usize {
        self.by_kind.get(&kind).map_or(0, Vec::len)
    }

    pub fn clear(&mut self) {
        self.by_kind.clear();
    }

    fn snapshot(&self, kind: EventKind) -> Vec<Listener> {
        self.by_kind.get(&kind).cloned().unwrap_or_default()
    }
}

/// Deliver an event to every listener of its kind, in registration order
///
/// The registry lock is never held while a listener runs, so listeners may
/// call `on`/`off`/`send`/`close`. A listener removed during delivery is
/// skipped; one added during delivery only sees later events.
pub(crate) fn dispatch(registry: &Mutex<ListenerRegistry>, event: &ClientEvent) {
    let kind = event.kind();
    let snapshot = registry.lock().snapshot(kind);

    for listener in snapshot {
        let still_registered = registry.lock().contains(kind, &listener);
        if still_registered {
            listener(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Listener, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (listener(move |_| { c.fetch_add(1, Ordering::SeqCst); }), count)
    }

    #[test]
    fn test_duplicate_registration_is_noop() {
        let mut registry = ListenerRegistry::new();
        let (l, _) = counter();

        assert!(registry.add(EventKind::Open, l.clone()));
        assert!(!registry.add(EventKind::Open, l.clone()));
        assert_eq!(registry.len(EventKind::Open), 1);

        // Same handle under another kind is a separate registration
        assert!(registry.add(EventKind::Close, l));
        assert_eq!(registry.len(EventKind::Close), 1);
    }

    #[test]
    fn test_remove() {
        let mut registry = ListenerRegistry::new();
        let (a, _) = counter();
        let (b, _) = counter();
        registry.add(EventKind::Message, a.clone());
        registry.add(EventKind::Message, b.clone());

        assert!(registry.remove(EventKind::Message, &a));
        assert!(!registry.remove(EventKind::Message, &a));
        assert!(!registry.contains(EventKind::Message, &a));
        assert!(registry.contains(EventKind::Message, &b));
        assert!(!registry.remove(EventKind::Error, &b));
    }

    #[test]
    fn test_dispatch_invokes_each_once_in_order() {
        let registry = Mutex::new(ListenerRegistry::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        for id in 0..3 {
            let order = order.clone();
            let l = listener(move |_| order.lock().push(id));
            registry.lock().add(EventKind::Open, l.clone());
            registry.lock().add(EventKind::Open, l);
        }

        dispatch(&registry, &ClientEvent::Open);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_dispatch_only_matching_kind() {
        let registry = Mutex::new(ListenerRegistry::new());
        let (l, count) = counter();
        registry.lock().add(EventKind::Close, l);

        dispatch(&registry, &ClientEvent::Open);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_listener_removed_mid_dispatch_is_skipped() {
        let registry = Arc::new(Mutex::new(ListenerRegistry::new()));
        let (victim, victim_count) = counter();

        let reg = registry.clone();
        let v = victim.clone();
        let remover = listener(move |_| {
            reg.lock().remove(EventKind::Open, &v);
        });

        registry.lock().add(EventKind::Open, remover);
        registry.lock().add(EventKind::Open, victim);

        dispatch(&registry, &ClientEvent::Open);
        assert_eq!(victim_count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_listener_added_mid_dispatch_waits_for_next_event() {
        let registry = Arc::new(Mutex::new(ListenerRegistry::new()));
        let (late, late_count) = counter();

        let reg = registry.clone();
        let adder = listener(move |_| {
            reg.lock().add(EventKind::Open, late.clone());
        });
        registry.lock().add(EventKind::Open, adder);

        dispatch(&registry, &ClientEvent::Open);
        assert_eq!(late_count.load(Ordering::SeqCst), 0);

        dispatch(&registry, &ClientEvent::Open);
        assert_eq!(late_count.load(Ordering::SeqCst), 1);
    }
}
