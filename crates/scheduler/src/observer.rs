//! Typed fan-out of events to a set of listener callables (spec.md §4.1).
//!
//! Grounded on `rkit/patterns/observer.py`'s `ParameterizedObserver`: set
//! semantics (not sequence) so a caller registering the same listener twice
//! only ever gets delivered to once. Listeners are boxed trait objects since
//! Rust has no first-class `Callable` identity comparison the way Python
//! closures do — identity here is keyed by a `ListenerId` handed back from
//! `add`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Opaque handle returned by [`Observer::add`], used to `remove` a listener
/// later without requiring the listener type to be comparable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

fn next_listener_id() -> ListenerId {
    ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
}

type Listener<Args> = Arc<dyn Fn(Args) + Send + Sync + 'static>;

/// Multi-listener fan-out point. `Args` is typically a small tuple.
pub struct Observer<Args: Clone> {
    listeners: Mutex<Vec<(ListenerId, Listener<Args>)>>,
}

impl<Args: Clone> Default for Observer<Args> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Args: Clone> Observer<Args> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Registers a listener, returning the handle to remove it later.
    pub fn add(&self, listener: impl Fn(Args) + Send + Sync + 'static) -> ListenerId {
        let id = next_listener_id();
        self.listeners.lock().unwrap().push((id, Arc::new(listener)));
        id
    }

    /// Deregisters a listener. Returns `true` if it was present.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// `true` if `id` is currently registered.
    pub fn contains(&self, id: ListenerId) -> bool {
        self.listeners
            .lock()
            .unwrap()
            .iter()
            .any(|(existing, _)| *existing == id)
    }

    /// Empties the listener set.
    pub fn clear(&self) {
        self.listeners.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invokes every currently registered listener with a clone of `args`.
    ///
    /// The id list is snapshotted up front so a listener may add or remove
    /// other listeners (or itself) during notification without corrupting
    /// this delivery round (Testable Property 10): newly added listeners
    /// don't see this round, and removed ones are skipped by the lookup
    /// below. The mutex is never held while a listener body runs, so a
    /// listener may legitimately call back into this same observer.
    pub fn notify(&self, args: Args) {
        let ids: Vec<ListenerId> = {
            let listeners = self.listeners.lock().unwrap();
            listeners.iter().map(|(id, _)| *id).collect()
        };

        for id in ids {
            let listener = {
                let listeners = self.listeners.lock().unwrap();
                listeners
                    .iter()
                    .find(|(existing, _)| *existing == id)
                    .map(|(_, listener)| listener.clone())
            };
            let Some(listener) = listener else {
                // Removed by an earlier listener in this same round.
                continue;
            };

            let args = args.clone();
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| listener(args)));

            if let Err(panic) = result {
                let message = panic
                    .downcast_ref::<&str>()
                    .copied()
                    .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
                    .unwrap_or("<non-string panic>");
                tracing::warn!(listener_id = id.0, %message, "listener panicked during notification; continuing with remaining listeners");
            }
        }
    }
}

/// Equality by listener-set (spec.md §4.1), not by identity or registration
/// order — two observers are equal iff the same `ListenerId`s are currently
/// registered on both.
impl<Args: Clone> PartialEq for Observer<Args> {
    fn eq(&self, other: &Self) -> bool {
        let ids = |observer: &Self| -> std::collections::HashSet<ListenerId> {
            observer
                .listeners
                .lock()
                .unwrap()
                .iter()
                .map(|(id, _)| *id)
                .collect()
        };
        ids(self) == ids(other)
    }
}

impl<Args: Clone> Eq for Observer<Args> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tracing_test::{logs_contain, traced_test};

    #[test]
    fn add_and_notify_delivers_to_all_listeners() {
        let observer: Observer<i32> = Observer::new();
        let sum = Arc::new(AtomicUsize::new(0));

        let sum_a = sum.clone();
        observer.add(move |value: i32| {
            sum_a.fetch_add(value as usize, Ordering::SeqCst);
        });
        let sum_b = sum.clone();
        observer.add(move |value: i32| {
            sum_b.fetch_add(value as usize, Ordering::SeqCst);
        });

        observer.notify(5);

        assert_eq!(sum.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn remove_detaches_listener() {
        let observer: Observer<i32> = Observer::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let id = observer.add(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert!(observer.remove(id));
        observer.notify(1);

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!observer.remove(id));
    }

    #[test]
    fn contains_reflects_current_registration() {
        let observer: Observer<i32> = Observer::new();
        let id = observer.add(|_| {});
        assert!(observer.contains(id));
        observer.remove(id);
        assert!(!observer.contains(id));
    }

    #[test]
    fn equality_is_by_listener_set_not_by_registration_order() {
        let a: Observer<i32> = Observer::new();
        let b: Observer<i32> = Observer::new();
        assert_eq!(a, b);

        let id_a1 = a.add(|_| {});
        let id_a2 = a.add(|_| {});
        assert_ne!(a, b);

        // Same ids, registered to `b` in the opposite order.
        b.listeners.lock().unwrap().push((
            id_a2,
            Arc::new(|_: i32| {}),
        ));
        b.listeners.lock().unwrap().push((
            id_a1,
            Arc::new(|_: i32| {}),
        ));
        assert_eq!(a, b);

        a.remove(id_a1);
        assert_ne!(a, b);
    }

    #[test]
    #[traced_test]
    fn listener_panic_is_logged_and_does_not_abort_the_round() {
        let observer: Observer<i32> = Observer::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        observer.add(|_| panic!("boom"));
        observer.add(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        observer.notify(1);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(logs_contain("listener panicked during notification"));
    }

    #[test]
    fn listener_removing_itself_mid_notification_does_not_corrupt_round() {
        let observer: Arc<Observer<i32>> = Arc::new(Observer::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let observer_clone = observer.clone();
        let calls_clone = calls.clone();
        let id_cell: Arc<std::sync::Mutex<Option<ListenerId>>> = Arc::new(std::sync::Mutex::new(None));
        let id_cell_clone = id_cell.clone();
        let id = observer.add(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = *id_cell_clone.lock().unwrap() {
                observer_clone.remove(id);
            }
        });
        *id_cell.lock().unwrap() = Some(id);

        let calls_b = calls.clone();
        observer.add(move |_| {
            calls_b.fetch_add(1, Ordering::SeqCst);
        });

        observer.notify(1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(observer.len(), 1);

        observer.notify(1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
