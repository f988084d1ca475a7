//! Listener fan-out.
//!
//! Listeners are stored copy-on-write: registering or removing one swaps in
//! a fresh `Arc<Vec<_>>`, and every notification iterates the snapshot that
//! was current when it started.  A listener added from inside a callback is
//! therefore only seen by the *next* event, and removing one mid-iteration
//! never invalidates the loop.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::protocol::ChatMessage;
use crate::types::ConnectionState;
use crate::world::Entity;

/// Observer of session lifecycle and world updates.
///
/// Every method has an empty default, so implementors only override what
/// they care about.  Callbacks run on whichever thread produced the event
/// (transport delivery thread, tick thread, or the caller of
/// `connect`/`disconnect`) and may call back into the session.
pub trait SessionListener: Send + Sync {
    fn on_state_changed(&self, _state: ConnectionState) {}
    fn on_connect(&self) {}
    fn on_disconnect(&self, _reason: &str) {}
    fn on_chat(&self, _message: &ChatMessage) {}
    fn on_tick(&self) {}
    fn on_entity_spawn(&self, _entity: &Entity) {}
    fn on_entity_destroy(&self, _entity: &Entity) {}
    fn on_entity_update(&self, _entity: &Entity) {}
}

/// Handle returned on registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

type Entry = (ListenerId, Arc<dyn SessionListener>);

#[derive(Default)]
pub struct ListenerSet {
    entries: RwLock<Arc<Vec<Entry>>>,
    next_id: AtomicU64,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn SessionListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut entries = self.entries.write();
        let mut next = Vec::with_capacity(entries.len() + 1);
        next.extend(entries.iter().cloned());
        next.push((id, listener));
        *entries = Arc::new(next);
        id
    }

    /// Returns `false` if `id` was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.write();
        if !entries.iter().any(|(lid, _)| *lid == id) {
            return false;
        }
        let next: Vec<Entry> = entries
            .iter()
            .filter(|(lid, _)| *lid != id)
            .cloned()
            .collect();
        *entries = Arc::new(next);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call `f` for every listener in registration order.
    ///
    /// A panicking listener does not stop the fan-out; its panic message is
    /// returned so the caller can report it.
    pub fn notify<F>(&self, f: F) -> Vec<String>
    where
        F: Fn(&dyn SessionListener),
    {
        let snapshot = Arc::clone(&self.entries.read());
        let mut failures = Vec::new();
        for (_, listener) in snapshot.iter() {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| f(listener.as_ref()))) {
                failures.push(panic_message(payload.as_ref()));
            }
        }
        failures
    }
}

impl std::fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSet")
            .field("listeners", &self.len())
            .finish()
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "listener panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        name: &'static str,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl SessionListener for Recorder {
        fn on_tick(&self) {
            self.seen.lock().push(self.name.to_string());
        }
    }

    struct Panicker;

    impl SessionListener for Panicker {
        fn on_tick(&self) {
            panic!("boom");
        }
    }

    #[test]
    fn notifies_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let set = ListenerSet::new();
        for name in ["a", "b", "c"] {
            set.add(Arc::new(Recorder {
                name,
                seen: seen.clone(),
            }));
        }
        set.notify(|l| l.on_tick());
        assert_eq!(*seen.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn remove_unregisters_only_that_listener() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let set = ListenerSet::new();
        let a = set.add(Arc::new(Recorder {
            name: "a",
            seen: seen.clone(),
        }));
        set.add(Arc::new(Recorder {
            name: "b",
            seen: seen.clone(),
        }));
        assert!(set.remove(a));
        assert!(!set.remove(a));
        set.notify(|l| l.on_tick());
        assert_eq!(*seen.lock(), vec!["b"]);
    }

    #[test]
    fn panicking_listener_does_not_stop_fan_out() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let set = ListenerSet::new();
        set.add(Arc::new(Panicker));
        set.add(Arc::new(Recorder {
            name: "after",
            seen: seen.clone(),
        }));
        let failures = set.notify(|l| l.on_tick());
        assert_eq!(failures, vec!["boom".to_string()]);
        assert_eq!(*seen.lock(), vec!["after"]);
    }

    struct Registrar {
        set: Arc<ListenerSet>,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl SessionListener for Registrar {
        fn on_tick(&self) {
            self.set.add(Arc::new(Recorder {
                name: "late",
                seen: self.seen.clone(),
            }));
        }
    }

    #[test]
    fn listener_added_during_callback_misses_current_event() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let set = Arc::new(ListenerSet::new());
        set.add(Arc::new(Registrar {
            set: set.clone(),
            seen: seen.clone(),
        }));

        set.notify(|l| l.on_tick());
        assert!(seen.lock().is_empty());
        assert_eq!(set.len(), 2);

        set.notify(|l| l.on_tick());
        assert_eq!(*seen.lock(), vec!["late"]);
    }
}
