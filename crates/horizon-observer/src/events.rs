//! Named publish/subscribe emitter.
//!
//! [`Events<P>`] keeps an ordered list of listeners per event name and
//! dispatches a shared payload of type `P` to them. Every observable type in
//! this crate ([`Observer`](crate::Observer), [`ObserverList`](crate::ObserverList),
//! [`History`](crate::History)) owns one and exposes it through `events()`.
//!
//! # Dispatch rules
//!
//! - Listeners run in registration order.
//! - Emission works on a snapshot of the listener list, so listeners that
//!   subscribe or unsubscribe during dispatch only affect later emissions.
//! - A panicking listener is contained and logged; the remaining listeners
//!   and any forwarded emitters still receive the event.
//! - A suspended emitter drops every emission.
//!
//! # Example
//!
//! ```
//! use horizon_observer::Events;
//!
//! let events = Events::<i32>::new();
//! let handle = events.on("changed", |value| println!("changed to {value}"));
//!
//! events.emit("changed", &42);
//! handle.unbind();
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use slotmap::{new_key_type, SlotMap};

use crate::logging::targets;

new_key_type! {
    /// Identifier of one registered listener.
    ///
    /// Returned inside an [`EventHandle`]; valid until the listener is
    /// unbound or the emitter is cleared.
    pub struct ConnectionId;
}

/// A listener callback shared between the emitter and its handles.
pub type Listener<P> = Arc<dyn Fn(&P) + Send + Sync>;

struct Connection<P> {
    slot: Listener<P>,
    once: bool,
}

struct Registry<P> {
    connections: SlotMap<ConnectionId, Connection<P>>,
    by_name: HashMap<String, Vec<ConnectionId>>,
}

impl<P> Registry<P> {
    fn new() -> Self {
        Self {
            connections: SlotMap::with_key(),
            by_name: HashMap::new(),
        }
    }

    fn remove(&mut self, name: &str, id: ConnectionId) -> bool {
        let Some(ids) = self.by_name.get_mut(name) else {
            return false;
        };
        let before = ids.len();
        ids.retain(|&other| other != id);
        let removed = ids.len() != before;
        if ids.is_empty() {
            self.by_name.remove(name);
        }
        if removed {
            self.connections.remove(id);
        }
        removed
    }
}

struct EventsInner<P> {
    registry: Mutex<Registry<P>>,
    suspended: AtomicBool,
    forwards: Mutex<Vec<Weak<EventsInner<P>>>>,
}

/// A named multi-listener event emitter.
///
/// `Events<P>` is a cheap handle; clones share the same listeners.
pub struct Events<P> {
    inner: Arc<EventsInner<P>>,
}

impl<P> Clone for Events<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: 'static> Default for Events<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: 'static> fmt::Debug for Events<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Events")
            .field("connections", &self.connection_count())
            .field("suspended", &self.is_suspended())
            .finish()
    }
}

impl<P: 'static> Events<P> {
    /// Create an emitter with no listeners.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EventsInner {
                registry: Mutex::new(Registry::new()),
                suspended: AtomicBool::new(false),
                forwards: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register `listener` under `name`.
    pub fn on<F>(&self, name: impl Into<String>, listener: F) -> EventHandle<P>
    where
        F: Fn(&P) + Send + Sync + 'static,
    {
        self.connect(name.into(), Arc::new(listener), false)
    }

    /// Register a shared listener under `name`.
    ///
    /// Registering the same `Arc` twice for one name is a no-op that returns
    /// a handle to the existing registration.
    pub fn on_shared(&self, name: impl Into<String>, listener: Listener<P>) -> EventHandle<P> {
        self.connect(name.into(), listener, false)
    }

    /// Register a listener that unbinds itself after its first invocation.
    pub fn once<F>(&self, name: impl Into<String>, listener: F) -> EventHandle<P>
    where
        F: Fn(&P) + Send + Sync + 'static,
    {
        self.connect(name.into(), Arc::new(listener), true)
    }

    fn connect(&self, name: String, slot: Listener<P>, once: bool) -> EventHandle<P> {
        let mut registry = self.inner.registry.lock();
        let existing = registry.by_name.get(&name).and_then(|ids| {
            ids.iter().copied().find(|&id| {
                registry
                    .connections
                    .get(id)
                    .is_some_and(|conn| Arc::ptr_eq(&conn.slot, &slot))
            })
        });
        let id = match existing {
            Some(id) => id,
            None => {
                let id = registry.connections.insert(Connection { slot, once });
                registry.by_name.entry(name.clone()).or_default().push(id);
                id
            }
        };
        drop(registry);

        EventHandle {
            emitter: Arc::downgrade(&self.inner),
            name,
            id,
        }
    }

    /// Dispatch `payload` to every listener registered under `name`, then
    /// forward it to every additional emitter.
    #[tracing::instrument(skip_all, target = "horizon_observer::events", level = "trace", fields(event = name))]
    pub fn emit(&self, name: &str, payload: &P) {
        if self.is_suspended() {
            tracing::trace!(target: targets::EVENTS, "emitter suspended, skipping emit");
            return;
        }

        let snapshot: Vec<Listener<P>> = {
            let mut registry = self.inner.registry.lock();
            let ids = registry.by_name.get(name).cloned().unwrap_or_default();
            let mut slots = Vec::with_capacity(ids.len());
            for id in ids {
                let Some(conn) = registry.connections.get(id) else {
                    continue;
                };
                slots.push(conn.slot.clone());
                if conn.once {
                    registry.remove(name, id);
                }
            }
            slots
        };

        tracing::trace!(target: targets::EVENTS, listeners = snapshot.len(), "emitting event");

        for slot in snapshot {
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| slot(payload))) {
                tracing::error!(
                    target: targets::EVENTS,
                    event = name,
                    message = %panic_message(panic.as_ref()),
                    "listener panicked"
                );
            }
        }

        let forwards: Vec<Events<P>> = self
            .inner
            .forwards
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .map(|inner| Events { inner })
            .collect();
        for emitter in forwards {
            emitter.emit(name, payload);
        }
    }

    /// Remove one listener by connection id.
    ///
    /// Returns `true` if the listener was registered under `name`.
    pub fn disconnect(&self, name: &str, id: ConnectionId) -> bool {
        self.inner.registry.lock().remove(name, id)
    }

    /// Remove one shared listener from `name`, matched by identity.
    pub fn unbind_listener(&self, name: &str, listener: &Listener<P>) -> bool {
        let mut registry = self.inner.registry.lock();
        let found = registry.by_name.get(name).and_then(|ids| {
            ids.iter().copied().find(|&id| {
                registry
                    .connections
                    .get(id)
                    .is_some_and(|conn| Arc::ptr_eq(&conn.slot, listener))
            })
        });
        match found {
            Some(id) => registry.remove(name, id),
            None => false,
        }
    }

    /// Remove every listener registered under `name`.
    pub fn unbind(&self, name: &str) {
        let mut registry = self.inner.registry.lock();
        if let Some(ids) = registry.by_name.remove(name) {
            for id in ids {
                registry.connections.remove(id);
            }
        }
    }

    /// Remove every listener for every event.
    pub fn unbind_all(&self) {
        let mut registry = self.inner.registry.lock();
        registry.by_name.clear();
        registry.connections.clear();
    }

    /// Number of listeners registered under `name`.
    pub fn listener_count(&self, name: &str) -> usize {
        self.inner
            .registry
            .lock()
            .by_name
            .get(name)
            .map_or(0, Vec::len)
    }

    /// Total number of registered listeners.
    pub fn connection_count(&self) -> usize {
        self.inner.registry.lock().connections.len()
    }

    /// Suspend or resume emission.
    pub fn set_suspended(&self, suspended: bool) {
        self.inner.suspended.store(suspended, Ordering::SeqCst);
    }

    /// Whether emission is currently suspended.
    pub fn is_suspended(&self) -> bool {
        self.inner.suspended.load(Ordering::SeqCst)
    }

    /// Forward every emission of this emitter to `other` as well.
    ///
    /// Adding the same emitter twice, or an emitter to itself, does nothing.
    pub fn add_emitter(&self, other: &Events<P>) {
        if self.ptr_eq(other) {
            return;
        }
        let mut forwards = self.inner.forwards.lock();
        forwards.retain(|weak| weak.strong_count() > 0);
        let target = Arc::downgrade(&other.inner);
        if !forwards.iter().any(|weak| weak.ptr_eq(&target)) {
            forwards.push(target);
        }
    }

    /// Stop forwarding emissions to `other`. No-op if it was never added.
    pub fn remove_emitter(&self, other: &Events<P>) {
        let target = Arc::downgrade(&other.inner);
        self.inner
            .forwards
            .lock()
            .retain(|weak| weak.strong_count() > 0 && !weak.ptr_eq(&target));
    }

    /// Whether both handles refer to the same emitter.
    pub fn ptr_eq(&self, other: &Events<P>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Handle returned by [`Events::on`] and [`Events::once`].
///
/// Dropping the handle keeps the listener registered; call
/// [`unbind`](Self::unbind) to remove it.
pub struct EventHandle<P> {
    emitter: Weak<EventsInner<P>>,
    name: String,
    id: ConnectionId,
}

impl<P> Clone for EventHandle<P> {
    fn clone(&self) -> Self {
        Self {
            emitter: self.emitter.clone(),
            name: self.name.clone(),
            id: self.id,
        }
    }
}

impl<P> fmt::Debug for EventHandle<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandle")
            .field("name", &self.name)
            .field("id", &self.id)
            .finish()
    }
}

impl<P> EventHandle<P> {
    /// The event name this handle was registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The connection id of the registered listener.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remove the listener. Returns `false` if it was already gone.
    pub fn unbind(&self) -> bool {
        match self.emitter.upgrade() {
            Some(inner) => inner.registry.lock().remove(&self.name, self.id),
            None => false,
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_on_emit_in_registration_order() {
        let events = Events::<i32>::new();
        let received = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let received = received.clone();
            events.on("value", move |&v| received.lock().push((tag, v)));
        }

        events.emit("value", &7);
        assert_eq!(*received.lock(), vec![("a", 7), ("b", 7), ("c", 7)]);
    }

    #[test]
    fn test_same_listener_registered_once() {
        let events = Events::<()>::new();
        let count = Arc::new(Mutex::new(0));
        let count_clone = count.clone();
        let listener: Listener<()> = Arc::new(move |_| *count_clone.lock() += 1);

        let first = events.on_shared("tick", listener.clone());
        let second = events.on_shared("tick", listener.clone());
        assert_eq!(first.id(), second.id());
        assert_eq!(events.listener_count("tick"), 1);

        events.emit("tick", &());
        assert_eq!(*count.lock(), 1);

        assert!(events.unbind_listener("tick", &listener));
        assert_eq!(events.listener_count("tick"), 0);
    }

    #[test]
    fn test_once_fires_a_single_time() {
        let events = Events::<i32>::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();
        events.once("value", move |&v| received_clone.lock().push(v));

        events.emit("value", &1);
        events.emit("value", &2);
        assert_eq!(*received.lock(), vec![1]);
        assert_eq!(events.connection_count(), 0);
    }

    #[test]
    fn test_handle_unbind() {
        let events = Events::<i32>::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();
        let handle = events.on("value", move |&v| received_clone.lock().push(v));

        events.emit("value", &1);
        assert!(handle.unbind());
        assert!(!handle.unbind());
        events.emit("value", &2);
        assert_eq!(*received.lock(), vec![1]);
    }

    #[test]
    fn test_unbind_by_name_and_all() {
        let events = Events::<()>::new();
        events.on("a", |_| {});
        events.on("a", |_| {});
        events.on("b", |_| {});

        events.unbind("a");
        assert_eq!(events.listener_count("a"), 0);
        assert_eq!(events.listener_count("b"), 1);

        events.unbind_all();
        assert_eq!(events.connection_count(), 0);
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let events = Events::<i32>::new();
        let received = Arc::new(Mutex::new(Vec::new()));

        events.on("value", |_| panic!("listener failure"));
        let received_clone = received.clone();
        events.on("value", move |&v| received_clone.lock().push(v));

        events.emit("value", &5);
        assert_eq!(*received.lock(), vec![5]);
    }

    #[test]
    fn test_listeners_added_during_emit_wait_for_next_emit() {
        let events = Events::<i32>::new();
        let received = Arc::new(Mutex::new(Vec::new()));

        let events_clone = events.clone();
        let received_clone = received.clone();
        events.once("value", move |_| {
            let received = received_clone.clone();
            events_clone.on("value", move |&v| received.lock().push(v));
        });

        events.emit("value", &1);
        assert!(received.lock().is_empty());
        events.emit("value", &2);
        assert_eq!(*received.lock(), vec![2]);
    }

    #[test]
    fn test_suspended_emitter_drops_events() {
        let events = Events::<i32>::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();
        events.on("value", move |&v| received_clone.lock().push(v));

        events.set_suspended(true);
        events.emit("value", &1);
        events.set_suspended(false);
        events.emit("value", &2);
        assert_eq!(*received.lock(), vec![2]);
    }

    #[test]
    fn test_forwarding_to_additional_emitters() {
        let source = Events::<i32>::new();
        let target = Events::<i32>::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();
        target.on("value", move |&v| received_clone.lock().push(v));

        source.add_emitter(&target);
        source.add_emitter(&target);
        source.emit("value", &3);
        assert_eq!(*received.lock(), vec![3]);

        source.remove_emitter(&target);
        source.emit("value", &4);
        assert_eq!(*received.lock(), vec![3]);
    }

    #[test]
    fn test_forwarding_survives_panicking_listener() {
        let source = Events::<i32>::new();
        let target = Events::<i32>::new();
        let received = Arc::new(Mutex::new(Vec::new()));

        source.on("value", |_| panic!("boom"));
        let received_clone = received.clone();
        target.on("value", move |&v| received_clone.lock().push(v));
        source.add_emitter(&target);

        source.emit("value", &9);
        assert_eq!(*received.lock(), vec![9]);
    }
}
