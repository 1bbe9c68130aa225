//! Listener registry for one stream.
//!
//! The bus maps event kinds to listeners and dispatches synchronously. It has
//! no stream behavior of its own: mode switches triggered by subscribing live
//! in the Readable's `on`/`off` wrappers, not here.
//!
//! # Example
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use wirestream::events::{Event, EventBus, EventKind};
//!
//! let bus = EventBus::new();
//! let hits = Rc::new(Cell::new(0));
//!
//! let h = hits.clone();
//! let id = bus.on(EventKind::Drain, move |_| h.set(h.get() + 1));
//!
//! bus.emit(&Event::Drain);
//! assert!(bus.off(EventKind::Drain, id));
//! bus.emit(&Event::Drain);
//! assert_eq!(hits.get(), 1);
//! ```

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use super::{Event, EventKind};

/// Shared listener function.
pub type Listener = Rc<dyn Fn(&Event)>;

/// Identity of a registered listener, used for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Entry for a registered listener.
struct ListenerEntry {
    /// Assigned identity.
    id: ListenerId,
    /// The listener function.
    listener: Listener,
    /// Remove before the first delivery.
    once: bool,
}

/// Publish/subscribe registry.
///
/// Cloning the handle shares the registry, which is how a Duplex gives both
/// of its halves one bus.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Rc<BusInner>,
}

#[derive(Default)]
struct BusInner {
    /// Listeners by kind, in registration order.
    listeners: RefCell<HashMap<EventKind, Vec<ListenerEntry>>>,
    /// Next listener ID to assign.
    next_id: Cell<u64>,
}

impl EventBus {
    /// Create a new empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&Event) + 'static,
    {
        self.register(kind, Rc::new(listener), false)
    }

    /// Register a listener that is removed after its first delivery.
    pub fn once<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&Event) + 'static,
    {
        self.register(kind, Rc::new(listener), true)
    }

    fn register(&self, kind: EventKind, listener: Listener, once: bool) -> ListenerId {
        let id = ListenerId(self.inner.next_id.get());
        self.inner.next_id.set(id.0 + 1);

        self.inner
            .listeners
            .borrow_mut()
            .entry(kind)
            .or_default()
            .push(ListenerEntry { id, listener, once });
        id
    }

    /// Remove one listener by identity.
    ///
    /// Returns `true` if it was registered.
    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.borrow_mut();
        let Some(entries) = listeners.get_mut(&kind) else {
            return false;
        };
        match entries.iter().position(|entry| entry.id == id) {
            Some(idx) => {
                entries.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Remove every listener of a kind, returning how many were removed.
    pub fn off_all(&self, kind: EventKind) -> usize {
        self.inner
            .listeners
            .borrow_mut()
            .remove(&kind)
            .map_or(0, |entries| entries.len())
    }

    /// Number of listeners registered for a kind.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.inner
            .listeners
            .borrow()
            .get(&kind)
            .map_or(0, |entries| entries.len())
    }

    /// Check if at least one listener is registered for a kind.
    #[inline]
    pub fn has_listeners(&self, kind: EventKind) -> bool {
        self.listener_count(kind) > 0
    }

    /// Deliver an event to every listener of its kind.
    ///
    /// Listeners are called in registration order over a snapshot taken
    /// before the first call, so a listener may register or remove listeners
    /// (or emit further events) without affecting this delivery.
    ///
    /// Returns `true` if at least one listener was called.
    pub fn emit(&self, event: &Event) -> bool {
        let kind = event.kind();
        let snapshot: Vec<Listener> = {
            let mut listeners = self.inner.listeners.borrow_mut();
            let Some(entries) = listeners.get_mut(&kind) else {
                return false;
            };
            let snapshot = entries
                .iter()
                .map(|entry| entry.listener.clone())
                .collect();
            entries.retain(|entry| !entry.once);
            snapshot
        };

        for listener in &snapshot {
            listener(event);
        }
        !snapshot.is_empty()
    }

    /// Check if two handles share one registry.
    pub fn same_bus(&self, other: &EventBus) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: Vec<(EventKind, usize)> = match self.inner.listeners.try_borrow() {
            Ok(listeners) => listeners
                .iter()
                .map(|(kind, entries)| (*kind, entries.len()))
                .collect(),
            Err(_) => Vec::new(),
        };
        f.debug_struct("EventBus").field("listeners", &counts).finish()
    }
}
