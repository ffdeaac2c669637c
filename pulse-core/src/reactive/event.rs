//! Event Signals
//!
//! [`from_event`] exposes the latest event emitted by a target as a
//! signal. The listener is attached only while the signal is observed: the
//! first subscriber attaches it and the last one detaches it.
//!
//! While detached, the signal keeps only a weak reference to the target,
//! so an unobserved event signal never keeps its target alive. Observing it
//! again re-attaches if the target still exists; otherwise the failure is
//! reported as [`ReactiveError::BindingType`].

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::debug;

use super::runtime::Runtime;
use super::signal::{Equals, Signal, WeakSignal};
use crate::error::ReactiveError;

/// Identifies a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A listener callback.
pub type Listener<E> = Rc<dyn Fn(&E)>;

/// Something that emits named events.
pub trait EventTarget<E> {
    fn add_listener(&self, name: &str, listener: Listener<E>) -> ListenerId;

    fn remove_listener(&self, name: &str, id: ListenerId);
}

type ListenerList<E> = SmallVec<[(ListenerId, Listener<E>); 2]>;

/// An in-process event target.
pub struct EventEmitter<E> {
    listeners: RefCell<IndexMap<String, ListenerList<E>>>,
    next_id: Cell<u64>,
}

impl<E> EventEmitter<E> {
    pub fn new() -> Self {
        Self {
            listeners: RefCell::new(IndexMap::new()),
            next_id: Cell::new(0),
        }
    }

    /// Call every listener registered for `name`, in registration order.
    pub fn emit(&self, name: &str, event: &E) {
        let listeners: ListenerList<E> = self
            .listeners
            .borrow()
            .get(name)
            .cloned()
            .unwrap_or_default();
        for (_, listener) in listeners {
            listener(event);
        }
    }

    /// Number of listeners registered for `name`.
    pub fn listener_count(&self, name: &str) -> usize {
        self.listeners.borrow().get(name).map_or(0, SmallVec::len)
    }
}

impl<E> Default for EventEmitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventTarget<E> for EventEmitter<E> {
    fn add_listener(&self, name: &str, listener: Listener<E>) -> ListenerId {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.listeners
            .borrow_mut()
            .entry(name.to_string())
            .or_default()
            .push((id, listener));
        id
    }

    fn remove_listener(&self, name: &str, id: ListenerId) {
        let removed = {
            let mut listeners = self.listeners.borrow_mut();
            let Some(list) = listeners.get_mut(name) else {
                return;
            };
            let position = list.iter().position(|(listener, _)| *listener == id);
            position.map(|index| list.remove(index))
        };
        drop(removed);
    }
}

impl<E> fmt::Debug for EventEmitter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.borrow();
        f.debug_map()
            .entries(listeners.iter().map(|(name, list)| (name, list.len())))
            .finish()
    }
}

struct EventBinding<E: 'static, T> {
    name: String,
    /// Held while attached, or until the first attach.
    strong: RefCell<Option<Rc<T>>>,
    weak: Weak<T>,
    listener: Cell<Option<ListenerId>>,
    signal: WeakSignal<Option<E>>,
}

impl<E: Clone + 'static, T: EventTarget<E> + 'static> EventBinding<E, T> {
    fn attach(&self) {
        let target = self.strong.borrow().clone().or_else(|| self.weak.upgrade());
        let Some(target) = target else {
            Runtime::report(ReactiveError::binding("from_event", "a live event target"));
            return;
        };

        let signal = self.signal.clone();
        let id = target.add_listener(
            &self.name,
            Rc::new(move |event: &E| {
                if let Some(signal) = signal.upgrade() {
                    signal.set(Some(event.clone()));
                }
            }),
        );
        debug!(event = %self.name, "attached event listener");
        self.listener.set(Some(id));
        *self.strong.borrow_mut() = Some(target);
    }

    fn detach(&self) {
        let target = self.strong.borrow_mut().take();
        if let (Some(id), Some(target)) = (self.listener.take(), target) {
            target.remove_listener(&self.name, id);
            debug!(event = %self.name, "detached event listener");
        }
    }
}

/// A signal holding the latest `name` event emitted by `target`.
///
/// Every event notifies, even one equal to the previous.
pub fn from_event<E, T>(target: Rc<T>, name: impl Into<String>) -> Signal<Option<E>>
where
    E: Clone + 'static,
    T: EventTarget<E> + 'static,
{
    let signal = Signal::with_equality(None, Equals::never());
    let binding = Rc::new(EventBinding {
        name: name.into(),
        weak: Rc::downgrade(&target),
        strong: RefCell::new(Some(target)),
        listener: Cell::new(None),
        signal: signal.downgrade(),
    });

    let attach = Rc::clone(&binding);
    signal.on_first_subscriber(move || attach.attach());
    signal.on_last_subscriber_removed(move || binding.detach());
    signal
}
