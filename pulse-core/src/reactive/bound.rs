//! Bound Delegate
//!
//! A [`Bound`] forwards reads and writes to a target signal that can be
//! swapped at any time. Readers subscribe to the bound itself as well as
//! the current target, so [`Bound::rebind`] wakes them and their next run
//! follows the new target.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use super::signal::{Signal, SignalRead, SignalWrite};
use super::source::Source;

struct BoundInner<T: 'static> {
    target: RefCell<Signal<T>>,
    relay: Rc<Source>,
}

/// A re-targetable signal proxy.
///
/// ```rust
/// use pulse_core::{bound, Signal};
///
/// let a = Signal::new(1);
/// let b = Signal::new(2);
/// let proxy = bound(a.clone());
/// assert_eq!(proxy.get(), 1);
///
/// proxy.rebind(b.clone());
/// proxy.set(3);
/// assert_eq!((a.get(), b.get()), (1, 3));
/// ```
pub struct Bound<T: 'static> {
    inner: Rc<BoundInner<T>>,
}

impl<T: 'static> Bound<T> {
    pub fn new(target: Signal<T>) -> Self {
        Self {
            inner: Rc::new(BoundInner {
                target: RefCell::new(target),
                relay: Source::new(),
            }),
        }
    }

    /// The current target.
    pub fn target(&self) -> Signal<T> {
        self.inner.target.borrow().clone()
    }

    /// Point the proxy at `target` and wake its readers.
    pub fn rebind(&self, target: Signal<T>) {
        let previous = self.inner.target.replace(target);
        debug!(from = %previous.id(), to = %self.target().id(), "rebinding");
        drop(previous);
        self.inner.relay.notify();
    }

    /// Forwarded to the current target.
    pub fn on_first_subscriber(&self, f: impl Fn() + 'static) -> &Self {
        self.target().on_first_subscriber(f);
        self
    }

    /// Forwarded to the current target.
    pub fn on_last_subscriber_removed(&self, f: impl Fn() + 'static) -> &Self {
        self.target().on_last_subscriber_removed(f);
        self
    }

    /// Subscribers of the current target.
    pub fn subscriber_count(&self) -> usize {
        self.target().subscriber_count()
    }
}

impl<T: Clone + 'static> Bound<T> {
    pub fn get(&self) -> T {
        self.inner.relay.track();
        self.target().get()
    }

    pub fn get_untracked(&self) -> T {
        self.target().get_untracked()
    }

    pub fn set(&self, value: T) {
        self.target().set(value);
    }

    pub fn update(&self, f: impl FnOnce(&mut T)) {
        self.target().update(f);
    }
}

impl<T: 'static> Clone for Bound<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Bound<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bound")
            .field("target", &*self.inner.target.borrow())
            .finish()
    }
}

impl<T: Clone + 'static> SignalRead<T> for Bound<T> {
    fn get(&self) -> T {
        Bound::get(self)
    }

    fn get_untracked(&self) -> T {
        Bound::get_untracked(self)
    }
}

impl<T: Clone + 'static> SignalWrite<T> for Bound<T> {
    fn set(&self, value: T) {
        Bound::set(self, value)
    }

    fn update(&self, f: impl FnOnce(&mut T)) {
        Bound::update(self, f)
    }
}

/// Shorthand for [`Bound::new`].
pub fn bound<T: 'static>(target: Signal<T>) -> Bound<T> {
    Bound::new(target)
}
