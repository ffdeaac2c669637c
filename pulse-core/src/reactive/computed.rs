//! Computed Implementation
//!
//! A Computed is a derived value. It caches the result of a function of
//! other signals and keeps that cache current with an internal effect.
//!
//! # Laziness
//!
//! The internal effect only exists while the computed has subscribers: it
//! is created when the first effect reads the computed and disposed when the
//! last one lets go. An unobserved computed holds no upstream subscriptions
//! and does no work when its inputs change. Reading it outside any effect
//! evaluates the function on demand, untracked.
//!
//! # Delegation
//!
//! [`Computed::delegate`] takes a function that returns a [`Signal`]. Reads
//! follow the returned signal and writes are forwarded to it, so a computed
//! can stand in for whichever signal its inputs currently select.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::debug;

use super::context::untrack;
use super::effect::Effect;
use super::runtime::Runtime;
use super::signal::{Signal, SignalRead, SignalWrite};
use crate::error::ReactiveError;

enum Kind<T: 'static> {
    Derive(Box<dyn Fn() -> T>),
    Delegate {
        select: Box<dyn Fn() -> Signal<T>>,
        target: RefCell<Option<Signal<T>>>,
    },
    PassThrough(Signal<T>),
}

struct ComputedInner<T: 'static> {
    kind: Kind<T>,
    cache: Signal<Option<T>>,
    effect: RefCell<Option<Effect>>,
    evaluations: Cell<usize>,
    disposed: Cell<bool>,
}

impl<T: Clone + PartialEq + 'static> ComputedInner<T> {
    fn evaluate(&self) -> T {
        self.evaluations.set(self.evaluations.get() + 1);
        match &self.kind {
            Kind::Derive(f) => f(),
            Kind::Delegate { select, target } => {
                let signal = select();
                let value = signal.get();
                *target.borrow_mut() = Some(signal);
                value
            }
            Kind::PassThrough(signal) => signal.get(),
        }
    }

    fn start(self: &Rc<Self>) {
        if self.disposed.get() || self.effect.borrow().is_some() {
            return;
        }
        debug!(signal = %self.cache.id(), "starting computed");

        let weak = Rc::downgrade(self);
        let effect = Effect::new(move || {
            if let Some(inner) = weak.upgrade() {
                let value = inner.evaluate();
                inner.cache.set(Some(value));
            }
        });
        *self.effect.borrow_mut() = Some(effect);
    }

    fn stop(&self) {
        let effect = self.effect.borrow_mut().take();
        if let Some(effect) = effect {
            debug!(signal = %self.cache.id(), "stopping computed");
            effect.dispose();
        }
    }

    fn is_active(&self) -> bool {
        self.effect.borrow().is_some()
    }
}

/// A lazily evaluated derived value.
///
/// # Example
///
/// ```rust
/// use pulse_core::{Computed, Signal};
///
/// let a = Signal::new(1);
/// let a2 = a.clone();
/// let doubled = Computed::new(move || a2.get() * 2);
///
/// a.set(5);
/// assert_eq!(doubled.evaluation_count(), 0);
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Computed<T: 'static> {
    inner: Rc<ComputedInner<T>>,
}

impl<T: Clone + PartialEq + 'static> Computed<T> {
    /// Create a computed from a derivation function.
    pub fn new(f: impl Fn() -> T + 'static) -> Self {
        Self::build(Kind::Derive(Box::new(f)))
    }

    /// Create a computed that follows the signal `select` returns.
    ///
    /// Writes go to that signal.
    pub fn delegate(select: impl Fn() -> Signal<T> + 'static) -> Self {
        Self::build(Kind::Delegate {
            select: Box::new(select),
            target: RefCell::new(None),
        })
    }

    fn build(kind: Kind<T>) -> Self {
        let inner = Rc::new(ComputedInner {
            kind,
            cache: Signal::new(None),
            effect: RefCell::new(None),
            evaluations: Cell::new(0),
            disposed: Cell::new(false),
        });

        let weak: Weak<ComputedInner<T>> = Rc::downgrade(&inner);
        inner.cache.on_first_subscriber(move || {
            if let Some(inner) = weak.upgrade() {
                inner.start();
            }
        });
        let weak = Rc::downgrade(&inner);
        inner.cache.on_last_subscriber_removed(move || {
            if let Some(inner) = weak.upgrade() {
                inner.stop();
            }
        });

        Self { inner }
    }

    /// Get the current value, subscribing the current effect.
    ///
    /// The first subscriber starts the internal effect. Without one, the
    /// value is evaluated on demand.
    pub fn get(&self) -> T {
        if let Kind::PassThrough(signal) = &self.inner.kind {
            return signal.get();
        }
        self.inner.cache.source().track();
        self.current()
    }

    /// Get the current value without subscribing.
    pub fn get_untracked(&self) -> T {
        if let Kind::PassThrough(signal) = &self.inner.kind {
            return signal.get_untracked();
        }
        self.current()
    }

    fn current(&self) -> T {
        if self.inner.is_active() {
            // A delegate reads its target, never the cached copy.
            if let Kind::Delegate { target, .. } = &self.inner.kind {
                let signal = target.borrow().clone();
                if let Some(signal) = signal {
                    return signal.get_untracked();
                }
            }
            if let Some(value) = self.inner.cache.get_untracked() {
                return value;
            }
        }
        untrack(|| self.inner.evaluate())
    }

    /// Write through to the delegated signal.
    ///
    /// A computed built from a plain function is read-only: the write is
    /// reported as a [`ReactiveError::BindingType`] and ignored.
    pub fn set(&self, value: T) {
        match &self.inner.kind {
            Kind::Derive(_) => Runtime::report(ReactiveError::binding(
                "Computed::set",
                "a delegating computed",
            )),
            Kind::Delegate { select, target } => {
                let current = target.borrow().clone();
                let signal = match current {
                    Some(signal) if self.inner.is_active() => signal,
                    _ => untrack(select),
                };
                signal.set(value);
            }
            Kind::PassThrough(signal) => signal.set(value),
        }
    }

    /// Tear down the internal effect. The computed keeps answering reads by
    /// evaluating on demand. Idempotent.
    pub fn dispose(&self) {
        self.inner.disposed.set(true);
        self.inner.stop();
    }

    /// Whether the internal effect is running.
    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    /// Number of times the derivation has run.
    pub fn evaluation_count(&self) -> usize {
        self.inner.evaluations.get()
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        match &self.inner.kind {
            Kind::PassThrough(signal) => signal.subscriber_count(),
            _ => self.inner.cache.subscriber_count(),
        }
    }
}

impl<T: Clone + PartialEq + 'static> From<Signal<T>> for Computed<T> {
    fn from(signal: Signal<T>) -> Self {
        Self::build(Kind::PassThrough(signal))
    }
}

impl<T: 'static> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.inner.cache.id())
            .field("active", &self.inner.effect.borrow().is_some())
            .field("evaluations", &self.inner.evaluations.get())
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> SignalRead<T> for Computed<T> {
    fn get(&self) -> T {
        Computed::get(self)
    }

    fn get_untracked(&self) -> T {
        Computed::get_untracked(self)
    }
}

impl<T: Clone + PartialEq + 'static> SignalWrite<T> for Computed<T> {
    fn set(&self, value: T) {
        Computed::set(self, value)
    }

    fn update(&self, f: impl FnOnce(&mut T)) {
        let mut next = self.get_untracked();
        f(&mut next);
        self.set(next);
    }
}

/// Shorthand for [`Computed::new`].
pub fn computed<T: Clone + PartialEq + 'static>(f: impl Fn() -> T + 'static) -> Computed<T> {
    Computed::new(f)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
