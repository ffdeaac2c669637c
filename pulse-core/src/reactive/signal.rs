//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which effects depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a reactive context (effect, computed,
//!    deferred effect), the signal registers that context as a subscriber.
//!
//! 2. When a signal's value changes, every subscriber is queued on the
//!    scheduler and re-runs on the next flush.
//!
//! 3. Whether a write is a change is decided by the signal's [`Equals`]
//!    predicate. `Equals::never()` makes every write a change.
//!
//! # Memory Layout
//!
//! Each signal consists of:
//! - A [`Source`] (ID, subscribers, lifecycle hooks, cycle guard)
//! - The value, behind a `RefCell`
//! - The equality predicate
//!
//! Handles are cheap `Rc` clones that share all three.

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::rc::{Rc, Weak};

use super::runtime::Runtime;
use super::source::Source;
use super::subscriber::SourceId;
use crate::error::Result;

/// Read access shared by every signal-like type.
pub trait SignalRead<T> {
    /// Read the value, subscribing the current effect.
    fn get(&self) -> T;

    /// Read the value without subscribing anybody.
    fn get_untracked(&self) -> T;
}

/// Write access shared by every writable signal-like type.
pub trait SignalWrite<T> {
    /// Replace the value, notifying subscribers if it changed.
    fn set(&self, value: T);

    /// Modify a copy of the value and write it back.
    fn update(&self, f: impl FnOnce(&mut T));
}

/// Decides whether a write changes a signal's value.
pub enum Equals<T> {
    /// Every write is a change.
    Never,
    /// A write is a change when the predicate returns false.
    By(Rc<dyn Fn(&T, &T) -> bool>),
}

impl<T> Equals<T> {
    /// Disable equality short-circuiting.
    pub fn never() -> Self {
        Self::Never
    }

    /// Use a custom equality predicate.
    pub fn by(eq: impl Fn(&T, &T) -> bool + 'static) -> Self {
        Self::By(Rc::new(eq))
    }

    /// Whether replacing `old` with `new` counts as a change.
    pub fn changed(&self, old: &T, new: &T) -> bool {
        match self {
            Self::Never => true,
            Self::By(eq) => !eq(old, new),
        }
    }
}

impl<T: PartialEq + 'static> Default for Equals<T> {
    fn default() -> Self {
        Self::by(|a: &T, b: &T| a == b)
    }
}

impl<T> Clone for Equals<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Never => Self::Never,
            Self::By(eq) => Self::By(Rc::clone(eq)),
        }
    }
}

impl<T> Debug for Equals<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Never => f.write_str("Equals::Never"),
            Self::By(_) => f.write_str("Equals::By(..)"),
        }
    }
}

struct SignalInner<T> {
    source: Rc<Source>,
    value: RefCell<T>,
    equals: Equals<T>,
}

/// A reactive signal holding a value of type T.
///
/// # Example
///
/// ```rust
/// use pulse_core::Signal;
///
/// let count = Signal::new(0);
///
/// // Read the value
/// assert_eq!(count.get(), 0);
///
/// // Update the value (notifies subscribers)
/// count.set(5);
/// count.update(|n| *n += 1);
/// assert_eq!(count.get(), 6);
/// ```
pub struct Signal<T: 'static> {
    inner: Rc<SignalInner<T>>,
}

impl<T: PartialEq + 'static> Signal<T> {
    /// Create a new signal that compares values with `PartialEq`.
    pub fn new(value: T) -> Self {
        Self::with_equality(value, Equals::default())
    }
}

impl<T: 'static> Signal<T> {
    /// Create a new signal with an explicit equality policy.
    pub fn with_equality(value: T, equals: Equals<T>) -> Self {
        Self {
            inner: Rc::new(SignalInner {
                source: Source::new(),
                value: RefCell::new(value),
                equals,
            }),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> SourceId {
        self.inner.source.id()
    }

    pub(crate) fn source(&self) -> &Rc<Source> {
        &self.inner.source
    }

    /// Borrow the value, subscribing the current effect.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.source.track();
        f(&self.inner.value.borrow())
    }

    /// Borrow the value without subscribing.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    /// Set a new value and notify subscribers.
    ///
    /// A write refused by the cycle guard is reported through
    /// [`Runtime::report`] and otherwise ignored.
    pub fn set(&self, value: T) {
        if let Err(err) = self.try_set(value) {
            Runtime::report(err);
        }
    }

    /// Set a new value, returning the cycle-guard error if the write is
    /// refused. A refused write leaves the value untouched and notifies
    /// nobody.
    pub fn try_set(&self, value: T) -> Result<()> {
        self.inner.source.admit_write()?;

        let changed = {
            let current = self.inner.value.borrow();
            self.inner.equals.changed(&current, &value)
        };
        if !changed {
            return Ok(());
        }

        let previous = self.inner.value.replace(value);
        drop(previous);
        self.inner.source.notify();
        Ok(())
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.source.subscriber_count()
    }

    /// Run `f` whenever the signal goes from no subscribers to some.
    ///
    /// If the signal already has subscribers, `f` runs immediately.
    pub fn on_first_subscriber(&self, f: impl Fn() + 'static) -> &Self {
        self.inner.source.set_on_first(Rc::new(f));
        self
    }

    /// Run `f` whenever the signal loses its last subscriber.
    pub fn on_last_subscriber_removed(&self, f: impl Fn() + 'static) -> &Self {
        self.inner.source.set_on_last(Rc::new(f));
        self
    }

    /// Whether both handles point to the same signal.
    pub fn is_same(&self, other: &Signal<T>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Create a handle that does not keep the signal alive.
    pub fn downgrade(&self) -> WeakSignal<T> {
        WeakSignal {
            inner: Rc::downgrade(&self.inner),
        }
    }
}

impl<T: Clone + 'static> Signal<T> {
    /// Get the current value.
    ///
    /// If called within a reactive context, this also registers the
    /// current effect as a subscriber.
    pub fn get(&self) -> T {
        self.inner.source.track();
        self.inner.value.borrow().clone()
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Update the value using a function.
    ///
    /// The function edits a copy; the copy is then written with
    /// [`Signal::set`].
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let mut next = self.get_untracked();
        f(&mut next);
        self.set(next);
    }
}

impl<T: 'static> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Debug + 'static> Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id())
            .field("value", &*self.inner.value.borrow())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

impl<T: Clone + 'static> SignalRead<T> for Signal<T> {
    fn get(&self) -> T {
        Signal::get(self)
    }

    fn get_untracked(&self) -> T {
        Signal::get_untracked(self)
    }
}

impl<T: Clone + 'static> SignalWrite<T> for Signal<T> {
    fn set(&self, value: T) {
        Signal::set(self, value)
    }

    fn update(&self, f: impl FnOnce(&mut T)) {
        Signal::update(self, f)
    }
}

/// A non-owning signal handle.
pub struct WeakSignal<T: 'static> {
    inner: Weak<SignalInner<T>>,
}

impl<T: 'static> WeakSignal<T> {
    /// Recover a strong handle if the signal is still alive.
    pub fn upgrade(&self) -> Option<Signal<T>> {
        self.inner.upgrade().map(|inner| Signal { inner })
    }
}

impl<T: 'static> Clone for WeakSignal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Shorthand for [`Signal::new`].
pub fn signal<T: PartialEq + 'static>(value: T) -> Signal<T> {
    Signal::new(value)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReactiveError;
    use crate::host::VirtualHost;
    use crate::reactive::Effect;
    use std::cell::Cell;

    #[test]
    fn signal_get_and_set() {
        let signal = Signal::new(0);
        assert_eq!(signal.get(), 0);

        signal.set(42);
        assert_eq!(signal.get(), 42);
    }

    #[test]
    fn signal_update() {
        let signal = Signal::new(10);
        signal.update(|v| *v += 5);
        assert_eq!(signal.get(), 15);
    }

    #[test]
    fn signal_clone_shares_state() {
        let signal1 = Signal::new(0);
        let signal2 = signal1.clone();

        signal1.set(42);
        assert_eq!(signal2.get(), 42);
        assert!(signal1.is_same(&signal2));
        assert!(!signal1.is_same(&Signal::new(42)));
    }

    #[test]
    fn signal_ids_are_unique() {
        let s1 = Signal::new(0);
        let s2 = Signal::new(0);
        let s3 = Signal::new(0);

        assert_ne!(s1.id(), s2.id());
        assert_ne!(s2.id(), s3.id());
        assert_ne!(s1.id(), s3.id());
    }

    fn count_runs(signal: &Signal<i32>) -> (Effect, Rc<Cell<u32>>) {
        let runs = Rc::new(Cell::new(0));
        let (s, counter) = (signal.clone(), runs.clone());
        let effect = Effect::new(move || {
            s.get();
            counter.set(counter.get() + 1);
        });
        (effect, runs)
    }

    #[test]
    fn equal_writes_do_not_notify() {
        let host = VirtualHost::install();
        let signal = Signal::new(1);
        let (_effect, runs) = count_runs(&signal);

        signal.set(1);
        host.run_until_idle();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn disabled_equality_notifies_every_write() {
        let host = VirtualHost::install();
        let signal = Signal::with_equality(1, Equals::never());
        let (_effect, runs) = count_runs(&signal);

        signal.set(1);
        host.run_until_idle();
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn custom_equality_is_respected() {
        let host = VirtualHost::install();
        let signal = Signal::with_equality(10, Equals::by(|a: &i32, b: &i32| a / 10 == b / 10));
        let (_effect, runs) = count_runs(&signal);

        signal.set(15);
        host.run_until_idle();
        assert_eq!(runs.get(), 1);
        assert_eq!(signal.get(), 10);

        signal.set(20);
        host.run_until_idle();
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn cycle_guard_stops_self_feeding_effect() {
        let host = VirtualHost::install();
        let counter = Signal::new(0);
        let reported = Rc::new(Cell::new(0));
        let seen = reported.clone();
        Runtime::set_error_reporter(move |err| {
            assert!(matches!(err, ReactiveError::CycleDetected { threshold: 10, .. }));
            seen.set(seen.get() + 1);
        });

        let c = counter.clone();
        let effect = Effect::new(move || c.set(c.get() + 1));
        host.run_until_idle();

        assert_eq!(counter.get(), 10);
        assert_eq!(effect.run_count(), 11);
        assert_eq!(reported.get(), 1);
        Runtime::clear_error_reporter();
    }

    #[test]
    fn try_set_returns_the_cycle_error() {
        let _host = VirtualHost::install();
        Runtime::configure(crate::RuntimeConfig {
            cycle_threshold: 0,
            ..Default::default()
        });

        let signal = Signal::new(0);
        let outcome = Rc::new(RefCell::new(None));
        let (s, slot) = (signal.clone(), outcome.clone());
        let _effect = Effect::new(move || {
            let next = s.get() + 1;
            *slot.borrow_mut() = Some(s.try_set(next));
        });

        assert!(matches!(
            outcome.borrow().as_ref(),
            Some(Err(ReactiveError::CycleDetected { .. }))
        ));
        assert_eq!(signal.get(), 0);
        Runtime::configure(crate::RuntimeConfig::default());
    }

    #[test]
    fn weak_handle_does_not_keep_signal_alive() {
        let signal = Signal::new(String::from("x"));
        let weak = signal.downgrade();
        assert!(weak.upgrade().is_some());

        drop(signal);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn traits_expose_read_and_write() {
        fn bump(target: &impl SignalWrite<i32>) {
            target.update(|n| *n += 1);
        }
        fn read(source: &impl SignalRead<i32>) -> i32 {
            source.get_untracked()
        }

        let signal = Signal::new(1);
        bump(&signal);
        assert_eq!(read(&signal), 2);
    }
}
