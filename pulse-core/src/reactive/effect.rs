//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency changes, the scheduler queues the effect and runs
//!    it on the next flush.
//!
//! 3. Before re-running, the effect releases its old subscriptions and runs
//!    the previous cleanup, in that order, then tracks new subscriptions
//!    during execution.
//!
//! # Cleanup
//!
//! The function may return a [`Cleanup`] (or `Option<Cleanup>`). It is
//! called before the effect re-runs and when the effect is disposed, which
//! makes it the place to release listeners, timers and in-flight requests.
//!
//! # Ownership
//!
//! Signals hold their subscribers weakly. The [`Effect`] handle owns the
//! effect: dropping the last handle disposes it, exactly like calling
//! [`Effect::dispose`].

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use tracing::{debug, trace};

use super::context::ReactiveContext;
use super::runtime::Runtime;
use super::source::Source;
use super::subscriber::{SourceId, SubscriberId};

/// Callback returned by an effect run; invoked before the next run and on
/// disposal.
pub type Cleanup = Box<dyn FnOnce()>;

/// Wrap a closure as a [`Cleanup`].
pub fn cleanup(f: impl FnOnce() + 'static) -> Cleanup {
    Box::new(f)
}

/// Values an effect function may return.
pub trait EffectOutput {
    fn into_cleanup(self) -> Option<Cleanup>;
}

impl EffectOutput for () {
    fn into_cleanup(self) -> Option<Cleanup> {
        None
    }
}

impl EffectOutput for Cleanup {
    fn into_cleanup(self) -> Option<Cleanup> {
        Some(self)
    }
}

impl EffectOutput for Option<Cleanup> {
    fn into_cleanup(self) -> Option<Cleanup> {
        self
    }
}

type EffectFn = Box<dyn FnMut() -> Option<Cleanup>>;

/// The shared state of an effect.
pub(crate) struct EffectInner {
    id: SubscriberId,
    this: Weak<EffectInner>,
    func: RefCell<Option<EffectFn>>,
    cleanup: RefCell<Option<Cleanup>>,
    /// Sources subscribed to during the latest run.
    sources: RefCell<IndexMap<SourceId, Weak<Source>>>,
    /// Sources whose cycle guard has a record of this effect.
    marked: RefCell<Vec<Weak<Source>>>,
    disposed: Cell<bool>,
    runs: Cell<usize>,
}

impl EffectInner {
    fn new(func: Option<EffectFn>) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            id: SubscriberId::new(),
            this: this.clone(),
            func: RefCell::new(func),
            cleanup: RefCell::new(None),
            sources: RefCell::new(IndexMap::new()),
            marked: RefCell::new(Vec::new()),
            disposed: Cell::new(false),
            runs: Cell::new(0),
        })
    }

    /// An effect with no function, for driving the context by hand.
    #[cfg(test)]
    pub(crate) fn detached() -> Rc<Self> {
        Self::new(None)
    }

    pub(crate) fn id(&self) -> SubscriberId {
        self.id
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    pub(crate) fn add_source(&self, source: &Rc<Source>) {
        self.sources
            .borrow_mut()
            .insert(source.id(), Rc::downgrade(source));
    }

    pub(crate) fn mark_read(&self, source: Weak<Source>) {
        self.marked.borrow_mut().push(source);
    }

    /// Sources subscribed to during the latest run.
    pub(crate) fn sources(&self) -> Vec<Weak<Source>> {
        self.sources.borrow().values().cloned().collect()
    }

    /// Re-run the effect now.
    pub(crate) fn run(self: &Rc<Self>) {
        if self.disposed.get() {
            return;
        }

        let released = self.release_sources();
        let cleanup = self.cleanup.borrow_mut().take();
        if let Some(cleanup) = cleanup {
            cleanup();
        }

        self.execute();
        settle(released);
    }

    /// Run `body` as this effect, replacing the latest subscriptions with the
    /// ones `body` makes. The function and cleanup are left alone.
    pub(crate) fn rerun_with(self: &Rc<Self>, body: impl FnOnce()) {
        if self.disposed.get() {
            return;
        }

        let released = self.release_sources();
        {
            let _ctx = ReactiveContext::enter(Rc::clone(self));
            body();
        }
        settle(released);
    }

    fn execute(self: &Rc<Self>) {
        let func = self.func.borrow_mut().take();
        let Some(mut func) = func else { return };

        trace!(effect = %self.id, "running effect");
        let cleanup = {
            let _ctx = ReactiveContext::enter(Rc::clone(self));
            func()
        };
        self.runs.set(self.runs.get() + 1);

        if self.disposed.get() {
            drop(func);
            if let Some(cleanup) = cleanup {
                cleanup();
            }
            return;
        }

        *self.func.borrow_mut() = Some(func);
        *self.cleanup.borrow_mut() = cleanup;
    }

    /// Unsubscribe from every source. Returns the sources left without
    /// subscribers.
    fn release_sources(&self) -> Vec<Rc<Source>> {
        let sources = std::mem::take(&mut *self.sources.borrow_mut());
        sources
            .into_values()
            .filter_map(|source| source.upgrade())
            .filter(|source| source.remove_subscriber(self.id))
            .collect()
    }

    /// Tear the effect down. Idempotent.
    pub(crate) fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        debug!(effect = %self.id, runs = self.runs.get(), "disposing effect");

        let cleanup = self.cleanup.borrow_mut().take();
        if let Some(cleanup) = cleanup {
            cleanup();
        }

        settle(self.release_sources());
        Runtime::cancel(self.id);

        let marked = std::mem::take(&mut *self.marked.borrow_mut());
        for source in marked.iter().filter_map(Weak::upgrade) {
            source.forget(self.id);
        }

        let func = self.func.borrow_mut().take();
        drop(func);
    }

    fn handle(&self) -> Weak<EffectInner> {
        self.this.clone()
    }
}

impl Drop for EffectInner {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Fire `on_last` on released sources that nobody re-subscribed to.
fn settle(released: Vec<Rc<Source>>) {
    for source in released {
        source.release_if_unobserved();
    }
}

/// A side-effecting computation that runs when dependencies change.
///
/// # Example
///
/// ```rust
/// use pulse_core::{Effect, Signal, VirtualHost};
///
/// let host = VirtualHost::install();
/// let count = Signal::new(0);
///
/// let c = count.clone();
/// let effect = Effect::new(move || println!("Count is: {}", c.get()));
///
/// count.set(5);
/// host.run_until_idle(); // Prints: "Count is: 5"
/// assert_eq!(effect.run_count(), 2);
/// ```
#[must_use = "dropping an Effect disposes it"]
pub struct Effect {
    inner: Rc<EffectInner>,
}

impl Effect {
    /// Create an effect and run it once.
    pub fn new<F, R>(mut f: F) -> Self
    where
        F: FnMut() -> R + 'static,
        R: EffectOutput,
    {
        let inner = EffectInner::new(Some(Box::new(move || f().into_cleanup())));
        debug!(effect = %inner.id, "creating effect");
        inner.execute();
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Rc<EffectInner> {
        &self.inner
    }

    /// Get the effect's unique ID.
    pub fn id(&self) -> SubscriberId {
        self.inner.id
    }

    /// Re-run the effect now, outside the scheduler.
    pub fn run(&self) {
        self.inner.run();
    }

    /// Queue the effect for the next flush.
    pub fn schedule(&self) {
        if !self.inner.is_disposed() {
            Runtime::queue_effects([(self.inner.id, self.inner.handle())]);
        }
    }

    /// Dispose of the effect.
    ///
    /// Runs the last cleanup, removes every subscription and drops any
    /// pending run. After disposal the effect will not run again.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.runs.get()
    }

    /// Get the number of signals read during the latest run.
    pub fn dependency_count(&self) -> usize {
        self.inner.sources.borrow().len()
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Shorthand for [`Effect::new`].
pub fn effect<F, R>(f: F) -> Effect
where
    F: FnMut() -> R + 'static,
    R: EffectOutput,
{
    Effect::new(f)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
