//! Reactive Runtime
//!
//! The runtime is the scheduler that connects signal writes to effect
//! re-runs. It also holds the per-thread host, configuration and error
//! side-channel.
//!
//! # How It Works
//!
//! 1. A signal write queues every subscriber in the pending set. The set is
//!    insertion-ordered and deduplicated: an effect that is already pending
//!    is not added twice.
//!
//! 2. The first effect queued since the last flush schedules one flush
//!    through the host's microtask primitive.
//!
//! 3. The flush snapshots the pending set, clears it and the scheduled flag,
//!    then runs each effect exactly once.
//!
//! 4. Effects queued while the flush runs go into a fresh pending set and a
//!    fresh flush. A pass is therefore always finite, and a cascade of
//!    writes settles over several passes.
//!
//! # Thread Model
//!
//! All state is thread-local. Every thread starts with an empty pending set,
//! no flush scheduled, the default [`RuntimeConfig`] and a [`VirtualHost`];
//! there is nothing to tear down. Tests get an isolated runtime per thread.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use tracing::{error, trace, warn};

use super::context::ReactiveContext;
use super::effect::EffectInner;
use super::subscriber::SubscriberId;
use crate::config::RuntimeConfig;
use crate::error::ReactiveError;
use crate::host::{Host, VirtualHost};

type ErrorReporter = Rc<dyn Fn(&ReactiveError)>;

struct SchedulerState {
    pending: RefCell<IndexMap<SubscriberId, Weak<EffectInner>>>,
    flush_scheduled: Cell<bool>,
    flushes: Cell<u64>,
    host: RefCell<Rc<dyn Host>>,
    config: Cell<RuntimeConfig>,
    reporter: RefCell<Option<ErrorReporter>>,
}

impl SchedulerState {
    fn new() -> Self {
        Self {
            pending: RefCell::new(IndexMap::new()),
            flush_scheduled: Cell::new(false),
            flushes: Cell::new(0),
            host: RefCell::new(Rc::new(VirtualHost::new())),
            config: Cell::new(RuntimeConfig::default()),
            reporter: RefCell::new(None),
        }
    }
}

thread_local! {
    static SCHEDULER: SchedulerState = SchedulerState::new();
}

/// The per-thread reactive runtime.
pub struct Runtime;

impl Runtime {
    /// Install `host` as the current thread's host.
    pub fn set_host(host: Rc<dyn Host>) {
        let previous = SCHEDULER.with(|state| state.host.replace(host));
        drop(previous);
    }

    /// The current thread's host.
    pub fn host() -> Rc<dyn Host> {
        SCHEDULER.with(|state| Rc::clone(&*state.host.borrow()))
    }

    /// The host, unless the thread's runtime is already torn down.
    pub(crate) fn try_host() -> Option<Rc<dyn Host>> {
        SCHEDULER
            .try_with(|state| Rc::clone(&*state.host.borrow()))
            .ok()
    }

    /// Replace the current thread's configuration.
    pub fn configure(config: RuntimeConfig) {
        SCHEDULER.with(|state| state.config.set(config));
    }

    /// The current thread's configuration.
    pub fn config() -> RuntimeConfig {
        SCHEDULER
            .try_with(|state| state.config.get())
            .unwrap_or_default()
    }

    /// Install a callback that receives every reported error.
    pub fn set_error_reporter(reporter: impl Fn(&ReactiveError) + 'static) {
        SCHEDULER.with(|state| *state.reporter.borrow_mut() = Some(Rc::new(reporter)));
    }

    /// Remove the error reporter, if any.
    pub fn clear_error_reporter() {
        let previous = SCHEDULER.with(|state| state.reporter.borrow_mut().take());
        drop(previous);
    }

    /// Surface an error that was recovered inside the graph.
    ///
    /// The error is logged and handed to the installed reporter.
    pub fn report(err: ReactiveError) {
        match &err {
            ReactiveError::CycleDetected { .. } => error!(%err, "reactive write suppressed"),
            _ => warn!(%err, "reactive operation ignored"),
        }

        let reporter = SCHEDULER
            .try_with(|state| state.reporter.borrow().clone())
            .ok()
            .flatten();
        if let Some(reporter) = reporter {
            reporter(&err);
        }
    }

    /// Queue effects for the next flush.
    pub(crate) fn queue_effects<I>(effects: I)
    where
        I: IntoIterator<Item = (SubscriberId, Weak<EffectInner>)>,
    {
        let schedule = SCHEDULER
            .try_with(|state| {
                let mut pending = state.pending.borrow_mut();
                let before = pending.len();
                for (id, effect) in effects {
                    pending.entry(id).or_insert(effect);
                }
                let queued = pending.len() > before;
                queued && !state.flush_scheduled.replace(true)
            })
            .unwrap_or(false);

        if schedule {
            Self::host().queue_microtask(Box::new(Runtime::flush));
        }
    }

    /// Drop a pending run of `id`, if one is queued.
    pub(crate) fn cancel(id: SubscriberId) {
        let _ = SCHEDULER.try_with(|state| {
            let removed = state.pending.borrow_mut().shift_remove(&id);
            drop(removed);
        });
    }

    /// Run one flush pass now.
    ///
    /// Hosts call this from the microtask scheduled by a write; it is also
    /// safe to call directly. Effects queued during the pass run in the next
    /// one.
    pub fn flush() {
        let batch = SCHEDULER.with(|state| {
            state.flush_scheduled.set(false);
            state.flushes.set(state.flushes.get() + 1);
            std::mem::take(&mut *state.pending.borrow_mut())
        });

        if batch.is_empty() {
            return;
        }
        trace!(effects = batch.len(), "flushing pending effects");

        for (_, effect) in batch {
            if let Some(effect) = effect.upgrade() {
                effect.run();
            }
        }
    }

    /// Number of effects waiting for the next flush.
    pub fn pending_count() -> usize {
        SCHEDULER.with(|state| state.pending.borrow().len())
    }

    /// Whether a flush has been scheduled and not yet run.
    pub fn is_flush_scheduled() -> bool {
        SCHEDULER.with(|state| state.flush_scheduled.get())
    }

    /// Number of flush passes run on this thread.
    pub fn flush_count() -> u64 {
        SCHEDULER.with(|state| state.flushes.get())
    }

    /// Get the current subscriber being tracked, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        ReactiveContext::current_subscriber()
    }

    /// Check if we're inside a tracking context.
    pub fn is_tracking() -> bool {
        ReactiveContext::is_active()
    }
}
