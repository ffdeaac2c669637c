//! Signal Core
//!
//! The untyped half of every signal. A [`Source`] knows who subscribes to
//! it, which lifecycle hooks to fire, which effects have read it (for the
//! cycle guard) and, for children of a deep signal, which source to bubble
//! notifications up to. It knows nothing about the value it guards.
//!
//! # Subscriptions
//!
//! Subscribers are held weakly and keyed by ID, so a source never keeps an
//! effect alive and an effect can be removed without touching the others.
//! The effect keeps the matching weak record on its side and releases it
//! before every re-run.
//!
//! # Lifecycle Hooks
//!
//! `on_first` fires on the transition unobserved -> observed and `on_last`
//! on observed -> unobserved. An effect that re-runs releases its
//! subscriptions first and re-reads afterwards; it only asks its old sources
//! to [`release_if_unobserved`](Source::release_if_unobserved) once the body
//! is done, so a source that is read again never sees the transient gap.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use super::context::ReactiveContext;
use super::effect::EffectInner;
use super::runtime::Runtime;
use super::subscriber::{SourceId, SubscriberId};
use crate::error::{ReactiveError, Result};

/// A lifecycle callback.
pub(crate) type Hook = Rc<dyn Fn()>;

pub(crate) struct Source {
    id: SourceId,
    subscribers: RefCell<IndexMap<SubscriberId, Weak<EffectInner>>>,
    on_first: RefCell<Option<Hook>>,
    on_last: RefCell<Option<Hook>>,
    observed: Cell<bool>,
    /// Effects that have read this source at least once.
    read_by: RefCell<HashSet<SubscriberId>>,
    /// Read-then-write count per effect.
    cycles: RefCell<HashMap<SubscriberId, u32>>,
    parent: RefCell<Weak<Source>>,
}

impl Source {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self {
            id: SourceId::new(),
            subscribers: RefCell::new(IndexMap::new()),
            on_first: RefCell::new(None),
            on_last: RefCell::new(None),
            observed: Cell::new(false),
            read_by: RefCell::new(HashSet::new()),
            cycles: RefCell::new(HashMap::new()),
            parent: RefCell::new(Weak::new()),
        })
    }

    pub(crate) fn id(&self) -> SourceId {
        self.id
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }

    /// Register the current effect, if any, as a subscriber.
    pub(crate) fn track(self: &Rc<Self>) {
        let Some(effect) = ReactiveContext::current() else {
            return;
        };
        // Disposed mid-run: the rest of the body must not resubscribe.
        if effect.is_disposed() {
            return;
        }
        let id = effect.id();

        if self.read_by.borrow_mut().insert(id) {
            effect.mark_read(Rc::downgrade(self));
        }

        if self.subscribers.borrow().contains_key(&id) {
            return;
        }

        // The hook runs before the reader is subscribed, so whatever it
        // writes here does not queue the reader.
        if !self.observed.replace(true) {
            self.fire(&self.on_first);
        }

        self.subscribers
            .borrow_mut()
            .insert(id, Rc::downgrade(&effect));
        effect.add_source(self);
    }

    /// Drop `id` from the subscriber set.
    ///
    /// Returns true when the set is now empty. The `on_last` hook is not
    /// fired here; see [`Source::release_if_unobserved`].
    pub(crate) fn remove_subscriber(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.borrow_mut();
        let removed = subscribers.shift_remove(&id);
        let empty = subscribers.is_empty();
        drop(subscribers);
        drop(removed);
        empty
    }

    /// Fire `on_last` if the source was observed and no longer is.
    pub(crate) fn release_if_unobserved(&self) {
        if self.subscribers.borrow().is_empty() && self.observed.replace(false) {
            self.fire(&self.on_last);
        }
    }

    /// Forget the cycle-guard records of a disposed effect.
    pub(crate) fn forget(&self, id: SubscriberId) {
        self.read_by.borrow_mut().remove(&id);
        self.cycles.borrow_mut().remove(&id);
    }

    /// Check a write against the cycle guard.
    ///
    /// A write from an effect that has read this source, or one of its
    /// ancestors, counts as one read-then-write cycle on the source it read.
    /// Counts accumulate over the effect's lifetime; past the configured
    /// threshold every further write is refused.
    pub(crate) fn admit_write(&self) -> Result<()> {
        let Some(effect) = ReactiveContext::current_subscriber() else {
            return Ok(());
        };
        if self.read_by.borrow().contains(&effect) {
            return self.count_cycle(effect);
        }

        // Writes below a node bubble back up to its readers.
        let mut parent = self.parent.borrow().upgrade();
        while let Some(source) = parent {
            if source.read_by.borrow().contains(&effect) {
                return source.count_cycle(effect);
            }
            parent = source.parent.borrow().upgrade();
        }
        Ok(())
    }

    fn count_cycle(&self, effect: SubscriberId) -> Result<()> {
        let threshold = Runtime::config().cycle_threshold;
        let mut cycles = self.cycles.borrow_mut();
        let count = cycles.entry(effect).or_insert(0);
        *count = count.saturating_add(1);

        if *count > threshold {
            return Err(ReactiveError::CycleDetected {
                signal: self.id,
                effect,
                threshold,
            });
        }
        Ok(())
    }

    /// Queue this source's subscribers and those of every ancestor.
    pub(crate) fn notify(&self) {
        self.queue_subscribers();

        let mut parent = self.parent.borrow().upgrade();
        while let Some(source) = parent {
            source.queue_subscribers();
            parent = source.parent.borrow().upgrade();
        }
    }

    fn queue_subscribers(&self) {
        let batch: Vec<_> = self
            .subscribers
            .borrow()
            .iter()
            .map(|(id, effect)| (*id, effect.clone()))
            .collect();
        if !batch.is_empty() {
            Runtime::queue_effects(batch);
        }
    }

    pub(crate) fn set_parent(&self, parent: &Rc<Source>) {
        *self.parent.borrow_mut() = Rc::downgrade(parent);
    }

    pub(crate) fn clear_parent(&self) {
        *self.parent.borrow_mut() = Weak::new();
    }

    /// Install the first-subscriber hook. Fires at once if already observed.
    pub(crate) fn set_on_first(&self, hook: Hook) {
        *self.on_first.borrow_mut() = Some(hook);
        if self.observed.get() {
            self.fire(&self.on_first);
        }
    }

    pub(crate) fn set_on_last(&self, hook: Hook) {
        *self.on_last.borrow_mut() = Some(hook);
    }

    fn fire(&self, slot: &RefCell<Option<Hook>>) {
        let hook = slot.borrow().clone();
        if let Some(hook) = hook {
            hook();
        }
    }
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("id", &self.id)
            .field("subscribers", &self.subscriber_count())
            .field("observed", &self.observed.get())
            .finish()
    }
}
