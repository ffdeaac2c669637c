//! Reactive Context
//!
//! The reactive context tracks which effect is currently running.
//! This enables automatic dependency tracking: when a signal is read,
//! we can register the current effect as a subscriber.
//!
//! # Implementation
//!
//! We use a thread-local stack. Entering an effect pushes it; entering an
//! untracked region pushes an empty entry, which hides every effect below it.
//! The guard returned by [`ReactiveContext::enter`] pops the entry when
//! dropped, so the previous context is restored even if the computation
//! panics. Nested effects therefore see their own context and the outer one
//! is back in place once they return.

use std::cell::RefCell;
use std::rc::Rc;

use super::effect::EffectInner;
use super::SubscriberId;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Option<Rc<EffectInner>>>> = RefCell::new(Vec::new());
}

/// Guard that pops the context when dropped.
pub struct ReactiveContext {
    subscriber_id: Option<SubscriberId>,
}

impl ReactiveContext {
    /// Enter the tracking context of `effect`.
    ///
    /// While this context is active, any signal that is read registers the
    /// effect as a subscriber.
    pub(crate) fn enter(effect: Rc<EffectInner>) -> Self {
        let subscriber_id = Some(effect.id());
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(Some(effect)));
        Self { subscriber_id }
    }

    /// Enter an untracked region: reads inside it subscribe nobody.
    pub fn untracked() -> Self {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(None));
        Self {
            subscriber_id: None,
        }
    }

    /// Check whether reads are currently being tracked.
    pub fn is_active() -> bool {
        Self::current_subscriber().is_some()
    }

    /// Get the ID of the effect currently tracking reads, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        Self::current().map(|effect| effect.id())
    }

    /// The effect currently tracking reads, if any.
    pub(crate) fn current() -> Option<Rc<EffectInner>> {
        CONTEXT_STACK
            .try_with(|stack| stack.borrow().last().cloned().flatten())
            .ok()
            .flatten()
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        let popped = CONTEXT_STACK
            .try_with(|stack| stack.borrow_mut().pop())
            .ok()
            .flatten();

        // Catch mismatched enter/exit pairs.
        if let Some(entry) = popped {
            debug_assert_eq!(
                entry.as_ref().map(|effect| effect.id()),
                self.subscriber_id,
                "ReactiveContext mismatch"
            );
        }
    }
}

/// Run `f` without tracking any reads.
///
/// Signals read inside `f` do not subscribe the surrounding effect. The
/// previous context is restored afterwards.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    let _ctx = ReactiveContext::untracked();
    f()
}
