//! Deferred Effects
//!
//! A deferred effect separates noticing a change from acting on it.
//!
//! 1. On creation the body runs once, tracked, to discover its
//!    dependencies.
//!
//! 2. From then on a change to any dependency does not run the body.
//!    Instead the effect re-subscribes to the captured dependencies and
//!    hands an `execute` callback to its [`Executor`], which decides when
//!    the body runs again.
//!
//! 3. `execute` runs the body as the same effect and refreshes the
//!    captured dependency set from what the body read.
//!
//! Three executors ship with the crate: [`FrameAligned`], [`Debounced`] and
//! [`Throttled`]. Each keeps its pending timer or frame callback and
//! cancels it when the effect is disposed.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tracing::{debug, trace};

use super::context::{untrack, ReactiveContext};
use super::effect::{Effect, EffectInner};
use super::runtime::Runtime;
use super::source::Source;
use super::subscriber::SubscriberId;
use crate::host::TimerId;

/// Re-runs the body of a deferred effect.
pub type Execute = Rc<dyn Fn()>;

/// Decides when a deferred effect's body runs after a change.
pub trait Executor {
    /// A dependency changed. Call `execute` whenever the body should run.
    fn trigger(&self, execute: Execute);

    /// Drop anything still pending.
    fn cancel(&self);
}

/// Runs the body at the next frame boundary. Triggers that arrive while a
/// frame is pending join it.
#[derive(Default)]
pub struct FrameAligned {
    pending: Rc<Cell<Option<TimerId>>>,
}

impl FrameAligned {
    /// An executor with no frame pending.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Executor for FrameAligned {
    fn trigger(&self, execute: Execute) {
        if self.pending.get().is_some() {
            return;
        }
        let pending = Rc::clone(&self.pending);
        let id = Runtime::host().request_frame(Box::new(move || {
            pending.set(None);
            execute();
        }));
        self.pending.set(Some(id));
    }

    fn cancel(&self) {
        if let Some(id) = self.pending.take() {
            if let Some(host) = Runtime::try_host() {
                host.cancel_frame(id);
            }
        }
    }
}

/// Runs the body once triggers have stopped for `delay`.
pub struct Debounced {
    delay: Duration,
    timer: Rc<Cell<Option<TimerId>>>,
}

impl Debounced {
    /// Wait for `delay` of quiet before each execution.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            timer: Rc::new(Cell::new(None)),
        }
    }
}

impl Executor for Debounced {
    fn trigger(&self, execute: Execute) {
        let host = Runtime::host();
        if let Some(id) = self.timer.take() {
            host.clear_timeout(id);
        }

        let timer = Rc::clone(&self.timer);
        let id = host.set_timeout(
            self.delay,
            Box::new(move || {
                timer.set(None);
                execute();
            }),
        );
        self.timer.set(Some(id));
    }

    fn cancel(&self) {
        if let Some(id) = self.timer.take() {
            if let Some(host) = Runtime::try_host() {
                host.clear_timeout(id);
            }
        }
    }
}

/// Runs the body at most once per `delay` while triggers keep coming.
///
/// The first trigger of a burst starts a repeating timer of period `delay`.
/// Every trigger re-arms a stop timer; once triggers have been quiet for
/// `delay` the repeating timer is cleared.
pub struct Throttled {
    delay: Duration,
    interval: Rc<Cell<Option<TimerId>>>,
    stop: Rc<Cell<Option<TimerId>>>,
}

impl Throttled {
    /// Execute at most once per `delay`.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            interval: Rc::new(Cell::new(None)),
            stop: Rc::new(Cell::new(None)),
        }
    }
}

impl Executor for Throttled {
    fn trigger(&self, execute: Execute) {
        let host = Runtime::host();
        if self.interval.get().is_none() {
            let id = host.set_interval(self.delay, execute);
            self.interval.set(Some(id));
        }

        if let Some(id) = self.stop.take() {
            host.clear_timeout(id);
        }
        let (interval, stop) = (Rc::clone(&self.interval), Rc::clone(&self.stop));
        let weak_host = Rc::downgrade(&host);
        let id = host.set_timeout(
            self.delay,
            Box::new(move || {
                stop.set(None);
                if let (Some(id), Some(host)) = (interval.take(), weak_host.upgrade()) {
                    host.clear_interval(id);
                }
            }),
        );
        self.stop.set(Some(id));
    }

    fn cancel(&self) {
        let Some(host) = Runtime::try_host() else {
            return;
        };
        if let Some(id) = self.interval.take() {
            host.clear_interval(id);
        }
        if let Some(id) = self.stop.take() {
            host.clear_timeout(id);
        }
    }
}

struct DeferredState {
    body: RefCell<Option<Box<dyn FnMut()>>>,
    deps: RefCell<Vec<Weak<Source>>>,
    primed: Cell<bool>,
    executor: Box<dyn Executor>,
    tracker: RefCell<Weak<EffectInner>>,
    executions: Cell<usize>,
}

impl DeferredState {
    fn run_body(&self) {
        let body = self.body.borrow_mut().take();
        let Some(mut body) = body else { return };
        body();
        let mut slot = self.body.borrow_mut();
        if slot.is_none() {
            *slot = Some(body);
        }
    }

    fn capture(&self) {
        let deps = match self.tracker.borrow().upgrade() {
            Some(tracker) => tracker.sources(),
            None => Vec::new(),
        };
        *self.deps.borrow_mut() = deps;
    }

    /// Body of the tracking effect.
    fn on_change(self: &Rc<Self>) {
        if !self.primed.replace(true) {
            if let Some(tracker) = ReactiveContext::current() {
                *self.tracker.borrow_mut() = Rc::downgrade(&tracker);
            }
            self.run_body();
            self.capture();
            return;
        }

        let deps = self.deps.borrow().clone();
        for source in deps.iter().filter_map(Weak::upgrade) {
            source.track();
        }

        let weak = Rc::downgrade(self);
        trace!(deps = deps.len(), "deferred effect triggered");
        let execute: Execute = Rc::new(move || {
            if let Some(state) = weak.upgrade() {
                state.execute();
            }
        });
        untrack(|| self.executor.trigger(execute));
    }

    fn execute(&self) {
        let tracker = self.tracker.borrow().upgrade();
        let Some(tracker) = tracker else { return };
        if tracker.is_disposed() {
            return;
        }

        tracker.rerun_with(|| self.run_body());
        self.capture();
        self.executions.set(self.executions.get() + 1);
    }
}

impl Drop for DeferredState {
    fn drop(&mut self) {
        self.executor.cancel();
    }
}

/// An effect whose re-runs are scheduled by an [`Executor`].
#[must_use = "dropping a DeferredEffect disposes it"]
pub struct DeferredEffect {
    effect: Effect,
    state: Rc<DeferredState>,
}

impl DeferredEffect {
    /// Run `f` once to capture its dependencies, then let `executor` decide
    /// when it runs after each change.
    pub fn new(f: impl FnMut() + 'static, executor: impl Executor + 'static) -> Self {
        let state = Rc::new(DeferredState {
            body: RefCell::new(Some(Box::new(f))),
            deps: RefCell::new(Vec::new()),
            primed: Cell::new(false),
            executor: Box::new(executor),
            tracker: RefCell::new(Weak::new()),
            executions: Cell::new(0),
        });

        let body_state = Rc::clone(&state);
        let effect = Effect::new(move || body_state.on_change());
        debug!(effect = %effect.id(), "created deferred effect");

        Self { effect, state }
    }

    /// Get the ID of the tracking effect.
    pub fn id(&self) -> SubscriberId {
        self.effect.id()
    }

    /// Cancel any pending execution and drop every subscription.
    /// Idempotent.
    pub fn dispose(&self) {
        self.state.executor.cancel();
        self.effect.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.effect.is_disposed()
    }

    /// Number of times the executor ran the body after a change.
    pub fn execution_count(&self) -> usize {
        self.state.executions.get()
    }

    /// Number of dependencies captured by the latest body run.
    pub fn dependency_count(&self) -> usize {
        self.state.deps.borrow().len()
    }
}

impl Drop for DeferredEffect {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for DeferredEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredEffect")
            .field("id", &self.id())
            .field("executions", &self.execution_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Effect {
    /// Run `f` at most once per frame after its dependencies change.
    pub fn ui(f: impl FnMut() + 'static) -> DeferredEffect {
        DeferredEffect::new(f, FrameAligned::new())
    }

    /// Run `f` once its dependencies have been quiet for `delay`.
    pub fn debounced(f: impl FnMut() + 'static, delay: Duration) -> DeferredEffect {
        DeferredEffect::new(f, Debounced::new(delay))
    }

    /// Run `f` at most once per `delay` while its dependencies keep changing.
    pub fn throttled(f: impl FnMut() + 'static, delay: Duration) -> DeferredEffect {
        DeferredEffect::new(f, Throttled::new(delay))
    }

    /// Run `f` after changes, whenever `executor` says so.
    pub fn deferred(
        f: impl FnMut() + 'static,
        executor: impl Executor + 'static,
    ) -> DeferredEffect {
        DeferredEffect::new(f, executor)
    }

    /// Run `f` without tracking the signals it reads.
    pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
        untrack(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::VirtualHost;
    use crate::reactive::Signal;

    fn counted(signal: &Signal<i32>) -> (Rc<Cell<u32>>, impl FnMut() + 'static) {
        let runs = Rc::new(Cell::new(0));
        let (s, counter) = (signal.clone(), runs.clone());
        (runs, move || {
            s.get();
            counter.set(counter.get() + 1);
        })
    }

    #[test]
    fn first_run_is_immediate_and_tracked() {
        let _host = VirtualHost::install();
        let signal = Signal::new(0);
        let (runs, body) = counted(&signal);

        let deferred = Effect::debounced(body, Duration::from_millis(50));
        assert_eq!(runs.get(), 1);
        assert_eq!(deferred.dependency_count(), 1);
        assert_eq!(signal.subscriber_count(), 1);
    }

    #[test]
    fn frame_aligned_coalesces_into_one_frame() {
        let host = Rc::new(VirtualHost::with_frame_interval(Duration::from_millis(16)));
        Runtime::set_host(host.clone());
        let signal = Signal::new(0);
        let (runs, body) = counted(&signal);
        let ui = Effect::ui(body);

        for i in 1..=5 {
            signal.set(i);
            host.run_until_idle();
        }
        assert_eq!(runs.get(), 1);

        host.advance_frame();
        assert_eq!(runs.get(), 2);
        assert_eq!(ui.execution_count(), 1);
    }

    #[test]
    fn debounced_waits_for_quiet() {
        let host = VirtualHost::install();
        let signal = Signal::new(0);
        let (runs, body) = counted(&signal);
        let deferred = Effect::debounced(body, Duration::from_millis(100));

        for i in 1..=10 {
            signal.set(i);
            host.advance(Duration::from_millis(10));
        }
        assert_eq!(runs.get(), 1);

        host.advance(Duration::from_millis(100));
        assert_eq!(runs.get(), 2);
        assert_eq!(deferred.execution_count(), 1);
    }

    #[test]
    fn throttled_runs_at_a_bounded_rate() {
        let host = VirtualHost::install();
        let signal = Signal::new(0);
        let (_runs, body) = counted(&signal);
        let deferred = Effect::throttled(body, Duration::from_millis(100));

        for i in 1..=50 {
            signal.set(i);
            host.advance(Duration::from_millis(10));
        }
        host.advance(Duration::from_millis(500));

        let executions = deferred.execution_count();
        assert!(executions >= 4 && executions <= 6, "{executions}");
        assert_eq!(host.pending_timers(), 0);
    }

    #[test]
    fn dispose_cancels_pending_work() {
        let host = VirtualHost::install();
        let signal = Signal::new(0);
        let (runs, body) = counted(&signal);
        let deferred = Effect::debounced(body, Duration::from_millis(100));

        signal.set(1);
        host.run_until_idle();
        assert_eq!(host.pending_timers(), 1);

        deferred.dispose();
        deferred.dispose();
        assert_eq!(host.pending_timers(), 0);
        assert_eq!(signal.subscriber_count(), 0);

        host.advance(Duration::from_millis(500));
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn execute_refreshes_dependencies() {
        let host = VirtualHost::install();
        let flag = Signal::new(false);
        let extra = Signal::new(0);
        let (f, e) = (flag.clone(), extra.clone());
        let deferred = Effect::debounced(
            move || {
                if f.get() {
                    e.get();
                }
            },
            Duration::from_millis(10),
        );
        assert_eq!(deferred.dependency_count(), 1);

        flag.set(true);
        host.advance(Duration::from_millis(20));
        assert_eq!(deferred.dependency_count(), 2);
        assert_eq!(extra.subscriber_count(), 1);
    }

    #[test]
    fn untrack_reads_do_not_subscribe() {
        let signal = Signal::new(1);
        let s = signal.clone();
        let _effect = Effect::new(move || {
            Effect::untrack(|| s.get());
        });
        assert_eq!(signal.subscriber_count(), 0);
    }
}
