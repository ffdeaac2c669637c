//! Virtual Host
//!
//! A deterministic host with a manually advanced clock. Nothing runs until
//! the owner drives it:
//!
//! - [`VirtualHost::run_until_idle`] drains microtasks and ready futures
//! - [`VirtualHost::advance`] moves the clock forward, firing timers and
//!   frame callbacks in due order and draining microtasks after each one
//!
//! Timers that share a due time fire in the order they were armed. Frame
//! callbacks are timers due at the next multiple of the frame interval.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::future::LocalBoxFuture;
use futures_util::task::{waker, ArcWake};
use parking_lot::Mutex;

use super::{next_frame_boundary, Host, RepeatingTask, Task, TimerId};
use crate::reactive::Runtime;

/// Shortest period a repeating timer may have.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

enum Timer {
    Once {
        id: TimerId,
        task: Task,
    },
    Repeating {
        id: TimerId,
        period: Duration,
        task: RepeatingTask,
    },
}

impl Timer {
    fn id(&self) -> TimerId {
        match self {
            Timer::Once { id, .. } | Timer::Repeating { id, .. } => *id,
        }
    }
}

#[derive(Default)]
struct ClockState {
    now: Duration,
    sequence: u64,
    microtasks: VecDeque<Task>,
    /// Keyed by (due time, arming order).
    timers: BTreeMap<(Duration, u64), Timer>,
    schedule: HashMap<TimerId, (Duration, u64)>,
    futures: HashMap<u64, LocalBoxFuture<'static, ()>>,
    next_task: u64,
}

impl ClockState {
    fn arm(&mut self, due: Duration, timer: Timer) {
        let key = (due, self.sequence);
        self.sequence += 1;
        self.schedule.insert(timer.id(), key);
        self.timers.insert(key, timer);
    }

    fn disarm(&mut self, id: TimerId) -> Option<Timer> {
        let key = self.schedule.remove(&id)?;
        self.timers.remove(&key)
    }

    /// Pop the earliest timer due at or before `deadline`, moving the clock
    /// to its due time.
    fn pop_due(&mut self, deadline: Duration) -> Option<Timer> {
        let (&(due, _), _) = self.timers.first_key_value()?;
        if due > deadline {
            return None;
        }
        let (_, timer) = self.timers.pop_first()?;
        self.schedule.remove(&timer.id());
        self.now = self.now.max(due);
        Some(timer)
    }
}

/// Wakes a spawned future by queueing its ID for the next drain.
struct TaskWaker {
    id: u64,
    queue: Arc<Mutex<VecDeque<u64>>>,
}

impl ArcWake for TaskWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.queue.lock().push_back(arc_self.id);
    }
}

/// A manually driven host with a virtual clock.
pub struct VirtualHost {
    state: RefCell<ClockState>,
    woken: Arc<Mutex<VecDeque<u64>>>,
    frame_interval: Option<Duration>,
}

impl VirtualHost {
    /// Create a host whose frame interval follows the runtime configuration.
    pub fn new() -> Self {
        Self {
            state: RefCell::new(ClockState::default()),
            woken: Arc::new(Mutex::new(VecDeque::new())),
            frame_interval: None,
        }
    }

    /// Create a host with a fixed frame interval.
    pub fn with_frame_interval(interval: Duration) -> Self {
        Self {
            frame_interval: Some(interval),
            ..Self::new()
        }
    }

    /// Create a host and install it as the current thread's host.
    pub fn install() -> Rc<Self> {
        let host = Rc::new(Self::new());
        Runtime::set_host(host.clone());
        host
    }

    /// Current virtual time, measured from the host's creation.
    pub fn now(&self) -> Duration {
        self.state.borrow().now
    }

    /// Number of armed timers and frame callbacks.
    pub fn pending_timers(&self) -> usize {
        self.state.borrow().timers.len()
    }

    /// Number of spawned futures that have not completed.
    pub fn pending_tasks(&self) -> usize {
        self.state.borrow().futures.len()
    }

    /// Run queued microtasks and ready futures until none are left.
    ///
    /// Work queued while draining is drained too, so a cascade of flushes
    /// runs to completion.
    pub fn run_until_idle(&self) {
        loop {
            let task = self.state.borrow_mut().microtasks.pop_front();
            if let Some(task) = task {
                task();
                continue;
            }

            let woken = self.woken.lock().pop_front();
            if let Some(id) = woken {
                self.poll_task(id);
                continue;
            }

            break;
        }
    }

    /// Move the clock forward by `delta`, firing everything that falls due.
    pub fn advance(&self, delta: Duration) {
        self.run_until_idle();
        let deadline = self.now() + delta;

        loop {
            let timer = self.state.borrow_mut().pop_due(deadline);
            let Some(timer) = timer else { break };

            match timer {
                Timer::Once { task, .. } => task(),
                Timer::Repeating { id, period, task } => {
                    {
                        let mut state = self.state.borrow_mut();
                        let due = state.now + period;
                        state.arm(
                            due,
                            Timer::Repeating {
                                id,
                                period,
                                task: task.clone(),
                            },
                        );
                    }
                    task();
                }
            }

            self.run_until_idle();
        }

        {
            let mut state = self.state.borrow_mut();
            state.now = state.now.max(deadline);
        }
        self.run_until_idle();
    }

    /// Advance to the next frame boundary.
    pub fn advance_frame(&self) {
        let now = self.now();
        let boundary = next_frame_boundary(now, self.frame_interval());
        self.advance(boundary - now);
    }

    fn frame_interval(&self) -> Duration {
        self.frame_interval
            .unwrap_or_else(|| Runtime::config().frame_interval())
    }

    fn poll_task(&self, id: u64) {
        let future = self.state.borrow_mut().futures.remove(&id);
        let Some(mut future) = future else { return };

        let waker = waker(Arc::new(TaskWaker {
            id,
            queue: Arc::clone(&self.woken),
        }));
        let mut cx = Context::from_waker(&waker);

        if let Poll::Pending = future.as_mut().poll(&mut cx) {
            self.state.borrow_mut().futures.insert(id, future);
        }
    }

    fn cancel(&self, id: TimerId) {
        let removed = self.state.borrow_mut().disarm(id);
        drop(removed);
    }
}

impl Default for VirtualHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for VirtualHost {
    fn queue_microtask(&self, task: Task) {
        self.state.borrow_mut().microtasks.push_back(task);
    }

    fn request_frame(&self, task: Task) -> TimerId {
        let id = TimerId::new();
        let interval = self.frame_interval();
        let mut state = self.state.borrow_mut();
        let due = next_frame_boundary(state.now, interval);
        state.arm(due, Timer::Once { id, task });
        id
    }

    fn cancel_frame(&self, id: TimerId) {
        self.cancel(id);
    }

    fn set_timeout(&self, delay: Duration, task: Task) -> TimerId {
        let id = TimerId::new();
        let mut state = self.state.borrow_mut();
        let due = state.now + delay;
        state.arm(due, Timer::Once { id, task });
        id
    }

    fn clear_timeout(&self, id: TimerId) {
        self.cancel(id);
    }

    fn set_interval(&self, period: Duration, task: RepeatingTask) -> TimerId {
        let id = TimerId::new();
        let period = period.max(MIN_INTERVAL);
        let mut state = self.state.borrow_mut();
        let due = state.now + period;
        state.arm(due, Timer::Repeating { id, period, task });
        id
    }

    fn clear_interval(&self, id: TimerId) {
        self.cancel(id);
    }

    fn spawn_local(&self, future: LocalBoxFuture<'static, ()>) {
        let id = {
            let mut state = self.state.borrow_mut();
            let id = state.next_task;
            state.next_task += 1;
            state.futures.insert(id, future);
            id
        };
        self.woken.lock().push_back(id);
    }
}

impl fmt::Debug for VirtualHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("VirtualHost")
            .field("now", &state.now)
            .field("microtasks", &state.microtasks.len())
            .field("timers", &state.timers.len())
            .field("futures", &state.futures.len())
            .finish()
    }
}
