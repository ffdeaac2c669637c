//! Tokio Host
//!
//! Maps the host primitives onto tokio. Every primitive spawns a local task,
//! so the host must be used from inside a `tokio::task::LocalSet`:
//!
//! ```rust,ignore
//! let local = tokio::task::LocalSet::new();
//! local.run_until(async {
//!     TokioHost::install();
//!     // signals, effects, resources ...
//! }).await;
//! ```
//!
//! Microtasks become freshly spawned local tasks, which tokio runs in FIFO
//! order after the current task yields. Timers are `tokio::time` sleeps and
//! intervals; cancelling one aborts its task.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use futures_util::future::LocalBoxFuture;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::{next_frame_boundary, Host, RepeatingTask, Task, TimerId};
use crate::reactive::Runtime;

type TimerTable = Rc<RefCell<HashMap<TimerId, JoinHandle<()>>>>;

/// Host backed by a tokio `LocalSet`.
pub struct TokioHost {
    epoch: Instant,
    timers: TimerTable,
    spawned: Cell<usize>,
}

impl TokioHost {
    /// Create a host. Frame boundaries are measured from this moment.
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            timers: Rc::new(RefCell::new(HashMap::new())),
            spawned: Cell::new(0),
        }
    }

    /// Create a host and install it as the current thread's host.
    pub fn install() -> Rc<Self> {
        let host = Rc::new(Self::new());
        Runtime::set_host(host.clone());
        host
    }

    /// Number of armed timers and frame callbacks.
    pub fn pending_timers(&self) -> usize {
        self.timers.borrow().len()
    }

    /// Total number of futures handed to [`Host::spawn_local`].
    pub fn spawned_tasks(&self) -> usize {
        self.spawned.get()
    }

    fn arm_once(&self, deadline: Instant, task: Task) -> TimerId {
        let id = TimerId::new();
        let timers = Rc::clone(&self.timers);
        let handle = tokio::task::spawn_local(async move {
            time::sleep_until(deadline).await;
            let finished = timers.borrow_mut().remove(&id);
            drop(finished);
            task();
        });
        self.timers.borrow_mut().insert(id, handle);
        id
    }

    fn cancel(&self, id: TimerId) {
        let handle = self.timers.borrow_mut().remove(&id);
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl Default for TokioHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for TokioHost {
    fn queue_microtask(&self, task: Task) {
        tokio::task::spawn_local(async move { task() });
    }

    fn request_frame(&self, task: Task) -> TimerId {
        let interval = Runtime::config().frame_interval();
        let elapsed = Instant::now().saturating_duration_since(self.epoch);
        let deadline = self.epoch + next_frame_boundary(elapsed, interval);
        self.arm_once(deadline, task)
    }

    fn cancel_frame(&self, id: TimerId) {
        self.cancel(id);
    }

    fn set_timeout(&self, delay: Duration, task: Task) -> TimerId {
        self.arm_once(Instant::now() + delay, task)
    }

    fn clear_timeout(&self, id: TimerId) {
        self.cancel(id);
    }

    fn set_interval(&self, period: Duration, task: RepeatingTask) -> TimerId {
        let id = TimerId::new();
        let period = period.max(Duration::from_millis(1));
        let handle = tokio::task::spawn_local(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                task();
            }
        });
        self.timers.borrow_mut().insert(id, handle);
        id
    }

    fn clear_interval(&self, id: TimerId) {
        self.cancel(id);
    }

    fn spawn_local(&self, future: LocalBoxFuture<'static, ()>) {
        self.spawned.set(self.spawned.get() + 1);
        tokio::task::spawn_local(future);
    }
}

impl fmt::Debug for TokioHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioHost")
            .field("pending_timers", &self.pending_timers())
            .field("spawned_tasks", &self.spawned.get())
            .finish()
    }
}
