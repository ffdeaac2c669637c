//! Host Primitives
//!
//! The reactive core never blocks and never owns a thread. Everything that
//! happens "later" goes through a [`Host`]:
//!
//! - a microtask hop, used by the scheduler to coalesce writes into one flush
//! - frame callbacks, used by frame-aligned effects
//! - one-shot and repeating timers, used by debounced and throttled effects
//! - local task spawning, used by resources to drive fetch futures
//!
//! Two hosts ship with the crate:
//!
//! - [`VirtualHost`]: a deterministic, manually driven clock. It is the
//!   default host of every thread and the one tests use.
//! - [`TokioHost`]: maps the primitives onto a tokio `LocalSet` and
//!   `tokio::time`.
//!
//! A host is installed per thread with
//! [`Runtime::set_host`](crate::reactive::Runtime::set_host).

mod tokio_host;
mod virtual_host;

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::future::LocalBoxFuture;

pub use tokio_host::TokioHost;
pub use virtual_host::VirtualHost;

/// A callback that runs once.
pub type Task = Box<dyn FnOnce()>;

/// A callback that may run many times.
pub type RepeatingTask = Rc<dyn Fn()>;

/// Handle to a pending timer or frame callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    /// Generate a new unique timer ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for TimerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Scheduling primitives supplied by the environment.
///
/// Cancelling an ID that already fired or was already cancelled is a no-op.
pub trait Host {
    /// Run `task` once, after the current synchronous work.
    fn queue_microtask(&self, task: Task);

    /// Run `task` at the next frame boundary.
    fn request_frame(&self, task: Task) -> TimerId;

    /// Cancel a pending frame callback.
    fn cancel_frame(&self, id: TimerId);

    /// Run `task` once after `delay`.
    fn set_timeout(&self, delay: Duration, task: Task) -> TimerId;

    /// Cancel a pending timeout.
    fn clear_timeout(&self, id: TimerId);

    /// Run `task` every `period`, first after one period.
    fn set_interval(&self, period: Duration, task: RepeatingTask) -> TimerId;

    /// Stop a repeating timer.
    fn clear_interval(&self, id: TimerId);

    /// Drive `future` to completion on the current thread.
    fn spawn_local(&self, future: LocalBoxFuture<'static, ()>);
}

/// Start of the frame that follows `now`, for frames spaced `interval` apart.
pub(crate) fn next_frame_boundary(now: Duration, interval: Duration) -> Duration {
    let interval = interval.as_nanos().max(1);
    let frames = now.as_nanos() / interval + 1;
    Duration::from_nanos((frames * interval) as u64)
}
