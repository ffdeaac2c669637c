//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, computed values
//! and effects, plus the scheduler that connects them.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a tracking context (an effect), the signal automatically registers
//! that context as a dependent. When the signal's value changes, all
//! dependents are queued to re-run. A [`DeepSignal`] does the same for every
//! leaf of a JSON value tree.
//!
//! ## Computed
//!
//! A Computed is a derived value that caches its result. It keeps the cache
//! current only while somebody is watching it.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change. Deferred effects let an [`Executor`] decide when the
//! re-run happens: on the next frame, after a quiet period, or at a bounded
//! rate.
//!
//! ## Bridges
//!
//! [`Resource`] turns an async fetch into signals, [`from_event`] turns an
//! event stream into one, and [`Bound`] proxies a signal that can be swapped.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local tracking context to automatically
//! detect dependencies. When a signal is read, we check if there is an active
//! tracking context and, if so, register the dependency.
//!
//! Writes never run effects synchronously. They queue subscribers on the
//! [`Runtime`], which flushes them through the host's microtask primitive.

mod bound;
mod computed;
mod context;
mod deep;
mod deferred;
mod effect;
mod event;
mod resource;
mod runtime;
mod signal;
mod source;
mod subscriber;

pub use bound::{bound, Bound};
pub use computed::{computed, Computed};
pub use context::{untrack, ReactiveContext};
pub use deep::{deep_signal, DeepSignal};
pub use deferred::{Debounced, DeferredEffect, Execute, Executor, FrameAligned, Throttled};
pub use effect::{cleanup, effect, Cleanup, Effect, EffectOutput};
pub use event::{from_event, EventEmitter, EventTarget, Listener, ListenerId};
pub use resource::{from_resource, Resource, ResourceSource};
pub use runtime::Runtime;
pub use signal::{signal, Equals, Signal, SignalRead, SignalWrite, WeakSignal};
pub use subscriber::{SourceId, SubscriberId};
