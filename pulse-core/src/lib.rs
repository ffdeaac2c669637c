//! Pulse Core
//!
//! This crate provides a fine-grained reactive state engine. It implements:
//!
//! - Reactive primitives (signals, deep signals, computed values, effects)
//! - A microtask-batched effect scheduler with a cycle guard
//! - Deferred effects (frame-aligned, debounced, throttled)
//! - Bridges for async resources, event targets and re-targetable proxies
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Reactive primitives, dependency tracking and the scheduler
//! - `host`: Microtask, frame, timer and task primitives the scheduler runs on
//!
//! All reactive state is single-threaded and lives in a per-thread runtime.
//! Every thread starts with a [`VirtualHost`], a deterministic clock that is
//! driven by hand; install a [`TokioHost`] to run on a tokio `LocalSet`.
//!
//! # Example
//!
//! ```rust
//! use pulse_core::{Computed, Effect, Signal, VirtualHost};
//!
//! let host = VirtualHost::install();
//!
//! // Create a signal
//! let count = Signal::new(0);
//!
//! // Create a derived value
//! let c = count.clone();
//! let doubled = Computed::new(move || c.get() * 2);
//!
//! // Create an effect
//! let (c, d) = (count.clone(), doubled.clone());
//! let _effect = Effect::new(move || {
//!     println!("Count: {}, Doubled: {}", c.get(), d.get());
//! });
//!
//! // Update the signal
//! count.set(5);
//! host.run_until_idle();
//! // Effect ran again, printed: "Count: 5, Doubled: 10"
//! ```

pub mod host;
pub mod reactive;

mod config;
mod error;

pub use config::{RuntimeConfig, DEFAULT_CYCLE_THRESHOLD, DEFAULT_FRAME_INTERVAL_MS};
pub use error::{ReactiveError, Result};
pub use host::{Host, TimerId, TokioHost, VirtualHost};
pub use reactive::{
    bound, computed, deep_signal, effect, from_event, from_resource, signal, untrack, Bound,
    Computed, DeepSignal, DeferredEffect, Effect, Equals, EventEmitter, EventTarget, Executor,
    Resource, ResourceSource, Runtime, Signal, SignalRead, SignalWrite,
};
