//! Integration Tests for the Reactive Engine
//!
//! These tests drive signals, computed values, effects and the bridges
//! together through the public API, on both hosts.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use futures_util::future::{FutureExt, LocalBoxFuture};
use pulse_core::{
    bound, computed, deep_signal, effect, from_event, from_resource, untrack, Computed,
    DeepSignal, Effect, EventEmitter, ReactiveError, Runtime, RuntimeConfig, Signal, TokioHost,
    VirtualHost,
};
use serde_json::json;
use tokio::sync::oneshot;

type Log<T> = Rc<RefCell<Vec<T>>>;

fn log<T>() -> Log<T> {
    Rc::new(RefCell::new(Vec::new()))
}

/// An effect runs once on creation and again only after the flush.
#[test]
fn effect_reruns_after_flush() {
    let host = VirtualHost::install();
    let count = Signal::new(0);
    let seen = log();

    let (c, l) = (count.clone(), seen.clone());
    let _effect = effect(move || l.borrow_mut().push(c.get()));
    assert_eq!(*seen.borrow(), vec![0]);

    count.set(1);
    count.set(2);
    assert_eq!(*seen.borrow(), vec![0]);
    assert!(Runtime::is_flush_scheduled());

    host.run_until_idle();
    assert_eq!(*seen.borrow(), vec![0, 2]);
}

/// A computed is lazy until read, then tracks its sources while observed.
#[test]
fn computed_is_lazy_and_tracks_while_observed() {
    let host = VirtualHost::install();
    let a = Signal::new(4);
    let b = Signal::new(6);

    let (ra, rb) = (a.clone(), b.clone());
    let sum: Computed<i32> = computed(move || ra.get() + rb.get());
    assert_eq!(sum.evaluation_count(), 0);
    assert_eq!(sum.get(), 10);

    let seen = log();
    let (s, l) = (sum.clone(), seen.clone());
    let watcher = effect(move || l.borrow_mut().push(s.get()));
    assert!(sum.is_active());

    a.set(5);
    host.run_until_idle();
    assert_eq!(seen.borrow().last(), Some(&11));

    watcher.dispose();
    assert!(!sum.is_active());
    assert_eq!(a.subscriber_count(), 0);
}

/// An effect that writes what it reads is stopped by the cycle guard.
#[test]
fn self_feeding_effect_is_stopped() {
    let host = VirtualHost::install();
    let errors = Rc::new(Cell::new(0));
    let e = errors.clone();
    Runtime::set_error_reporter(move |err| {
        assert!(matches!(err, ReactiveError::CycleDetected { threshold: 10, .. }));
        e.set(e.get() + 1);
    });

    let counter = Signal::new(0);
    let c = counter.clone();
    let _loop = effect(move || {
        let n = c.get();
        c.set(n + 1);
    });
    host.run_until_idle();

    assert_eq!(counter.get(), 10);
    assert_eq!(errors.get(), 1);
    Runtime::clear_error_reporter();
}

/// The cycle threshold comes from the runtime configuration.
#[test]
fn cycle_threshold_is_configurable() {
    let host = VirtualHost::install();
    Runtime::configure(RuntimeConfig::from_json(r#"{ "cycle_threshold": 3 }"#).unwrap());
    Runtime::set_error_reporter(|_| {});

    let counter = Signal::new(0);
    let c = counter.clone();
    let _loop = effect(move || {
        let n = c.get();
        c.set(n + 1);
    });
    host.run_until_idle();

    assert_eq!(counter.get(), 3);
    Runtime::configure(RuntimeConfig::default());
    Runtime::clear_error_reporter();
}

/// Writing one leaf of a deep signal wakes only readers of that leaf.
#[test]
fn deep_signal_notifies_only_affected_leaves() {
    let host = VirtualHost::install();
    let state: DeepSignal = deep_signal(json!({ "child": { "x": 1, "y": 2 } }));
    let child = state.field("child").unwrap();
    let x = child.field("x").unwrap();

    let runs = Rc::new(Cell::new(0));
    let (rx, r) = (x.clone(), runs.clone());
    let _reader = effect(move || {
        rx.get();
        r.set(r.get() + 1);
    });

    child.field("y").unwrap().set(json!(3));
    host.run_until_idle();
    assert_eq!(runs.get(), 1);

    state.set(json!({ "child": { "x": 1, "y": 4 } }));
    host.run_until_idle();
    assert_eq!(runs.get(), 1);

    x.set(json!(7));
    host.run_until_idle();
    assert_eq!(runs.get(), 2);
    assert_eq!(state.get(), json!({ "child": { "x": 7, "y": 4 } }));
}

/// A whole-tree reader sees leaf writes.
#[test]
fn deep_signal_root_reader_sees_nested_writes() {
    let host = VirtualHost::install();
    let todos = deep_signal(json!({ "items": [] }));
    let items = todos.field("items").unwrap();

    let sizes = log();
    let (t, l) = (todos.clone(), sizes.clone());
    let _reader = effect(move || l.borrow_mut().push(t.get()["items"].as_array().map_or(0, Vec::len)));

    items.push(json!({ "done": false })).unwrap();
    host.run_until_idle();
    items.index(0).unwrap().field("done").unwrap().set(json!(true));
    host.run_until_idle();

    assert_eq!(*sizes.borrow(), vec![0, 1, 1]);
    assert_eq!(todos.get()["items"][0]["done"], json!(true));
}

/// Throttled effects run at a bounded rate under sustained writes.
#[test]
fn throttled_effect_bounds_the_rate() {
    let host = VirtualHost::install();
    let input = Signal::new(0);
    let i = input.clone();
    let throttled = Effect::throttled(
        move || {
            i.get();
        },
        Duration::from_millis(100),
    );

    for n in 1..=100 {
        input.set(n);
        host.run_until_idle();
        host.advance(Duration::from_millis(10));
    }
    host.advance(Duration::from_millis(500));

    let runs = throttled.execution_count();
    assert!(runs < 20, "ran {runs} times");
    assert!(runs >= 5, "ran {runs} times");
    assert_eq!(host.pending_timers(), 0);
}

/// Debounced effects run once, after the writes go quiet.
#[test]
fn debounced_effect_waits_for_quiet() {
    let host = VirtualHost::install();
    let input = Signal::new(0);
    let seen = log();
    let (i, l) = (input.clone(), seen.clone());
    let debounced = Effect::debounced(move || l.borrow_mut().push(i.get()), Duration::from_millis(100));

    for n in 1..=5 {
        input.set(n);
        host.run_until_idle();
        host.advance(Duration::from_millis(20));
    }
    assert_eq!(debounced.execution_count(), 0);

    host.advance(Duration::from_millis(79));
    assert_eq!(debounced.execution_count(), 0);
    host.advance(Duration::from_millis(1));
    assert_eq!(debounced.execution_count(), 1);
    assert_eq!(*seen.borrow(), vec![0, 5]);
}

/// Frame-aligned effects coalesce every change of a frame into one run.
#[test]
fn ui_effect_runs_once_per_frame() {
    let host = VirtualHost::install();
    let input = Signal::new(0);
    let i = input.clone();
    let ui = Effect::ui(move || {
        i.get();
    });

    input.set(1);
    host.run_until_idle();
    input.set(2);
    host.run_until_idle();
    assert_eq!(ui.execution_count(), 0);

    host.advance_frame();
    assert_eq!(ui.execution_count(), 1);
}

fn manual_fetcher(
    pending: Rc<RefCell<Vec<(u32, oneshot::Sender<String>)>>>,
) -> impl Fn(u32) -> LocalBoxFuture<'static, Result<String, String>> {
    move |id| {
        let (tx, rx) = oneshot::channel();
        pending.borrow_mut().push((id, tx));
        async move { rx.await.map_err(|_| "cancelled".to_string()) }.boxed_local()
    }
}

/// A response that arrives after the source moved on is discarded.
#[test]
fn resource_discards_superseded_responses() {
    let host = VirtualHost::install();
    let pending = Rc::new(RefCell::new(Vec::new()));
    let id = Signal::new(1u32);
    let user = from_resource(id.clone(), manual_fetcher(pending.clone()));

    let seen = log();
    let (u, l) = (user.clone(), seen.clone());
    let _reader = effect(move || l.borrow_mut().push(u.get()));
    host.run_until_idle();

    id.set(2);
    host.run_until_idle();

    let mut requests: Vec<_> = pending.borrow_mut().drain(..).collect();
    assert_eq!(requests.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![1, 2]);
    let (_, second) = requests.pop().unwrap();
    let (_, first) = requests.pop().unwrap();

    let _ = second.send("user 2".into());
    host.run_until_idle();
    let _ = first.send("user 1".into());
    host.run_until_idle();

    assert_eq!(user.get(), Some("user 2".to_string()));
    assert!(!seen.borrow().contains(&Some("user 1".to_string())));
    assert!(!user.loading().get());
}

/// Dispose is idempotent for every kind of subscriber.
#[test]
fn dispose_twice_is_harmless() {
    let host = VirtualHost::install();
    let source = Signal::new(0);

    let s = source.clone();
    let plain = effect(move || {
        s.get();
    });
    let s = source.clone();
    let derived = computed(move || s.get() + 1);
    let d = derived.clone();
    let watcher = effect(move || {
        d.get();
    });
    let s = source.clone();
    let deferred = Effect::debounced(
        move || {
            s.get();
        },
        Duration::from_millis(10),
    );
    let pending = Rc::new(RefCell::new(Vec::new()));
    let resource = from_resource(source.clone(), manual_fetcher(pending));
    let r = resource.clone();
    let reader = effect(move || {
        r.get();
    });

    for _ in 0..2 {
        plain.dispose();
        derived.dispose();
        deferred.dispose();
        resource.dispose();
        reader.dispose();
        watcher.dispose();
    }

    source.set(5);
    host.run_until_idle();
    host.advance(Duration::from_millis(50));

    assert!(plain.is_disposed());
    assert!(deferred.is_disposed());
    assert!(!resource.is_active());
    assert_eq!(source.subscriber_count(), 0);
    assert_eq!(host.pending_tasks(), 0);
}

/// A disposed effect never runs again, even if it was already queued.
#[test]
fn disposed_effect_never_reruns() {
    let host = VirtualHost::install();
    let source = Signal::new(0);
    let s = source.clone();
    let effect = Effect::new(move || {
        s.get();
    });

    source.set(1);
    assert_eq!(Runtime::pending_count(), 1);
    effect.dispose();
    host.run_until_idle();

    assert_eq!(effect.run_count(), 1);
    assert_eq!(source.subscriber_count(), 0);
}

/// Untracked reads do not subscribe.
#[test]
fn untracked_read_is_not_a_dependency() {
    let host = VirtualHost::install();
    let tracked = Signal::new(0);
    let ignored = Signal::new(0);

    let (t, i) = (tracked.clone(), ignored.clone());
    let effect = Effect::new(move || {
        t.get();
        untrack(|| i.get());
    });

    ignored.set(1);
    host.run_until_idle();
    assert_eq!(effect.run_count(), 1);
    assert_eq!(effect.dependency_count(), 1);
}

/// Readers of a bound delegate follow it to its new target.
#[test]
fn bound_delegate_follows_rebinding() {
    let host = VirtualHost::install();
    let light = Signal::new("light");
    let dark = Signal::new("dark");
    let theme = bound(light.clone());

    let seen = log();
    let (t, l) = (theme.clone(), seen.clone());
    let _reader = effect(move || l.borrow_mut().push(t.get()));

    theme.rebind(dark.clone());
    host.run_until_idle();
    light.set("bright");
    host.run_until_idle();

    assert_eq!(*seen.borrow(), vec!["light", "dark"]);
    assert_eq!(light.subscriber_count(), 0);
    assert_eq!(dark.subscriber_count(), 1);
}

/// Event signals attach while observed and repeat equal events.
#[test]
fn event_signal_tracks_emitter() {
    let host = VirtualHost::install();
    let emitter = Rc::new(EventEmitter::<u32>::new());
    let keys = from_event(emitter.clone(), "key");

    let seen = log();
    let (k, l) = (keys.clone(), seen.clone());
    let reader = effect(move || l.borrow_mut().push(k.get()));
    assert_eq!(emitter.listener_count("key"), 1);

    emitter.emit("key", &13);
    host.run_until_idle();
    emitter.emit("key", &13);
    host.run_until_idle();
    drop(reader);

    emitter.emit("key", &27);
    host.run_until_idle();
    assert_eq!(*seen.borrow(), vec![None, Some(13), Some(13)]);
    assert_eq!(emitter.listener_count("key"), 0);
}

#[test]
fn config_parses_from_json() {
    let config = RuntimeConfig::from_json(r#"{ "frame_interval_ms": 8 }"#).unwrap();
    assert_eq!(config.frame_interval(), Duration::from_millis(8));
    assert_eq!(config.cycle_threshold, pulse_core::DEFAULT_CYCLE_THRESHOLD);
    assert!(RuntimeConfig::from_json("{ \"cycle_threshold\": -1 }").is_err());
}

/// The same engine runs on tokio's local executor.
#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn effects_run_on_tokio_host() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let _host = TokioHost::install();
            let count = Signal::new(0);
            let seen = log();

            let (c, l) = (count.clone(), seen.clone());
            let _effect = effect(move || l.borrow_mut().push(c.get()));

            count.set(1);
            tokio::time::sleep(Duration::from_millis(1)).await;
            assert_eq!(*seen.borrow(), vec![0, 1]);

            let (c, l) = (count.clone(), seen.clone());
            let debounced = Effect::debounced(
                move || l.borrow_mut().push(c.get() * 100),
                Duration::from_millis(50),
            );
            count.set(2);
            tokio::time::sleep(Duration::from_millis(20)).await;
            count.set(3);
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert_eq!(debounced.execution_count(), 0);

            tokio::time::sleep(Duration::from_millis(60)).await;
            assert_eq!(debounced.execution_count(), 1);
            assert_eq!(seen.borrow().last(), Some(&300));

            Runtime::set_host(Rc::new(VirtualHost::new()));
        })
        .await;
}
