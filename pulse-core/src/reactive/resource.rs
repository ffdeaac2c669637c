//! Resources
//!
//! A [`Resource`] turns an async fetch into reactive state. It owns three
//! signals:
//!
//! - `value`: the latest successful result, `None` while loading
//! - `loading`: true while a request is in flight
//! - `error`: the latest failure, as [`ReactiveError::Resource`]
//!
//! The resource starts when its value gains its first subscriber. From then
//! on every change of the source aborts the in-flight request and issues a
//! new one, spawned on the host. A request that was aborted or superseded
//! never writes its outcome. When the value loses its last subscriber, or
//! the resource is disposed, the in-flight request is aborted and the
//! resource stops.

use std::cell::{Cell, RefCell};
use std::fmt::{self, Display};
use std::future::Future;
use std::rc::{Rc, Weak};

use futures_util::future::{AbortHandle, Abortable, Aborted, FutureExt, LocalBoxFuture};
use tracing::{debug, trace, warn};

use super::effect::{cleanup, Cleanup, Effect};
use super::runtime::Runtime;
use super::signal::{Equals, Signal, SignalRead};
use crate::error::ReactiveError;

/// Where a resource takes its request input from.
pub enum ResourceSource<S: 'static> {
    /// Re-fetch whenever the signal changes.
    Signal(Signal<S>),
    /// Fetch once per start.
    Static(S),
}

impl<S: Clone + 'static> ResourceSource<S> {
    fn read(&self) -> S {
        match self {
            ResourceSource::Signal(signal) => signal.get(),
            ResourceSource::Static(value) => value.clone(),
        }
    }
}

impl<S: 'static> From<Signal<S>> for ResourceSource<S> {
    fn from(signal: Signal<S>) -> Self {
        ResourceSource::Signal(signal)
    }
}

type Request<T> = Box<dyn Fn() -> LocalBoxFuture<'static, Result<T, ReactiveError>>>;

struct ResourceInner<T: 'static> {
    value: Signal<Option<T>>,
    loading: Signal<bool>,
    error: Signal<Option<ReactiveError>>,
    request: Request<T>,
    effect: RefCell<Option<Effect>>,
    in_flight: RefCell<Option<AbortHandle>>,
    generation: Cell<u64>,
    disposed: Cell<bool>,
}

impl<T: Clone + 'static> ResourceInner<T> {
    fn start(self: &Rc<Self>) {
        if self.disposed.get() || self.effect.borrow().is_some() {
            return;
        }
        debug!(signal = %self.value.id(), "starting resource");

        let weak = Rc::downgrade(self);
        let effect = Effect::new(move || -> Option<Cleanup> {
            let inner = weak.upgrade()?;
            Some(inner.issue())
        });
        *self.effect.borrow_mut() = Some(effect);
    }

    /// Issue a request for the current source value. Runs as the resource's
    /// effect, so reading the source subscribes to it.
    fn issue(self: &Rc<Self>) -> Cleanup {
        let future = (self.request)();

        self.loading.set(true);
        self.error.set(None);
        self.value.set(None);

        let generation = self.generation.get() + 1;
        self.generation.set(generation);

        let (handle, registration) = AbortHandle::new_pair();
        let request = Abortable::new(future, registration);
        let weak: Weak<Self> = Rc::downgrade(self);
        Runtime::host().spawn_local(
            async move {
                let outcome = request.await;
                if let Some(inner) = weak.upgrade() {
                    inner.settle(generation, outcome);
                }
            }
            .boxed_local(),
        );

        *self.in_flight.borrow_mut() = Some(handle.clone());
        cleanup(move || handle.abort())
    }

    fn settle(&self, generation: u64, outcome: Result<Result<T, ReactiveError>, Aborted>) {
        if generation != self.generation.get() {
            trace!(generation, "discarding superseded response");
            return;
        }

        match outcome {
            Err(Aborted) => trace!(generation, "discarding aborted response"),
            Ok(Ok(value)) => {
                self.in_flight.borrow_mut().take();
                self.loading.set(false);
                self.value.set(Some(value));
            }
            Ok(Err(err)) => {
                warn!(%err, "resource request failed");
                self.in_flight.borrow_mut().take();
                self.loading.set(false);
                self.error.set(Some(err));
            }
        }
    }

    fn stop(&self) {
        let effect = self.effect.borrow_mut().take();
        let Some(effect) = effect else { return };

        debug!(signal = %self.value.id(), "stopping resource");
        self.generation.set(self.generation.get() + 1);
        let in_flight = self.in_flight.borrow_mut().take();
        if let Some(handle) = in_flight {
            handle.abort();
        }
        effect.dispose();
    }
}

/// An async fetch exposed as signals.
///
/// ```rust
/// use pulse_core::{Effect, Resource, ResourceSource, VirtualHost};
///
/// let host = VirtualHost::install();
/// let user = Resource::new(ResourceSource::Static(7u32), |id: u32| async move {
///     Ok::<_, String>(format!("user {id}"))
/// });
///
/// let u = user.clone();
/// let reader = Effect::new(move || {
///     u.get();
/// });
/// host.run_until_idle();
/// assert_eq!(user.value().get_untracked(), Some("user 7".to_string()));
/// # drop(reader);
/// ```
pub struct Resource<T: 'static> {
    inner: Rc<ResourceInner<T>>,
}

impl<T: Clone + 'static> Resource<T> {
    /// Create a resource that calls `fetcher` with each source value.
    pub fn new<S, F, Fut, E>(source: impl Into<ResourceSource<S>>, fetcher: F) -> Self
    where
        S: Clone + 'static,
        F: Fn(S) -> Fut + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
        E: Display + 'static,
    {
        let source = source.into();
        let request: Request<T> = Box::new(move || {
            fetcher(source.read())
                .map(|outcome| {
                    outcome.map_err(|err| ReactiveError::Resource {
                        message: err.to_string(),
                    })
                })
                .boxed_local()
        });

        let inner = Rc::new(ResourceInner {
            value: Signal::with_equality(None, Equals::never()),
            loading: Signal::new(false),
            error: Signal::with_equality(None, Equals::never()),
            request,
            effect: RefCell::new(None),
            in_flight: RefCell::new(None),
            generation: Cell::new(0),
            disposed: Cell::new(false),
        });

        let weak = Rc::downgrade(&inner);
        inner.value.on_first_subscriber(move || {
            if let Some(inner) = weak.upgrade() {
                inner.start();
            }
        });
        let weak = Rc::downgrade(&inner);
        inner.value.on_last_subscriber_removed(move || {
            if let Some(inner) = weak.upgrade() {
                inner.stop();
            }
        });

        Self { inner }
    }

    /// The latest successful result.
    pub fn value(&self) -> Signal<Option<T>> {
        self.inner.value.clone()
    }

    /// Alias of [`Resource::value`].
    pub fn data(&self) -> Signal<Option<T>> {
        self.value()
    }

    /// Whether a request is in flight.
    pub fn loading(&self) -> Signal<bool> {
        self.inner.loading.clone()
    }

    /// The latest failure.
    pub fn error(&self) -> Signal<Option<ReactiveError>> {
        self.inner.error.clone()
    }

    /// Read the value, subscribing the current effect.
    pub fn get(&self) -> Option<T> {
        self.inner.value.get()
    }

    /// Whether the resource is running.
    pub fn is_active(&self) -> bool {
        self.inner.effect.borrow().is_some()
    }

    /// Abort any in-flight request and stop for good. Idempotent.
    pub fn dispose(&self) {
        self.inner.disposed.set(true);
        self.inner.stop();
    }
}

impl<T: 'static> Clone for Resource<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> fmt::Debug for Resource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.inner.value.id())
            .field("generation", &self.inner.generation.get())
            .field("active", &self.inner.effect.borrow().is_some())
            .finish()
    }
}

impl<T: Clone + 'static> SignalRead<Option<T>> for Resource<T> {
    fn get(&self) -> Option<T> {
        Resource::get(self)
    }

    fn get_untracked(&self) -> Option<T> {
        self.inner.value.get_untracked()
    }
}

/// Shorthand for [`Resource::new`].
pub fn from_resource<T, S, F, Fut, E>(source: impl Into<ResourceSource<S>>, fetcher: F) -> Resource<T>
where
    T: Clone + 'static,
    S: Clone + 'static,
    F: Fn(S) -> Fut + 'static,
    Fut: Future<Output = Result<T, E>> + 'static,
    E: Display + 'static,
{
    Resource::new(source, fetcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::VirtualHost;
    use std::collections::HashMap;
    use tokio::sync::oneshot;

    type Reply = Result<String, String>;

    /// A fetcher whose responses are released by hand.
    #[derive(Clone, Default)]
    struct Server {
        pending: Rc<RefCell<HashMap<String, oneshot::Sender<Reply>>>>,
        requests: Rc<RefCell<Vec<String>>>,
    }

    impl Server {
        fn fetcher(&self) -> impl Fn(String) -> LocalBoxFuture<'static, Reply> + 'static {
            let server = self.clone();
            move |url: String| {
                let (tx, rx) = oneshot::channel();
                server.pending.borrow_mut().insert(url.clone(), tx);
                server.requests.borrow_mut().push(url);
                async move { rx.await.unwrap_or_else(|_| Err("dropped".into())) }.boxed_local()
            }
        }

        fn reply(&self, url: &str, reply: Reply) {
            let tx = self.pending.borrow_mut().remove(url);
            if let Some(tx) = tx {
                let _ = tx.send(reply);
            }
        }
    }

    fn observe(resource: &Resource<String>) -> (Effect, Rc<RefCell<Vec<Option<String>>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let (r, log) = (resource.clone(), seen.clone());
        let effect = Effect::new(move || log.borrow_mut().push(r.get()));
        (effect, seen)
    }

    #[test]
    fn nothing_is_fetched_until_observed() {
        let _host = VirtualHost::install();
        let server = Server::default();
        let resource = Resource::new(ResourceSource::Static("/a".to_string()), server.fetcher());

        assert!(server.requests.borrow().is_empty());
        assert!(!resource.is_active());
        assert!(!resource.loading().get());
    }

    #[test]
    fn successful_fetch_fills_value() {
        let host = VirtualHost::install();
        let server = Server::default();
        let url = Signal::new("/a".to_string());
        let resource = Resource::new(url.clone(), server.fetcher());

        let (_reader, seen) = observe(&resource);
        host.run_until_idle();
        assert!(resource.loading().get());

        server.reply("/a", Ok("alpha".into()));
        host.run_until_idle();

        assert!(!resource.loading().get());
        assert_eq!(resource.data().get(), Some("alpha".to_string()));
        assert_eq!(seen.borrow().last(), Some(&Some("alpha".to_string())));
    }

    #[test]
    fn superseded_response_is_never_observed() {
        let host = VirtualHost::install();
        let server = Server::default();
        let url = Signal::new("/one".to_string());
        let resource = Resource::new(url.clone(), server.fetcher());

        let (_reader, seen) = observe(&resource);
        host.run_until_idle();

        url.set("/two".to_string());
        host.run_until_idle();
        server.reply("/one", Ok("one".into()));
        host.run_until_idle();
        server.reply("/two", Ok("two".into()));
        host.run_until_idle();

        assert_eq!(*server.requests.borrow(), vec!["/one", "/two"]);
        assert!(!seen.borrow().contains(&Some("one".to_string())));
        assert_eq!(resource.get(), Some("two".to_string()));
        assert_eq!(host.pending_tasks(), 0);
    }

    #[test]
    fn failure_lands_in_error_signal() {
        let host = VirtualHost::install();
        let server = Server::default();
        let resource = Resource::new(ResourceSource::Static("/missing".to_string()), server.fetcher());

        let (_reader, _) = observe(&resource);
        host.run_until_idle();
        server.reply("/missing", Err("HTTP 404".into()));
        host.run_until_idle();

        assert!(!resource.loading().get());
        assert_eq!(resource.get(), None);
        assert_eq!(
            resource.error().get(),
            Some(ReactiveError::Resource {
                message: "HTTP 404".into()
            })
        );
    }

    #[test]
    fn losing_the_last_reader_aborts_the_request() {
        let host = VirtualHost::install();
        let server = Server::default();
        let url = Signal::new("/slow".to_string());
        let resource = Resource::new(url.clone(), server.fetcher());

        let (reader, seen) = observe(&resource);
        host.run_until_idle();
        assert_eq!(host.pending_tasks(), 1);

        reader.dispose();
        host.run_until_idle();
        assert!(!resource.is_active());
        assert_eq!(host.pending_tasks(), 0);
        assert_eq!(url.subscriber_count(), 0);

        server.reply("/slow", Ok("late".into()));
        host.run_until_idle();
        assert!(!seen.borrow().contains(&Some("late".to_string())));
    }

    #[test]
    fn dispose_is_idempotent() {
        let host = VirtualHost::install();
        let server = Server::default();
        let resource = Resource::new(ResourceSource::Static("/x".to_string()), server.fetcher());

        let (_reader, _) = observe(&resource);
        host.run_until_idle();
        resource.dispose();
        resource.dispose();
        host.run_until_idle();

        assert!(!resource.is_active());
        assert_eq!(host.pending_tasks(), 0);
    }
}
