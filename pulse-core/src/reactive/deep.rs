//! Deep Signals
//!
//! A [`DeepSignal`] holds a JSON-shaped value and decomposes it into a tree
//! of child signals, so effects can depend on a single leaf:
//!
//! - an object value makes every property a child signal
//! - an array value makes every object or array element a child signal;
//!   primitive elements are stored as plain values
//! - anything else is stored as a scalar
//!
//! # Reconciliation
//!
//! Writing a new value reuses the existing child for every key (objects)
//! or position (arrays) and writes the new member into it, so subscribers
//! of untouched leaves are never woken. A node notifies its own
//! subscribers only when its shape or one of its plain members changed.
//! A child that changes notifies its subscribers and those of every
//! ancestor, without altering the ancestors' values.
//!
//! Reading a node returns the whole subtree as a plain [`Value`]. Only the
//! node read is tracked; bubbling keeps its readers up to date.
//!
//! Since leaf writes wake ancestors, the cycle guard charges a write to the
//! nearest node the writing effect has read. An effect that reads a whole
//! tree and keeps writing one of its leaves is stopped like any other
//! cycle. Array operations go through the guard too.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::runtime::Runtime;
use super::signal::{Equals, SignalRead, SignalWrite};
use super::source::Source;
use super::subscriber::SourceId;
use crate::error::{ReactiveError, Result};

const EXPECTED_ARRAY: &str = "an array value";

enum Member {
    Plain(Value),
    Nested(DeepSignal),
}

impl Member {
    fn snapshot(&self) -> Value {
        match self {
            Member::Plain(value) => value.clone(),
            Member::Nested(child) => child.snapshot(),
        }
    }

    fn release(self) -> Value {
        match self {
            Member::Plain(value) => value,
            Member::Nested(child) => {
                child.detach();
                child.snapshot()
            }
        }
    }
}

enum Slot {
    Scalar(Value),
    Object(IndexMap<String, DeepSignal>),
    Array(Vec<Member>),
}

impl Slot {
    fn kind(&self) -> &'static str {
        match self {
            Slot::Scalar(_) => "scalar",
            Slot::Object(_) => "object",
            Slot::Array(_) => "array",
        }
    }
}

fn is_container(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}

struct DeepInner {
    source: Rc<Source>,
    slot: RefCell<Slot>,
    equals: Equals<Value>,
}

/// A signal over a JSON value tree with per-leaf subscriptions.
///
/// ```rust
/// use pulse_core::{deep_signal, Effect, VirtualHost};
/// use serde_json::json;
///
/// let host = VirtualHost::install();
/// let state = deep_signal(json!({ "user": { "name": "ada", "age": 36 } }));
///
/// let name = state.field("user").and_then(|user| user.field("name")).unwrap();
/// let n = name.clone();
/// let watcher = Effect::new(move || println!("name: {}", n.get()));
///
/// state.set(json!({ "user": { "name": "ada", "age": 37 } }));
/// host.run_until_idle();
/// assert_eq!(watcher.run_count(), 1);
/// ```
#[derive(Clone)]
pub struct DeepSignal {
    inner: Rc<DeepInner>,
}

impl DeepSignal {
    /// Create a deep signal that compares leaves with `PartialEq`.
    pub fn new(value: Value) -> Self {
        Self::with_equality(value, Equals::default())
    }

    /// Create a deep signal with an explicit leaf equality policy.
    ///
    /// Children created for nested members inherit the policy.
    pub fn with_equality(value: Value, equals: Equals<Value>) -> Self {
        let signal = Self {
            inner: Rc::new(DeepInner {
                source: Source::new(),
                slot: RefCell::new(Slot::Scalar(Value::Null)),
                equals,
            }),
        };
        let (slot, _) = signal.reconcile(Slot::Scalar(Value::Null), value);
        *signal.inner.slot.borrow_mut() = slot;
        signal
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> SourceId {
        self.inner.source.id()
    }

    /// Get the whole subtree as a plain value, subscribing the current
    /// effect to this node.
    pub fn get(&self) -> Value {
        self.inner.source.track();
        self.snapshot()
    }

    /// Get the whole subtree without subscribing.
    pub fn get_untracked(&self) -> Value {
        self.snapshot()
    }

    /// Deserialize the current value.
    pub fn get_as<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(self.get())
    }

    /// Write a new value, reconciling it against the current tree.
    ///
    /// A write refused by the cycle guard is reported through
    /// [`Runtime::report`] and otherwise ignored.
    pub fn set(&self, value: Value) {
        if let Err(err) = self.try_set(value) {
            Runtime::report(err);
        }
    }

    /// Write a new value, returning the cycle-guard error if refused.
    pub fn try_set(&self, value: Value) -> Result<()> {
        self.inner.source.admit_write()?;
        self.assign(value);
        Ok(())
    }

    /// Edit a copy of the value and write it back.
    pub fn update(&self, f: impl FnOnce(&mut Value)) {
        let mut next = self.snapshot();
        f(&mut next);
        self.set(next);
    }

    /// The child signal for `key`, if this node is an object with that key.
    ///
    /// Navigation does not subscribe to this node.
    pub fn field(&self, key: &str) -> Option<DeepSignal> {
        match &*self.inner.slot.borrow() {
            Slot::Object(children) => children.get(key).cloned(),
            _ => None,
        }
    }

    /// The child signal at `index`, if this node is an array whose element
    /// there is an object or array. Primitive elements have no signal of
    /// their own; read them with [`DeepSignal::get_index`].
    pub fn index(&self, index: usize) -> Option<DeepSignal> {
        match &*self.inner.slot.borrow() {
            Slot::Array(members) => match members.get(index) {
                Some(Member::Nested(child)) => Some(child.clone()),
                _ => None,
            },
            _ => None,
        }
    }

    /// Read the element at `index`, subscribing to this node.
    pub fn get_index(&self, index: usize) -> Option<Value> {
        self.inner.source.track();
        match &*self.inner.slot.borrow() {
            Slot::Array(members) => members.get(index).map(Member::snapshot),
            _ => None,
        }
    }

    /// Number of properties or elements, subscribing to this node.
    /// Scalars have length zero.
    pub fn len(&self) -> usize {
        self.inner.source.track();
        match &*self.inner.slot.borrow() {
            Slot::Scalar(_) => 0,
            Slot::Object(children) => children.len(),
            Slot::Array(members) => members.len(),
        }
    }

    /// Whether [`DeepSignal::len`] is zero.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Property names in insertion order, subscribing to this node.
    pub fn keys(&self) -> Vec<String> {
        self.inner.source.track();
        match &*self.inner.slot.borrow() {
            Slot::Object(children) => children.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Whether this node holds an array. Does not subscribe.
    pub fn is_array(&self) -> bool {
        matches!(&*self.inner.slot.borrow(), Slot::Array(_))
    }

    /// Whether this node holds an object. Does not subscribe.
    pub fn is_object(&self) -> bool {
        matches!(&*self.inner.slot.borrow(), Slot::Object(_))
    }

    /// Append an element. Returns the new length.
    pub fn push(&self, value: Value) -> Result<usize> {
        self.mutate_array("DeepSignal::push", |members, this| {
            members.push(this.member(value));
            members.len()
        })
    }

    /// Remove and return the last element.
    pub fn pop(&self) -> Result<Option<Value>> {
        self.mutate_array("DeepSignal::pop", |members, _| {
            members.pop().map(Member::release)
        })
    }

    /// Remove and return the first element.
    pub fn shift(&self) -> Result<Option<Value>> {
        self.mutate_array("DeepSignal::shift", |members, _| {
            if members.is_empty() {
                None
            } else {
                Some(members.remove(0).release())
            }
        })
    }

    /// Prepend an element. Returns the new length.
    pub fn unshift(&self, value: Value) -> Result<usize> {
        self.mutate_array("DeepSignal::unshift", |members, this| {
            members.insert(0, this.member(value));
            members.len()
        })
    }

    /// Insert an element at `index`, clamped to the array length.
    pub fn insert(&self, index: usize, value: Value) -> Result<()> {
        self.mutate_array("DeepSignal::insert", |members, this| {
            let index = index.min(members.len());
            members.insert(index, this.member(value));
        })
    }

    /// Remove `delete_count` elements starting at `start` and insert `items`
    /// in their place. Both bounds are clamped. Returns the removed elements.
    pub fn splice(
        &self,
        start: usize,
        delete_count: usize,
        items: impl IntoIterator<Item = Value>,
    ) -> Result<Vec<Value>> {
        self.mutate_array("DeepSignal::splice", |members, this| {
            let start = start.min(members.len());
            let end = start.saturating_add(delete_count).min(members.len());
            let inserted: Vec<Member> = items.into_iter().map(|item| this.member(item)).collect();
            members
                .splice(start..end, inserted)
                .map(Member::release)
                .collect()
        })
    }

    /// Sort the elements in place. Child signals move with their elements.
    pub fn sort_by(&self, mut compare: impl FnMut(&Value, &Value) -> Ordering) -> Result<()> {
        self.mutate_array("DeepSignal::sort_by", |members, _| {
            let mut keyed: Vec<(Value, Member)> = members
                .drain(..)
                .map(|member| (member.snapshot(), member))
                .collect();
            keyed.sort_by(|(a, _), (b, _)| compare(a, b));
            members.extend(keyed.into_iter().map(|(_, member)| member));
        })
    }

    /// Reverse the elements in place.
    pub fn reverse(&self) -> Result<()> {
        self.mutate_array("DeepSignal::reverse", |members, _| members.reverse())
    }

    /// Get the number of subscribers of this node.
    pub fn subscriber_count(&self) -> usize {
        self.inner.source.subscriber_count()
    }

    /// Run `f` whenever this node goes from no subscribers to some.
    pub fn on_first_subscriber(&self, f: impl Fn() + 'static) -> &Self {
        self.inner.source.set_on_first(Rc::new(f));
        self
    }

    /// Run `f` whenever this node loses its last subscriber.
    pub fn on_last_subscriber_removed(&self, f: impl Fn() + 'static) -> &Self {
        self.inner.source.set_on_last(Rc::new(f));
        self
    }

    /// Whether both handles point to the same node.
    pub fn is_same(&self, other: &DeepSignal) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn snapshot(&self) -> Value {
        match &*self.inner.slot.borrow() {
            Slot::Scalar(value) => value.clone(),
            Slot::Object(children) => Value::Object(
                children
                    .iter()
                    .map(|(key, child)| (key.clone(), child.snapshot()))
                    .collect::<Map<String, Value>>(),
            ),
            Slot::Array(members) => Value::Array(members.iter().map(Member::snapshot).collect()),
        }
    }

    /// Store `value` without consulting the cycle guard, notifying if this
    /// node changed.
    fn assign(&self, value: Value) {
        let previous = self.inner.slot.replace(Slot::Scalar(Value::Null));
        let (next, changed) = self.reconcile(previous, value);
        let placeholder = self.inner.slot.replace(next);
        drop(placeholder);

        if changed {
            self.inner.source.notify();
        }
    }

    /// Build the slot for `value`, reusing the children of `previous`.
    /// Returns the slot and whether this node's own shape or plain members
    /// changed.
    fn reconcile(&self, previous: Slot, value: Value) -> (Slot, bool) {
        match value {
            Value::Object(map) => {
                let (mut existing, mut changed) = match previous {
                    Slot::Object(children) => (children, false),
                    _ => (IndexMap::new(), true),
                };
                let old_order: Vec<String> = existing.keys().cloned().collect();

                let mut children = IndexMap::with_capacity(map.len());
                for (key, item) in map {
                    let child = match existing.shift_remove(&key) {
                        Some(child) => {
                            child.assign(item);
                            child
                        }
                        None => {
                            changed = true;
                            self.child(item)
                        }
                    };
                    children.insert(key, child);
                }

                if !existing.is_empty() {
                    changed = true;
                    for (_, removed) in existing {
                        removed.detach();
                    }
                }
                changed = changed || !children.keys().eq(old_order.iter());
                (Slot::Object(children), changed)
            }
            Value::Array(items) => {
                let (old, mut changed) = match previous {
                    Slot::Array(members) => (members, false),
                    _ => (Vec::new(), true),
                };
                changed = changed || old.len() != items.len();

                let mut old = old.into_iter();
                let mut members = Vec::with_capacity(items.len());
                for item in items {
                    let member = match (old.next(), is_container(&item)) {
                        (Some(Member::Nested(child)), true) => {
                            child.assign(item);
                            Member::Nested(child)
                        }
                        (Some(Member::Plain(prior)), false) => {
                            changed = changed || self.inner.equals.changed(&prior, &item);
                            Member::Plain(item)
                        }
                        (prior, _) => {
                            changed = true;
                            if let Some(prior) = prior {
                                prior.release();
                            }
                            self.member(item)
                        }
                    };
                    members.push(member);
                }
                for leftover in old {
                    leftover.release();
                }
                (Slot::Array(members), changed)
            }
            scalar => {
                let changed = match &previous {
                    Slot::Scalar(prior) => self.inner.equals.changed(prior, &scalar),
                    _ => true,
                };
                release_slot(previous);
                (Slot::Scalar(scalar), changed)
            }
        }
    }

    fn child(&self, value: Value) -> DeepSignal {
        let child = DeepSignal::with_equality(value, self.inner.equals.clone());
        child.inner.source.set_parent(&self.inner.source);
        child
    }

    fn member(&self, value: Value) -> Member {
        if is_container(&value) {
            Member::Nested(self.child(value))
        } else {
            Member::Plain(value)
        }
    }

    /// Stop bubbling into the former parent.
    fn detach(&self) {
        self.inner.source.clear_parent();
    }

    fn mutate_array<R>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut Vec<Member>, &DeepSignal) -> R,
    ) -> Result<R> {
        if !self.is_array() {
            return Err(ReactiveError::binding(operation, EXPECTED_ARRAY));
        }
        self.inner.source.admit_write()?;

        let mut members = match &mut *self.inner.slot.borrow_mut() {
            Slot::Array(members) => std::mem::take(members),
            _ => return Err(ReactiveError::binding(operation, EXPECTED_ARRAY)),
        };

        let out = f(&mut members, self);

        let placeholder = self.inner.slot.replace(Slot::Array(members));
        drop(placeholder);
        self.inner.source.notify();
        Ok(out)
    }
}

fn release_slot(slot: Slot) {
    match slot {
        Slot::Scalar(_) => {}
        Slot::Object(children) => children.values().for_each(DeepSignal::detach),
        Slot::Array(members) => members.into_iter().for_each(|member| {
            member.release();
        }),
    }
}

impl SignalRead<Value> for DeepSignal {
    fn get(&self) -> Value {
        DeepSignal::get(self)
    }

    fn get_untracked(&self) -> Value {
        DeepSignal::get_untracked(self)
    }
}

impl SignalWrite<Value> for DeepSignal {
    fn set(&self, value: Value) {
        DeepSignal::set(self, value)
    }

    fn update(&self, f: impl FnOnce(&mut Value)) {
        DeepSignal::update(self, f)
    }
}

impl fmt::Debug for DeepSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeepSignal")
            .field("id", &self.id())
            .field("kind", &self.inner.slot.borrow().kind())
            .field("value", &self.snapshot())
            .finish()
    }
}

/// Shorthand for [`DeepSignal::new`].
pub fn deep_signal(value: Value) -> DeepSignal {
    DeepSignal::new(value)
}
