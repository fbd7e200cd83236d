//! Minimal reactive primitives consumed by the runtime.
//!
//! The runtime only needs containers that can be read, written, and whose
//! writes invalidate whoever read them during the last render.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::collections::map::HashMap;
use crate::host::EventHandler;
use crate::key::format_number;
use crate::NodeId;

/// Something that re-runs when a value it read changes.
pub trait Observer {
    fn invalidate(&self);
}

#[derive(Default)]
pub(crate) struct Watchers {
    list: RefCell<Vec<Weak<dyn Observer>>>,
}

impl Watchers {
    pub(crate) fn watch(&self, observer: &Weak<dyn Observer>) {
        let mut list = self.list.borrow_mut();
        list.retain(|existing| existing.strong_count() > 0);
        if !list.iter().any(|existing| Weak::ptr_eq(existing, observer)) {
            list.push(observer.clone());
        }
    }

    pub(crate) fn notify(&self) {
        let live: Vec<Rc<dyn Observer>> = {
            let mut list = self.list.borrow_mut();
            list.retain(|existing| existing.strong_count() > 0);
            list.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in live {
            observer.invalidate();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.list
            .borrow()
            .iter()
            .filter(|existing| existing.strong_count() > 0)
            .count()
    }
}

struct SignalInner<T> {
    value: RefCell<T>,
    watchers: Watchers,
}

/// A writable reactive cell.
pub struct Signal<T> {
    inner: Rc<SignalInner<T>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> Signal<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(SignalInner {
                value: RefCell::new(value),
                watchers: Watchers::default(),
            }),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    pub fn set(&self, value: T) {
        *self.inner.value.borrow_mut() = value;
        self.inner.watchers.notify();
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let result = f(&mut self.inner.value.borrow_mut());
        self.inner.watchers.notify();
        result
    }

    /// Registers `observer` to be invalidated on the next write.
    pub fn subscribe(&self, observer: &Weak<dyn Observer>) {
        self.inner.watchers.watch(observer);
    }

    pub fn watcher_count(&self) -> usize {
        self.inner.watchers.len()
    }
}

impl<T: Clone + 'static> Signal<T> {
    pub fn get(&self) -> T {
        self.inner.value.borrow().clone()
    }
}

impl<T: fmt::Debug> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("value", &*self.inner.value.borrow())
            .finish()
    }
}

/// Shared composite value (object or array) that may be mutated in place.
pub type Shared = Rc<RefCell<serde_json::Value>>;

pub fn shared(value: serde_json::Value) -> Shared {
    Rc::new(RefCell::new(value))
}

/// Writable slot that captures a host node.
#[derive(Clone, Default)]
pub struct NodeRef {
    slot: Rc<Cell<Option<NodeId>>>,
}

impl NodeRef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<NodeId> {
        self.slot.get()
    }

    pub fn set(&self, node: Option<NodeId>) {
        self.slot.set(node);
    }

    pub fn ptr_eq(&self, other: &NodeRef) -> bool {
        Rc::ptr_eq(&self.slot, &other.slot)
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NodeRef").field(&self.slot.get()).finish()
    }
}

#[derive(Clone, Debug, Default)]
pub enum PropValue {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Text(Rc<str>),
    Composite(Shared),
    Handler(EventHandler),
    Ref(NodeRef),
}

impl PropValue {
    pub fn composite(value: serde_json::Value) -> Self {
        PropValue::Composite(shared(value))
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, PropValue::Composite(_))
    }

    /// A copy of the current composite content, for snapshots.
    pub fn snapshot(&self) -> Option<serde_json::Value> {
        match self {
            PropValue::Composite(value) => Some(value.borrow().clone()),
            _ => None,
        }
    }

    /// Value comparison for primitives, identity for everything else.
    pub fn same_as(&self, other: &PropValue) -> bool {
        match (self, other) {
            (PropValue::Null, PropValue::Null) => true,
            (PropValue::Bool(a), PropValue::Bool(b)) => a == b,
            (PropValue::Number(a), PropValue::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (PropValue::Text(a), PropValue::Text(b)) => a == b,
            (PropValue::Composite(a), PropValue::Composite(b)) => Rc::ptr_eq(a, b),
            (PropValue::Handler(a), PropValue::Handler(b)) => a.ptr_eq(b),
            (PropValue::Ref(a), PropValue::Ref(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            PropValue::Text(text) => Some(text.to_string()),
            PropValue::Number(value) if value.is_finite() => Some(format_number(*value)),
            PropValue::Bool(value) => Some(value.to_string()),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            PropValue::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_shared(&self) -> Option<&Shared> {
        match self {
            PropValue::Composite(value) => Some(value),
            _ => None,
        }
    }
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        PropValue::Bool(value)
    }
}

impl From<f64> for PropValue {
    fn from(value: f64) -> Self {
        PropValue::Number(value)
    }
}

impl From<i32> for PropValue {
    fn from(value: i32) -> Self {
        PropValue::Number(f64::from(value))
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        PropValue::Text(value.into())
    }
}

impl From<String> for PropValue {
    fn from(value: String) -> Self {
        PropValue::Text(value.into())
    }
}

impl From<Shared> for PropValue {
    fn from(value: Shared) -> Self {
        PropValue::Composite(value)
    }
}

impl From<&Shared> for PropValue {
    fn from(value: &Shared) -> Self {
        PropValue::Composite(Rc::clone(value))
    }
}

impl From<EventHandler> for PropValue {
    fn from(value: EventHandler) -> Self {
        PropValue::Handler(value)
    }
}

impl From<NodeRef> for PropValue {
    fn from(value: NodeRef) -> Self {
        PropValue::Ref(value)
    }
}

impl From<serde_json::Value> for PropValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => PropValue::Null,
            Value::Bool(b) => PropValue::Bool(b),
            Value::Number(n) => n.as_f64().map_or(PropValue::Null, PropValue::Number),
            Value::String(s) => PropValue::Text(s.into()),
            composite @ (Value::Array(_) | Value::Object(_)) => PropValue::composite(composite),
        }
    }
}

/// Ordered incoming props handed to a construction call.
#[derive(Clone, Debug, Default)]
pub struct PropMap {
    entries: Vec<(Rc<str>, PropValue)>,
}

impl PropMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<PropValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<PropValue>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| &**n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name.into(), value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&PropValue> {
        self.entries
            .iter()
            .find(|(n, _)| &**n == name)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Rc<str>, &PropValue)> {
        self.entries.iter().map(|(name, value)| (name, value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S: AsRef<str>, V: Into<PropValue>> FromIterator<(S, V)> for PropMap {
    fn from_iter<I: IntoIterator<Item = (S, V)>>(iter: I) -> Self {
        let mut map = PropMap::new();
        for (name, value) in iter {
            map.insert(name.as_ref(), value);
        }
        map
    }
}

struct Field {
    value: PropValue,
    watchers: Watchers,
}

#[derive(Default)]
struct PropsInner {
    fields: RefCell<HashMap<Rc<str>, Field>>,
    order: RefCell<Vec<Rc<str>>>,
    reader: RefCell<Option<Weak<dyn Observer>>>,
    /// Watchers of fields that do not exist yet.
    pending: RefCell<HashMap<Rc<str>, Watchers>>,
}

/// Live reactive props container. Cloning shares the container.
#[derive(Clone, Default)]
pub struct Props {
    inner: Rc<PropsInner>,
}

impl Props {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: &PropMap) -> Self {
        let props = Props::new();
        for (name, value) in map.iter() {
            props.write_silently(name, value.clone());
        }
        props
    }

    pub fn ptr_eq(&self, other: &Props) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Reads a field and subscribes the active reader to it.
    pub fn get(&self, name: &str) -> Option<PropValue> {
        if let Some(reader) = self.inner.reader.borrow().as_ref() {
            self.subscribe(name, reader);
        }
        self.peek(name)
    }

    /// Reads a field without subscribing.
    pub fn peek(&self, name: &str) -> Option<PropValue> {
        self.inner
            .fields
            .borrow()
            .get(name)
            .map(|field| field.value.clone())
    }

    pub fn subscribe(&self, name: &str, observer: &Weak<dyn Observer>) {
        if let Some(field) = self.inner.fields.borrow().get(name) {
            field.watchers.watch(observer);
            return;
        }
        self.inner
            .pending
            .borrow_mut()
            .entry(name.into())
            .or_default()
            .watch(observer);
    }

    pub fn watcher_count(&self, name: &str) -> usize {
        self.inner
            .fields
            .borrow()
            .get(name)
            .map_or(0, |field| field.watchers.len())
    }

    /// Writes a field and invalidates its watchers.
    pub fn set(&self, name: &str, value: PropValue) {
        self.write_silently(name, value);
        self.notify(name);
    }

    pub fn remove(&self, name: &str) -> Option<PropValue> {
        let removed = self.inner.fields.borrow_mut().remove(name)?;
        self.inner.order.borrow_mut().retain(|n| &**n != name);
        removed.watchers.notify();
        Some(removed.value)
    }

    pub fn names(&self) -> Vec<Rc<str>> {
        self.inner.order.borrow().clone()
    }

    pub fn entries(&self) -> Vec<(Rc<str>, PropValue)> {
        let fields = self.inner.fields.borrow();
        self.inner
            .order
            .borrow()
            .iter()
            .filter_map(|name| {
                fields
                    .get(name)
                    .map(|field| (Rc::clone(name), field.value.clone()))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.order.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write_silently(&self, name: &str, value: PropValue) {
        let mut fields = self.inner.fields.borrow_mut();
        if let Some(field) = fields.get_mut(name) {
            field.value = value;
            return;
        }
        let name: Rc<str> = name.into();
        let watchers = self
            .inner
            .pending
            .borrow_mut()
            .remove(&name)
            .unwrap_or_default();
        fields.insert(Rc::clone(&name), Field { value, watchers });
        self.inner.order.borrow_mut().push(name);
    }

    fn notify(&self, name: &str) {
        // Clone the live watcher list out so no borrow is held while observers run.
        let fields = self.inner.fields.borrow();
        let Some(field) = fields.get(name) else {
            return;
        };
        let live: Vec<Rc<dyn Observer>> = field
            .watchers
            .list
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        drop(fields);
        for observer in live {
            observer.invalidate();
        }
    }

    /// Runs `f` with `observer` recorded as the reader of every field read
    /// through [`Props::get`]. The previous reader is restored on every exit.
    pub(crate) fn track_reads<R>(&self, observer: &Weak<dyn Observer>, f: impl FnOnce() -> R) -> R {
        struct ReaderGuard<'a> {
            slot: &'a RefCell<Option<Weak<dyn Observer>>>,
            previous: Option<Weak<dyn Observer>>,
        }
        impl Drop for ReaderGuard<'_> {
            fn drop(&mut self) {
                *self.slot.borrow_mut() = self.previous.take();
            }
        }
        let previous = self.inner.reader.replace(Some(observer.clone()));
        let _guard = ReaderGuard {
            slot: &self.inner.reader,
            previous,
        };
        f()
    }
}

impl fmt::Debug for Props {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries()).finish()
    }
}
