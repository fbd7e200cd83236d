//! Primitive host-tree operations.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::HostError;
use crate::NodeId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostKind<'a> {
    Element(&'a str),
    Text(&'a str),
    Marker,
    Fragment,
}

impl HostKind<'_> {
    /// Whether two nodes are structurally the same kind of node: same tag for
    /// elements, both text, both markers.
    pub fn same_type(&self, other: &HostKind<'_>) -> bool {
        match (self, other) {
            (HostKind::Element(a), HostKind::Element(b)) => a == b,
            (HostKind::Text(_), HostKind::Text(_)) => true,
            (HostKind::Marker, HostKind::Marker) => true,
            (HostKind::Fragment, HostKind::Fragment) => true,
            _ => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub name: String,
    pub target: NodeId,
}

#[derive(Clone)]
pub struct EventHandler {
    callback: Rc<dyn Fn(&Event)>,
}

impl EventHandler {
    pub fn new(callback: impl Fn(&Event) + 'static) -> Self {
        Self {
            callback: Rc::new(callback),
        }
    }

    pub fn call(&self, event: &Event) {
        (self.callback)(event)
    }

    pub fn ptr_eq(&self, other: &EventHandler) -> bool {
        Rc::ptr_eq(&self.callback, &other.callback)
    }
}

impl fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandler")
            .field("ptr", &Rc::as_ptr(&self.callback).cast::<()>())
            .finish()
    }
}

/// The platform's mutable presentation tree.
pub trait Host: Any {
    fn create_element(&mut self, tag: &str) -> NodeId;
    fn create_text(&mut self, text: &str) -> NodeId;
    fn create_marker(&mut self) -> NodeId;
    /// A detached batching container; inserting it moves its children into the
    /// target parent and leaves it empty.
    fn create_fragment(&mut self) -> NodeId;

    fn kind(&self, node: NodeId) -> Result<HostKind<'_>, HostError>;
    fn set_text(&mut self, node: NodeId, text: &str) -> Result<(), HostError>;
    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> Result<(), HostError>;
    fn set_listener(
        &mut self,
        node: NodeId,
        event: &str,
        handler: Option<EventHandler>,
    ) -> Result<(), HostError>;
    fn listener(&self, node: NodeId, event: &str) -> Option<EventHandler>;

    /// Inserts `node` under `parent` before `anchor`, or last when `anchor`
    /// is `None`. An attached node is moved.
    fn insert_before(
        &mut self,
        parent: NodeId,
        node: NodeId,
        anchor: Option<NodeId>,
    ) -> Result<(), HostError>;
    fn detach(&mut self, node: NodeId) -> Result<(), HostError>;
    /// Frees a detached node and its subtree.
    fn release(&mut self, node: NodeId) -> Result<(), HostError>;

    fn parent(&self, node: NodeId) -> Option<NodeId>;
    fn next_sibling(&self, node: NodeId) -> Option<NodeId>;
    fn children(&self, node: NodeId) -> Vec<NodeId>;
    /// Deep structural equality.
    fn is_equal_node(&self, a: NodeId, b: NodeId) -> bool;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

pub(crate) struct HostCell {
    inner: RefCell<Box<dyn Host>>,
}

impl HostCell {
    pub(crate) fn new(host: Box<dyn Host>) -> Self {
        Self {
            inner: RefCell::new(host),
        }
    }

    pub(crate) fn borrow(&self) -> std::cell::Ref<'_, dyn Host> {
        std::cell::Ref::map(self.inner.borrow(), |host| &**host)
    }

    pub(crate) fn borrow_mut(&self) -> std::cell::RefMut<'_, dyn Host> {
        std::cell::RefMut::map(self.inner.borrow_mut(), |host| &mut **host)
    }
}
