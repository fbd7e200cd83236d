//! Values produced by render functions and their normalization.

use std::fmt;
use std::rc::{Rc, Weak};

use crate::builder::ElementBuilder;
use crate::error::{HostError, RenderError, ScopeError};
use crate::instance::{Component, Instance};
use crate::key::{format_number, RawKey};
use crate::reactive::{Observer, PropMap, PropValue, Props, Signal};
use crate::reconcile::Child;
use crate::runtime::Runtime;
use crate::scope::{HookOutcome, Provider, Scope};
use crate::NodeId;

#[derive(Clone, Debug, PartialEq)]
pub enum Primitive {
    Text(Rc<str>),
    Number(f64),
    Bool(bool),
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Primitive::Text(text) => f.write_str(text),
            Primitive::Number(value) if value.is_finite() => f.write_str(&format_number(*value)),
            Primitive::Number(value) => write!(f, "{value}"),
            Primitive::Bool(value) => write!(f, "{value}"),
        }
    }
}

/// A reactive cell read once per render pass.
#[derive(Clone)]
pub struct ReactiveCell {
    read: Rc<dyn Fn(Option<&Weak<dyn Observer>>) -> RenderNode>,
}

impl ReactiveCell {
    /// An untracked computed cell.
    pub fn computed(read: impl Fn() -> RenderNode + 'static) -> Self {
        Self {
            read: Rc::new(move |_| read()),
        }
    }

    pub fn read(&self, observer: Option<&Weak<dyn Observer>>) -> RenderNode {
        (self.read)(observer)
    }
}

impl<T> From<&Signal<T>> for ReactiveCell
where
    T: Clone + Into<RenderNode> + 'static,
{
    fn from(signal: &Signal<T>) -> Self {
        let signal = signal.clone();
        Self {
            read: Rc::new(move |observer| {
                if let Some(observer) = observer {
                    signal.subscribe(observer);
                }
                signal.get().into()
            }),
        }
    }
}

impl fmt::Debug for ReactiveCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ReactiveCell")
    }
}

#[derive(Clone, Debug)]
pub enum RenderNode {
    Host(NodeId),
    Component(Instance),
    Primitive(Primitive),
    Sequence(Vec<RenderNode>),
    Cell(ReactiveCell),
}

impl RenderNode {
    pub fn empty() -> Self {
        RenderNode::Sequence(Vec::new())
    }

    pub fn host(node: NodeId) -> Self {
        RenderNode::Host(node)
    }
}

impl From<&str> for RenderNode {
    fn from(value: &str) -> Self {
        RenderNode::Primitive(Primitive::Text(value.into()))
    }
}

impl From<String> for RenderNode {
    fn from(value: String) -> Self {
        RenderNode::Primitive(Primitive::Text(value.into()))
    }
}

impl From<f64> for RenderNode {
    fn from(value: f64) -> Self {
        RenderNode::Primitive(Primitive::Number(value))
    }
}

impl From<i32> for RenderNode {
    fn from(value: i32) -> Self {
        RenderNode::Primitive(Primitive::Number(f64::from(value)))
    }
}

impl From<bool> for RenderNode {
    fn from(value: bool) -> Self {
        RenderNode::Primitive(Primitive::Bool(value))
    }
}

impl From<Instance> for RenderNode {
    fn from(value: Instance) -> Self {
        RenderNode::Component(value)
    }
}

impl From<ReactiveCell> for RenderNode {
    fn from(value: ReactiveCell) -> Self {
        RenderNode::Cell(value)
    }
}

impl<T: Into<RenderNode>> From<Vec<T>> for RenderNode {
    fn from(values: Vec<T>) -> Self {
        RenderNode::Sequence(values.into_iter().map(Into::into).collect())
    }
}

pub type RenderFn = Rc<dyn Fn(&RenderContext<'_>) -> Result<Rendered, RenderError>>;

/// What a render function returns: output, or a renderer to call instead
/// (setup-returns-renderer).
#[derive(Clone)]
pub enum Rendered {
    Node(RenderNode),
    Renderer(RenderFn),
}

impl Rendered {
    pub fn node(node: impl Into<RenderNode>) -> Self {
        Rendered::Node(node.into())
    }

    pub fn host(node: NodeId) -> Self {
        Rendered::Node(RenderNode::Host(node))
    }

    pub fn empty() -> Self {
        Rendered::Node(RenderNode::empty())
    }

    pub fn renderer(
        render: impl Fn(&RenderContext<'_>) -> Result<Rendered, RenderError> + 'static,
    ) -> Self {
        Rendered::Renderer(Rc::new(render))
    }
}

impl From<RenderNode> for Rendered {
    fn from(node: RenderNode) -> Self {
        Rendered::Node(node)
    }
}

impl fmt::Debug for Rendered {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rendered::Node(node) => f.debug_tuple("Node").field(node).finish(),
            Rendered::Renderer(_) => f.write_str("Renderer"),
        }
    }
}

/// Explicit context handed to every render call.
///
/// Hook and cleanup registrations take effect only during the setup render,
/// the first render of a fresh scope. Later renders run the same body again
/// and their registrations are ignored.
pub struct RenderContext<'a> {
    runtime: &'a Runtime,
    scope: &'a Scope,
    props: &'a Props,
    setup: bool,
}

impl<'a> RenderContext<'a> {
    pub(crate) fn new(
        runtime: &'a Runtime,
        scope: &'a Scope,
        props: &'a Props,
        setup: bool,
    ) -> Self {
        Self {
            runtime,
            scope,
            props,
            setup,
        }
    }

    /// Whether this is the first render of the instance's scope.
    pub fn is_setup(&self) -> bool {
        self.setup
    }

    fn accepts_hooks(&self, what: &str) -> bool {
        if !self.setup {
            log::trace!(
                "scope {}: ignoring {what} registered outside the setup render",
                self.scope.id()
            );
        }
        self.setup
    }

    pub fn runtime(&self) -> &'a Runtime {
        self.runtime
    }

    pub fn scope(&self) -> &'a Scope {
        self.scope
    }

    pub fn props(&self) -> &'a Props {
        self.props
    }

    /// Tracked read of a prop.
    pub fn prop(&self, name: &str) -> Option<PropValue> {
        self.props.get(name)
    }

    pub fn prop_text(&self, name: &str) -> String {
        self.prop(name)
            .and_then(|value| value.as_text())
            .unwrap_or_default()
    }

    pub fn provide<T: 'static>(&self, provider: &Provider<T>, value: T) {
        self.scope.provide(provider, value);
    }

    pub fn inject<T: Clone + 'static>(&self, provider: &Provider<T>) -> Result<T, ScopeError> {
        self.scope.inject(provider)
    }

    pub fn inject_or<T: Clone + 'static>(&self, provider: &Provider<T>, default: T) -> T {
        self.scope.inject_or(provider, default)
    }

    pub fn on_mount<R: HookOutcome>(&self, hook: impl FnMut() -> R + 'static) {
        if self.accepts_hooks("mount hook") {
            self.scope.on_mount(hook);
        }
    }

    pub fn on_update<R: HookOutcome>(&self, hook: impl FnMut() -> R + 'static) {
        if self.accepts_hooks("update hook") {
            self.scope.on_update(hook);
        }
    }

    pub fn on_destroy<R: HookOutcome>(&self, hook: impl FnMut() -> R + 'static) {
        if self.accepts_hooks("destroy hook") {
            self.scope.on_destroy(hook);
        }
    }

    pub fn on_cleanup(&self, cleanup: impl FnOnce() + 'static) {
        if self.accepts_hooks("cleanup") {
            self.scope.on_cleanup(cleanup);
        }
    }

    pub fn element(&self, tag: &str) -> ElementBuilder<'a> {
        self.runtime.element(tag)
    }

    pub fn text(&self, text: &str) -> NodeId {
        self.runtime.text(text)
    }

    pub fn create(&self, component: &Component, props: PropMap, key: impl Into<RawKey>) -> Instance {
        self.runtime.create(component, props, key)
    }
}

/// Flattens `node` into sibling entries. Primitives become text nodes and
/// cells are read once, subscribing `observer`.
pub(crate) fn normalize(
    runtime: &Runtime,
    node: RenderNode,
    observer: Option<&Weak<dyn Observer>>,
    out: &mut Vec<Child>,
) -> Result<(), HostError> {
    match node {
        RenderNode::Host(id) => {
            // Surfaces dangling handles before reconciliation starts.
            runtime.host().kind(id)?;
            out.push(Child::Host(id));
        }
        RenderNode::Component(instance) => out.push(Child::Component(instance)),
        RenderNode::Primitive(primitive) => {
            let text = primitive.to_string();
            out.push(Child::Host(runtime.text(&text)));
        }
        RenderNode::Sequence(nodes) => {
            for node in nodes {
                normalize(runtime, node, observer, out)?;
            }
        }
        RenderNode::Cell(cell) => {
            let value = cell.read(observer);
            normalize(runtime, value, observer, out)?;
        }
    }
    Ok(())
}
