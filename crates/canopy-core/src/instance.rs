//! Component instances and their lifecycle.
//!
//! An instance is created detached (`Initial`), mounts once, is updated by
//! handing its state to a successor instance produced by the next render of
//! its parent, and is destroyed exactly once.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use crate::collections::map::HashMap;
use crate::error::{HostError, RenderError, RuntimeError};
use crate::key::Key;
use crate::reactive::{Observer, PropMap, PropValue, Props};
use crate::reconcile::{self, Child};
use crate::render::{normalize, RenderContext, RenderFn, RenderNode, Rendered};
use crate::runtime::Runtime;
use crate::scope::{HookPhase, Scope};
use crate::{InstanceId, NodeId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstanceState {
    Initial,
    Mounting,
    Mounted,
    Destroying,
    Destroyed,
}

/// A named render function. Two components are the same iff they share the
/// render function allocation.
#[derive(Clone)]
pub struct Component {
    name: Rc<str>,
    render: RenderFn,
}

impl Component {
    pub fn new(
        name: &str,
        render: impl Fn(&RenderContext<'_>) -> Result<Rendered, RenderError> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            render: Rc::new(render),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn same_as(&self, other: &Component) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.render), Rc::as_ptr(&other.render))
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Component").field(&self.name).finish()
    }
}

/// Re-render trigger handed to reactive sources. It survives `update` and is
/// retargeted at the successor instance, so field subscriptions made by
/// earlier renders keep working.
struct RenderObserver {
    target: RefCell<Weak<InstanceInner>>,
}

impl Observer for RenderObserver {
    fn invalidate(&self) {
        let target = self.target.borrow().upgrade();
        if let Some(inner) = target {
            Instance::from_inner(inner).invalidate();
        }
    }
}

pub(crate) struct InstanceInner {
    id: InstanceId,
    runtime: Runtime,
    component: Component,
    key: Option<Key>,
    state: Cell<InstanceState>,
    incoming: PropMap,
    props: RefCell<Props>,
    snapshots: RefCell<HashMap<Rc<str>, serde_json::Value>>,
    scope: RefCell<Option<Scope>>,
    renderer: RefCell<Option<RenderFn>>,
    output: RefCell<Vec<Child>>,
    parent_host: Cell<Option<NodeId>>,
    bound_node: Cell<Option<NodeId>>,
    bindings: RefCell<Vec<Rc<str>>>,
    queued: Cell<bool>,
    // Set while mount hooks run; a destroy from inside one aborts the mount.
    running_mount_hooks: Cell<bool>,
    observer: RefCell<Rc<RenderObserver>>,
}

#[derive(Clone)]
pub struct Instance {
    inner: Rc<InstanceInner>,
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Instance {
    pub(crate) fn new(
        runtime: Runtime,
        component: Component,
        incoming: PropMap,
        key: Option<Key>,
    ) -> Self {
        let id = runtime.next_instance_id();
        let props = Props::from_map(&incoming);
        let snapshots = incoming
            .iter()
            .filter_map(|(name, value)| value.snapshot().map(|content| (Rc::clone(name), content)))
            .collect();
        let inner = Rc::new_cyclic(|weak| InstanceInner {
            id,
            runtime,
            component,
            key,
            state: Cell::new(InstanceState::Initial),
            incoming,
            props: RefCell::new(props),
            snapshots: RefCell::new(snapshots),
            scope: RefCell::new(None),
            renderer: RefCell::new(None),
            output: RefCell::new(Vec::new()),
            parent_host: Cell::new(None),
            bound_node: Cell::new(None),
            bindings: RefCell::new(Vec::new()),
            queued: Cell::new(false),
            running_mount_hooks: Cell::new(false),
            observer: RefCell::new(Rc::new(RenderObserver {
                target: RefCell::new(weak.clone()),
            })),
        });
        Self { inner }
    }

    pub(crate) fn from_inner(inner: Rc<InstanceInner>) -> Self {
        Self { inner }
    }

    pub fn ptr_eq(&self, other: &Instance) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn id(&self) -> InstanceId {
        self.inner.id
    }

    pub fn key(&self) -> Option<&Key> {
        self.inner.key.as_ref()
    }

    pub fn component(&self) -> &Component {
        &self.inner.component
    }

    pub fn state(&self) -> InstanceState {
        self.inner.state.get()
    }

    pub fn is_mounted(&self) -> bool {
        self.state() == InstanceState::Mounted
    }

    /// Mounted and its first host node sits in a parent.
    pub fn is_connected(&self) -> bool {
        self.is_mounted()
            && self
                .first_host_node()
                .is_some_and(|node| self.inner.runtime.host().parent(node).is_some())
    }

    pub fn first_host_node(&self) -> Option<NodeId> {
        self.inner.output.borrow().first().and_then(Child::first_host)
    }

    /// Every host node produced by this instance, nested output flattened.
    pub fn host_nodes(&self) -> SmallVec<[NodeId; 4]> {
        let output = self.inner.output.borrow();
        let mut nodes = SmallVec::new();
        for child in output.iter() {
            nodes.extend(child.host_nodes());
        }
        nodes
    }

    pub fn output(&self) -> Vec<Child> {
        self.inner.output.borrow().clone()
    }

    pub fn scope(&self) -> Option<Scope> {
        self.inner.scope.borrow().clone()
    }

    /// The live reactive props container.
    pub fn props(&self) -> Props {
        self.inner.props.borrow().clone()
    }

    pub fn parent_host(&self) -> Option<NodeId> {
        self.inner.parent_host.get()
    }

    pub(crate) fn set_parent_host(&self, parent: NodeId) {
        self.inner.parent_host.set(Some(parent));
    }

    pub(crate) fn take_queued(&self) -> bool {
        self.inner.queued.replace(false)
    }

    /// Queues a re-render. Ignored unless mounted; repeated calls before the
    /// queue drains collapse into one.
    pub fn invalidate(&self) {
        if !self.is_mounted() || self.inner.queued.replace(true) {
            return;
        }
        log::trace!("instance {}: invalidated", self.id());
        self.inner.runtime.schedule(Rc::downgrade(&self.inner));
    }

    /// Renders and inserts the output under `parent` before `before`. An
    /// instance that already has output is moved there instead, without
    /// rendering again.
    pub fn mount(&self, parent: NodeId, before: Option<NodeId>) -> Result<(), RuntimeError> {
        let rt = self.inner.runtime.clone();
        rt.batch(|| self.mount_at(&rt, parent, before, rt.active_scope()))
    }

    /// Takes over `prev`'s host nodes, scope and live props, then writes the
    /// changed incoming props. A different key or component remounts at
    /// `prev`'s location instead. `prev` must be connected.
    pub fn update(&self, prev: &Instance) -> Result<(), RuntimeError> {
        let rt = self.inner.runtime.clone();
        rt.batch(|| self.update_from(&rt, prev))
    }

    /// `update` when `prev` is connected; otherwise a fresh mount at the end
    /// of `prev`'s former parent, tearing `prev` down.
    pub fn mount_or_update(&self, prev: &Instance) -> Result<(), RuntimeError> {
        if prev.is_connected() {
            return self.update(prev);
        }
        if matches!(
            prev.state(),
            InstanceState::Destroying | InstanceState::Destroyed
        ) {
            return Err(RuntimeError::Destroyed { id: prev.id() });
        }
        let parent = prev
            .parent_host()
            .ok_or(RuntimeError::NotConnected { id: prev.id() })?;
        let rt = self.inner.runtime.clone();
        rt.batch(|| {
            let parent_scope = prev.scope().and_then(|scope| scope.parent());
            prev.destroy();
            self.mount_at(&rt, parent, None, parent_scope.or_else(|| rt.active_scope()))
        })
    }

    /// Forced re-render against the current output. A render error leaves
    /// the current output untouched.
    pub fn rerender(&self) -> Result<(), RuntimeError> {
        let rt = self.inner.runtime.clone();
        rt.batch(|| self.rerender_in_place(&rt))
    }

    /// Teardown: scope tree (descendant hooks first), then every produced
    /// host node. Idempotent and safe to call from inside a hook.
    pub fn destroy(&self) {
        let rt = self.inner.runtime.clone();
        rt.batch(|| self.teardown(&rt));
    }

    fn guard_state(&self, expected: InstanceState) -> Result<(), RuntimeError> {
        match self.state() {
            state if state == expected => Ok(()),
            InstanceState::Destroying | InstanceState::Destroyed => {
                Err(RuntimeError::Destroyed { id: self.id() })
            }
            state => Err(RuntimeError::InvalidState { id: self.id(), state }),
        }
    }

    fn mount_at(
        &self,
        rt: &Runtime,
        parent: NodeId,
        before: Option<NodeId>,
        parent_scope: Option<Scope>,
    ) -> Result<(), RuntimeError> {
        if !self.inner.output.borrow().is_empty() {
            if matches!(
                self.state(),
                InstanceState::Destroying | InstanceState::Destroyed
            ) {
                return Err(RuntimeError::Destroyed { id: self.id() });
            }
            log::trace!("instance {}: remounting under {parent}", self.id());
            return self.relocate(rt, parent, before);
        }
        self.guard_state(InstanceState::Initial)?;

        self.inner.state.set(InstanceState::Mounting);
        self.inner.parent_host.set(Some(parent));
        let scope = rt.create_scope(parent_scope.as_ref());
        *self.inner.scope.borrow_mut() = Some(scope.clone());
        log::debug!(
            "instance {} ({}): mounting with scope {}",
            self.id(),
            self.component().name(),
            scope.id()
        );

        let _active = rt.enter_scope(&scope);
        let children = match self.render_children(rt, &scope) {
            Ok(children) => children,
            Err(err) => {
                self.abandon_mount(&scope);
                return Err(err);
            }
        };
        if self.state() != InstanceState::Mounting {
            log::debug!("instance {}: destroyed during render", self.id());
            discard_all(rt, &children);
            return Ok(());
        }

        let mounted = match reconcile::patch_children(rt, parent, &[], children.clone(), before) {
            Ok(mounted) => mounted,
            Err(err) => {
                discard_all(rt, &children);
                self.abandon_mount(&scope);
                return Err(err);
            }
        };
        if self.state() != InstanceState::Mounting {
            discard_all(rt, &mounted);
            return Ok(());
        }
        *self.inner.output.borrow_mut() = mounted;

        self.apply_bindings(rt)?;
        self.inner.state.set(InstanceState::Mounted);
        scope.mark_mounted();
        self.inner.running_mount_hooks.set(true);
        scope.run_hooks(HookPhase::Mount);
        self.inner.running_mount_hooks.set(false);
        Ok(())
    }

    /// Rolls a failed first mount back to `Initial`.
    fn abandon_mount(&self, scope: &Scope) {
        scope.abort();
        if self.state() == InstanceState::Mounting {
            self.inner.scope.borrow_mut().take();
            self.inner.renderer.borrow_mut().take();
            self.inner.parent_host.set(None);
            self.inner.state.set(InstanceState::Initial);
        }
    }

    fn relocate(
        &self,
        rt: &Runtime,
        parent: NodeId,
        before: Option<NodeId>,
    ) -> Result<(), RuntimeError> {
        {
            let mut host = rt.host_mut();
            for node in self.host_nodes() {
                host.insert_before(parent, node, before)?;
            }
        }
        self.inner.parent_host.set(Some(parent));
        Ok(())
    }

    fn update_from(&self, rt: &Runtime, prev: &Instance) -> Result<(), RuntimeError> {
        if self.ptr_eq(prev) {
            return Ok(());
        }
        self.guard_state(InstanceState::Initial)?;
        prev.guard_state(InstanceState::Mounted)?;
        if !prev.is_connected() {
            return Err(RuntimeError::NotConnected { id: prev.id() });
        }

        if self.key() != prev.key() || !self.component().same_as(prev.component()) {
            let parent = prev
                .parent_host()
                .ok_or(RuntimeError::NotConnected { id: prev.id() })?;
            log::debug!(
                "instance {}: identity changed, remounting in place of {}",
                self.id(),
                prev.id()
            );
            let parent_scope = prev.scope().and_then(|scope| scope.parent());
            self.mount_at(
                rt,
                parent,
                prev.first_host_node(),
                parent_scope.or_else(|| rt.active_scope()),
            )?;
            prev.destroy();
            return Ok(());
        }

        log::trace!("instance {}: adopting instance {}", self.id(), prev.id());
        let was_queued = self.adopt(prev);
        self.sync_props();
        self.apply_bindings(rt)?;
        if let Some(scope) = self.scope() {
            let _active = rt.enter_scope(&scope);
            scope.run_hooks(HookPhase::Update);
        }
        if was_queued {
            self.invalidate();
        }
        Ok(())
    }

    /// Moves `prev`'s state into this instance and marks `prev` superseded.
    /// Returns whether `prev` had a re-render pending.
    fn adopt(&self, prev: &Instance) -> bool {
        let from = &prev.inner;
        let to = &self.inner;
        *to.scope.borrow_mut() = from.scope.borrow_mut().take();
        *to.renderer.borrow_mut() = from.renderer.borrow_mut().take();
        *to.output.borrow_mut() = std::mem::take(&mut *from.output.borrow_mut());
        *to.props.borrow_mut() = from.props.replace(Props::new());
        *to.snapshots.borrow_mut() = std::mem::take(&mut *from.snapshots.borrow_mut());
        *to.bindings.borrow_mut() = std::mem::take(&mut *from.bindings.borrow_mut());
        to.bound_node.set(from.bound_node.take());
        to.parent_host.set(from.parent_host.take());

        let observer = from.observer.replace(Rc::new(RenderObserver {
            target: RefCell::new(Weak::new()),
        }));
        *observer.target.borrow_mut() = Rc::downgrade(to);
        *to.observer.borrow_mut() = observer;

        to.state.set(InstanceState::Mounted);
        from.state.set(InstanceState::Destroyed);
        from.queued.replace(false)
    }

    /// Writes incoming props that changed into the live container. Composite
    /// values are compared by content against the last snapshot, which
    /// catches in-place mutation and skips equal fresh copies.
    fn sync_props(&self) {
        let live = self.props();
        let incoming = &self.inner.incoming;
        let mut writes: Vec<(Rc<str>, PropValue)> = Vec::new();
        let removed: Vec<Rc<str>>;
        {
            let mut snapshots = self.inner.snapshots.borrow_mut();
            for (name, value) in incoming.iter() {
                let current = live.peek(name);
                match (value.snapshot(), current) {
                    (Some(content), Some(old)) if old.is_composite() => {
                        if snapshots.get(name) != Some(&content) {
                            writes.push((Rc::clone(name), value.clone()));
                            snapshots.insert(Rc::clone(name), content);
                        }
                    }
                    (Some(content), _) => {
                        writes.push((Rc::clone(name), value.clone()));
                        snapshots.insert(Rc::clone(name), content);
                    }
                    (None, current) => {
                        snapshots.remove(name);
                        if !current.is_some_and(|old| old.same_as(value)) {
                            writes.push((Rc::clone(name), value.clone()));
                        }
                    }
                }
            }
            removed = live
                .names()
                .into_iter()
                .filter(|name| !incoming.contains(name))
                .collect();
            for name in &removed {
                snapshots.remove(name);
            }
        }
        for (name, value) in writes {
            live.set(&name, value);
        }
        for name in removed {
            live.remove(&name);
        }
    }

    fn rerender_in_place(&self, rt: &Runtime) -> Result<(), RuntimeError> {
        self.guard_state(InstanceState::Mounted)?;
        let scope = self.scope().ok_or(RuntimeError::InvalidState {
            id: self.id(),
            state: self.state(),
        })?;
        let parent = self
            .parent_host()
            .ok_or(RuntimeError::NotConnected { id: self.id() })?;
        log::trace!("instance {}: re-rendering", self.id());

        let _active = rt.enter_scope(&scope);
        let children = self.render_children(rt, &scope)?;
        if !self.is_mounted() {
            discard_all(rt, &children);
            return Ok(());
        }

        let old = self.output();
        let anchor = old
            .last()
            .and_then(Child::last_host)
            .and_then(|node| rt.host().next_sibling(node));
        let next = reconcile::patch_children(rt, parent, &old, children, anchor)?;
        if !self.is_mounted() {
            let fresh: Vec<Child> = next.into_iter().filter(|child| !old.contains(child)).collect();
            discard_all(rt, &fresh);
            return Ok(());
        }
        *self.inner.output.borrow_mut() = next;

        self.apply_bindings(rt)?;
        scope.run_hooks(HookPhase::Update);
        Ok(())
    }

    /// Runs the render function (or the stored setup renderer) with reads
    /// tracked, then normalizes. Only the render made while mounting may
    /// register hooks. Empty output becomes a single marker node.
    fn render_children(&self, rt: &Runtime, scope: &Scope) -> Result<Vec<Child>, RuntimeError> {
        let props = self.props();
        let observer: Weak<dyn Observer> = {
            let observer: Rc<dyn Observer> = self.inner.observer.borrow().clone();
            Rc::downgrade(&observer)
        };
        let setup = self.state() == InstanceState::Mounting;
        let context = RenderContext::new(rt, scope, &props, setup);

        let node = props.track_reads(&observer, || -> Result<RenderNode, RenderError> {
            let stored = self.inner.renderer.borrow().clone();
            let first = match &stored {
                Some(renderer) => renderer(&context)?,
                None => (self.inner.component.render)(&context)?,
            };
            match first {
                Rendered::Node(node) => Ok(node),
                Rendered::Renderer(_) if stored.is_some() => Err(RenderError::NestedRenderer),
                Rendered::Renderer(renderer) => {
                    let second = renderer(&context)?;
                    *self.inner.renderer.borrow_mut() = Some(renderer);
                    match second {
                        Rendered::Node(node) => Ok(node),
                        Rendered::Renderer(_) => Err(RenderError::NestedRenderer),
                    }
                }
            }
        })?;

        let mut children = Vec::new();
        normalize(rt, node, Some(&observer), &mut children)?;
        if children.is_empty() {
            children.push(Child::Host(rt.host_mut().create_marker()));
        }
        Ok(children)
    }

    /// Event handler props subscribe on the first host node; a `NodeRef`
    /// prop is filled once with that node.
    fn apply_bindings(&self, rt: &Runtime) -> Result<(), HostError> {
        let Some(node) = self.first_host_node() else {
            return Ok(());
        };
        let entries = self.props().entries();
        let handlers: Vec<(String, &PropValue)> = entries
            .iter()
            .filter_map(|(name, value)| match value {
                PropValue::Handler(_) => event_name(name).map(|event| (event, value)),
                _ => None,
            })
            .collect();

        let previous_node = self.inner.bound_node.replace(Some(node));
        let previous = std::mem::take(&mut *self.inner.bindings.borrow_mut());
        let mut bound = Vec::with_capacity(handlers.len());
        {
            let mut host = rt.host_mut();
            if let Some(previous_node) = previous_node {
                for event in &previous {
                    let kept = previous_node == node
                        && handlers.iter().any(|(name, _)| name.as_str() == &**event);
                    if !kept && host.kind(previous_node).is_ok() {
                        host.set_listener(previous_node, event, None)?;
                    }
                }
            }
            for (event, value) in &handlers {
                if let PropValue::Handler(handler) = value {
                    host.set_listener(node, event, Some(handler.clone()))?;
                    bound.push(Rc::from(event.as_str()));
                }
            }
        }
        *self.inner.bindings.borrow_mut() = bound;

        for (_, value) in &entries {
            if let PropValue::Ref(slot) = value {
                if slot.get().is_none() {
                    slot.set(Some(node));
                }
            }
        }
        Ok(())
    }

    fn teardown(&self, rt: &Runtime) {
        let state = self.state();
        if matches!(
            state,
            InstanceState::Destroying | InstanceState::Destroyed
        ) {
            return;
        }
        self.inner.state.set(InstanceState::Destroying);
        log::debug!("instance {}: destroying", self.id());

        let scope = self.inner.scope.borrow_mut().take();
        if let Some(scope) = &scope {
            let _active = rt.enter_scope(scope);
            if state == InstanceState::Mounting || self.inner.running_mount_hooks.get() {
                scope.abort();
            } else {
                scope.destroy();
            }
        }

        let output = std::mem::take(&mut *self.inner.output.borrow_mut());
        discard_all(rt, &output);

        self.inner.props.replace(Props::new());
        self.inner.snapshots.borrow_mut().clear();
        self.inner.renderer.borrow_mut().take();
        self.inner.bindings.borrow_mut().clear();
        self.inner.bound_node.set(None);
        self.inner.parent_host.set(None);
        self.inner.queued.set(false);
        self.inner.state.set(InstanceState::Destroyed);
    }
}

fn discard_all(rt: &Runtime, children: &[Child]) {
    for child in children {
        reconcile::teardown(rt, child);
    }
}

/// `onClick` -> `click`. Only `on` followed by an uppercase letter counts.
fn event_name(prop: &str) -> Option<String> {
    let rest = prop.strip_prefix("on")?;
    if !rest.chars().next()?.is_ascii_uppercase() {
        return None;
    }
    Some(rest.to_ascii_lowercase())
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.inner.id)
            .field("component", &self.inner.component.name)
            .field("key", &self.inner.key)
            .field("state", &self.inner.state.get())
            .finish()
    }
}
