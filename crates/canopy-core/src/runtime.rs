use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};

use crate::builder::ElementBuilder;
use crate::config::RuntimeConfig;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::{HostError, RuntimeError, ScopeError};
use crate::host::{Event, Host, HostCell};
use crate::instance::{Component, Instance, InstanceInner};
use crate::key::{Key, KeyResolver, RawKey};
use crate::reactive::PropMap;
use crate::reconcile::{self, Child};
use crate::scope::{HookOutcome, HookPhase, Provider, Scope};
use crate::{InstanceId, NodeId, ScopeId};

/// Entry counters for reconciliation work. One relocation per moved entry,
/// however many host nodes the entry owns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub created: usize,
    pub removed: usize,
    pub moved: usize,
    pub patched: usize,
}

pub(crate) struct RuntimeInner {
    host: HostCell,
    keys: RefCell<KeyResolver>,
    config: RuntimeConfig,
    diagnostics: Diagnostics,
    scope_stack: RefCell<Vec<Scope>>,
    next_scope_id: Cell<ScopeId>,
    next_instance_id: Cell<InstanceId>,
    stats: Cell<ReconcileStats>,
    invalid: RefCell<VecDeque<Weak<InstanceInner>>>,
    depth: Cell<usize>,
    draining: Cell<bool>,
    _not_send: PhantomData<*const ()>,
}

/// Per-application runtime context. Cloning shares it.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Runtime {
    pub fn new(host: impl Host) -> Self {
        Self::with_config(host, RuntimeConfig::default())
    }

    pub fn with_config(host: impl Host, config: RuntimeConfig) -> Self {
        let keys = KeyResolver::new(config.max_key_len);
        Self {
            inner: Rc::new(RuntimeInner {
                host: HostCell::new(Box::new(host)),
                keys: RefCell::new(keys),
                config,
                diagnostics: Diagnostics::new(),
                scope_stack: RefCell::new(Vec::new()),
                next_scope_id: Cell::new(1),
                next_instance_id: Cell::new(1),
                stats: Cell::new(ReconcileStats::default()),
                invalid: RefCell::new(VecDeque::new()),
                depth: Cell::new(0),
                draining: Cell::new(false),
                _not_send: PhantomData,
            }),
        }
    }

    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.inner.diagnostics
    }

    pub(crate) fn report(&self, diagnostic: Diagnostic) {
        if diagnostic.is_dev_only() && !self.inner.config.dev_diagnostics {
            return;
        }
        self.inner.diagnostics.report(diagnostic);
    }

    // ── host ────────────────────────────────────────────────────────────

    pub(crate) fn host(&self) -> Ref<'_, dyn Host> {
        self.inner.host.borrow()
    }

    pub(crate) fn host_mut(&self) -> RefMut<'_, dyn Host> {
        self.inner.host.borrow_mut()
    }

    /// Typed access to the concrete host. `None` if `H` is not the host type.
    pub fn with_host<H: Host, R>(&self, f: impl FnOnce(&mut H) -> R) -> Option<R> {
        let mut host = self.host_mut();
        host.as_any_mut().downcast_mut::<H>().map(f)
    }

    /// Creates a detached container element, typically the mount root.
    pub fn create_root(&self, tag: &str) -> NodeId {
        self.host_mut().create_element(tag)
    }

    pub fn element(&self, tag: &str) -> ElementBuilder<'_> {
        ElementBuilder::new(self, tag)
    }

    pub fn text(&self, text: &str) -> NodeId {
        self.host_mut().create_text(text)
    }

    pub fn first_child(&self, parent: NodeId) -> Option<NodeId> {
        self.host().children(parent).first().copied()
    }

    pub fn children_of(&self, parent: NodeId) -> Vec<NodeId> {
        self.host().children(parent)
    }

    /// Invokes the `event` listener of `node`, if any. The host is not
    /// borrowed while the handler runs, so handlers may write reactive state.
    pub fn dispatch_event(&self, node: NodeId, event: &str) -> bool {
        let handler = self.host().listener(node, event);
        match handler {
            Some(handler) => {
                handler.call(&Event {
                    name: event.to_owned(),
                    target: node,
                });
                true
            }
            None => false,
        }
    }

    // ── keys ────────────────────────────────────────────────────────────

    /// Canonical key for `raw`; `None` for missing and non-finite values.
    pub fn normalize_key(&self, raw: impl Into<RawKey>) -> Option<Key> {
        let raw = raw.into();
        let normalized = self.inner.keys.borrow_mut().normalize(&raw);
        match normalized {
            Ok(key) => key,
            Err(err) => {
                self.report(Diagnostic::InvalidKey {
                    raw: err.to_string(),
                });
                None
            }
        }
    }

    /// Stashes a user key on a host node. Returns the normalized key.
    pub fn set_key(&self, node: NodeId, raw: impl Into<RawKey>) -> Option<Key> {
        let key = self.normalize_key(raw)?;
        self.inner.keys.borrow_mut().stash(node, key.clone());
        Some(key)
    }

    pub fn key_of(&self, node: NodeId) -> Option<Key> {
        self.inner.keys.borrow().stashed(node).cloned()
    }

    pub(crate) fn forget_key(&self, node: NodeId) {
        self.inner.keys.borrow_mut().forget(node);
    }

    pub(crate) fn carry_key(&self, from: NodeId, to: NodeId) {
        self.inner.keys.borrow_mut().carry_over(from, to);
    }

    /// Identity of a sibling entry: the explicit key of a component, the key
    /// stashed on a host node, or the positional fallback.
    pub fn identity_of(&self, child: &Child, position: usize) -> Key {
        let explicit = match child {
            Child::Component(instance) => instance.key().cloned(),
            Child::Host(node) => self.key_of(*node),
        };
        explicit.unwrap_or_else(|| Key::fallback(position))
    }

    /// Same identity and same structural type.
    pub fn is_same_node(&self, a: &Child, a_key: &Key, b: &Child, b_key: &Key) -> bool {
        if a_key != b_key {
            return false;
        }
        match (a, b) {
            (Child::Component(a), Child::Component(b)) => a.component().same_as(b.component()),
            (Child::Host(a), Child::Host(b)) => {
                let host = self.host();
                match (host.kind(*a), host.kind(*b)) {
                    (Ok(a), Ok(b)) => a.same_type(&b),
                    _ => false,
                }
            }
            _ => false,
        }
    }

    // ── scopes ──────────────────────────────────────────────────────────

    fn next_scope_id(&self) -> ScopeId {
        let id = self.inner.next_scope_id.get();
        self.inner.next_scope_id.set(id + 1);
        id
    }

    pub(crate) fn next_instance_id(&self) -> InstanceId {
        let id = self.inner.next_instance_id.get();
        self.inner.next_instance_id.set(id + 1);
        id
    }

    pub fn create_scope(&self, parent: Option<&Scope>) -> Scope {
        Scope::new(
            self.next_scope_id(),
            parent,
            self.inner.diagnostics.clone(),
        )
    }

    pub fn active_scope(&self) -> Option<Scope> {
        self.inner.scope_stack.borrow().last().cloned()
    }

    /// Makes `scope` the active scope until the guard drops.
    pub fn enter_scope(&self, scope: &Scope) -> ActiveScopeGuard<'_> {
        self.inner.scope_stack.borrow_mut().push(scope.clone());
        ActiveScopeGuard {
            runtime: self,
            scope: scope.clone(),
        }
    }

    fn require_active_scope(&self) -> Result<Scope, ScopeError> {
        self.active_scope().ok_or(ScopeError::NoActiveScope)
    }

    pub fn provide<T: 'static>(&self, provider: &Provider<T>, value: T) -> Result<(), ScopeError> {
        self.require_active_scope()?.provide(provider, value);
        Ok(())
    }

    pub fn inject<T: Clone + 'static>(&self, provider: &Provider<T>) -> Result<T, ScopeError> {
        self.require_active_scope()?.inject(provider)
    }

    pub fn inject_or<T: Clone + 'static>(&self, provider: &Provider<T>, default: T) -> T {
        match self.active_scope() {
            Some(scope) => scope.inject_or(provider, default),
            None => default,
        }
    }

    pub fn register_hook<F, R>(&self, phase: HookPhase, hook: F) -> Result<(), ScopeError>
    where
        F: FnMut() -> R + 'static,
        R: HookOutcome,
    {
        self.require_active_scope()?.register_hook(phase, hook);
        Ok(())
    }

    // ── components ──────────────────────────────────────────────────────

    /// Construction call: a not-yet-mounted instance.
    pub fn create(&self, component: &Component, props: PropMap, key: impl Into<RawKey>) -> Instance {
        let key = self.normalize_key(key);
        Instance::new(self.clone(), component.clone(), props, key)
    }

    // ── reconciliation ──────────────────────────────────────────────────

    pub fn patch(&self, parent: NodeId, old: &Child, new: Child) -> Result<Child, RuntimeError> {
        self.batch(|| reconcile::patch(self, parent, old, new))
    }

    pub fn patch_children(
        &self,
        parent: NodeId,
        old: &[Child],
        new: Vec<Child>,
        anchor: Option<NodeId>,
    ) -> Result<Vec<Child>, RuntimeError> {
        self.batch(|| reconcile::patch_children(self, parent, old, new, anchor))
    }

    pub fn stats(&self) -> ReconcileStats {
        self.inner.stats.get()
    }

    pub fn reset_stats(&self) {
        self.inner.stats.set(ReconcileStats::default());
    }

    pub(crate) fn record(&self, f: impl FnOnce(&mut ReconcileStats)) {
        let mut stats = self.inner.stats.get();
        f(&mut stats);
        self.inner.stats.set(stats);
    }

    pub(crate) fn host_failure(&self, err: &HostError) {
        self.inner.diagnostics.report(Diagnostic::HostFailure {
            message: err.to_string(),
        });
    }

    // ── invalidation ────────────────────────────────────────────────────

    pub(crate) fn schedule(&self, instance: Weak<InstanceInner>) {
        self.inner.invalid.borrow_mut().push_back(instance);
        if self.inner.depth.get() == 0 {
            self.drain_invalid();
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.inner.invalid.borrow().is_empty()
    }

    /// Re-renders every invalidated instance that is still mounted. Returns
    /// the number of re-renders performed.
    pub fn flush(&self) -> usize {
        if self.inner.depth.get() > 0 {
            return 0;
        }
        self.drain_invalid()
    }

    /// Runs `f` as one runtime operation; invalidations raised inside are
    /// drained once the outermost operation returns.
    pub(crate) fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        struct DepthGuard<'a>(&'a Cell<usize>);
        impl Drop for DepthGuard<'_> {
            fn drop(&mut self) {
                self.0.set(self.0.get() - 1);
            }
        }
        self.inner.depth.set(self.inner.depth.get() + 1);
        let guard = DepthGuard(&self.inner.depth);
        let result = f();
        drop(guard);
        if self.inner.depth.get() == 0 {
            self.drain_invalid();
        }
        result
    }

    fn drain_invalid(&self) -> usize {
        if self.inner.draining.replace(true) {
            return 0;
        }
        let mut rendered = 0;
        loop {
            let next = self.inner.invalid.borrow_mut().pop_front();
            let Some(weak) = next else {
                break;
            };
            let Some(inner) = weak.upgrade() else {
                continue;
            };
            let instance = Instance::from_inner(inner);
            if !instance.take_queued() || !instance.is_mounted() {
                continue;
            }
            rendered += 1;
            if let Err(err) = instance.rerender() {
                self.inner.diagnostics.report(Diagnostic::RenderFailed {
                    instance: instance.id(),
                    message: err.to_string(),
                });
            }
        }
        self.inner.draining.set(false);
        rendered
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("scope_depth", &self.inner.scope_stack.borrow().len())
            .field("stats", &self.inner.stats.get())
            .finish()
    }
}

/// Pops the active scope on drop, including on early returns and unwinding.
#[must_use = "ActiveScopeGuard pops the active scope on drop"]
pub struct ActiveScopeGuard<'a> {
    runtime: &'a Runtime,
    scope: Scope,
}

impl Drop for ActiveScopeGuard<'_> {
    fn drop(&mut self) {
        let popped = self.runtime.inner.scope_stack.borrow_mut().pop();
        debug_assert!(
            popped.as_ref() == Some(&self.scope),
            "active scope stack popped out of order"
        );
    }
}
