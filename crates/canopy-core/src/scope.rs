//! Hierarchical scope tree: provided values, lifecycle hooks and cleanups.
//!
//! A parent owns its children; children keep only a weak back-reference, so
//! the tree never forms a strong cycle. Destruction is explicit and runs
//! children strictly before the parent's own teardown.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};

use crate::collections::map::HashMap;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::ScopeError;
use crate::ScopeId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HookPhase {
    Mount,
    Update,
    Destroy,
}

pub type HookError = Box<dyn std::error::Error>;

type Hook = Box<dyn FnMut() -> Result<(), HookError>>;

/// Return types accepted from hook callbacks.
pub trait HookOutcome {
    fn into_result(self) -> Result<(), HookError>;
}

impl HookOutcome for () {
    fn into_result(self) -> Result<(), HookError> {
        Ok(())
    }
}

impl<E: Into<HookError>> HookOutcome for Result<(), E> {
    fn into_result(self) -> Result<(), HookError> {
        self.map_err(Into::into)
    }
}

struct ProviderMeta {
    name: &'static str,
}

/// Typed key for provide/inject. Clones share identity.
pub struct Provider<T> {
    meta: Rc<ProviderMeta>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Provider<T> {
    fn clone(&self) -> Self {
        Self {
            meta: Rc::clone(&self.meta),
            _marker: PhantomData,
        }
    }
}

impl<T: 'static> Provider<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            meta: Rc::new(ProviderMeta { name }),
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.meta.name
    }

    fn id(&self) -> usize {
        Rc::as_ptr(&self.meta) as usize
    }
}

impl<T> PartialEq for Provider<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.meta, &other.meta)
    }
}

impl<T> Eq for Provider<T> {}

impl<T> fmt::Debug for Provider<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Provider").field(&self.meta.name).finish()
    }
}

struct ProvidedEntry {
    // Keeps the provider allocation alive so its address cannot be reused.
    _meta: Rc<ProviderMeta>,
    value: Rc<dyn Any>,
}

#[derive(Default)]
struct HookTable {
    mount: Vec<Hook>,
    update: Vec<Hook>,
    destroy: Vec<Hook>,
}

impl HookTable {
    fn phase_mut(&mut self, phase: HookPhase) -> &mut Vec<Hook> {
        match phase {
            HookPhase::Mount => &mut self.mount,
            HookPhase::Update => &mut self.update,
            HookPhase::Destroy => &mut self.destroy,
        }
    }

    fn len(&self, phase: HookPhase) -> usize {
        match phase {
            HookPhase::Mount => self.mount.len(),
            HookPhase::Update => self.update.len(),
            HookPhase::Destroy => self.destroy.len(),
        }
    }
}

struct ScopeInner {
    id: ScopeId,
    parent: RefCell<Weak<ScopeInner>>,
    children: RefCell<Vec<Scope>>,
    provided: RefCell<HashMap<usize, ProvidedEntry>>,
    hooks: RefCell<HookTable>,
    cleanups: RefCell<Vec<Box<dyn FnOnce()>>>,
    mounted: Cell<bool>,
    destroying: Cell<bool>,
    destroyed: Cell<bool>,
    diagnostics: Diagnostics,
}

#[derive(Clone)]
pub struct Scope {
    inner: Rc<ScopeInner>,
}

impl PartialEq for Scope {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Scope {}

impl Scope {
    /// Creates a scope, linked as an owned child of `parent` when given.
    pub fn new(id: ScopeId, parent: Option<&Scope>, diagnostics: Diagnostics) -> Self {
        let scope = Self {
            inner: Rc::new(ScopeInner {
                id,
                parent: RefCell::new(Weak::new()),
                children: RefCell::new(Vec::new()),
                provided: RefCell::new(HashMap::default()),
                hooks: RefCell::new(HookTable::default()),
                cleanups: RefCell::new(Vec::new()),
                mounted: Cell::new(false),
                destroying: Cell::new(false),
                destroyed: Cell::new(false),
                diagnostics,
            }),
        };
        if let Some(parent) = parent {
            if parent.is_alive() {
                *scope.inner.parent.borrow_mut() = Rc::downgrade(&parent.inner);
                parent.inner.children.borrow_mut().push(scope.clone());
            } else {
                log::debug!(
                    "scope {} created under torn-down scope {}; left detached",
                    id,
                    parent.id()
                );
            }
        }
        scope
    }

    pub fn id(&self) -> ScopeId {
        self.inner.id
    }

    pub fn parent(&self) -> Option<Scope> {
        self.inner
            .parent
            .borrow()
            .upgrade()
            .map(|inner| Scope { inner })
    }

    pub fn children(&self) -> Vec<Scope> {
        self.inner.children.borrow().clone()
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.mounted.get()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    /// Neither destroyed nor in the middle of being destroyed.
    pub fn is_alive(&self) -> bool {
        !self.inner.destroying.get() && !self.inner.destroyed.get()
    }

    pub fn mark_mounted(&self) {
        if self.is_alive() {
            self.inner.mounted.set(true);
        }
    }

    /// Local values shadow inherited ones; ancestors are never written.
    pub fn provide<T: 'static>(&self, provider: &Provider<T>, value: T) {
        self.inner.provided.borrow_mut().insert(
            provider.id(),
            ProvidedEntry {
                _meta: Rc::clone(&provider.meta),
                value: Rc::new(value),
            },
        );
    }

    fn lookup<T: Clone + 'static>(&self, provider: &Provider<T>) -> Option<T> {
        let id = provider.id();
        let mut current = Some(self.clone());
        while let Some(scope) = current {
            if let Some(entry) = scope.inner.provided.borrow().get(&id) {
                if let Some(value) = entry.value.downcast_ref::<T>() {
                    return Some(value.clone());
                }
            }
            current = scope.parent();
        }
        None
    }

    /// Nearest provided value walking up through the parents.
    pub fn inject<T: Clone + 'static>(&self, provider: &Provider<T>) -> Result<T, ScopeError> {
        self.lookup(provider).ok_or(ScopeError::ProviderNotFound {
            name: provider.name(),
        })
    }

    pub fn inject_or<T: Clone + 'static>(&self, provider: &Provider<T>, default: T) -> T {
        self.lookup(provider).unwrap_or(default)
    }

    /// Queues `hook` for `phase`. A mount hook registered on an already
    /// mounted scope runs immediately. Hooks offered to a torn-down scope are
    /// dropped.
    pub fn register_hook<F, R>(&self, phase: HookPhase, mut hook: F)
    where
        F: FnMut() -> R + 'static,
        R: HookOutcome,
    {
        if !self.is_alive() {
            log::debug!("scope {}: dropping {phase:?} hook on torn-down scope", self.id());
            return;
        }
        if phase == HookPhase::Mount && self.is_mounted() {
            if let Err(err) = hook().into_result() {
                self.report_hook_failure(phase, err);
            }
            return;
        }
        self.inner
            .hooks
            .borrow_mut()
            .phase_mut(phase)
            .push(Box::new(move || hook().into_result()));
    }

    pub fn on_mount<R: HookOutcome>(&self, hook: impl FnMut() -> R + 'static) {
        self.register_hook(HookPhase::Mount, hook);
    }

    pub fn on_update<R: HookOutcome>(&self, hook: impl FnMut() -> R + 'static) {
        self.register_hook(HookPhase::Update, hook);
    }

    pub fn on_destroy<R: HookOutcome>(&self, hook: impl FnMut() -> R + 'static) {
        self.register_hook(HookPhase::Destroy, hook);
    }

    /// Raw cleanup callback, run once during destruction after destroy hooks.
    pub fn on_cleanup(&self, cleanup: impl FnOnce() + 'static) {
        if !self.is_alive() {
            log::debug!("scope {}: running cleanup registered after teardown", self.id());
            cleanup();
            return;
        }
        self.inner.cleanups.borrow_mut().push(Box::new(cleanup));
    }

    pub fn hook_count(&self, phase: HookPhase) -> usize {
        self.inner.hooks.borrow().len(phase)
    }

    /// Runs every hook of `phase` in registration order. A failing hook is
    /// reported and the rest still run. Mount and update runs stop early if a
    /// hook tears the scope down.
    pub fn run_hooks(&self, phase: HookPhase) {
        if self.is_destroyed() || (phase != HookPhase::Destroy && !self.is_alive()) {
            return;
        }
        // Taken out so hooks may register hooks or destroy this scope.
        let mut hooks = std::mem::take(self.inner.hooks.borrow_mut().phase_mut(phase));
        log::trace!("scope {}: running {} {phase:?} hooks", self.id(), hooks.len());
        for hook in hooks.iter_mut() {
            if let Err(err) = hook() {
                self.report_hook_failure(phase, err);
            }
            if phase != HookPhase::Destroy && !self.is_alive() {
                break;
            }
        }
        if !self.is_alive() {
            return;
        }
        let mut table = self.inner.hooks.borrow_mut();
        let slot = table.phase_mut(phase);
        hooks.append(slot);
        *slot = hooks;
    }

    fn report_hook_failure(&self, phase: HookPhase, err: HookError) {
        self.inner.diagnostics.report(Diagnostic::HookFailed {
            scope: self.id(),
            phase,
            message: err.to_string(),
        });
    }

    /// Tears down a scope whose mount never completed. Hooks registered so
    /// far, here or in descendants, never run; cleanups still do.
    pub fn abort(&self) {
        if !self.is_alive() {
            return;
        }
        self.drop_hooks();
        self.destroy();
    }

    fn drop_hooks(&self) {
        *self.inner.hooks.borrow_mut() = HookTable::default();
        for child in self.inner.children.borrow().iter() {
            child.drop_hooks();
        }
    }

    /// Tears the scope down once: children first, then destroy hooks, then
    /// cleanups; finally clears every collection and unlinks from the parent.
    pub fn destroy(&self) {
        if !self.is_alive() {
            return;
        }
        self.inner.destroying.set(true);
        log::trace!("scope {}: destroying", self.id());

        let children = std::mem::take(&mut *self.inner.children.borrow_mut());
        for child in &children {
            child.destroy();
        }
        drop(children);

        self.run_hooks(HookPhase::Destroy);

        let cleanups = std::mem::take(&mut *self.inner.cleanups.borrow_mut());
        for cleanup in cleanups {
            cleanup();
        }

        self.inner.provided.borrow_mut().clear();
        *self.inner.hooks.borrow_mut() = HookTable::default();

        let parent = std::mem::take(&mut *self.inner.parent.borrow_mut());
        if let Some(parent) = parent.upgrade() {
            parent
                .children
                .borrow_mut()
                .retain(|child| !Rc::ptr_eq(&child.inner, &self.inner));
        }

        self.inner.mounted.set(false);
        self.inner.destroyed.set(true);
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.inner.id)
            .field("children", &self.inner.children.borrow().len())
            .field("mounted", &self.inner.mounted.get())
            .field("destroyed", &self.inner.destroyed.get())
            .finish()
    }
}
