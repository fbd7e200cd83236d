//! Diagnostic channel for problems that are reported rather than thrown.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::key::Key;
use crate::scope::HookPhase;
use crate::{InstanceId, ScopeId};

#[derive(Clone, Debug, PartialEq)]
pub enum Diagnostic {
    /// Two siblings carry the same user key. The first one wins the match.
    DuplicateKey { key: Key },
    /// A raw key value that cannot be normalized (NaN, infinities).
    InvalidKey { raw: String },
    HookFailed {
        scope: ScopeId,
        phase: HookPhase,
        message: String,
    },
    /// A re-render triggered outside an explicit call failed; prior output kept.
    RenderFailed { instance: InstanceId, message: String },
    HostFailure { message: String },
}

impl Diagnostic {
    /// Development diagnostics are only recorded when enabled in the config.
    pub fn is_dev_only(&self) -> bool {
        matches!(
            self,
            Diagnostic::DuplicateKey { .. } | Diagnostic::InvalidKey { .. }
        )
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::DuplicateKey { key } => {
                write!(f, "duplicate sibling key `{key}`; first occurrence wins")
            }
            Diagnostic::InvalidKey { raw } => write!(f, "invalid key value {raw}; ignored"),
            Diagnostic::HookFailed {
                scope,
                phase,
                message,
            } => write!(f, "{phase:?} hook in scope {scope} failed: {message}"),
            Diagnostic::RenderFailed { instance, message } => {
                write!(f, "re-render of instance {instance} failed: {message}")
            }
            Diagnostic::HostFailure { message } => write!(f, "host operation failed: {message}"),
        }
    }
}

#[derive(Clone, Default)]
pub struct Diagnostics {
    entries: Rc<RefCell<Vec<Diagnostic>>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self, diagnostic: Diagnostic) {
        if diagnostic.is_dev_only() {
            log::warn!("{diagnostic}");
        } else {
            log::error!("{diagnostic}");
        }
        self.entries.borrow_mut().push(diagnostic);
    }

    pub fn entries(&self) -> Vec<Diagnostic> {
        self.entries.borrow().clone()
    }

    pub fn take(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.entries.borrow_mut())
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("entry_count", &self.len())
            .finish()
    }
}
