use thiserror::Error;

use crate::instance::InstanceState;
use crate::{InstanceId, NodeId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("node {id} missing")]
    Missing { id: NodeId },
    #[error("node {anchor} is not a child of {parent}")]
    AnchorNotChild { parent: NodeId, anchor: NodeId },
    #[error("node {id} cannot hold children")]
    NotAContainer { id: NodeId },
    #[error("node {id} is still attached to the tree")]
    StillAttached { id: NodeId },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeError {
    #[error("provider `{name}` not found in the scope chain")]
    ProviderNotFound { name: &'static str },
    #[error("no active scope")]
    NoActiveScope,
}

/// Raised by render functions. The one error category allowed to cross
/// component boundaries.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RenderError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Scope(#[from] ScopeError),
    #[error(transparent)]
    Host(#[from] HostError),
    #[error("setup renderer returned another renderer")]
    NestedRenderer,
}

impl RenderError {
    pub fn msg(message: impl std::fmt::Display) -> Self {
        RenderError::Message(message.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Host(#[from] HostError),
    #[error(transparent)]
    Scope(#[from] ScopeError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("instance {id} has been destroyed")]
    Destroyed { id: InstanceId },
    #[error("instance {id} is not connected to the host tree")]
    NotConnected { id: InstanceId },
    #[error("instance {id} cannot do that while {state:?}")]
    InvalidState { id: InstanceId, state: InstanceState },
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum KeyError {
    #[error("key {0} is not a finite number")]
    NonFinite(f64),
}
