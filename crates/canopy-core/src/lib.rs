#![doc = r"Core of the Canopy view runtime: key resolution, keyed reconciliation, the scope tree and component instances."]

pub extern crate self as canopy_core;

pub mod builder;
pub mod collections;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod hash;
pub mod host;
pub mod instance;
pub mod key;
pub mod memory_host;
pub mod reactive;
pub mod reconcile;
pub mod render;
pub mod runtime;
pub mod scope;

pub use builder::ElementBuilder;
pub use config::RuntimeConfig;
pub use diagnostics::{Diagnostic, Diagnostics};
pub use error::{HostError, KeyError, RenderError, RuntimeError, ScopeError};
pub use host::{Event, EventHandler, Host, HostKind};
pub use instance::{Component, Instance, InstanceState};
pub use key::{Key, KeyResolver, RawKey, Token};
pub use memory_host::{HostOp, MemoryHost};
pub use reactive::{shared, NodeRef, Observer, PropMap, PropValue, Props, Shared, Signal};
pub use reconcile::{longest_increasing_subsequence, Child};
pub use render::{Primitive, ReactiveCell, RenderContext, RenderFn, RenderNode, Rendered};
pub use runtime::{ActiveScopeGuard, ReconcileStats, Runtime};
pub use scope::{HookError, HookOutcome, HookPhase, Provider, Scope};

/// Opaque handle of a host node.
pub type NodeId = usize;
pub type ScopeId = usize;
pub type InstanceId = usize;

#[cfg(test)]
#[path = "tests/key_tests.rs"]
mod key_tests;

#[cfg(test)]
#[path = "tests/scope_tests.rs"]
mod scope_tests;

#[cfg(test)]
#[path = "tests/reconcile_tests.rs"]
mod reconcile_tests;

#[cfg(test)]
#[path = "tests/instance_tests.rs"]
mod instance_tests;
