//! Construction API targeted by markup lowering.

use crate::error::HostError;
use crate::key::RawKey;
use crate::runtime::Runtime;
use crate::NodeId;

/// Builds one detached element. Errors are deferred to [`ElementBuilder::build`].
#[must_use = "call build() to obtain the element"]
pub struct ElementBuilder<'a> {
    runtime: &'a Runtime,
    node: NodeId,
    key: Option<RawKey>,
    error: Option<HostError>,
}

impl<'a> ElementBuilder<'a> {
    pub(crate) fn new(runtime: &'a Runtime, tag: &str) -> Self {
        let node = runtime.host_mut().create_element(tag);
        Self {
            runtime,
            node,
            key: None,
            error: None,
        }
    }

    fn apply(mut self, op: impl FnOnce(&Runtime, NodeId) -> Result<(), HostError>) -> Self {
        if self.error.is_none() {
            if let Err(err) = op(self.runtime, self.node) {
                self.error = Some(err);
            }
        }
        self
    }

    /// The element under construction.
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn attr(self, name: &str, value: &str) -> Self {
        self.apply(|rt, node| rt.host_mut().set_attribute(node, name, value))
    }

    pub fn child(self, child: NodeId) -> Self {
        self.apply(|rt, node| rt.host_mut().insert_before(node, child, None))
    }

    pub fn text(self, text: &str) -> Self {
        self.apply(|rt, node| {
            let mut host = rt.host_mut();
            let child = host.create_text(text);
            host.insert_before(node, child, None)
        })
    }

    pub fn key(mut self, key: impl Into<RawKey>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn build(self) -> Result<NodeId, HostError> {
        if let Some(err) = self.error {
            let released = self.runtime.host_mut().release(self.node);
            if let Err(release_err) = released {
                self.runtime.host_failure(&release_err);
            }
            return Err(err);
        }
        if let Some(key) = self.key {
            self.runtime.set_key(self.node, key);
        }
        Ok(self.node)
    }
}
