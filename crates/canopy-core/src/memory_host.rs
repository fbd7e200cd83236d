use std::any::Any;
use std::collections::BTreeMap;

use crate::collections::map::HashMap;
use crate::error::HostError;
use crate::host::{EventHandler, Host, HostKind};
use crate::NodeId;

#[derive(Clone, Debug, PartialEq, Eq)]
enum MemoryKind {
    Element(String),
    Text(String),
    Marker,
    Fragment,
}

struct MemoryNode {
    kind: MemoryKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    attributes: BTreeMap<String, String>,
    listeners: HashMap<String, EventHandler>,
}

impl MemoryNode {
    fn new(kind: MemoryKind) -> Self {
        Self {
            kind,
            parent: None,
            children: Vec::new(),
            attributes: BTreeMap::new(),
            listeners: HashMap::default(),
        }
    }
}

/// Mutations applied to attached structure, in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostOp {
    Insert {
        parent: NodeId,
        node: NodeId,
        anchor: Option<NodeId>,
    },
    /// Re-insertion of a node already under the same parent.
    Move {
        parent: NodeId,
        node: NodeId,
        anchor: Option<NodeId>,
    },
    Detach {
        parent: NodeId,
        node: NodeId,
    },
    SetText {
        node: NodeId,
    },
    SetAttribute {
        node: NodeId,
        name: String,
    },
}

/// Arena-backed host used by tests and headless embedders.
#[derive(Default)]
pub struct MemoryHost {
    nodes: Vec<Option<MemoryNode>>,
    ops: Vec<HostOp>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc(&mut self, kind: MemoryKind) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Some(MemoryNode::new(kind)));
        id
    }

    fn node(&self, id: NodeId) -> Result<&MemoryNode, HostError> {
        self.nodes
            .get(id)
            .and_then(Option::as_ref)
            .ok_or(HostError::Missing { id })
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut MemoryNode, HostError> {
        self.nodes
            .get_mut(id)
            .and_then(Option::as_mut)
            .ok_or(HostError::Missing { id })
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_ok()
    }

    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ops(&self) -> &[HostOp] {
        &self.ops
    }

    pub fn take_ops(&mut self) -> Vec<HostOp> {
        std::mem::take(&mut self.ops)
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    pub fn move_count(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, HostOp::Move { .. }))
            .count()
    }

    pub fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        self.node(node)
            .ok()
            .and_then(|n| n.attributes.get(name))
            .map(String::as_str)
    }

    /// Concatenated text of a node's subtree.
    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(node, &mut out);
        out
    }

    fn collect_text(&self, node: NodeId, out: &mut String) {
        let Ok(entry) = self.node(node) else {
            return;
        };
        if let MemoryKind::Text(text) = &entry.kind {
            out.push_str(text);
        }
        for &child in &entry.children {
            self.collect_text(child, out);
        }
    }

    /// Text content of each child of `parent`, markers skipped.
    pub fn texts(&self, parent: NodeId) -> Vec<String> {
        self.children(parent)
            .into_iter()
            .filter(|&child| !matches!(self.kind(child), Ok(HostKind::Marker)))
            .map(|child| self.text_content(child))
            .collect()
    }

    pub fn dump_tree(&self, root: NodeId) -> String {
        let mut output = String::new();
        self.dump_node(&mut output, root, 0);
        output
    }

    fn dump_node(&self, output: &mut String, id: NodeId, depth: usize) {
        let indent = "  ".repeat(depth);
        match self.node(id) {
            Ok(node) => {
                let label = match &node.kind {
                    MemoryKind::Element(tag) => format!("<{tag}>"),
                    MemoryKind::Text(text) => format!("{text:?}"),
                    MemoryKind::Marker => "<!---->".to_owned(),
                    MemoryKind::Fragment => "<#fragment>".to_owned(),
                };
                output.push_str(&format!("{indent}[{id}] {label}\n"));
                for &child in &node.children {
                    self.dump_node(output, child, depth + 1);
                }
            }
            Err(_) => output.push_str(&format!("{indent}[{id}] (missing)\n")),
        }
    }

    fn unlink(&mut self, node: NodeId) -> Result<Option<NodeId>, HostError> {
        let parent = self.node(node)?.parent;
        if let Some(parent_id) = parent {
            let parent_node = self.node_mut(parent_id)?;
            parent_node.children.retain(|&child| child != node);
            self.node_mut(node)?.parent = None;
        }
        Ok(parent)
    }

    fn link(
        &mut self,
        parent: NodeId,
        node: NodeId,
        anchor: Option<NodeId>,
    ) -> Result<(), HostError> {
        let parent_node = self.node_mut(parent)?;
        let index = match anchor {
            Some(anchor) => parent_node
                .children
                .iter()
                .position(|&child| child == anchor)
                .ok_or(HostError::AnchorNotChild { parent, anchor })?,
            None => parent_node.children.len(),
        };
        parent_node.children.insert(index, node);
        self.node_mut(node)?.parent = Some(parent);
        Ok(())
    }
}

impl Host for MemoryHost {
    fn create_element(&mut self, tag: &str) -> NodeId {
        self.alloc(MemoryKind::Element(tag.to_owned()))
    }

    fn create_text(&mut self, text: &str) -> NodeId {
        self.alloc(MemoryKind::Text(text.to_owned()))
    }

    fn create_marker(&mut self) -> NodeId {
        self.alloc(MemoryKind::Marker)
    }

    fn create_fragment(&mut self) -> NodeId {
        self.alloc(MemoryKind::Fragment)
    }

    fn kind(&self, node: NodeId) -> Result<HostKind<'_>, HostError> {
        Ok(match &self.node(node)?.kind {
            MemoryKind::Element(tag) => HostKind::Element(tag),
            MemoryKind::Text(text) => HostKind::Text(text),
            MemoryKind::Marker => HostKind::Marker,
            MemoryKind::Fragment => HostKind::Fragment,
        })
    }

    fn set_text(&mut self, node: NodeId, text: &str) -> Result<(), HostError> {
        match &mut self.node_mut(node)?.kind {
            MemoryKind::Text(current) => {
                current.clear();
                current.push_str(text);
            }
            _ => return Err(HostError::NotAContainer { id: node }),
        }
        self.ops.push(HostOp::SetText { node });
        Ok(())
    }

    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> Result<(), HostError> {
        self.node_mut(node)?
            .attributes
            .insert(name.to_owned(), value.to_owned());
        self.ops.push(HostOp::SetAttribute {
            node,
            name: name.to_owned(),
        });
        Ok(())
    }

    fn set_listener(
        &mut self,
        node: NodeId,
        event: &str,
        handler: Option<EventHandler>,
    ) -> Result<(), HostError> {
        let entry = self.node_mut(node)?;
        match handler {
            Some(handler) => {
                entry.listeners.insert(event.to_owned(), handler);
            }
            None => {
                entry.listeners.remove(event);
            }
        }
        Ok(())
    }

    fn listener(&self, node: NodeId, event: &str) -> Option<EventHandler> {
        self.node(node).ok()?.listeners.get(event).cloned()
    }

    fn insert_before(
        &mut self,
        parent: NodeId,
        node: NodeId,
        anchor: Option<NodeId>,
    ) -> Result<(), HostError> {
        if matches!(
            self.node(parent)?.kind,
            MemoryKind::Text(_) | MemoryKind::Marker
        ) {
            return Err(HostError::NotAContainer { id: parent });
        }
        if anchor == Some(node) {
            return Ok(());
        }
        if let Some(anchor) = anchor {
            if self.node(anchor)?.parent != Some(parent) {
                return Err(HostError::AnchorNotChild { parent, anchor });
            }
        }

        if matches!(self.node(node)?.kind, MemoryKind::Fragment) {
            let moved = std::mem::take(&mut self.node_mut(node)?.children);
            for &child in &moved {
                self.node_mut(child)?.parent = None;
            }
            for &child in &moved {
                self.link(parent, child, anchor)?;
            }
            self.ops.push(HostOp::Insert {
                parent,
                node,
                anchor,
            });
            return Ok(());
        }

        let previous_parent = self.unlink(node)?;
        self.link(parent, node, anchor)?;
        if previous_parent == Some(parent) {
            self.ops.push(HostOp::Move {
                parent,
                node,
                anchor,
            });
        } else {
            self.ops.push(HostOp::Insert {
                parent,
                node,
                anchor,
            });
        }
        Ok(())
    }

    fn detach(&mut self, node: NodeId) -> Result<(), HostError> {
        if let Some(parent) = self.unlink(node)? {
            self.ops.push(HostOp::Detach { parent, node });
        }
        Ok(())
    }

    fn release(&mut self, node: NodeId) -> Result<(), HostError> {
        if self.node(node)?.parent.is_some() {
            return Err(HostError::StillAttached { id: node });
        }
        let mut pending = vec![node];
        while let Some(id) = pending.pop() {
            if let Some(slot) = self.nodes.get_mut(id) {
                if let Some(entry) = slot.take() {
                    pending.extend(entry.children);
                }
            }
        }
        Ok(())
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.node(node).ok()?.parent
    }

    fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
        let parent = self.parent(node)?;
        let siblings = &self.node(parent).ok()?.children;
        let index = siblings.iter().position(|&child| child == node)?;
        siblings.get(index + 1).copied()
    }

    fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.node(node)
            .map(|entry| entry.children.clone())
            .unwrap_or_default()
    }

    fn is_equal_node(&self, a: NodeId, b: NodeId) -> bool {
        if a == b {
            return true;
        }
        let (Ok(left), Ok(right)) = (self.node(a), self.node(b)) else {
            return false;
        };
        left.kind == right.kind
            && left.attributes == right.attributes
            && left.children.len() == right.children.len()
            && left
                .children
                .iter()
                .zip(&right.children)
                .all(|(&l, &r)| self.is_equal_node(l, r))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
