use super::RootSource;
use crate::object::{NodePtr, TracerFn};

/// Uncounted roots addressed by depth, for code that protects values in bulk and releases them
/// by count.
#[derive(Default)]
pub struct ProtectStack {
    nodes: Vec<NodePtr>,
}

impl ProtectStack {
    /// Push `node`, returning its index.
    pub(crate) fn push(&mut self, node: NodePtr) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Pop the `count` most recent entries, `Err` with the depth if there are fewer.
    pub(crate) fn pop(&mut self, count: usize) -> Result<(), usize> {
        let depth = self.nodes.len();
        if count > depth {
            return Err(depth);
        }
        self.nodes.truncate(depth - count);
        Ok(())
    }

    /// Replace the entry at `index`, `Err` with the depth if there is none.
    pub(crate) fn replace(&mut self, index: usize, node: NodePtr) -> Result<(), usize> {
        let depth = self.nodes.len();
        match self.nodes.get_mut(index) {
            Some(slot) => {
                *slot = node;
                Ok(())
            }
            None => Err(depth),
        }
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.nodes.truncate(len);
    }

    pub(crate) fn get(&self, index: usize) -> Option<NodePtr> {
        self.nodes.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl RootSource for ProtectStack {
    fn visit_roots(&self, visitor: &mut TracerFn) {
        for node in &self.nodes {
            visitor(unsafe { node.as_ref() });
        }
    }
}
