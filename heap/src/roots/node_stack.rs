use super::RootSource;
use crate::object::{NodePtr, TracerFn};

/// Operand stack of a bytecode interpreter. Every slot is an uncounted root.
#[derive(Default)]
pub struct NodeStack {
    slots: Vec<NodePtr>,
}

impl NodeStack {
    pub(crate) fn push(&mut self, node: NodePtr) {
        self.slots.push(node);
    }

    pub(crate) fn pop(&mut self) -> Option<NodePtr> {
        self.slots.pop()
    }

    pub(crate) fn top(&self) -> Option<NodePtr> {
        self.slots.last().copied()
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.slots.truncate(len);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl RootSource for NodeStack {
    fn visit_roots(&self, visitor: &mut TracerFn) {
        for node in &self.slots {
            visitor(unsafe { node.as_ref() });
        }
    }
}
