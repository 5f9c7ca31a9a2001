use std::fmt;
use std::ops::Deref;

use super::RootSource;
use crate::error::FatalPolicy;
use crate::gc::Collector;
use crate::object::{AsNode, Gc, GcEdge, NodePtr, Trace, TracerFn};

/// Uncounted roots registered and released in strict LIFO order.
#[derive(Default)]
pub struct StackRootStack {
    nodes: Vec<NodePtr>,
}

impl StackRootStack {
    pub(crate) fn push(&mut self, node: NodePtr) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Release the entry at `index`, which must be the top. Entries already discarded by a
    /// restore are ignored.
    pub(crate) fn release(&mut self, index: usize, node: NodePtr, policy: FatalPolicy) {
        if self.nodes.get(index) != Some(&node) {
            return;
        }
        if index + 1 != self.nodes.len() {
            fatal!(
                policy,
                "stack root {} released out of order, {} roots registered",
                index,
                self.nodes.len()
            );
        }
        self.nodes.pop();
    }

    pub(crate) fn get(&self, index: usize) -> Option<NodePtr> {
        self.nodes.get(index).copied()
    }

    pub(crate) fn set(&mut self, index: usize, node: NodePtr) {
        self.nodes[index] = node;
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.nodes.truncate(len);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl RootSource for StackRootStack {
    fn visit_roots(&self, visitor: &mut TracerFn) {
        for node in &self.nodes {
            visitor(unsafe { node.as_ref() });
        }
    }
}

/// A scoped, uncounted root. Must be dropped in reverse order of creation.
pub struct StackRoot<T: Trace + 'static> {
    gc: Gc<T>,
    index: usize,
    collector: &'static Collector,
}

impl<T: Trace + 'static> StackRoot<T> {
    /// # Safety
    /// The node must not have been reclaimed.
    pub unsafe fn new(gc: Gc<T>) -> Self {
        let collector = gc.header().collector();
        let index = collector.roots().stack.borrow_mut().push(gc.as_node());
        Self {
            gc,
            index,
            collector,
        }
    }

    pub fn from_edge(edge: &GcEdge<T>) -> Self {
        unsafe { Self::new(edge.gc()) }
    }

    /// Point this root at another node without changing its position.
    pub fn set(&mut self, edge: &GcEdge<T>) {
        self.registered();
        let gc = edge.gc();
        self.collector
            .roots()
            .stack
            .borrow_mut()
            .set(self.index, gc.as_node());
        self.gc = gc;
    }

    #[inline]
    pub fn gc(&self) -> Gc<T> {
        self.gc
    }

    pub fn edge(&self) -> GcEdge<T> {
        self.registered();
        unsafe { GcEdge::new(self.gc) }
    }

    fn registered(&self) {
        let current = self.collector.roots().stack.borrow().get(self.index);
        if current != Some(self.gc.as_node()) {
            fatal!(
                self.collector.config().fatal_policy,
                "stack root {} of {} used after the root stack was unwound past it",
                self.index,
                std::any::type_name::<T>()
            );
        }
    }
}

impl<T: Trace + 'static> Drop for StackRoot<T> {
    fn drop(&mut self) {
        let policy = self.collector.config().fatal_policy;
        self.collector
            .roots()
            .stack
            .borrow_mut()
            .release(self.index, self.gc.as_node(), policy);
    }
}

impl<T: Trace + 'static> Deref for StackRoot<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.registered();
        unsafe { self.gc.get() }
    }
}

impl<T: Trace + 'static> AsNode for StackRoot<T> {
    fn as_node(&self) -> NodePtr {
        self.gc.as_node()
    }
}

impl<T: Trace + 'static> fmt::Debug for StackRoot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackRoot")
            .field("index", &self.index)
            .field("ptr", &self.gc.as_node())
            .finish()
    }
}
