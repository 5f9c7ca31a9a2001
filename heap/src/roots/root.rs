use std::fmt;
use std::ops::Deref;

use super::RootSource;
use crate::object::{AsNode, Gc, GcEdge, NodePtr, Trace, TracerFn};

/// Slots of explicit roots. Each occupied slot also holds a count on its node.
#[derive(Default)]
pub struct RootTable {
    slots: Vec<Option<NodePtr>>,
    free: Vec<usize>,
    len: usize,
}

impl RootTable {
    pub(crate) fn insert(&mut self, node: NodePtr) -> usize {
        self.len += 1;
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                slot
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        }
    }

    pub(crate) fn remove(&mut self, slot: usize) -> Option<NodePtr> {
        let node = self.slots.get_mut(slot)?.take()?;
        self.free.push(slot);
        self.len -= 1;
        Some(node)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl RootSource for RootTable {
    fn visit_roots(&self, visitor: &mut TracerFn) {
        for node in self.slots.iter().flatten() {
            visitor(unsafe { node.as_ref() });
        }
    }

    fn needs_pinning(&self) -> bool {
        false
    }
}

/// An explicit root: keeps its node alive and reachable until dropped, in any order.
pub struct Root<T: Trace + 'static> {
    gc: Gc<T>,
    slot: usize,
}

impl<T: Trace + 'static> Root<T> {
    /// # Safety
    /// The node must not have been reclaimed.
    pub unsafe fn new(gc: Gc<T>) -> Self {
        let collector = gc.header().collector();
        collector.increment(gc.as_node());
        let slot = collector.roots().explicit.borrow_mut().insert(gc.as_node());
        Self { gc, slot }
    }

    pub fn from_edge(edge: &GcEdge<T>) -> Self {
        unsafe { Self::new(edge.gc()) }
    }

    #[inline]
    pub fn gc(&self) -> Gc<T> {
        self.gc
    }

    /// A new counted edge to the rooted node.
    pub fn edge(&self) -> GcEdge<T> {
        unsafe { GcEdge::new(self.gc) }
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.gc == other.gc
    }
}

impl<T: Trace + 'static> Clone for Root<T> {
    fn clone(&self) -> Self {
        unsafe { Self::new(self.gc) }
    }
}

impl<T: Trace + 'static> Drop for Root<T> {
    fn drop(&mut self) {
        let header = unsafe { self.gc.header() };
        let collector = header.collector();
        collector.roots().explicit.borrow_mut().remove(self.slot);
        collector.decrement(header.as_node());
    }
}

impl<T: Trace + 'static> Deref for Root<T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { self.gc.get() }
    }
}

impl<T: Trace + 'static> AsNode for Root<T> {
    fn as_node(&self) -> NodePtr {
        self.gc.as_node()
    }
}

impl<T: Trace + 'static> fmt::Debug for Root<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Root")
            .field("slot", &self.slot)
            .field("header", unsafe { self.gc.header() })
            .finish()
    }
}
