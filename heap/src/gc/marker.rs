use super::Collector;
use crate::object::{GcHeader, NodePtr};

/// Depth first marking with an explicit stack, so arbitrarily long chains don't recurse.
///
/// Marking a node also moves it from the live list to the reachable list.
pub(crate) struct Marker<'c> {
    collector: &'c Collector,
    cycle: bool,
    stack: Vec<NodePtr>,
    marks_applied: usize,
}

impl<'c> Marker<'c> {
    pub(crate) fn new(collector: &'c Collector, cycle: bool) -> Self {
        Self {
            collector,
            cycle,
            stack: Vec::new(),
            marks_applied: 0,
        }
    }

    pub(crate) fn is_marked(&self, node: NodePtr) -> bool {
        unsafe { node.as_ref() }.is_marked(self.cycle)
    }

    pub(crate) fn mark(&mut self, header: &GcHeader) {
        if header.is_marked(self.cycle) {
            return;
        }
        header.set_mark(self.cycle);
        self.marks_applied += 1;
        let node = header.as_node();
        unsafe { self.collector.reachable().push_back(node) };
        self.stack.push(node);
    }

    /// Trace until every node reachable from what has been marked so far is marked.
    pub(crate) fn drain(&mut self) {
        while let Some(node) = self.stack.pop() {
            let header = unsafe { node.as_ref() };
            header.trace(&mut |child| self.mark(child));
        }
    }

    pub(crate) fn marks_applied(&self) -> usize {
        self.marks_applied
    }
}
