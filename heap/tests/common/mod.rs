#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashSet;

use rcmark_heap::{Collector, FatalPolicy, GcConfig, GcEdge, NodePtr, Trace};

#[derive(Trace, Default)]
pub struct Node {
    pub edges: RefCell<Vec<GcEdge<Node>>>,
    #[notrace]
    pub id: usize,
}

pub fn node(id: usize) -> Node {
    Node {
        edges: RefCell::new(Vec::new()),
        id,
    }
}

pub fn link(from: &Node, to: GcEdge<Node>) {
    from.edges.borrow_mut().push(to);
}

/// Collector whose collections only run when a test asks for one.
pub fn quiet_heap() -> &'static Collector {
    Collector::new(
        GcConfig::default()
            .with_gclite_margin(usize::MAX)
            .with_trigger_level(usize::MAX)
            .with_adaptive_trigger(false)
            .with_fatal_policy(FatalPolicy::Panic),
    )
}

pub fn heap_with(config: GcConfig) -> &'static Collector {
    Collector::new(config.with_fatal_policy(FatalPolicy::Panic))
}

/// Number of distinct nodes reachable from `start`, touching every payload on the way.
pub fn reachable_from(start: &Node, seen: &mut HashSet<NodePtr>) -> usize {
    let mut count = 0;
    for edge in start.edges.borrow().iter() {
        if seen.insert(edge.header().as_node()) {
            count += 1 + reachable_from(edge, seen);
        }
    }
    count
}
