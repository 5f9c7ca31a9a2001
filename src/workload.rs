//! Synthetic object graphs shaped like what an interpreter produces: short-lived lists,
//! reference cycles, a long-lived tree, and weak references with finalizers.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use rcmark_heap::{Collector, GcEdge, GcError, GcStats, Root, Trace, WeakRef};

#[derive(Trace)]
pub struct Cons {
    car: RefCell<Option<GcEdge<Cons>>>,
    cdr: RefCell<Option<GcEdge<Cons>>>,
    #[notrace]
    tag: usize,
}

impl Cons {
    fn leaf(tag: usize) -> Self {
        Self {
            car: RefCell::new(None),
            cdr: RefCell::new(None),
            tag,
        }
    }

    fn pair(car: Option<GcEdge<Cons>>, cdr: Option<GcEdge<Cons>>, tag: usize) -> Self {
        Self {
            car: RefCell::new(car),
            cdr: RefCell::new(cdr),
            tag,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    pub rounds: usize,
    pub chains: usize,
    pub length: usize,
    pub cycles: usize,
    pub depth: usize,
    pub weak: usize,
}

#[derive(Debug)]
pub struct Report {
    pub rounds: usize,
    pub nodes_built: usize,
    pub finalized: usize,
    pub tree_sum: usize,
    pub nodes_left: usize,
    pub stats: GcStats,
}

fn list(heap: &'static Collector, length: usize) -> Result<Option<GcEdge<Cons>>, GcError> {
    if length == 0 {
        return Ok(None);
    }
    let mut head = heap.alloc_stack_root(Cons::leaf(0))?;
    for tag in 1..length {
        let node = heap.alloc_edge(Cons::leaf(tag))?;
        node.cdr.replace(Some(head.edge()));
        head.set(&node);
    }
    Ok(Some(head.edge()))
}

fn tree(heap: &'static Collector, depth: usize, tag: usize) -> Result<GcEdge<Cons>, GcError> {
    if depth == 0 {
        return heap.alloc_edge(Cons::leaf(tag));
    }
    let base = heap.node_stack_size();
    let node = branch(heap, depth, tag);
    heap.restore_node_stack_size(base);
    node
}

/// Subtrees stay on the node stack until their parent holds them.
fn branch(heap: &'static Collector, depth: usize, tag: usize) -> Result<GcEdge<Cons>, GcError> {
    let left = tree(heap, depth - 1, 2 * tag)?;
    heap.node_stack_push(&left);
    let right = tree(heap, depth - 1, 2 * tag + 1)?;
    heap.node_stack_push(&right);
    heap.alloc_edge(Cons::pair(Some(left), Some(right), tag))
}

fn tree_sum(node: &Cons) -> usize {
    let car = node.car.borrow();
    let cdr = node.cdr.borrow();
    match (car.as_ref(), cdr.as_ref()) {
        (Some(left), Some(right)) => node.tag + tree_sum(left) + tree_sum(right),
        _ => node.tag,
    }
}

impl Workload {
    /// Total nodes allocated by one round.
    pub fn nodes_per_round(&self) -> usize {
        let tree = (1usize << (self.depth + 1)) - 1;
        self.chains * self.length + 2 * self.cycles + tree + 2 * self.weak
    }

    fn round(
        &self,
        heap: &'static Collector,
        finalized: &Rc<Cell<usize>>,
    ) -> Result<usize, GcError> {
        let snapshot = heap.snapshot_roots();
        let sum = self.build(heap, finalized);
        // an early return leaves nothing registered past the snapshot
        heap.restore_roots(snapshot);
        sum
    }

    fn build(&self, heap: &'static Collector, finalized: &Rc<Cell<usize>>) -> Result<usize, GcError> {
        let tree: Root<Cons> = Root::from_edge(&tree(heap, self.depth, 1)?);

        for _ in 0..self.chains {
            drop(list(heap, self.length)?);
        }

        for tag in 0..self.cycles {
            let a = heap.alloc_stack_root(Cons::leaf(tag))?;
            let b = heap.alloc_edge(Cons::pair(Some(a.edge()), None, tag))?;
            a.car.replace(Some(b));
        }

        let mut weak_refs: Vec<WeakRef> = Vec::with_capacity(self.weak);
        for tag in 0..self.weak {
            let key = heap.alloc_stack_root(Cons::leaf(tag))?;
            let value = heap.alloc_edge(Cons::leaf(tag))?;
            // every other key is kept alive only by its own value
            if tag % 2 == 1 {
                value.car.replace(Some(key.edge()));
            }
            let finalized = finalized.clone();
            weak_refs.push(heap.weak_ref(
                &key,
                Some(value.into_any()),
                Some(Box::new(move || finalized.set(finalized.get() + 1))),
            ));
        }

        let sum = tree_sum(&tree);
        drop(tree);
        heap.force_full_collection();
        drop(weak_refs);
        Ok(sum)
    }

    pub fn run(&self, heap: &'static Collector, check: bool) -> Result<Report, GcError> {
        let finalized = Rc::new(Cell::new(0));
        let mut tree_sum = 0;
        for round in 0..self.rounds {
            tree_sum = self.round(heap, &finalized)?;
            debug!("Round {} done: {:?}", round, heap);
            if check && !heap.check_invariants() {
                error!("Heap invariants broken after round {}", round);
                break;
            }
        }
        heap.force_full_collection();
        heap.run_lite_sweep();
        Ok(Report {
            rounds: self.rounds,
            nodes_built: self.rounds * self.nodes_per_round(),
            finalized: finalized.get(),
            tree_sum,
            nodes_left: heap.node_count(),
            stats: heap.stats(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcmark_heap::{FatalPolicy, GcConfig};

    fn small() -> Workload {
        Workload {
            rounds: 2,
            chains: 4,
            length: 16,
            cycles: 8,
            depth: 3,
            weak: 4,
        }
    }

    #[test]
    fn test_workload_leaves_nothing_behind() {
        let heap = Collector::new(
            GcConfig::default()
                .with_gclite_margin(1024)
                .with_fatal_policy(FatalPolicy::Panic),
        );
        let report = small().run(heap, true).unwrap();
        assert_eq!(report.nodes_left, 0);
        assert_eq!(report.finalized, 2 * 4);
        // tags of a depth 3 tree rooted at 1 are 1..16
        assert_eq!(report.tree_sum, (1..16).sum::<usize>());
        assert!(report.stats.full_collections >= 2);
        assert!(heap.check_invariants());
    }

    #[test]
    fn test_aggressive_mode() {
        let heap = Collector::new(
            GcConfig::default()
                .with_mode(rcmark_heap::GcMode::Aggressive)
                .with_fatal_policy(FatalPolicy::Panic),
        );
        let report = small().run(heap, true).unwrap();
        assert_eq!(report.nodes_left, 0);
        assert!(report.stats.lite_sweeps >= report.nodes_built);
    }

    #[test]
    fn test_nodes_per_round() {
        assert_eq!(small().nodes_per_round(), 4 * 16 + 16 + 15 + 8);
    }
}
