mod common;

use std::cell::Cell;
use std::collections::HashSet;
use std::rc::Rc;

use common::{heap_with, link, node, quiet_heap, reachable_from, Node};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rcmark_heap::alloc::BlockAllocator;
use rcmark_heap::{
    AsNode, Collector, FatalPolicy, GcConfig, GcEdge, GcError, InvariantViolation, Root, Trace,
};

#[derive(Trace)]
struct ChainLink {
    next: Option<GcEdge<ChainLink>>,
}

#[derive(Trace)]
struct Filler {
    #[notrace]
    bytes: [u8; 4096],
}

fn filler() -> Filler {
    Filler { bytes: [0; 4096] }
}

#[test]
fn test_two_node_cycle_needs_full_collection() {
    let heap = quiet_heap();
    let a = heap.alloc_edge(node(1)).unwrap();
    let b = heap.alloc_edge(node(2)).unwrap();
    link(&a, b.clone());
    link(&b, a.clone());
    drop(a);
    drop(b);

    assert_eq!(heap.run_lite_sweep(), 0);
    assert_eq!(heap.node_count(), 2);

    let result = heap.force_full_collection();
    assert_eq!(result.marked, 0);
    assert_eq!(result.detached, 2);
    assert_eq!(result.reclaimed, 2);
    assert_eq!(heap.node_count(), 0);
    heap.check().unwrap();
}

#[test]
fn test_self_loop() {
    let heap = quiet_heap();
    let a = heap.alloc_edge(node(1)).unwrap();
    link(&a, a.clone());
    drop(a);
    assert_eq!(heap.run_lite_sweep(), 0);
    assert_eq!(heap.force_full_collection().reclaimed, 1);
    assert_eq!(heap.node_count(), 0);
}

#[test]
fn test_reachable_nodes_survive() {
    let heap = quiet_heap();
    let root = heap.alloc_root(node(0)).unwrap();
    let a = heap.alloc_edge(node(1)).unwrap();
    let b = heap.alloc_edge(node(2)).unwrap();
    link(&a, b);
    link(&root, a);

    let result = heap.force_full_collection();
    assert_eq!(result.marked, 3);
    assert_eq!(result.reclaimed, 0);
    assert_eq!(root.edges.borrow()[0].edges.borrow()[0].id, 2);

    root.edges.borrow_mut().clear();
    assert_eq!(heap.run_lite_sweep(), 2);
    assert_eq!(heap.node_count(), 1);
    heap.check().unwrap();
}

#[test]
fn test_unreachable_virgin_chain_is_detached() {
    let heap = heap_with(
        GcConfig::default()
            .with_trigger_level(1 << 20)
            .with_min_trigger_level(64 << 10)
            .with_adaptive_trigger(false),
    );
    {
        let _inhibitor = heap.inhibit();
        let mut next = None;
        for _ in 0..9_999 {
            next = Some(heap.alloc_edge(ChainLink { next }).unwrap());
        }
        // never referenced, so only a full collection can find it
        let head = heap.allocate(ChainLink { next }).unwrap();
        assert!(unsafe { head.header() }.is_virgin());
    }
    assert_eq!(heap.node_count(), 10_000);

    let mut fillers = Vec::new();
    for _ in 0..10_000 {
        if heap.stats().full_collections > 0 {
            break;
        }
        fillers.push(heap.alloc_root(filler()).unwrap());
    }
    let stats = heap.stats();
    assert_eq!(stats.full_collections, 1);
    assert!(stats.total_detached >= 10_000);
    assert_eq!(heap.node_count(), fillers.len());
    assert!(fillers.iter().all(|f| f.bytes[0] == 0));
    heap.check().unwrap();
}

#[test]
fn test_cycle_held_by_node_stack() {
    let heap = quiet_heap();
    let a = heap.alloc_edge(node(1)).unwrap();
    let b = heap.alloc_edge(node(2)).unwrap();
    link(&a, b.clone());
    link(&b, a.clone());
    heap.node_stack_push(&a);
    drop(a);
    drop(b);

    assert_eq!(heap.force_full_collection().reclaimed, 0);
    assert_eq!(heap.node_count(), 2);

    heap.node_stack_pop();
    let result = heap.force_full_collection();
    assert_eq!(result.detached, 2);
    assert_eq!(result.reclaimed, 2);
}

/// Some node reachable from a random root, found by a short random walk.
fn pick(rng: &mut StdRng, roots: &[Root<Node>]) -> Option<GcEdge<Node>> {
    let mut current = roots.choose(rng)?.edge();
    for _ in 0..rng.gen_range(0..4) {
        let next = current.edges.borrow().choose(rng).cloned();
        match next {
            Some(next) => current = next,
            None => break,
        }
    }
    Some(current)
}

/// Distinct nodes reachable from `roots`, the roots included.
fn reachable_count(roots: &[Root<Node>]) -> usize {
    let mut seen = HashSet::new();
    let mut count = 0;
    for root in roots {
        if seen.insert(root.as_node()) {
            count += 1;
        }
        count += reachable_from(root, &mut seen);
    }
    count
}

#[test]
fn test_random_graph_mutations() {
    let heap = quiet_heap();
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut roots: Vec<Root<Node>> = Vec::new();
    let mut next_id = 0;

    for step in 0..2_000 {
        match rng.gen_range(0..10) {
            0 | 1 if roots.len() < 16 => {
                roots.push(heap.alloc_root(node(next_id)).unwrap());
                next_id += 1;
            }
            0..=3 => {
                if let Some(parent) = pick(&mut rng, &roots) {
                    link(&parent, heap.alloc_edge(node(next_id)).unwrap());
                    next_id += 1;
                }
            }
            4 | 5 => {
                if let (Some(from), Some(to)) = (pick(&mut rng, &roots), pick(&mut rng, &roots)) {
                    link(&from, to);
                }
            }
            6 => {
                if let Some(parent) = pick(&mut rng, &roots) {
                    let removed = {
                        let mut edges = parent.edges.borrow_mut();
                        if edges.is_empty() {
                            None
                        } else {
                            let i = rng.gen_range(0..edges.len());
                            Some(edges.swap_remove(i))
                        }
                    };
                    drop(removed);
                }
            }
            7 if !roots.is_empty() => {
                let i = rng.gen_range(0..roots.len());
                roots.swap_remove(i);
            }
            8 => {
                heap.run_lite_sweep();
            }
            9 if step % 5 == 0 => {
                heap.force_full_collection();
                assert_eq!(heap.node_count(), reachable_count(&roots));
            }
            _ => {}
        }
        if let Err(violation) = heap.check() {
            panic!("step {}: {}", step, violation);
        }
    }

    heap.force_full_collection();
    assert_eq!(heap.node_count(), reachable_count(&roots));
    roots.clear();
    heap.force_full_collection();
    assert_eq!(heap.node_count(), 0);
}

#[test]
fn test_weak_key_reclaimed_by_refcount() {
    let heap = quiet_heap();
    let key = heap.alloc_edge(node(1)).unwrap();
    let value = heap.alloc_edge(node(2)).unwrap();
    let fired = Rc::new(Cell::new(false));
    let flag = fired.clone();
    let weak = heap.weak_ref(&key, Some(value.into_any()), Some(Box::new(move || flag.set(true))));

    assert_eq!(weak.value::<Node>().unwrap().id, 2);
    assert!(weak.key::<Node>().is_some());
    drop(key);

    assert_eq!(heap.run_lite_sweep(), 2);
    assert!(weak.is_expired());
    assert!(weak.value::<Node>().is_none());
    assert!(fired.get());
    heap.check().unwrap();
}

#[test]
fn test_finalizer_waits_for_an_explicit_run() {
    let heap = heap_with(
        GcConfig::default()
            .with_gclite_margin(0)
            .with_trigger_level(usize::MAX)
            .with_adaptive_trigger(false),
    );
    let key = heap.alloc_edge(node(1)).unwrap();
    let value = heap.alloc_edge(node(2)).unwrap();
    let fired = Rc::new(Cell::new(false));
    let flag = fired.clone();
    let _weak = heap.weak_ref(&key, Some(value.into_any()), Some(Box::new(move || flag.set(true))));
    drop(key);

    // this allocation sweeps the key away but runs nothing
    let _next = heap.alloc_edge(node(3)).unwrap();
    assert_eq!(heap.node_count(), 1);
    assert!(!fired.get());
    assert_eq!(heap.manager().pending_finalizers(), 1);

    assert_eq!(heap.run_pending_finalizers(), 1);
    assert!(fired.get());
    assert_eq!(heap.manager().pending_finalizers(), 0);
}

#[test]
fn test_weak_value_referencing_its_key() {
    let heap = quiet_heap();
    let kept = heap.alloc_root(node(1)).unwrap();
    let kept_value = heap.alloc_edge(node(2)).unwrap();
    let kept_weak = heap.weak_ref(&kept, Some(kept_value.into_any()), None);

    let key = heap.alloc_edge(node(3)).unwrap();
    let value = heap.alloc_edge(node(4)).unwrap();
    link(&value, key.clone());
    let weak = heap.weak_ref(&key, Some(value.into_any()), None);
    drop(key);

    assert_eq!(heap.run_lite_sweep(), 0);
    let result = heap.force_full_collection();
    assert_eq!(result.reclaimed, 2);
    assert!(weak.is_expired());
    assert!(!kept_weak.is_expired());
    assert_eq!(kept_weak.value::<Node>().unwrap().id, 2);
    assert_eq!(heap.node_count(), 2);

    drop(kept_weak);
    assert_eq!(heap.run_lite_sweep(), 1);
    assert_eq!(kept.id, 1);
}

fn stray_edge_heap() -> (&'static Collector, GcEdge<Node>) {
    let heap = quiet_heap();
    let a = heap.alloc_edge(node(1)).unwrap();
    let b = heap.alloc_edge(node(2)).unwrap();
    link(&a, b.clone());
    link(&b, a.clone());
    // held outside every root
    let stray = a.clone();
    drop(a);
    drop(b);
    let result = heap.force_full_collection();
    assert_eq!(result.detached, 2);
    assert_eq!(result.reclaimed, 1);
    (heap, stray)
}

#[test]
#[should_panic(expected = "after a sweep detached it")]
fn test_detached_node_deref_is_fatal() {
    let (_heap, stray) = stray_edge_heap();
    assert_eq!(stray.id, 1);
}

#[test]
fn test_detached_node_storage_outlives_sweep() {
    let (heap, stray) = stray_edge_heap();
    assert!(stray.header().is_detached());
    assert_eq!(
        heap.check(),
        Err(InvariantViolation::NodeCountMismatch {
            recorded: 1,
            found: 0
        })
    );
    drop(stray);
    assert_eq!(heap.run_lite_sweep(), 1);
    heap.check().unwrap();
}

#[test]
#[should_panic(expected = "inhibited")]
fn test_full_collection_while_inhibited_is_fatal() {
    let heap = quiet_heap();
    let _guard = heap.inhibit();
    heap.force_full_collection();
}

#[test]
fn test_adaptive_trigger_has_a_floor() {
    let heap = heap_with(
        GcConfig::default()
            .with_trigger_level(1 << 20)
            .with_min_trigger_level(512 << 10),
    );
    heap.force_full_collection();
    assert!(heap.manager().trigger_level() >= 512 << 10);
    heap.manager().set_trigger_level(1);
    assert_eq!(heap.manager().trigger_level(), 512 << 10);
}

#[test]
fn test_fixed_trigger_raised_above_live_heap() {
    let heap = heap_with(
        GcConfig::default()
            .with_gclite_margin(usize::MAX)
            .with_trigger_level(64 << 10)
            .with_min_trigger_level(64 << 10)
            .with_adaptive_trigger(false),
    );
    let fillers: Vec<_> = {
        let _inhibitor = heap.inhibit();
        (0..32).map(|_| heap.alloc_root(filler()).unwrap()).collect()
    };
    heap.force_full_collection();
    assert_eq!(heap.node_count(), fillers.len());
    assert_eq!(heap.manager().trigger_level(), 2 * heap.bytes_allocated());
}

#[test]
fn test_disabled_manager_never_collects_on_allocation() {
    let heap = heap_with(
        GcConfig::default()
            .with_trigger_level(64 << 10)
            .with_min_trigger_level(64 << 10)
            .with_adaptive_trigger(false),
    );
    heap.manager().disable();
    let mut fillers = Vec::new();
    for _ in 0..64 {
        fillers.push(heap.alloc_root(filler()).unwrap());
        drop(heap.alloc_edge(filler()).unwrap());
    }
    assert!(heap.bytes_allocated() > heap.manager().trigger_level());
    assert_eq!(heap.stats().full_collections, 0);
    assert!(heap.stats().lite_sweeps > 0);

    heap.manager().enable();
    drop(heap.alloc_edge(filler()).unwrap());
    assert_eq!(heap.stats().full_collections, 1);
    assert_eq!(heap.node_count(), fillers.len() + 1);
}

#[test]
fn test_aggressive_mode_sweeps_on_every_allocation() {
    let heap = heap_with(
        GcConfig::default()
            .with_gclite_margin(usize::MAX)
            .with_mode(rcmark_heap::GcMode::Aggressive),
    );
    for id in 0..10 {
        drop(heap.alloc_edge(node(id)).unwrap());
    }
    assert_eq!(heap.node_count(), 1);
    assert_eq!(heap.stats().lite_sweeps, 10);
}

#[test]
fn test_rare_mode_sweeps_only_past_the_trigger() {
    let heap = heap_with(
        GcConfig::default()
            .with_gclite_margin(0)
            .with_trigger_level(64 << 10)
            .with_min_trigger_level(64 << 10)
            .with_adaptive_trigger(false)
            .with_mode(rcmark_heap::GcMode::Rare),
    );
    heap.manager().disable();
    for _ in 0..8 {
        drop(heap.alloc_edge(filler()).unwrap());
    }
    assert!(heap.bytes_allocated() < heap.manager().trigger_level());
    assert_eq!(heap.stats().lite_sweeps, 0);
    assert_eq!(heap.node_count(), 8);

    for _ in 0..16 {
        drop(heap.alloc_edge(filler()).unwrap());
    }
    assert_eq!(heap.stats().lite_sweeps, 1);
    assert!(heap.node_count() < 24);
    assert_eq!(heap.stats().full_collections, 0);
    heap.check().unwrap();
}

#[test]
fn test_out_of_memory_is_reported() {
    let heap = Collector::with_allocator(
        GcConfig::default().with_fatal_policy(FatalPolicy::Panic),
        Box::new(BlockAllocator::with_limit(256)),
    );
    assert!(heap.alloc_root(node(1)).is_ok());
    assert!(matches!(
        heap.alloc_root(filler()),
        Err(GcError::OutOfMemory { .. })
    ));
    assert_eq!(heap.node_count(), 1);
}

#[test]
fn test_quarantine_heap() {
    let heap = heap_with(
        GcConfig::default()
            .with_gclite_margin(usize::MAX)
            .with_quarantine(Some(64 << 10)),
    );
    let root = heap.alloc_root(node(0)).unwrap();
    for id in 1..100 {
        link(&root, heap.alloc_edge(node(id)).unwrap());
    }
    let a = heap.alloc_edge(node(100)).unwrap();
    link(&a, a.clone());
    drop(a);
    root.edges.borrow_mut().clear();

    assert_eq!(heap.run_lite_sweep(), 99);
    assert_eq!(heap.force_full_collection().reclaimed, 1);
    assert_eq!(heap.corrupted_freed_blocks(), 0);
    drop(root);
    heap.run_lite_sweep();
    assert_eq!(heap.bytes_allocated(), 0);
}

#[derive(Trace)]
enum Value {
    Nil,
    Cons(GcEdge<Value>, GcEdge<Value>),
    Int(#[notrace] i64),
}

#[test]
fn test_derived_enum_is_traced() {
    let heap = quiet_heap();
    let one = heap.alloc_edge(Value::Int(1)).unwrap();
    let nil = heap.alloc_edge(Value::Nil).unwrap();
    let list = heap.alloc_root(Value::Cons(one, nil)).unwrap();

    let garbage_head = heap.alloc_edge(Value::Int(2)).unwrap();
    let garbage_tail = heap.alloc_edge(Value::Nil).unwrap();
    drop(heap.alloc_edge(Value::Cons(garbage_head, garbage_tail)).unwrap());

    let result = heap.force_full_collection();
    assert_eq!(result.marked, 3);
    assert_eq!(result.reclaimed, 3);
    match &*list {
        Value::Cons(head, tail) => {
            assert!(matches!(**head, Value::Int(1)));
            assert!(matches!(**tail, Value::Nil));
        }
        _ => panic!("list is not a cons"),
    }
}
