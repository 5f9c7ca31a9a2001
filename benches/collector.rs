use std::cell::RefCell;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rcmark_heap::{Collector, GcConfig, GcEdge, Trace};

#[derive(Trace)]
struct Node {
    next: RefCell<Option<GcEdge<Node>>>,
    #[notrace]
    value: u64,
}

fn node(value: u64) -> Node {
    Node {
        next: RefCell::new(None),
        value,
    }
}

/// Collections only run when a benchmark asks for them.
fn quiet_heap() -> &'static Collector {
    Collector::new(
        GcConfig::default()
            .with_gclite_margin(usize::MAX)
            .with_trigger_level(usize::MAX)
            .with_adaptive_trigger(false),
    )
}

fn refcount_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("refcount");
    let heap = quiet_heap();

    group.throughput(Throughput::Elements(1000));
    group.bench_function("alloc_drop_lite_sweep", |b| {
        b.iter(|| {
            for value in 0..1000 {
                drop(heap.alloc_edge(node(black_box(value))).unwrap());
            }
            black_box(heap.run_lite_sweep())
        });
    });

    let root = heap.alloc_root(node(0)).unwrap();
    group.bench_function("edge_clone_drop", |b| {
        let edge = root.edge();
        b.iter(|| black_box(edge.clone()));
    });
    drop(root);
    heap.run_lite_sweep();

    group.finish();
}

fn collection_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_collection");
    group.sample_size(20);

    for length in [1_000u64, 10_000, 100_000].iter() {
        let heap = quiet_heap();
        let head = heap.alloc_root(node(0)).unwrap();
        let mut tail = head.edge();
        for value in 1..*length {
            let next = heap.alloc_edge(node(value)).unwrap();
            tail.next.replace(Some(next.clone()));
            tail = next;
        }
        drop(tail);

        group.throughput(Throughput::Elements(*length));
        group.bench_with_input(BenchmarkId::new("rooted_chain", length), length, |b, _| {
            b.iter(|| black_box(heap.force_full_collection()));
        });
        assert_eq!(head.value, 0);
    }

    for cycles in [100u64, 1_000, 10_000].iter() {
        let heap = quiet_heap();
        group.throughput(Throughput::Elements(*cycles * 2));
        group.bench_with_input(BenchmarkId::new("garbage_cycles", cycles), cycles, |bencher, &cycles| {
            bencher.iter(|| {
                for value in 0..cycles {
                    let a = heap.alloc_edge(node(value)).unwrap();
                    let b = heap.alloc_edge(node(value)).unwrap();
                    a.next.replace(Some(b.clone()));
                    b.next.replace(Some(a));
                }
                black_box(heap.force_full_collection())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, refcount_benchmark, collection_benchmark);
criterion_main!(benches);
