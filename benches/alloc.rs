use cinders::{Collector, Config, ObjectHeader, ObjectPtr, Tracer, Visitor};
use criterion::{Criterion, black_box, criterion_group, criterion_main};

#[repr(C)]
struct Node {
    header: ObjectHeader,
    next: Option<ObjectPtr>,
}

struct NodeTracer;

impl Tracer for NodeTracer {
    fn trace(&mut self, object: ObjectPtr, visitor: &mut Visitor<'_>) {
        let node = unsafe { &*(object.as_ptr() as *const Node) };
        visitor.visit_opt(node.next);
    }
}

fn node_mut<'a>(object: ObjectPtr) -> &'a mut Node {
    unsafe { &mut *(object.as_ptr() as *mut Node) }
}

fn alloc_churn(c: &mut Criterion) {
    c.bench_function("alloc_churn_small", |b| {
        b.iter(|| {
            let mut gc = Collector::with_config(
                Config::default()
                    .with_major_threshold(1 << 20)
                    .with_incmark_threshold(64 * 1024),
            );
            let mut tracer = NodeTracer;
            for i in 0..10_000u32 {
                let object = gc.allocate(&mut tracer, size_of::<Node>()).unwrap();
                if i % 64 == 0 {
                    gc.push_root(object);
                }
                black_box(object);
            }
        });
    });
}

fn collect_live_list(c: &mut Criterion) {
    c.bench_function("collect_live_list", |b| {
        let mut gc = Collector::with_config(
            Config::default()
                .with_major_threshold(usize::MAX)
                .with_incmark_threshold(usize::MAX),
        );
        let mut tracer = NodeTracer;

        let head = gc.allocate(&mut tracer, size_of::<Node>()).unwrap();
        gc.push_root(head);
        let mut tail = head;
        for _ in 0..1_000 {
            let next = gc.allocate(&mut tracer, size_of::<Node>()).unwrap();
            gc.write_barrier(tail);
            node_mut(tail).next = Some(next);
            tail = next;
        }

        b.iter(|| {
            gc.collect(&mut tracer);
            black_box(&gc);
        });
    });
}

criterion_group!(benches, alloc_churn, collect_live_list);
criterion_main!(benches);
