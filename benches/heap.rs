//! Micro benchmarks for the arena allocator.
#![forbid(unsafe_code)]
#![allow(missing_docs)]

use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use emberheap::{BlockOffset, Heap, HeapOptions};

const CHURN_OPS: u64 = 16_384;
const LIVE_SET: usize = 512;

fn fresh_heap() -> Heap {
    Heap::with_options(HeapOptions {
        arena_limit: 1 << 28,
        growth_chunk: 1 << 16,
    })
    .expect("bench heap init")
}

fn heap_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("heap");
    group.sample_size(30);

    group.throughput(Throughput::Elements(LIVE_SET as u64));
    group.bench_function("allocate_uniform", |b| {
        b.iter_batched(
            fresh_heap,
            |mut heap| {
                for _ in 0..LIVE_SET {
                    black_box(heap.allocate(48).expect("allocate"));
                }
                heap
            },
            BatchSize::SmallInput,
        );
    });

    group.throughput(Throughput::Elements(LIVE_SET as u64));
    group.bench_function("allocate_release_reverse", |b| {
        b.iter_batched(
            fresh_heap,
            |mut heap| {
                let blocks: Vec<BlockOffset> = (0..LIVE_SET)
                    .map(|i| heap.allocate(16 + (i % 32) * 8).expect("allocate"))
                    .collect();
                for bp in blocks.into_iter().rev() {
                    heap.release(Some(bp)).expect("release");
                }
                heap
            },
            BatchSize::SmallInput,
        );
    });

    group.throughput(Throughput::Elements(CHURN_OPS));
    group.bench_function("seeded_churn", |b| {
        b.iter_batched(
            || (fresh_heap(), ChaCha8Rng::seed_from_u64(0xE3B_0C44)),
            |(mut heap, mut rng)| {
                let mut held: Vec<BlockOffset> = Vec::with_capacity(LIVE_SET);
                for _ in 0..CHURN_OPS {
                    if held.len() < LIVE_SET && (held.is_empty() || rng.gen_bool(0.55)) {
                        let len = rng.gen_range(1..=1024);
                        held.push(heap.allocate(len).expect("allocate"));
                    } else {
                        let victim = held.swap_remove(rng.gen_range(0..held.len()));
                        heap.release(Some(victim)).expect("release");
                    }
                }
                heap
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, heap_bench);
criterion_main!(benches);
