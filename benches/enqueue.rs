//! Enqueue latency at varying queue depth
//!
//! The pipeline's core contract is that enqueue stays O(1) no matter how
//! far behind the workers are. The bench pre-fills the queue to each depth
//! and measures the push alone, no workers attached.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use netverdict::models::{ConnectionObservation, Protocol};
use netverdict::IngestionQueue;

fn observation() -> ConnectionObservation {
    ConnectionObservation::new(
        "10.0.0.1".parse().unwrap(),
        "8.8.8.8".parse().unwrap(),
        443,
        Protocol::Tcp,
    )
}

fn bench_enqueue_at_depth(c: &mut Criterion) {
    let mut group = c.benchmark_group("enqueue");

    for depth in [0usize, 1_000, 100_000] {
        let queue = IngestionQueue::new(0);
        for _ in 0..depth {
            queue.enqueue(observation()).unwrap();
        }

        group.bench_with_input(BenchmarkId::from_parameter(depth), &queue, |b, queue| {
            let obs = observation();
            b.iter(|| queue.enqueue(obs.clone()).unwrap());
        });
    }

    group.finish();
}

criterion_group!(benches, bench_enqueue_at_depth);
criterion_main!(benches);
