//! Benchmarks for the forward walk, the derivative walk, and one training epoch.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::prelude::*;
use rand::SeedableRng;
use std::hint::black_box;
use std::sync::Arc;
use srw::{
    Example, ExampleSet, GraphBuilder, NodeVec, ParamVector, SparseFeatureGraph, Srw, SrwConfig,
    Trainer, TrainerConfig, FEATURE_RESTART,
};

const FEATURES: [&str; 4] = ["near", "far", "kind", "db(link)"];

/// Ring with restart edges back to node 1 and a few random chords.
///
/// Every node keeps a restart edge, so mass never leaks out of the graph.
fn ring_with_chords(n: usize, chords: usize, seed: u64) -> SparseFeatureGraph {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut b = GraphBuilder::new();
    for i in 1..=n {
        let next = i % n + 1;
        let prev = (i + n - 2) % n + 1;
        b.add_edge(i, 1, [(FEATURE_RESTART, 1.0)]);
        b.add_edge(i, next, [(FEATURES[0], 1.0)]);
        b.add_edge(i, prev, [(FEATURES[1], 1.0)]);
        for _ in 0..chords {
            let v = rng.random_range(1..=n);
            let f = FEATURES[rng.random_range(2..FEATURES.len())];
            b.add_edge(i, v, [(f, rng.random::<f64>())]);
        }
    }
    b.build()
}

fn params() -> ParamVector {
    FEATURES
        .iter()
        .map(|f| (*f, 1.0))
        .chain([(FEATURE_RESTART, 1.0)])
        .collect()
}

fn bench_walks(c: &mut Criterion) {
    let mut group = c.benchmark_group("walk");
    let srw = Srw::new(SrwConfig::default()).expect("default config is valid");
    let p = params();
    let start: NodeVec = [(1, 1.0)].into_iter().collect();

    for n in [1_000usize, 10_000] {
        let g = ring_with_chords(n, 3, 123);
        group.bench_with_input(BenchmarkId::new("rwr", n), &n, |b, _| {
            b.iter(|| black_box(srw.rwr(black_box(&g), black_box(&start), &p)))
        });
        group.bench_with_input(BenchmarkId::new("rwr_with_derivatives", n), &n, |b, _| {
            b.iter(|| black_box(srw.rwr_with_derivatives(black_box(&g), black_box(&start), &p)))
        });
    }
    group.finish();
}

fn bench_training(c: &mut Criterion) {
    let mut group = c.benchmark_group("train");
    group.sample_size(10);

    let g = Arc::new(ring_with_chords(2_000, 3, 7));
    let examples: Vec<Example> = (0..32)
        .map(|i| {
            let query: NodeVec = [(1, 1.0)].into_iter().collect();
            let pos = 2 + (i * 37) % 1_999;
            let neg = 2 + (i * 53 + 1_000) % 1_999;
            Example::new(Arc::clone(&g), query, vec![pos], vec![neg])
        })
        .collect();

    for threads in [1usize, 4] {
        group.bench_with_input(BenchmarkId::new("epoch", threads), &threads, |b, &threads| {
            b.iter(|| {
                let srw = Srw::new(SrwConfig::default()).expect("default config is valid");
                let config = TrainerConfig {
                    num_threads: threads,
                    throttle: 4 * threads,
                };
                let mut trainer = Trainer::new(srw, config).expect("valid trainer config");
                let mut set = ExampleSet::new(examples.clone());
                black_box(trainer.train(&mut set, params(), 1, false).expect("training succeeds"))
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_walks, bench_training);
criterion_main!(benches);
