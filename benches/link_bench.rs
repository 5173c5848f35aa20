//! Benchmarks for index build, batched search and pair collection.
//!
//! Run with: cargo bench --bench link_bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use entity_linker::embeddings::{normalize, EmbeddingMatrix};
use entity_linker::index::{FlatIndex, HnswIndex, HnswParams, Metric};
use entity_linker::linker::{collect_pairs, search_all, CollectOptions};
use entity_linker::EntityIndexMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Seeded unit-length matrix.
fn random_matrix(n: usize, dim: usize) -> EmbeddingMatrix {
    let mut rng = StdRng::seed_from_u64(7);
    let data: Vec<f32> = (0..n * dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
    let mut matrix = EmbeddingMatrix::new(n, dim, data).unwrap();
    let entities = EntityIndexMap::from_ordered((0..n).map(|i| i.to_string()).collect()).unwrap();
    normalize(&mut matrix, &entities).unwrap();
    matrix
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("hnsw_build");
    group.sample_size(10);

    for n in [500, 2_000] {
        let matrix = random_matrix(n, 32);
        group.bench_with_input(BenchmarkId::new("m16_efc40", n), &n, |b, _| {
            b.iter(|| {
                let index =
                    HnswIndex::build(black_box(matrix.as_slice()), 32, HnswParams::default()).unwrap();
                black_box(index.len())
            });
        });
    }

    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("batched_search");
    group.sample_size(10);

    let matrix = random_matrix(2_000, 32);
    let index = HnswIndex::build(matrix.as_slice(), 32, HnswParams::default()).unwrap();
    let flat = FlatIndex::new(&matrix, Metric::InnerProduct);

    for k in [10, 50] {
        group.bench_with_input(BenchmarkId::new("hnsw", k), &k, |b, &k| {
            b.iter(|| black_box(search_all(&index, &matrix, k).unwrap().rows()));
        });
    }
    group.bench_function("flat_k10", |b| {
        b.iter(|| black_box(search_all(&flat, &matrix, 10).unwrap().rows()));
    });

    group.finish();
}

fn bench_collect(c: &mut Criterion) {
    let matrix = random_matrix(2_000, 32);
    let index = HnswIndex::build(matrix.as_slice(), 32, HnswParams::default()).unwrap();
    let table = search_all(&index, &matrix, 50).unwrap();

    c.bench_function("collect_top_100", |b| {
        b.iter(|| {
            let opts = CollectOptions { threshold: 0.0, ..CollectOptions::default() };
            black_box(collect_pairs(black_box(&table), opts).top.len())
        });
    });
}

criterion_group!(benches, bench_build, bench_search, bench_collect);
criterion_main!(benches);
