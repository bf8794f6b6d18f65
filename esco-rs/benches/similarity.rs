use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use esco_rs::utils::similarity::{cosine_similarity, normalize_l2};

fn vector(dim: usize, seed: f32) -> Vec<f32> {
    (0..dim).map(|i| ((i as f32 + seed) * 0.37).sin()).collect()
}

fn similarity_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("cosine_similarity");
    for dim in [384, 1536, 3072] {
        let (a, b) = (vector(dim, 1.0), vector(dim, 2.0));
        group.bench_with_input(BenchmarkId::from_parameter(dim), &dim, |bench, _| {
            bench.iter(|| cosine_similarity(black_box(&a), black_box(&b)))
        });
    }
    group.finish();

    let mut group = c.benchmark_group("normalize_l2");
    for dim in [384, 1536, 3072] {
        let v = vector(dim, 3.0);
        group.bench_with_input(BenchmarkId::from_parameter(dim), &dim, |bench, _| {
            bench.iter(|| {
                let mut v = v.clone();
                normalize_l2(black_box(&mut v));
                v
            })
        });
    }
    group.finish();
}

criterion_group!(benches, similarity_benchmarks);
criterion_main!(benches);
