use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use engram_core::{DistanceMetric, EntityId};
use engram_vector::{HnswIndex, HnswParams};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn unit_vector(rng: &mut StdRng, dim: usize) -> Vec<f32> {
    let v: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-9);
    v.into_iter().map(|x| x / norm).collect()
}

fn populated(n: usize, dim: usize) -> HnswIndex {
    let mut rng = StdRng::seed_from_u64(1);
    let mut idx = HnswIndex::new(dim, DistanceMetric::Cosine, HnswParams::default());
    for _ in 0..n {
        idx.insert(EntityId::new(), unit_vector(&mut rng, dim));
    }
    idx
}

fn bench_insert(c: &mut Criterion) {
    let dim = 128;
    c.bench_function("hnsw insert into 5k", |b| {
        let idx = populated(5_000, dim);
        let mut rng = StdRng::seed_from_u64(2);
        b.iter_batched(
            || (idx.clone(), unit_vector(&mut rng, dim)),
            |(mut idx, v)| idx.insert(EntityId::new(), v),
            BatchSize::LargeInput,
        );
    });
}

fn bench_search(c: &mut Criterion) {
    let dim = 128;
    let idx = populated(10_000, dim);
    let mut rng = StdRng::seed_from_u64(3);
    let queries: Vec<Vec<f32>> = (0..64).map(|_| unit_vector(&mut rng, dim)).collect();
    let mut i = 0;
    c.bench_function("hnsw search k=10 ef=100", |b| {
        b.iter(|| {
            i = (i + 1) % queries.len();
            idx.search(&queries[i], 10, 100)
        })
    });
}

criterion_group!(benches, bench_insert, bench_search);
criterion_main!(benches);
