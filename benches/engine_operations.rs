use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use holomem::prelude::*;
use holomem::Codebook;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::runtime::Runtime;

const EMBEDDING_DIM: usize = 384;

fn embeddings(count: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..count)
        .map(|_| (0..EMBEDDING_DIM).map(|_| rng.gen_range(-1.0f32..1.0)).collect())
        .collect()
}

fn populated(count: usize) -> MemoryEngine {
    let engine = MemoryEngine::new(EngineConfig::default()).unwrap();
    for e in embeddings(count, 7) {
        engine.remember(Observation::new(e)).unwrap();
    }
    engine
}

/// Benchmark: Codebook projection of one embedding
fn bench_projection(c: &mut Criterion) {
    let codebook = Codebook::new(EMBEDDING_DIM, 10_000, 42);
    let embedding = embeddings(1, 1).remove(0);
    c.bench_function("codebook_project", |b| {
        b.iter(|| black_box(codebook.project(&embedding).unwrap()))
    });
}

/// Benchmark: Encoding into stores of increasing size
fn bench_remember(c: &mut Criterion) {
    let mut group = c.benchmark_group("remember");
    for size in [100, 1000] {
        let engine = populated(size);
        let mut pending = embeddings(10_000, 3).into_iter().cycle();
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let e = pending.next().unwrap_or_default();
                black_box(engine.remember(Observation::new(e)).unwrap())
            })
        });
    }
    group.finish();
}

/// Benchmark: Recall with and without link expansion
fn bench_recall(c: &mut Criterion) {
    let mut group = c.benchmark_group("recall");
    for size in [100, 1000] {
        let engine = populated(size);
        engine.consolidate().unwrap();
        let query = embeddings(1, 11).remove(0);

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("linked", size), &size, |b, _| {
            b.iter(|| black_box(engine.recall(&query, 10).unwrap()))
        });
        let direct = RecallOptions::new(10).direct_only();
        group.bench_with_input(BenchmarkId::new("direct", size), &size, |b, _| {
            b.iter(|| black_box(engine.recall_with(&query, &direct).unwrap()))
        });
    }
    group.finish();
}

/// Benchmark: One full consolidation cycle
fn bench_consolidation_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("consolidation_cycle");
    group.sample_size(10);
    for size in [100, 500] {
        let engine = populated(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| black_box(engine.consolidate().unwrap()))
        });
    }
    group.finish();
}

/// Benchmark: Checkpoint to an in-memory snapshot store
fn bench_checkpoint(c: &mut Criterion) {
    let engine = populated(500);
    let snapshots = InMemorySnapshotStore::new();
    c.bench_function("checkpoint_500", |b| {
        b.to_async(Runtime::new().unwrap())
            .iter(|| async { engine.checkpoint_to(&snapshots).await.unwrap() })
    });
}

criterion_group!(
    benches,
    bench_projection,
    bench_remember,
    bench_recall,
    bench_consolidation_cycle,
    bench_checkpoint
);
criterion_main!(benches);
