use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use histree::{HistoryTree, StateValue, TreeConfig};
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

const ATTRIBUTES: i64 = 64;

// Helper for generating string states
fn generate_random_string(rng: &mut StdRng, len: usize) -> String {
    rng.sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Intervals sorted by end time, each attribute changing at random durations
fn generate_intervals(count: usize, seed: u64) -> Vec<(i64, i64, i32, StateValue)> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut next_start = vec![0i64; ATTRIBUTES as usize];
    let mut intervals = Vec::with_capacity(count);
    for _ in 0..count {
        let attribute = rng.gen_range(0..ATTRIBUTES) as usize;
        let start = next_start[attribute];
        let end = start + rng.gen_range(1..100);
        next_start[attribute] = end + 1;
        let value = match rng.gen_range(0..4) {
            0 => StateValue::Null,
            1 => StateValue::Int(rng.r#gen()),
            2 => StateValue::Long(rng.r#gen()),
            _ => StateValue::String(generate_random_string(&mut rng, 12)),
        };
        intervals.push((start, end, attribute as i32, value));
    }
    intervals.sort_by_key(|(_, end, _, _)| *end);
    intervals
}

fn build_tree(dir: &tempfile::TempDir, block_size: usize, count: usize) -> HistoryTree {
    let config = TreeConfig::new(dir.path().join("bench.ht"))
        .with_block_size(block_size)
        .with_max_children(16);
    let mut tree = HistoryTree::create(config).expect("Failed to create tree");
    for (start, end, attribute, value) in generate_intervals(count, 42) {
        tree.insert_interval(start, end, attribute, value)
            .expect("Failed to insert interval");
    }
    let end = tree.tree_end();
    tree.close_tree(end).expect("Failed to close tree");
    tree
}

// Benchmark insertion throughput for several block sizes
fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    group.measurement_time(Duration::from_secs(5));
    group.sample_size(10);

    let count = 50_000;
    let intervals = generate_intervals(count, 7);
    group.throughput(Throughput::Elements(count as u64));

    for block_size in [4 * 1024, 16 * 1024, 64 * 1024] {
        group.bench_with_input(
            BenchmarkId::from_parameter(block_size),
            &block_size,
            |b, &block_size| {
                b.iter(|| {
                    let dir = tempfile::tempdir().expect("Failed to create temporary directory");
                    let config = TreeConfig::new(dir.path().join("insert.ht"))
                        .with_block_size(block_size)
                        .with_max_children(16);
                    let mut tree = HistoryTree::create(config).expect("Failed to create tree");
                    for (start, end, attribute, value) in &intervals {
                        tree.insert_interval(*start, *end, *attribute, value.clone())
                            .expect("Failed to insert interval");
                    }
                    let end = tree.tree_end();
                    tree.close_tree(end).expect("Failed to close tree");
                    black_box(tree.node_count())
                })
            },
        );
    }

    group.finish();
}

// Benchmark point queries against a closed tree
fn bench_query_at(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("Failed to create temporary directory");
    let tree = build_tree(&dir, 4 * 1024, 100_000);
    let end = tree.tree_end();
    let mut rng = StdRng::seed_from_u64(1);

    let mut group = c.benchmark_group("query_at");
    group.measurement_time(Duration::from_secs(5));

    group.bench_function("single_attribute", |b| {
        b.iter(|| {
            let t = rng.gen_range(0..=end);
            let attribute = rng.gen_range(0..ATTRIBUTES) as i32;
            black_box(tree.query_at(t, attribute).expect("Query failed"))
        })
    });

    group.bench_function("full_state", |b| {
        b.iter(|| {
            let t = rng.gen_range(0..=end);
            black_box(tree.query_full(t).expect("Query failed"))
        })
    });

    group.finish();
}

// Benchmark range queries of growing width
fn bench_query_range(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("Failed to create temporary directory");
    let tree = build_tree(&dir, 4 * 1024, 100_000);

    let mut group = c.benchmark_group("query_range");
    group.measurement_time(Duration::from_secs(5));

    for width in [10i64, 1_000, 100_000] {
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, &width| {
            b.iter(|| {
                let query = tree.query_range(1_000, 1_000 + width, 3).expect("Invalid range");
                black_box(query.iter().count())
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_insert, bench_query_at, bench_query_range);
criterion_main!(benches);
