//! Tree benchmarks
//!
//! Benchmarks for structural operations over a populated tree:
//! - Recursive listing
//! - Subtree move (path prefix rewrite)
//! - Logging offloaded arrays
//!
//! Measure before optimizing.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::Map;
use trueno_labdb::LabDb;

/// Build `/bench/d{i}/e{j}` with `dirs * per_dir` experiments
fn populated(dirs: usize, per_dir: usize) -> LabDb {
    let db = LabDb::builder().content_store().build();
    let tree = db.tree();
    for i in 0..dirs {
        tree.mkdir(&format!("/bench/d{i}"), true).unwrap();
        for j in 0..per_dir {
            tree.create_experiment(&format!("/bench/d{i}/e{j}"), Map::new())
                .unwrap();
        }
    }
    db
}

fn bench_ls_recursive(c: &mut Criterion) {
    let mut group = c.benchmark_group("ls_recursive");
    for dirs in [10, 100] {
        let db = populated(dirs, 10);
        let tree = db.tree();
        group.bench_with_input(BenchmarkId::from_parameter(dirs * 10), &dirs, |b, _| {
            b.iter(|| black_box(tree.ls("/bench", true).unwrap().len()));
        });
    }
    group.finish();
}

fn bench_mv_subtree(c: &mut Criterion) {
    let mut group = c.benchmark_group("mv_subtree");
    for dirs in [10, 100] {
        let db = populated(dirs, 10);
        let tree = db.tree();
        let mut flip = false;
        group.bench_with_input(BenchmarkId::from_parameter(dirs * 10), &dirs, |b, _| {
            b.iter(|| {
                let (src, dest) = if flip { ("/moved", "/bench") } else { ("/bench", "/moved") };
                flip = !flip;
                black_box(tree.mv(src, dest).unwrap())
            });
        });
    }
    group.finish();
}

fn bench_log_array(c: &mut Criterion) {
    let db = LabDb::builder().content_store().build();
    let mut logger = db.logger("/").unwrap();
    logger.new_experiment(None).unwrap();
    let values: Vec<f64> = (0..10_000u32).map(f64::from).collect();

    c.bench_function("log_array_10k", |b| {
        b.iter(|| logger.log_data("w", black_box(values.clone())).unwrap());
    });
}

criterion_group!(benches, bench_ls_recursive, bench_mv_subtree, bench_log_array);
criterion_main!(benches);
