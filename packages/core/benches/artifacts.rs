//! Compile and artifact store benchmarks
//!
//! Run with: `cargo bench -p shapeforge-core`
//!
//! - Lowering a model to a fixed shape
//! - Atomic publish of a compiled artifact
//! - Verified load (checksum over the full payload)

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use shapeforge_core::{ArtifactStore, Compiler, ModelDefinition, ReferenceTarget, ShapeSpec, StaticModelRegistry};
use std::sync::Arc;
use tempfile::TempDir;

const MODEL: &str = "bench/encoder";

fn compiler() -> Compiler {
    let registry =
        StaticModelRegistry::new().with(ModelDefinition::text_encoder(MODEL, 384, 8192, 512));
    Compiler::new(Arc::new(registry), Arc::new(ReferenceTarget::new()))
}

fn bench_compile(c: &mut Criterion) {
    let compiler = compiler();
    let shape = ShapeSpec::new(1, 384).unwrap();

    c.bench_function("compile_b1_s384", |b| {
        b.iter(|| compiler.compile(black_box(MODEL), shape).unwrap())
    });
}

fn bench_save(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let store = ArtifactStore::open(temp_dir.path()).unwrap();
    let artifact = compiler()
        .compile(MODEL, ShapeSpec::new(1, 384).unwrap())
        .unwrap();

    c.bench_function("save_b1_s384", |b| {
        b.iter(|| store.save(black_box(&artifact)).unwrap())
    });
}

fn bench_load(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let store = ArtifactStore::open(temp_dir.path()).unwrap();
    let location = compiler()
        .compile_and_save(&store, MODEL, ShapeSpec::new(1, 384).unwrap())
        .unwrap();

    c.bench_function("load_b1_s384", |b| {
        b.iter(|| store.load(black_box(&location)).unwrap())
    });
}

criterion_group!(benches, bench_compile, bench_save, bench_load);
criterion_main!(benches);
