//! Inference path benchmarks
//!
//! Run with: `cargo bench -p shapeforge-runtime`
//!
//! Measures one request end to end (tokenize, pad, execute, trim) on the
//! reference device, with and without the result cache.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use shapeforge_core::{ArtifactStore, Compiler, ModelDefinition, ReferenceTarget, ShapeSpec, StaticModelRegistry};
use shapeforge_runtime::{
    DeviceHandle, EmbeddingRequest, EngineConfig, InferenceEngine, ReferenceDevice, Session,
    WordTokenizer,
};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::runtime::Runtime;

const MODEL: &str = "bench/encoder";

async fn setup_session(batch: usize, seq: usize, config: EngineConfig) -> (Session, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(ArtifactStore::open(temp_dir.path()).unwrap());

    let registry =
        StaticModelRegistry::new().with(ModelDefinition::text_encoder(MODEL, 384, 8192, 512));
    let compiler = Compiler::new(Arc::new(registry), Arc::new(ReferenceTarget::new()));
    let location = compiler
        .compile_and_save(&store, MODEL, ShapeSpec::new(batch, seq).unwrap())
        .unwrap();

    let engine = InferenceEngine::new(
        store,
        DeviceHandle::new(ReferenceDevice::new()),
        Arc::new(WordTokenizer::new(8192).unwrap()),
        config,
    )
    .unwrap();
    let session = engine.load(&location).await.unwrap();
    session.warmup().await.unwrap();
    (session, temp_dir)
}

fn bench_single_request(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (session, _temp) = rt.block_on(setup_session(
        1,
        128,
        EngineConfig::default().without_cache(),
    ));
    let request = EmbeddingRequest::new(["I like to eat apples"]);

    c.bench_function("infer_b1_s128", |b| {
        b.iter(|| rt.block_on(session.infer(black_box(&request))).unwrap())
    });
}

fn bench_padded_batch(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (session, _temp) = rt.block_on(setup_session(
        8,
        128,
        EngineConfig::default().without_cache(),
    ));
    let request = EmbeddingRequest::new(["one short text", "and another"]);

    c.bench_function("infer_b8_s128_two_texts", |b| {
        b.iter(|| rt.block_on(session.infer(black_box(&request))).unwrap())
    });
}

fn bench_cache_hit(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (session, _temp) = rt.block_on(setup_session(1, 128, EngineConfig::default()));
    let request = EmbeddingRequest::new(["I like to eat apples"]);
    rt.block_on(session.infer(&request)).unwrap();

    c.bench_function("infer_cache_hit", |b| {
        b.iter(|| rt.block_on(session.infer(black_box(&request))).unwrap())
    });
}

criterion_group!(
    benches,
    bench_single_request,
    bench_padded_batch,
    bench_cache_hit
);
criterion_main!(benches);
