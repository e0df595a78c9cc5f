//! Compile → save → load lifecycle tests, including concurrent store access
use shapeforge_core::{
    ArtifactStore, CompileError, Compiler, FailureKind, LocalModelRegistry, ModelDefinition,
    ReferenceProgram, ReferenceTarget, ShapeSpec, StaticModelRegistry,
};
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;

const MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

fn compiler() -> Compiler {
    let registry =
        StaticModelRegistry::new().with(ModelDefinition::text_encoder(MODEL, 16, 256, 512));
    Compiler::new(Arc::new(registry), Arc::new(ReferenceTarget::new()))
}

#[test]
fn test_round_trip_preserves_shape() {
    let temp = TempDir::new().unwrap();
    let store = ArtifactStore::open(temp.path()).unwrap();
    let compiler = compiler();

    for (batch, seq) in [(1, 384), (2, 16), (8, 128)] {
        let shape = ShapeSpec::new(batch, seq).unwrap();
        let artifact = compiler.compile(MODEL, shape).unwrap();
        let location = store.save(&artifact).unwrap();
        let loaded = store.load(&location).unwrap();

        assert_eq!(loaded.shape(), shape);
        assert_eq!(loaded.payload(), artifact.payload());

        let program = ReferenceProgram::decode(loaded.payload()).unwrap();
        assert_eq!(program.header.batch_size, batch);
        assert_eq!(program.header.sequence_length, seq);
    }

    assert_eq!(store.list().unwrap().len(), 3);
}

#[test]
fn test_recompile_overwrites_same_location() {
    let temp = TempDir::new().unwrap();
    let store = ArtifactStore::open(temp.path()).unwrap();
    let compiler = compiler();
    let shape = ShapeSpec::new(1, 32).unwrap();

    let first = compiler.compile_and_save(&store, MODEL, shape).unwrap();
    let created = store.read_metadata(&first).unwrap().created_at;

    let second = compiler.compile_and_save(&store, MODEL, shape).unwrap();
    assert_eq!(first, second);

    let metadata = store.read_metadata(&second).unwrap();
    assert!(metadata.created_at >= created);
    assert_eq!(store.list().unwrap().len(), 1);
}

#[test]
fn test_local_registry_compile() {
    let temp = TempDir::new().unwrap();
    let models = temp.path().join("models");
    let registry = LocalModelRegistry::new(&models);
    let dir = registry.model_dir(MODEL);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("config.json"),
        r#"{"hidden_size": 8, "vocab_size": 128, "max_position_embeddings": 64, "pooling": "cls"}"#,
    )
    .unwrap();

    let compiler = Compiler::new(Arc::new(registry), Arc::new(ReferenceTarget::new()));
    let artifact = compiler.compile(MODEL, ShapeSpec::new(1, 64).unwrap()).unwrap();
    assert_eq!(artifact.hidden_size(), 8);

    let err = compiler
        .compile("org/missing", ShapeSpec::new(1, 8).unwrap())
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::SourceModelNotFound);

    let vision_dir = registry_dir(&models, "org/clip");
    std::fs::write(
        vision_dir.join("config.json"),
        r#"{"modality": "vision", "hidden_size": 8, "vocab_size": 1, "max_position_embeddings": 1}"#,
    )
    .unwrap();
    let err = compiler
        .compile("org/clip", ShapeSpec::new(1, 1).unwrap())
        .unwrap_err();
    assert!(matches!(err, CompileError::UnsupportedModelKind { .. }));
}

fn registry_dir(root: &std::path::Path, identifier: &str) -> std::path::PathBuf {
    let dir = LocalModelRegistry::new(root).model_dir(identifier);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn test_concurrent_saves_and_loads_never_observe_partial_artifacts() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(ArtifactStore::open(temp.path()).unwrap());
    let compiler = compiler();
    let shape = ShapeSpec::new(2, 64).unwrap();

    let artifact = Arc::new(compiler.compile(MODEL, shape).unwrap());
    let location = store.save(&artifact).unwrap();

    let writers: Vec<_> = (0..4)
        .map(|_| {
            let store = store.clone();
            let artifact = artifact.clone();
            thread::spawn(move || {
                for _ in 0..10 {
                    store.save(&artifact).unwrap();
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = store.clone();
            let location = location.clone();
            let expected = artifact.checksum().to_string();
            thread::spawn(move || {
                let mut loads = 0;
                for _ in 0..40 {
                    let loaded = store.load(&location).unwrap();
                    assert_eq!(loaded.checksum(), expected);
                    loads += 1;
                }
                loads
            })
        })
        .collect();

    for writer in writers {
        writer.join().unwrap();
    }
    let total: usize = readers.into_iter().map(|r| r.join().unwrap()).sum();
    assert_eq!(total, 4 * 40);

    let final_load = store.load(&location).unwrap();
    assert_eq!(final_load.checksum(), artifact.checksum());
}

#[test]
fn test_writers_starting_together_leave_a_loadable_artifact() {
    let compiler = compiler();
    let shape = ShapeSpec::new(1, 8).unwrap();
    let artifact = Arc::new(compiler.compile(MODEL, shape).unwrap());

    for _ in 0..10 {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(ArtifactStore::open(temp.path()).unwrap());
        let start = Arc::new(Barrier::new(8));

        let writers: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let artifact = artifact.clone();
                let start = start.clone();
                thread::spawn(move || {
                    start.wait();
                    (0..5).map(|_| store.save(&artifact).unwrap()).last()
                })
            })
            .collect();

        let mut locations: Vec<_> = writers
            .into_iter()
            .filter_map(|w| w.join().unwrap())
            .collect();
        locations.dedup();
        assert_eq!(locations.len(), 1);

        let loaded = store.load(&locations[0]).unwrap();
        assert_eq!(loaded.checksum(), artifact.checksum());
        assert_eq!(store.list().unwrap().len(), 1);
    }
}

#[test]
fn test_invalid_shape_is_rejected_before_compilation() {
    let err = ShapeSpec::new(0, 384).unwrap_err();
    assert_eq!(err.kind(), FailureKind::InvalidShape);
    assert!(err.to_string().contains("batch_size=0"));
}
