//! Command handlers
//!
//! Each handler returns the JSON document printed on stdout. Errors keep
//! their library type inside `anyhow::Error` so `main` can map them to exit
//! codes.

use crate::config::{ForgeConfig, TokenizerConfig};
use anyhow::{Context, Result};
use clap::Args;
use serde_json::{json, Value};
use shapeforge_core::{
    ArtifactLocation, ArtifactStore, Compiler, LocalModelRegistry, ReferenceTarget, ShapeSpec,
    StoreError,
};
use shapeforge_runtime::{
    DeviceHandle, EmbeddingRequest, InferenceEngine, ReferenceDevice, Tokenizer, WordTokenizer,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

#[derive(Args, Debug)]
pub struct CompileArgs {
    /// Model identifier, resolved through the local model registry
    #[arg(long)]
    pub model: String,

    #[arg(long)]
    pub batch_size: usize,

    #[arg(long)]
    pub sequence_length: usize,

    /// Artifact store directory (defaults to the configured store)
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Model registry directory (defaults to the configured registry)
    #[arg(long)]
    pub registry: Option<PathBuf>,

    /// Recompile even if a fresh artifact already exists
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct EmbedArgs {
    /// Artifact location printed by `compile`
    #[arg(long)]
    pub artifact: PathBuf,

    /// Text to embed; repeat for a batch
    #[arg(long = "text", required = true)]
    pub texts: Vec<String>,

    /// Fail if the device is busy for longer than this
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Artifact store directory (defaults to the configured store)
    #[arg(long)]
    pub store: Option<PathBuf>,
}

pub fn compile(args: CompileArgs, config: &ForgeConfig) -> Result<Value> {
    let shape = ShapeSpec::new(args.batch_size, args.sequence_length)?;

    let store = match &args.output {
        Some(root) => ArtifactStore::open(root)?,
        None => ArtifactStore::from_config(&config.store)?,
    };
    let registry = match &args.registry {
        Some(root) => LocalModelRegistry::new(root),
        None => LocalModelRegistry::from_config(&config.registry)
            .context("Failed to resolve the model registry directory")?,
    };
    let compiler = Compiler::new(Arc::new(registry), Arc::new(ReferenceTarget::new()));

    let start = Instant::now();
    let location = if args.force {
        compiler.compile_and_save(&store, &args.model, shape)?
    } else {
        compiler.ensure_compiled(&store, &args.model, shape)?
    };
    let metadata = store.read_metadata(&location)?;

    Ok(json!({
        "location": location,
        "model_identifier": metadata.model_identifier,
        "shape": metadata.shape,
        "target": metadata.target,
        "compiler_version": metadata.compiler_version,
        "elapsed_ms": start.elapsed().as_millis() as u64,
    }))
}

pub async fn embed(args: EmbedArgs, config: &ForgeConfig) -> Result<Value> {
    let location = ArtifactLocation::new(&args.artifact);
    let store = Arc::new(store_for_location(&location)?);
    let metadata = store.read_metadata(&location)?;

    let mut engine_config = config.engine.clone();
    if let Some(timeout_ms) = args.timeout_ms {
        engine_config.queue_timeout_ms = Some(timeout_ms);
    }

    let engine = InferenceEngine::new(
        store,
        DeviceHandle::new(ReferenceDevice::new()),
        tokenizer_for(&config.tokenizer, metadata.vocab_size)?,
        engine_config,
    )?;
    let session = engine.load(&location).await?;
    let result = session.infer(&EmbeddingRequest::new(args.texts)).await?;

    Ok(json!({
        "model_identifier": session.model_identifier(),
        "shape": session.shape(),
        "token_embeddings_shape": result.token_embeddings_shape(),
        "sentence_embedding_shape": result.sentence_embedding_shape(),
        "sentence_embedding": result.sentence_embedding,
    }))
}

pub fn inspect(artifact: &Path) -> Result<Value> {
    let location = ArtifactLocation::new(artifact);
    let metadata = store_for_location(&location)?.read_metadata(&location)?;
    Ok(serde_json::to_value(metadata)?)
}

pub fn list(args: ListArgs, config: &ForgeConfig) -> Result<Value> {
    let store = match &args.store {
        Some(root) => ArtifactStore::open(root)?,
        None => ArtifactStore::from_config(&config.store)?,
    };

    let artifacts: Vec<Value> = store
        .list()?
        .into_iter()
        .map(|stored| {
            json!({
                "location": stored.location,
                "model_identifier": stored.metadata.model_identifier,
                "shape": stored.metadata.shape,
                "target": stored.metadata.target,
                "payload_len": stored.metadata.payload_len,
                "created_at": stored.metadata.created_at,
            })
        })
        .collect();

    Ok(Value::Array(artifacts))
}

pub fn delete(artifact: &Path) -> Result<Value> {
    let location = ArtifactLocation::new(artifact);
    store_for_location(&location)?.delete(&location)?;
    Ok(json!({ "deleted": location }))
}

/// Store owning a published `location` (`<root>/<model>/<shape>`).
///
/// Creates nothing: a path without a `CURRENT` pointer is `NotFound`.
fn store_for_location(location: &ArtifactLocation) -> Result<ArtifactStore> {
    let root = location
        .path()
        .parent()
        .and_then(Path::parent)
        .filter(|_| location.path().join("CURRENT").is_file())
        .ok_or_else(|| StoreError::not_found(location.path()))?;

    Ok(ArtifactStore::existing(root)?)
}

fn tokenizer_for(config: &TokenizerConfig, vocab_size: usize) -> Result<Arc<dyn Tokenizer>> {
    #[cfg(feature = "hf-tokenizer")]
    {
        if let Some(path) = &config.path {
            let tokenizer = shapeforge_runtime::HfTokenizer::from_file(path)?;
            return Ok(Arc::new(tokenizer));
        }
    }

    let tokenizer = WordTokenizer::new(vocab_size)?;
    if config.case_sensitive {
        Ok(Arc::new(tokenizer.case_sensitive()))
    } else {
        Ok(Arc::new(tokenizer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shapeforge_core::{CompileError, ModelDefinition};
    use shapeforge_runtime::EngineError;
    use tempfile::TempDir;

    const MODEL: &str = "acme/encoder";

    fn workspace() -> (TempDir, PathBuf, PathBuf) {
        let temp = TempDir::new().unwrap();
        let store = temp.path().join("artifacts");
        let registry = temp.path().join("models");

        let definition = ModelDefinition::text_encoder(MODEL, 8, 1000, 128);
        let model_dir = LocalModelRegistry::new(&registry).model_dir(MODEL);
        std::fs::create_dir_all(&model_dir).unwrap();
        std::fs::write(
            model_dir.join("config.json"),
            serde_json::to_string(&definition).unwrap(),
        )
        .unwrap();

        (temp, store, registry)
    }

    fn compile_args(store: &Path, registry: &Path, batch: usize, seq: usize) -> CompileArgs {
        CompileArgs {
            model: MODEL.to_string(),
            batch_size: batch,
            sequence_length: seq,
            output: Some(store.to_path_buf()),
            registry: Some(registry.to_path_buf()),
            force: false,
        }
    }

    fn location_of(output: &Value) -> PathBuf {
        PathBuf::from(output["location"].as_str().unwrap())
    }

    #[tokio::test]
    async fn test_compile_then_embed() {
        let (_temp, store, registry) = workspace();
        let config = ForgeConfig::default();

        let compiled = compile(compile_args(&store, &registry, 1, 384), &config).unwrap();
        assert_eq!(compiled["shape"]["batch_size"], 1);

        let embedded = embed(
            EmbedArgs {
                artifact: location_of(&compiled),
                texts: vec!["I like to eat apples".to_string()],
                timeout_ms: None,
            },
            &config,
        )
        .await
        .unwrap();

        assert_eq!(embedded["token_embeddings_shape"], json!([1, 7, 8]));
        assert_eq!(embedded["sentence_embedding_shape"], json!([1, 8]));
    }

    #[tokio::test]
    async fn test_embed_shape_mismatch() {
        let (_temp, store, registry) = workspace();
        let config = ForgeConfig::default();
        let compiled = compile(compile_args(&store, &registry, 1, 16), &config).unwrap();

        let error = embed(
            EmbedArgs {
                artifact: location_of(&compiled),
                texts: vec!["one".to_string(), "two".to_string()],
                timeout_ms: Some(1000),
            },
            &config,
        )
        .await
        .unwrap_err();

        assert!(matches!(
            error.downcast_ref::<EngineError>(),
            Some(EngineError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_compile_reuses_fresh_artifact() {
        let (_temp, store, registry) = workspace();
        let config = ForgeConfig::default();

        let first = compile(compile_args(&store, &registry, 2, 32), &config).unwrap();
        let created = inspect(&location_of(&first)).unwrap()["created_at"].clone();

        compile(compile_args(&store, &registry, 2, 32), &config).unwrap();
        assert_eq!(inspect(&location_of(&first)).unwrap()["created_at"], created);

        let mut forced = compile_args(&store, &registry, 2, 32);
        forced.force = true;
        compile(forced, &config).unwrap();
        assert_ne!(inspect(&location_of(&first)).unwrap()["created_at"], created);
    }

    #[test]
    fn test_compile_errors_keep_their_type() {
        let (_temp, store, registry) = workspace();
        let config = ForgeConfig::default();

        let mut unknown = compile_args(&store, &registry, 1, 8);
        unknown.model = "acme/missing".to_string();
        let error = compile(unknown, &config).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<CompileError>(),
            Some(CompileError::SourceModelNotFound { .. })
        ));

        let error = compile(compile_args(&store, &registry, 0, 8), &config).unwrap_err();
        assert!(error.downcast_ref::<shapeforge_core::ShapeError>().is_some());
    }

    #[test]
    fn test_list_and_delete() {
        let (_temp, store, registry) = workspace();
        let config = ForgeConfig::default();

        let a = compile(compile_args(&store, &registry, 1, 8), &config).unwrap();
        compile(compile_args(&store, &registry, 4, 64), &config).unwrap();

        let listed = list(
            ListArgs {
                store: Some(store.clone()),
            },
            &config,
        )
        .unwrap();
        assert_eq!(listed.as_array().unwrap().len(), 2);

        delete(&location_of(&a)).unwrap();
        let listed = list(ListArgs { store: Some(store) }, &config).unwrap();
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let error = delete(&location_of(&a)).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<StoreError>(),
            Some(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_inspect_missing_location_creates_nothing() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nowhere").join("acme-x").join("b1_s8");

        let error = inspect(&missing).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<StoreError>(),
            Some(StoreError::NotFound { .. })
        ));
        assert!(!temp.path().join("nowhere").exists());
    }

    #[test]
    fn test_inspect_plain_directory_leaves_it_untouched() {
        let temp = TempDir::new().unwrap();
        let plain = temp.path().join("photos").join("2024");
        std::fs::create_dir_all(&plain).unwrap();

        for error in [inspect(&plain).unwrap_err(), delete(&plain).unwrap_err()] {
            assert!(matches!(
                error.downcast_ref::<StoreError>(),
                Some(StoreError::NotFound { .. })
            ));
        }
        assert!(!temp.path().join(".staging").exists());
        assert!(plain.exists());
        assert_eq!(std::fs::read_dir(&plain).unwrap().count(), 0);
    }
}
