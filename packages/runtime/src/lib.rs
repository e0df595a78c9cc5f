/// ShapeForge Runtime - Fixed-Shape Inference Engine
///
/// This crate owns the run-many half of the artifact lifecycle: loading a
/// compiled artifact onto a device and serving embedding requests against its
/// fixed shape.
///
/// # Features
///
/// - **Strict shapes**: oversized requests fail with `ShapeMismatch`, never truncate
/// - **Exclusive devices**: one execution in flight per `DeviceHandle`, FIFO queueing
/// - **Bounded waits**: optional queue timeout, cancellation by dropping the future
/// - **Result caching**: per-session LRU cache of trimmed results
/// - **Reference device**: candle-backed CPU executor for `reference-cpu` programs
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use shapeforge_core::ArtifactStore;
/// use shapeforge_runtime::{
///     DeviceHandle, EmbeddingRequest, EngineConfig, InferenceEngine, ReferenceDevice, WordTokenizer,
/// };
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = Arc::new(ArtifactStore::open("/artifacts")?);
///     let location = store.location_for("org/model", shape);
///
///     let engine = InferenceEngine::new(
///         store,
///         DeviceHandle::new(ReferenceDevice::new()),
///         Arc::new(WordTokenizer::new(30522)?),
///         EngineConfig::default(),
///     )?;
///
///     let session = engine.load(&location).await?;
///     let result = session.infer(&EmbeddingRequest::new(["I like to eat apples"])).await?;
///     println!("{:?}", result.token_embeddings_shape()); // [1, 7, hidden]
///
///     Ok(())
/// }
/// ```
pub mod batch;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod tokenizer;

// Re-export main types
pub use batch::{DeviceOutput, EmbeddingRequest, EmbeddingResult, PaddedBatch, TokenBatch};
pub use config::EngineConfig;
pub use device::{Device, DeviceHandle, ReferenceDevice};
pub use engine::{CacheStats, EmbeddingBackend, InferenceEngine, Session, SessionState};
pub use error::{DeviceError, EngineError, Result, TokenizerError};
#[cfg(feature = "hf-tokenizer")]
pub use tokenizer::HfTokenizer;
pub use tokenizer::{Tokenizer, WordTokenizer, PAD_TOKEN_ID};
