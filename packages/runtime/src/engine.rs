/// Inference engine for compiled artifacts
///
/// The engine turns a stored artifact into a [`Session`] bound to one device.
/// Sessions validate every request against the artifact's fixed shape, pad it
/// to that shape, run it on the device and hand back embeddings with the
/// padding removed.
///
/// ## Device access
///
/// The device is an exclusive resource. Each execution holds the device lock
/// for its full duration, so executions never overlap even across sessions
/// sharing one [`DeviceHandle`]. Requests waiting for the lock are served in
/// arrival order and can be cancelled by dropping the `infer` future; once an
/// execution has started it runs to completion on a blocking worker.
use crate::batch::{EmbeddingRequest, EmbeddingResult, PaddedBatch, TokenBatch};
use crate::config::EngineConfig;
use crate::device::DeviceHandle;
use crate::error::{EngineError, Result};
use crate::tokenizer::Tokenizer;
use async_trait::async_trait;
use lru::LruCache;
use shapeforge_core::{ArtifactLocation, ArtifactStore, CompiledArtifact, ShapeSpec};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

/// Narrow capability interface over an embedding backend
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    type Session: Send + Sync;

    async fn load(&self, location: &ArtifactLocation) -> Result<Self::Session>;

    async fn infer(
        &self,
        session: &Self::Session,
        request: &EmbeddingRequest,
    ) -> Result<EmbeddingResult>;
}

/// Loads artifacts into sessions on a shared device
#[derive(Clone)]
pub struct InferenceEngine {
    store: Arc<ArtifactStore>,
    device: DeviceHandle,
    tokenizer: Arc<dyn Tokenizer>,
    config: EngineConfig,
}

impl InferenceEngine {
    pub fn new(
        store: Arc<ArtifactStore>,
        device: DeviceHandle,
        tokenizer: Arc<dyn Tokenizer>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate().map_err(EngineError::ConfigError)?;

        Ok(Self {
            store,
            device,
            tokenizer,
            config,
        })
    }

    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Load the artifact at `location` into a ready session.
    ///
    /// Fails exactly as `ArtifactStore::load` does, and with `ExecutionError`
    /// when the artifact was compiled for a target this device cannot run.
    pub async fn load(&self, location: &ArtifactLocation) -> Result<Session> {
        let start = Instant::now();

        let store = self.store.clone();
        let owned_location = location.clone();
        let artifact = tokio::task::spawn_blocking(move || store.load(&owned_location))
            .await
            .map_err(|e| EngineError::ExecutionError {
                model_identifier: location.to_string(),
                device: self.device.name().to_string(),
                message: format!("artifact load task failed: {}", e),
            })??;

        if !self.device.supports(artifact.target()) {
            return Err(EngineError::ExecutionError {
                model_identifier: artifact.model_identifier().to_string(),
                device: self.device.name().to_string(),
                message: format!(
                    "artifact was compiled for target '{}' but the device runs '{}'",
                    artifact.target(),
                    self.device.target()
                ),
            });
        }

        let cache = NonZeroUsize::new(self.config.result_cache_capacity)
            .map(|capacity| Mutex::new(LruCache::new(capacity)));

        tracing::info!(
            "Loaded '{}' [{}] on device '{}' in {:?}",
            artifact.model_identifier(),
            artifact.shape(),
            self.device.name(),
            start.elapsed()
        );

        Ok(Session {
            inner: Arc::new(SessionInner {
                model_identifier: artifact.model_identifier().to_string(),
                shape: artifact.shape(),
                hidden_dim: artifact.hidden_size(),
                location: location.clone(),
                artifact: RwLock::new(Some(Arc::new(artifact))),
                state: AtomicU8::new(SessionState::Loaded as u8),
                device: self.device.clone(),
                tokenizer: self.tokenizer.clone(),
                queue_timeout: self.config.queue_timeout(),
                cache,
            }),
        })
    }
}

#[async_trait]
impl EmbeddingBackend for InferenceEngine {
    type Session = Session;

    async fn load(&self, location: &ArtifactLocation) -> Result<Session> {
        InferenceEngine::load(self, location).await
    }

    async fn infer(&self, session: &Session, request: &EmbeddingRequest) -> Result<EmbeddingResult> {
        session.infer(request).await
    }
}

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Unloaded = 0,
    Loaded = 1,
    Executing = 2,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionState::Loaded,
            2 => SessionState::Executing,
            _ => SessionState::Unloaded,
        }
    }
}

/// Result cache occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
}

/// A loaded artifact bound to a device. Cloning shares the session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    model_identifier: String,
    shape: ShapeSpec,
    hidden_dim: usize,
    location: ArtifactLocation,
    artifact: RwLock<Option<Arc<CompiledArtifact>>>,
    state: AtomicU8,
    device: DeviceHandle,
    tokenizer: Arc<dyn Tokenizer>,
    queue_timeout: Option<Duration>,
    cache: Option<Mutex<LruCache<TokenBatch, EmbeddingResult>>>,
}

impl SessionInner {
    fn finish_execution(&self) {
        // An unload during execution wins
        let _ = self.state.compare_exchange(
            SessionState::Executing as u8,
            SessionState::Loaded as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

/// Returns the session to `Loaded` when an execution ends, including when
/// the device panics
struct ExecutionGuard(Arc<SessionInner>);

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        self.0.finish_execution();
    }
}

impl Session {
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub fn shape(&self) -> ShapeSpec {
        self.inner.shape
    }

    pub fn model_identifier(&self) -> &str {
        &self.inner.model_identifier
    }

    pub fn location(&self) -> &ArtifactLocation {
        &self.inner.location
    }

    pub fn hidden_dim(&self) -> usize {
        self.inner.hidden_dim
    }

    pub fn device(&self) -> &DeviceHandle {
        &self.inner.device
    }

    /// Embed `request` at the session's compiled shape.
    ///
    /// Never truncates: a request with more texts than `batch_size` or a text
    /// longer than `sequence_length` tokens fails with `ShapeMismatch`.
    pub async fn infer(&self, request: &EmbeddingRequest) -> Result<EmbeddingResult> {
        let total_start = Instant::now();
        let artifact = self.artifact()?;

        if request.is_empty() {
            return Err(EngineError::InvalidRequest(format!(
                "no texts to embed for '{}'",
                self.inner.model_identifier
            )));
        }

        let batch = TokenBatch::tokenize(self.inner.tokenizer.as_ref(), request)?;
        let actual = batch.request_shape();
        if !self.inner.shape.matches(&actual) {
            return Err(EngineError::ShapeMismatch {
                model_identifier: self.inner.model_identifier.clone(),
                expected: self.inner.shape,
                actual,
            });
        }

        if let Some(cached) = self.cached(&batch) {
            tracing::debug!(
                "Result cache hit for '{}' ({} texts)",
                self.inner.model_identifier,
                batch.sequences().len()
            );
            return Ok(cached);
        }

        let padded = batch.pad_to(self.inner.shape, self.inner.tokenizer.pad_token_id());
        let (output, queue_time, execute_time) = self.execute(artifact, padded).await?;

        let result = EmbeddingResult::trim(output, &batch.lengths(), self.inner.hidden_dim);

        if let Some(cache) = &self.inner.cache {
            let mut cache = cache.lock().unwrap_or_else(|p| p.into_inner());
            cache.put(batch.clone(), result.clone());
        }

        tracing::debug!(
            "INFERENCE PROFILE: total={:?} | queue={:?} execute={:?} | model={} shape=[{}] request=[{}]",
            total_start.elapsed(),
            queue_time,
            execute_time,
            self.inner.model_identifier,
            self.inner.shape,
            actual
        );

        Ok(result)
    }

    /// Run one all-padding batch so the device prepares the program before
    /// the first real request
    pub async fn warmup(&self) -> Result<Duration> {
        let artifact = self.artifact()?;
        let start = Instant::now();

        let padded = TokenBatch::from_sequences(Vec::new())
            .pad_to(self.inner.shape, self.inner.tokenizer.pad_token_id());
        self.execute(artifact, padded).await?;

        let elapsed = start.elapsed();
        tracing::info!(
            "Warmed up '{}' [{}] in {:?}",
            self.inner.model_identifier,
            self.inner.shape,
            elapsed
        );
        Ok(elapsed)
    }

    /// Release the artifact. In-flight executions finish; later requests
    /// fail with `NotLoaded`.
    pub fn unload(&self) {
        let previous = {
            let mut artifact = self
                .inner
                .artifact
                .write()
                .unwrap_or_else(|p| p.into_inner());
            self.inner
                .state
                .store(SessionState::Unloaded as u8, Ordering::Release);
            artifact.take()
        };

        if let Some(cache) = &self.inner.cache {
            cache.lock().unwrap_or_else(|p| p.into_inner()).clear();
        }

        if previous.is_some() {
            tracing::info!(
                "Unloaded '{}' [{}]",
                self.inner.model_identifier,
                self.inner.shape
            );
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        match &self.inner.cache {
            Some(cache) => {
                let cache = cache.lock().unwrap_or_else(|p| p.into_inner());
                CacheStats {
                    entries: cache.len(),
                    capacity: cache.cap().get(),
                }
            }
            None => CacheStats {
                entries: 0,
                capacity: 0,
            },
        }
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.inner.cache {
            cache.lock().unwrap_or_else(|p| p.into_inner()).clear();
        }
    }

    fn artifact(&self) -> Result<Arc<CompiledArtifact>> {
        self.inner
            .artifact
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or_else(|| EngineError::NotLoaded {
                model_identifier: self.inner.model_identifier.clone(),
            })
    }

    fn cached(&self, batch: &TokenBatch) -> Option<EmbeddingResult> {
        let cache = self.inner.cache.as_ref()?;
        let mut cache = cache.lock().unwrap_or_else(|p| p.into_inner());
        cache.get(batch).cloned()
    }

    fn execution_error(&self, message: String) -> EngineError {
        EngineError::ExecutionError {
            model_identifier: self.inner.model_identifier.clone(),
            device: self.inner.device.name().to_string(),
            message,
        }
    }

    /// Wait for the device, then run `padded` on a blocking worker while
    /// holding it
    async fn execute(
        &self,
        artifact: Arc<CompiledArtifact>,
        padded: PaddedBatch,
    ) -> Result<(crate::batch::DeviceOutput, Duration, Duration)> {
        let queue_start = Instant::now();
        let mut guard = self
            .inner
            .device
            .acquire(self.inner.queue_timeout)
            .await
            .ok_or_else(|| EngineError::Timeout {
                model_identifier: self.inner.model_identifier.clone(),
                device: self.inner.device.name().to_string(),
                waited: queue_start.elapsed(),
            })?;
        let queue_time = queue_start.elapsed();

        if self
            .inner
            .state
            .compare_exchange(
                SessionState::Loaded as u8,
                SessionState::Executing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(EngineError::NotLoaded {
                model_identifier: self.inner.model_identifier.clone(),
            });
        }

        let executing = ExecutionGuard(self.inner.clone());
        let task = tokio::task::spawn_blocking(move || {
            let start = Instant::now();
            let output = guard.execute(&artifact, &padded);
            let elapsed = start.elapsed();
            drop(executing);
            drop(guard);
            (output, elapsed)
        });

        let (output, execute_time) = task
            .await
            .map_err(|e| self.execution_error(format!("execution task failed: {}", e)))?;

        let output = output.map_err(|e| self.execution_error(e.to_string()))?;
        Ok((output, queue_time, execute_time))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("model_identifier", &self.inner.model_identifier)
            .field("shape", &self.inner.shape)
            .field("location", &self.inner.location)
            .field("state", &self.state())
            .finish()
    }
}
