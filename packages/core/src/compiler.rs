//! Compiler
//!
//! Turns a source model identifier plus a [`ShapeSpec`] into a
//! [`CompiledArtifact`] for one compile target. Compilation is blocking and
//! potentially slow; async callers should run it on a blocking worker.
//!
//! ## Staleness
//!
//! An artifact is fresh only if it was produced by the same compiler version
//! from the same source definition. [`Compiler::ensure_compiled`] reuses fresh
//! artifacts and recompiles (overwriting) anything else; nothing stale is ever
//! served silently.

use crate::artifact::{ArtifactIdentity, ArtifactLocation, CompiledArtifact};
use crate::error::{CompileError, StoreError};
use crate::registry::{Modality, ModelDefinition, ModelRegistry};
use crate::shape::ShapeSpec;
use crate::store::ArtifactStore;
use crate::target::CompileTarget;
use std::sync::Arc;
use std::time::Instant;

pub type Result<T> = std::result::Result<T, CompileError>;

/// Compiles source models for one target
#[derive(Clone)]
pub struct Compiler {
    registry: Arc<dyn ModelRegistry>,
    target: Arc<dyn CompileTarget>,
}

impl Compiler {
    pub fn new(registry: Arc<dyn ModelRegistry>, target: Arc<dyn CompileTarget>) -> Self {
        Self { registry, target }
    }

    /// Version recorded in every artifact: `<crate>+<target>/<target version>`
    pub fn version(&self) -> String {
        format!(
            "{}+{}/{}",
            env!("CARGO_PKG_VERSION"),
            self.target.name(),
            self.target.version()
        )
    }

    pub fn target_name(&self) -> &str {
        self.target.name()
    }

    /// Compile `model_identifier` for `shape`
    pub fn compile(&self, model_identifier: &str, shape: ShapeSpec) -> Result<CompiledArtifact> {
        let start = Instant::now();
        tracing::info!(
            "Compiling '{}' for target '{}' at [{}]",
            model_identifier,
            self.target.name(),
            shape
        );

        let definition = self.resolve(model_identifier)?;

        let payload = self.target.lower(&definition, shape).map_err(|diagnostic| {
            CompileError::CompilationError {
                model_identifier: model_identifier.to_string(),
                shape,
                target: self.target.name().to_string(),
                diagnostic,
            }
        })?;

        let artifact = CompiledArtifact::new(
            ArtifactIdentity {
                model_identifier: model_identifier.to_string(),
                shape,
                target: self.target.name().to_string(),
                compiler_version: self.version(),
                source_digest: definition.digest(),
                hidden_size: definition.hidden_size,
                vocab_size: definition.vocab_size,
            },
            payload,
        );

        tracing::info!(
            "Compiled '{}' [{}] in {:?} ({} bytes)",
            model_identifier,
            shape,
            start.elapsed(),
            artifact.payload().len()
        );

        Ok(artifact)
    }

    /// Compile and publish, replacing any existing artifact for the key
    pub fn compile_and_save(
        &self,
        store: &ArtifactStore,
        model_identifier: &str,
        shape: ShapeSpec,
    ) -> Result<ArtifactLocation> {
        if store.contains(model_identifier, shape) {
            tracing::info!(
                "Invalidating existing artifact for '{}' [{}]",
                model_identifier,
                shape
            );
        }

        let artifact = self.compile(model_identifier, shape)?;
        Ok(store.save(&artifact)?)
    }

    /// Compile-once: reuse the stored artifact if it is fresh, otherwise
    /// recompile and overwrite it.
    pub fn ensure_compiled(
        &self,
        store: &ArtifactStore,
        model_identifier: &str,
        shape: ShapeSpec,
    ) -> Result<ArtifactLocation> {
        let location = store.location_for(model_identifier, shape);

        match store.read_metadata(&location) {
            Ok(metadata) => {
                let definition = self.resolve(model_identifier)?;
                let version = self.version();

                if metadata.model_identifier != model_identifier {
                    tracing::warn!(
                        "Artifact at {} belongs to '{}', not '{}', recompiling",
                        location,
                        metadata.model_identifier,
                        model_identifier
                    );
                    return self.compile_and_save(store, model_identifier, shape);
                }

                if metadata.target == self.target.name()
                    && metadata.compiler_version == version
                    && metadata.source_digest == definition.digest()
                {
                    tracing::debug!(
                        "Reusing artifact for '{}' [{}] at {}",
                        model_identifier,
                        shape,
                        location
                    );
                    return Ok(location);
                }

                tracing::warn!(
                    "Stale artifact for '{}' [{}] (compiler {} vs {}, digest {} vs {}), recompiling",
                    model_identifier,
                    shape,
                    metadata.compiler_version,
                    version,
                    metadata.source_digest,
                    definition.digest()
                );
            }
            Err(StoreError::NotFound { .. }) => {}
            Err(StoreError::CorruptArtifact { reason, .. }) => {
                tracing::warn!(
                    "Corrupt artifact for '{}' [{}] ({}), recompiling",
                    model_identifier,
                    shape,
                    reason
                );
            }
            Err(e) => return Err(e.into()),
        }

        self.compile_and_save(store, model_identifier, shape)
    }

    /// Resolve and admit a source model (text embedding graphs only)
    fn resolve(&self, model_identifier: &str) -> Result<ModelDefinition> {
        let definition = self.registry.resolve(model_identifier).map_err(|e| {
            CompileError::SourceModelNotFound {
                model_identifier: model_identifier.to_string(),
                reason: e.to_string(),
            }
        })?;

        if definition.modality != Modality::Text {
            return Err(CompileError::UnsupportedModelKind {
                model_identifier: model_identifier.to_string(),
                modality: definition.modality,
            });
        }

        Ok(definition)
    }
}
