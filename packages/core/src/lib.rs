//! ShapeForge Core - Fixed-Shape Model Artifacts
//!
//! This crate owns the compile-once half of the artifact lifecycle: the shape
//! contract an artifact is compiled against, the compiler that produces
//! artifacts, and the store that persists them.
//!
//! # Architecture
//!
//! - **Fixed shapes**: every artifact is specialized to one [`ShapeSpec`]
//! - **Atomic publish**: artifacts become visible only once fully written
//! - **No silent staleness**: recompiling an existing key overwrites it
//!
//! # Modules
//!
//! - [`shape`] - `ShapeSpec` and request shape checks
//! - [`artifact`] - `CompiledArtifact`, sidecar metadata, location tokens
//! - [`store`] - `ArtifactStore` filesystem persistence
//! - [`registry`] - model definitions and the registries that resolve them
//! - [`target`] - compile targets (accelerator lowering backends)
//! - [`compiler`] - `Compiler` orchestrating registry, target and store
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use shapeforge_core::{ArtifactStore, Compiler, LocalModelRegistry, ReferenceTarget, ShapeSpec};
//!
//! let registry = Arc::new(LocalModelRegistry::new("/models"));
//! let compiler = Compiler::new(registry, Arc::new(ReferenceTarget::new()));
//! let store = ArtifactStore::open("/artifacts")?;
//!
//! let shape = ShapeSpec::new(1, 384)?;
//! let location = compiler.compile_and_save(&store, "sentence-transformers/all-MiniLM-L6-v2", shape)?;
//! println!("Artifact published at {}", location);
//! ```
pub mod artifact;
pub mod compiler;
pub mod config;
pub mod error;
pub mod registry;
pub mod shape;
pub mod store;
pub mod target;

// Re-export main types
pub use artifact::{
    payload_checksum, ArtifactIdentity, ArtifactLocation, ArtifactMetadata, CompiledArtifact,
    ARTIFACT_FORMAT_VERSION,
};
pub use compiler::Compiler;
pub use config::{RegistryConfig, StoreConfig};
pub use error::{CompileError, FailureKind, RegistryError, ShapeError, StoreError};
pub use registry::{
    LocalModelRegistry, Modality, ModelDefinition, ModelRegistry, Pooling, StaticModelRegistry,
};
pub use shape::{RequestShape, ShapeSpec};
pub use store::{ArtifactStore, StoredArtifact};
pub use target::reference::{ProgramHeader, ReferenceProgram, ReferenceTarget, REFERENCE_TARGET_NAME};
pub use target::CompileTarget;
