//! Error Types
//!
//! Each stage of the artifact lifecycle has its own error enum. Every variant
//! carries the identifiers a caller needs to decide what to do next (model id,
//! location, expected vs. actual shape). Nothing here is retried automatically.

use crate::registry::Modality;
use crate::shape::ShapeSpec;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification shared by every error in the workspace.
///
/// Used by entry points to map failures onto stable exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    InvalidShape,
    SourceModelNotFound,
    UnsupportedModelKind,
    CompilationError,
    WriteError,
    NotFound,
    CorruptArtifact,
    ShapeMismatch,
    ExecutionError,
    Timeout,
    Other,
}

impl FailureKind {
    /// Process exit code for this failure kind
    pub fn exit_code(self) -> u8 {
        match self {
            FailureKind::Other => 1,
            FailureKind::InvalidShape => 2,
            FailureKind::SourceModelNotFound => 3,
            FailureKind::UnsupportedModelKind => 4,
            FailureKind::CompilationError => 5,
            FailureKind::WriteError => 6,
            FailureKind::NotFound => 7,
            FailureKind::CorruptArtifact => 8,
            FailureKind::ShapeMismatch => 9,
            FailureKind::ExecutionError => 10,
            FailureKind::Timeout => 11,
        }
    }
}

/// Shape construction errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    #[error(
        "Invalid shape: batch_size={batch_size}, sequence_length={sequence_length} (both must be positive)"
    )]
    InvalidShape {
        batch_size: usize,
        sequence_length: usize,
    },
}

impl ShapeError {
    pub fn kind(&self) -> FailureKind {
        FailureKind::InvalidShape
    }
}

/// Artifact persistence errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Writing or publishing an artifact failed; nothing partial was published
    #[error("Failed to write artifact at {path}: {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No published artifact at the location
    #[error("Artifact not found at {path}")]
    NotFound { path: PathBuf },

    /// Metadata and payload are missing or inconsistent
    #[error("Corrupt artifact at {path}: {reason}")]
    CorruptArtifact { path: PathBuf, reason: String },

    /// Reading an existing artifact failed for a reason other than absence
    #[error("Failed to read artifact at {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::WriteError {
            path: path.into(),
            source,
        }
    }

    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptArtifact {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadError {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            StoreError::WriteError { .. } => FailureKind::WriteError,
            StoreError::NotFound { .. } => FailureKind::NotFound,
            StoreError::CorruptArtifact { .. } => FailureKind::CorruptArtifact,
            StoreError::ReadError { .. } => FailureKind::Other,
        }
    }
}

/// Model registry lookup errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Model '{identifier}' not found in registry at {path}")]
    NotFound { identifier: String, path: PathBuf },

    #[error("Model '{identifier}' not registered")]
    NotRegistered { identifier: String },

    #[error("Invalid model definition for '{identifier}': {reason}")]
    InvalidDefinition { identifier: String, reason: String },
}

/// Compilation errors
#[derive(Error, Debug)]
pub enum CompileError {
    /// The registry could not resolve the source model
    #[error("Source model '{model_identifier}' not found: {reason}")]
    SourceModelNotFound {
        model_identifier: String,
        reason: String,
    },

    /// The model's modality cannot be compiled (text models only)
    #[error("Model '{model_identifier}' has unsupported modality '{modality}': only text embedding models can be compiled")]
    UnsupportedModelKind {
        model_identifier: String,
        modality: Modality,
    },

    /// Target-specific lowering failed; `diagnostic` is the target's message as-is
    #[error("Compilation of '{model_identifier}' for target '{target}' at [{shape}] failed: {diagnostic}")]
    CompilationError {
        model_identifier: String,
        shape: ShapeSpec,
        target: String,
        diagnostic: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CompileError {
    pub fn kind(&self) -> FailureKind {
        match self {
            CompileError::SourceModelNotFound { .. } => FailureKind::SourceModelNotFound,
            CompileError::UnsupportedModelKind { .. } => FailureKind::UnsupportedModelKind,
            CompileError::CompilationError { .. } => FailureKind::CompilationError,
            CompileError::Store(e) => e.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct() {
        let kinds = [
            FailureKind::Other,
            FailureKind::InvalidShape,
            FailureKind::SourceModelNotFound,
            FailureKind::UnsupportedModelKind,
            FailureKind::CompilationError,
            FailureKind::WriteError,
            FailureKind::NotFound,
            FailureKind::CorruptArtifact,
            FailureKind::ShapeMismatch,
            FailureKind::ExecutionError,
            FailureKind::Timeout,
        ];
        let mut codes: Vec<u8> = kinds.iter().map(|k| k.exit_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
        assert!(!codes.contains(&0));
    }

    #[test]
    fn test_compile_error_carries_identifiers() {
        let err = CompileError::CompilationError {
            model_identifier: "org/model".to_string(),
            shape: ShapeSpec::new(1, 384).unwrap(),
            target: "reference".to_string(),
            diagnostic: "unsupported operator 'conv2d'".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("org/model"));
        assert!(message.contains("sequence_length=384"));
        assert!(message.ends_with("unsupported operator 'conv2d'"));
        assert_eq!(err.kind(), FailureKind::CompilationError);
    }

    #[test]
    fn test_store_error_kind_passes_through_compile_error() {
        let err: CompileError = StoreError::not_found("/tmp/missing").into();
        assert_eq!(err.kind(), FailureKind::NotFound);
    }
}
