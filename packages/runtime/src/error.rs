/// Error types for the inference engine
use shapeforge_core::{FailureKind, RequestShape, ShapeSpec, StoreError};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Loading delegates to the artifact store and fails identically
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Request shape [{actual}] exceeds compiled shape [{expected}] of model '{model_identifier}'; recompile with a larger shape or split the request")]
    ShapeMismatch {
        model_identifier: String,
        expected: ShapeSpec,
        actual: RequestShape,
    },

    #[error("Execution of '{model_identifier}' failed on device '{device}': {message}")]
    ExecutionError {
        model_identifier: String,
        device: String,
        message: String,
    },

    #[error("Timed out after {waited:?} waiting for device '{device}' to run '{model_identifier}'")]
    Timeout {
        model_identifier: String,
        device: String,
        waited: Duration,
    },

    #[error("Session for '{model_identifier}' is not loaded")]
    NotLoaded { model_identifier: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Tokenization failed: {0}")]
    Tokenization(#[from] TokenizerError),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}

impl EngineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            EngineError::Store(e) => e.kind(),
            EngineError::ShapeMismatch { .. } => FailureKind::ShapeMismatch,
            EngineError::ExecutionError { .. } => FailureKind::ExecutionError,
            EngineError::Timeout { .. } => FailureKind::Timeout,
            EngineError::NotLoaded { .. }
            | EngineError::InvalidRequest(_)
            | EngineError::Tokenization(_)
            | EngineError::ConfigError(_) => FailureKind::Other,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenizerError {
    #[error("Tokenizer loading failed: {0}")]
    Load(String),

    #[error("Encoding failed: {0}")]
    Encode(String),

    #[error("Invalid tokenizer configuration: {0}")]
    Config(String),
}

/// Failures reported by a device while running a program
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Program rejected: {0}")]
    ProgramRejected(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Device unavailable: {0}")]
    Unavailable(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Execution failed: {0}")]
    Execution(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
