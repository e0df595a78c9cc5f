//! Model Registry
//!
//! Resolves a source model identifier (e.g. `sentence-transformers/all-MiniLM-L6-v2`)
//! into the [`ModelDefinition`] a compile target lowers. The registry is an
//! external collaborator; two implementations ship here:
//!
//! - [`LocalModelRegistry`] reads `<root>/<sanitized id>/config.json`
//! - [`StaticModelRegistry`] holds definitions in memory

use crate::config::{sanitize_model_name, RegistryConfig};
use crate::error::RegistryError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use xxhash_rust::xxh64::xxh64;

const MODEL_CONFIG_FILE: &str = "config.json";

/// Input modality of a model's computation graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Text,
    Vision,
    Audio,
    Multimodal,
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Modality::Text => "text",
            Modality::Vision => "vision",
            Modality::Audio => "audio",
            Modality::Multimodal => "multimodal",
        };
        f.write_str(name)
    }
}

/// How token embeddings are reduced to a sentence embedding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pooling {
    /// Average over non-padding tokens
    #[default]
    Mean,
    /// First token (`[CLS]`)
    Cls,
}

/// Source model definition resolved from a registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDefinition {
    /// Filled in from the lookup key when absent on disk
    #[serde(default)]
    pub identifier: String,

    #[serde(default = "default_modality")]
    pub modality: Modality,

    #[serde(default = "default_architecture")]
    pub architecture: String,

    pub hidden_size: usize,

    pub vocab_size: usize,

    /// Longest sequence the model's position table covers
    pub max_position_embeddings: usize,

    #[serde(default)]
    pub pooling: Pooling,

    /// L2-normalize sentence embeddings
    #[serde(default = "default_normalize")]
    pub normalize: bool,

    /// Operators in the computation graph, checked by the compile target
    #[serde(default = "default_operations")]
    pub operations: Vec<String>,
}

fn default_modality() -> Modality {
    Modality::Text
}

fn default_architecture() -> String {
    "bert".to_string()
}

fn default_normalize() -> bool {
    true
}

fn default_operations() -> Vec<String> {
    ["embedding", "position_embedding", "tanh", "pooling"]
        .iter()
        .map(|op| op.to_string())
        .collect()
}

impl ModelDefinition {
    /// A text encoder with the default operator set
    pub fn text_encoder(
        identifier: impl Into<String>,
        hidden_size: usize,
        vocab_size: usize,
        max_position_embeddings: usize,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            modality: Modality::Text,
            architecture: default_architecture(),
            hidden_size,
            vocab_size,
            max_position_embeddings,
            pooling: Pooling::Mean,
            normalize: true,
            operations: default_operations(),
        }
    }

    pub fn with_modality(mut self, modality: Modality) -> Self {
        self.modality = modality;
        self
    }

    pub fn with_pooling(mut self, pooling: Pooling) -> Self {
        self.pooling = pooling;
        self
    }

    pub fn with_operations<I, S>(mut self, operations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.operations = operations.into_iter().map(Into::into).collect();
        self
    }

    /// Stable digest of the definition, recorded in artifact metadata
    pub fn digest(&self) -> String {
        // Field order is fixed by the struct, so the JSON form is canonical
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        format!("{:016x}", xxh64(&canonical, 0))
    }

    /// Validate dimensions
    pub fn validate(&self) -> Result<(), String> {
        if self.identifier.is_empty() {
            return Err("identifier cannot be empty".to_string());
        }

        if self.hidden_size == 0 {
            return Err("hidden_size must be greater than 0".to_string());
        }

        if self.vocab_size == 0 {
            return Err("vocab_size must be greater than 0".to_string());
        }

        if self.max_position_embeddings == 0 {
            return Err("max_position_embeddings must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// Resolves model identifiers into definitions
pub trait ModelRegistry: Send + Sync {
    fn resolve(&self, identifier: &str) -> Result<ModelDefinition, RegistryError>;
}

/// Registry backed by a directory of `config.json` files
#[derive(Debug, Clone)]
pub struct LocalModelRegistry {
    root: PathBuf,
}

impl LocalModelRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_config(config: &RegistryConfig) -> Result<Self, std::io::Error> {
        Ok(Self::new(config.resolve_root()?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory a model's definition is read from
    pub fn model_dir(&self, identifier: &str) -> PathBuf {
        self.root.join(sanitize_model_name(identifier))
    }
}

impl ModelRegistry for LocalModelRegistry {
    fn resolve(&self, identifier: &str) -> Result<ModelDefinition, RegistryError> {
        let path = self.model_dir(identifier).join(MODEL_CONFIG_FILE);

        let raw = std::fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => RegistryError::NotFound {
                identifier: identifier.to_string(),
                path: path.clone(),
            },
            _ => RegistryError::InvalidDefinition {
                identifier: identifier.to_string(),
                reason: format!("cannot read {}: {}", path.display(), e),
            },
        })?;

        let mut definition: ModelDefinition =
            serde_json::from_slice(&raw).map_err(|e| RegistryError::InvalidDefinition {
                identifier: identifier.to_string(),
                reason: e.to_string(),
            })?;

        if definition.identifier.is_empty() {
            definition.identifier = identifier.to_string();
        }

        definition
            .validate()
            .map_err(|reason| RegistryError::InvalidDefinition {
                identifier: identifier.to_string(),
                reason,
            })?;

        tracing::debug!("Resolved model '{}' from {}", identifier, path.display());
        Ok(definition)
    }
}

/// In-memory registry
#[derive(Debug, Clone, Default)]
pub struct StaticModelRegistry {
    models: HashMap<String, ModelDefinition>,
}

impl StaticModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, definition: ModelDefinition) -> Self {
        self.insert(definition);
        self
    }

    pub fn insert(&mut self, definition: ModelDefinition) {
        self.models.insert(definition.identifier.clone(), definition);
    }
}

impl ModelRegistry for StaticModelRegistry {
    fn resolve(&self, identifier: &str) -> Result<ModelDefinition, RegistryError> {
        self.models
            .get(identifier)
            .cloned()
            .ok_or_else(|| RegistryError::NotRegistered {
                identifier: identifier.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_local_registry_resolves_config() {
        let temp = TempDir::new().unwrap();
        let registry = LocalModelRegistry::new(temp.path());
        let dir = registry.model_dir("org/minilm");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(MODEL_CONFIG_FILE),
            r#"{"hidden_size": 384, "vocab_size": 30522, "max_position_embeddings": 512}"#,
        )
        .unwrap();

        let definition = registry.resolve("org/minilm").unwrap();
        assert_eq!(definition.identifier, "org/minilm");
        assert_eq!(definition.modality, Modality::Text);
        assert_eq!(definition.pooling, Pooling::Mean);
        assert!(definition.normalize);
        assert_eq!(definition.hidden_size, 384);
    }

    #[test]
    fn test_local_registry_missing_and_invalid() {
        let temp = TempDir::new().unwrap();
        let registry = LocalModelRegistry::new(temp.path());

        assert!(matches!(
            registry.resolve("org/absent"),
            Err(RegistryError::NotFound { .. })
        ));

        let dir = registry.model_dir("org/broken");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(MODEL_CONFIG_FILE),
            r#"{"hidden_size": 0, "vocab_size": 10, "max_position_embeddings": 8}"#,
        )
        .unwrap();
        assert!(matches!(
            registry.resolve("org/broken"),
            Err(RegistryError::InvalidDefinition { .. })
        ));
    }

    #[test]
    fn test_static_registry() {
        let registry =
            StaticModelRegistry::new().with(ModelDefinition::text_encoder("org/m", 8, 64, 32));
        assert_eq!(registry.resolve("org/m").unwrap().hidden_size, 8);
        assert!(registry.resolve("org/other").is_err());
    }

    #[test]
    fn test_digest_tracks_definition_changes() {
        let a = ModelDefinition::text_encoder("org/m", 8, 64, 32);
        let b = a.clone().with_pooling(Pooling::Cls);
        assert_eq!(a.digest(), a.clone().digest());
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn test_modality_serializes_snake_case() {
        let json = serde_json::to_string(&Modality::Multimodal).unwrap();
        assert_eq!(json, "\"multimodal\"");
        assert_eq!(Modality::Vision.to_string(), "vision");
    }
}
