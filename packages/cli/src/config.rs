//! CLI configuration file
//!
//! A single JSON document aggregating the per-crate configs. Every section is
//! optional:
//!
//! ```json
//! {
//!   "store": { "root": "/var/lib/shapeforge/artifacts" },
//!   "registry": { "root": "/var/lib/shapeforge/models" },
//!   "engine": { "queue_timeout_ms": 5000, "result_cache_capacity": 256 },
//!   "tokenizer": { "case_sensitive": false }
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use shapeforge_core::{RegistryConfig, StoreConfig};
use shapeforge_runtime::EngineConfig;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForgeConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub tokenizer: TokenizerConfig,
}

/// Tokenizer selection for `embed`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizerConfig {
    /// HuggingFace `tokenizer.json` (requires the `hf-tokenizer` feature).
    /// Without it the word tokenizer sized to the artifact's vocabulary is used.
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default)]
    pub case_sensitive: bool,
}

impl ForgeConfig {
    /// Load from `path`, or defaults when no file is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                serde_json::from_str::<Self>(&content)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))?
            }
            None => Self::default(),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.engine
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid engine configuration: {}", e))?;

        if let Some(path) = &self.tokenizer.path {
            if !cfg!(feature = "hf-tokenizer") {
                anyhow::bail!(
                    "tokenizer.path ({}) requires building with the hf-tokenizer feature",
                    path.display()
                );
            }
        }

        Ok(())
    }
}
