/// Configuration for artifact storage and model resolution
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use xxhash_rust::xxh64::xxh64;

/// Environment variable overriding the ShapeForge home directory
pub const HOME_ENV: &str = "SHAPEFORGE_HOME";

/// Resolve the ShapeForge home directory
///
/// Checks `SHAPEFORGE_HOME` first, then falls back to `~/.shapeforge/`
/// (`%USERPROFILE%\.shapeforge\` on Windows).
pub fn shapeforge_home() -> Result<PathBuf, std::io::Error> {
    if let Ok(path) = std::env::var(HOME_ENV) {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }

    let home_dir = dirs::home_dir().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Cannot determine home directory",
        )
    })?;

    Ok(home_dir.join(".shapeforge"))
}

/// Artifact store configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store root; defaults to `<home>/artifacts`
    #[serde(default)]
    pub root: Option<PathBuf>,
}

impl StoreConfig {
    pub fn resolve_root(&self) -> Result<PathBuf, std::io::Error> {
        match &self.root {
            Some(root) => Ok(root.clone()),
            None => Ok(shapeforge_home()?.join("artifacts")),
        }
    }
}

/// Local model registry configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Registry root; defaults to `<home>/models`
    #[serde(default)]
    pub root: Option<PathBuf>,
}

impl RegistryConfig {
    pub fn resolve_root(&self) -> Result<PathBuf, std::io::Error> {
        match &self.root {
            Some(root) => Ok(root.clone()),
            None => Ok(shapeforge_home()?.join("models")),
        }
    }
}

/// Sanitize a model identifier into a filesystem-safe directory name
/// Replaces all filesystem-unsafe characters with hyphens
/// Filters out control characters for additional safety
pub(crate) fn sanitize_model_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '<' | '>' | '|' | '"' => '-',
            _ => c,
        })
        .collect();

    // "." and ".." would escape the store layout
    match sanitized.as_str() {
        "" | "." | ".." => format!("_{}", sanitized.replace('.', "-")),
        _ => sanitized,
    }
}

/// Store directory name for a model identifier.
///
/// Sanitizing is lossy (`org/model` and `org:model` both become
/// `org-model`), so the name carries a hash of the raw identifier.
pub(crate) fn model_dir_name(identifier: &str) -> String {
    let hash = (xxh64(identifier.as_bytes(), 0) >> 32) as u32;
    format!("{}-{:08x}", sanitize_model_name(identifier), hash)
}
