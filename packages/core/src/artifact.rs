//! Compiled Artifacts
//!
//! A [`CompiledArtifact`] is the immutable output of one compilation: an opaque
//! payload the target runtime executes, plus the identity it was compiled
//! from. On disk it is split into the payload and an [`ArtifactMetadata`]
//! sidecar; the sidecar's checksum ties the two together.

use crate::shape::ShapeSpec;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use xxhash_rust::xxh64::xxh64;

/// Sidecar metadata format version written by this crate
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Checksum of a payload as stored in metadata (xxh64, lowercase hex)
pub fn payload_checksum(payload: &[u8]) -> String {
    format!("{:016x}", xxh64(payload, 0))
}

/// Sidecar metadata stored next to every payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub format_version: u32,
    pub model_identifier: String,
    pub shape: ShapeSpec,
    /// Compile target the payload was lowered for
    pub target: String,
    pub compiler_version: String,
    /// Digest of the source model definition (staleness detection)
    pub source_digest: String,
    pub hidden_size: usize,
    pub vocab_size: usize,
    pub payload_len: u64,
    pub payload_checksum: String,
    pub created_at: DateTime<Utc>,
}

/// An immutable compiled model for one `(model_identifier, ShapeSpec)` pair
#[derive(Debug, Clone)]
pub struct CompiledArtifact {
    metadata: ArtifactMetadata,
    payload: Arc<[u8]>,
}

/// Identity of a compilation, everything except the payload
#[derive(Debug, Clone)]
pub struct ArtifactIdentity {
    pub model_identifier: String,
    pub shape: ShapeSpec,
    pub target: String,
    pub compiler_version: String,
    pub source_digest: String,
    pub hidden_size: usize,
    pub vocab_size: usize,
}

impl CompiledArtifact {
    /// Wrap a freshly lowered payload, stamping checksum and creation time
    pub fn new(identity: ArtifactIdentity, payload: Vec<u8>) -> Self {
        let metadata = ArtifactMetadata {
            format_version: ARTIFACT_FORMAT_VERSION,
            model_identifier: identity.model_identifier,
            shape: identity.shape,
            target: identity.target,
            compiler_version: identity.compiler_version,
            source_digest: identity.source_digest,
            hidden_size: identity.hidden_size,
            vocab_size: identity.vocab_size,
            payload_len: payload.len() as u64,
            payload_checksum: payload_checksum(&payload),
            created_at: Utc::now(),
        };

        Self {
            metadata,
            payload: payload.into(),
        }
    }

    /// Reassemble an artifact read back from storage. Callers verify the
    /// payload against the metadata first.
    pub(crate) fn from_parts(metadata: ArtifactMetadata, payload: Vec<u8>) -> Self {
        Self {
            metadata,
            payload: payload.into(),
        }
    }

    pub fn metadata(&self) -> &ArtifactMetadata {
        &self.metadata
    }

    pub fn model_identifier(&self) -> &str {
        &self.metadata.model_identifier
    }

    pub fn shape(&self) -> ShapeSpec {
        self.metadata.shape
    }

    pub fn target(&self) -> &str {
        &self.metadata.target
    }

    pub fn compiler_version(&self) -> &str {
        &self.metadata.compiler_version
    }

    pub fn source_digest(&self) -> &str {
        &self.metadata.source_digest
    }

    pub fn hidden_size(&self) -> usize {
        self.metadata.hidden_size
    }

    pub fn vocab_size(&self) -> usize {
        self.metadata.vocab_size
    }

    pub fn checksum(&self) -> &str {
        &self.metadata.payload_checksum
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.metadata.created_at
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Stable location token of a stored artifact.
///
/// Points at the bundle directory of a `(model_identifier, ShapeSpec)` key; it
/// stays valid across recompilation of the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactLocation(PathBuf);

impl ArtifactLocation {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl From<PathBuf> for ArtifactLocation {
    fn from(path: PathBuf) -> Self {
        Self(path)
    }
}

impl fmt::Display for ArtifactLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> ArtifactIdentity {
        ArtifactIdentity {
            model_identifier: "org/model".to_string(),
            shape: ShapeSpec::new(1, 16).unwrap(),
            target: "reference".to_string(),
            compiler_version: "0.1.0+reference/1".to_string(),
            source_digest: "abc".to_string(),
            hidden_size: 8,
            vocab_size: 64,
        }
    }

    #[test]
    fn test_new_stamps_checksum_and_length() {
        let artifact = CompiledArtifact::new(identity(), vec![1, 2, 3, 4]);
        assert_eq!(artifact.metadata().payload_len, 4);
        assert_eq!(artifact.checksum(), payload_checksum(&[1, 2, 3, 4]));
        assert_eq!(artifact.metadata().format_version, ARTIFACT_FORMAT_VERSION);
    }

    #[test]
    fn test_checksum_is_fixed_width_hex() {
        let checksum = payload_checksum(b"");
        assert_eq!(checksum.len(), 16);
        assert!(checksum.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(payload_checksum(b"a"), payload_checksum(b"b"));
    }

    #[test]
    fn test_metadata_requires_shape() {
        let artifact = CompiledArtifact::new(identity(), vec![0; 8]);
        let mut value = serde_json::to_value(artifact.metadata()).unwrap();
        value.as_object_mut().unwrap().remove("shape");
        assert!(serde_json::from_value::<ArtifactMetadata>(value).is_err());
    }
}
