//! Reference CPU target
//!
//! Lowers text-embedding graphs into a self-describing program:
//!
//! ```text
//! "SFRP" | header_len: u32 LE | header JSON | token table f32 LE | position table f32 LE
//! ```
//!
//! The token table is `vocab_size x hidden_size`, the position table is
//! `sequence_length x hidden_size`. Weights are derived from the model
//! identifier, so every shape compiled from one model shares them and the
//! program for a given `(definition, shape)` is byte-identical across runs.

use crate::registry::{ModelDefinition, Pooling};
use crate::shape::ShapeSpec;
use crate::target::CompileTarget;
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::xxh64;

pub const REFERENCE_TARGET_NAME: &str = "reference-cpu";
const REFERENCE_TARGET_VERSION: &str = "1";

const PROGRAM_MAGIC: &[u8; 4] = b"SFRP";
const PROGRAM_FORMAT_VERSION: u32 = 1;

/// Operators the reference runtime can execute
pub const SUPPORTED_OPERATIONS: &[&str] = &["embedding", "position_embedding", "tanh", "pooling"];

/// Upper bound on `batch_size * sequence_length` for one execution
pub const MAX_TOKEN_SLOTS: usize = 1 << 20;

/// Upper bound on `vocab_size * hidden_size` weights in the token table
pub const MAX_TABLE_WEIGHTS: usize = 1 << 26;

const TOKEN_TABLE: u8 = 0;
const POSITION_TABLE: u8 = 1;
const POSITION_SCALE: f32 = 0.1;

/// Program header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramHeader {
    pub format_version: u32,
    pub model_identifier: String,
    pub batch_size: usize,
    pub sequence_length: usize,
    pub hidden_size: usize,
    pub vocab_size: usize,
    pub pooling: Pooling,
    pub normalize: bool,
}

/// Decoded reference program
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceProgram {
    pub header: ProgramHeader,
    pub token_table: Vec<f32>,
    pub position_table: Vec<f32>,
}

impl ReferenceProgram {
    /// Serialize into the payload format
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let header = serde_json::to_vec(&self.header).unwrap_or_default();
        let floats = self.token_table.len() + self.position_table.len();

        let mut out = Vec::with_capacity(8 + header.len() + floats * 4);
        out.extend_from_slice(PROGRAM_MAGIC);
        out.extend_from_slice(&(header.len() as u32).to_le_bytes());
        out.extend_from_slice(&header);
        out.extend(to_blob(&self.token_table));
        out.extend(to_blob(&self.position_table));
        out
    }

    /// Parse a payload produced by [`ReferenceProgram::encode`]
    pub fn decode(bytes: &[u8]) -> Result<Self, String> {
        if bytes.len() < 8 || &bytes[..4] != PROGRAM_MAGIC {
            return Err("payload is not a reference program".to_string());
        }

        let header_len = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        let header_end = 8usize
            .checked_add(header_len)
            .filter(|end| *end <= bytes.len())
            .ok_or_else(|| "program header is truncated".to_string())?;

        let header: ProgramHeader = serde_json::from_slice(&bytes[8..header_end])
            .map_err(|e| format!("invalid program header: {}", e))?;

        if header.format_version != PROGRAM_FORMAT_VERSION {
            return Err(format!(
                "unsupported program format version {}",
                header.format_version
            ));
        }

        let token_floats = table_weights(header.vocab_size, header.hidden_size)?;
        let position_floats = table_weights(header.sequence_length, header.hidden_size)?;
        let body = &bytes[header_end..];
        if body.len() != (token_floats + position_floats) * 4 {
            return Err(format!(
                "program body is {} bytes, expected {}",
                body.len(),
                (token_floats + position_floats) * 4
            ));
        }

        let (token_bytes, position_bytes) = body.split_at(token_floats * 4);
        Ok(Self {
            header,
            token_table: from_blob(token_bytes),
            position_table: from_blob(position_bytes),
        })
    }
}

/// Reference lowering backend
#[derive(Debug, Clone, Default)]
pub struct ReferenceTarget;

impl ReferenceTarget {
    pub fn new() -> Self {
        Self
    }
}

impl CompileTarget for ReferenceTarget {
    fn name(&self) -> &str {
        REFERENCE_TARGET_NAME
    }

    fn version(&self) -> &str {
        REFERENCE_TARGET_VERSION
    }

    fn lower(&self, definition: &ModelDefinition, shape: ShapeSpec) -> Result<Vec<u8>, String> {
        if let Some(op) = definition
            .operations
            .iter()
            .find(|op| !SUPPORTED_OPERATIONS.contains(&op.as_str()))
        {
            return Err(format!(
                "unsupported operator '{}' (supported: {})",
                op,
                SUPPORTED_OPERATIONS.join(", ")
            ));
        }

        if shape.sequence_length() > definition.max_position_embeddings {
            return Err(format!(
                "sequence_length {} exceeds max_position_embeddings {}",
                shape.sequence_length(),
                definition.max_position_embeddings
            ));
        }

        if shape.token_slots() > MAX_TOKEN_SLOTS {
            return Err(format!(
                "shape needs {} token slots, device limit is {}",
                shape.token_slots(),
                MAX_TOKEN_SLOTS
            ));
        }

        let hidden = definition.hidden_size;
        let token_weights = table_weights(definition.vocab_size, hidden)?;
        let position_weights = table_weights(shape.sequence_length(), hidden)?;
        let seed = xxh64(definition.identifier.as_bytes(), 0);

        let token_table = (0..token_weights)
            .map(|i| weight(seed, TOKEN_TABLE, i / hidden, i % hidden))
            .collect();
        let position_table = (0..position_weights)
            .map(|i| weight(seed, POSITION_TABLE, i / hidden, i % hidden) * POSITION_SCALE)
            .collect();

        let program = ReferenceProgram {
            header: ProgramHeader {
                format_version: PROGRAM_FORMAT_VERSION,
                model_identifier: definition.identifier.clone(),
                batch_size: shape.batch_size(),
                sequence_length: shape.sequence_length(),
                hidden_size: hidden,
                vocab_size: definition.vocab_size,
                pooling: definition.pooling,
                normalize: definition.normalize,
            },
            token_table,
            position_table,
        };

        Ok(program.encode())
    }
}

/// Weights in a `rows x hidden` table, within `MAX_TABLE_WEIGHTS`
fn table_weights(rows: usize, hidden: usize) -> Result<usize, String> {
    rows.checked_mul(hidden)
        .filter(|&weights| weights <= MAX_TABLE_WEIGHTS)
        .ok_or_else(|| {
            format!(
                "table of {} x {} weights exceeds the limit of {}",
                rows, hidden, MAX_TABLE_WEIGHTS
            )
        })
}

/// Deterministic weight in [-1, 1)
fn weight(seed: u64, table: u8, row: usize, col: usize) -> f32 {
    let mut key = [0u8; 17];
    key[0] = table;
    key[1..9].copy_from_slice(&(row as u64).to_le_bytes());
    key[9..17].copy_from_slice(&(col as u64).to_le_bytes());

    // Top 24 bits are exactly representable in f32
    let bits = (xxh64(&key, seed) >> 40) as f32;
    bits / (1u32 << 24) as f32 * 2.0 - 1.0
}

fn to_blob(values: &[f32]) -> impl Iterator<Item = u8> + '_ {
    values.iter().flat_map(|f| f.to_le_bytes())
}

fn from_blob(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Modality;

    fn definition() -> ModelDefinition {
        ModelDefinition::text_encoder("org/tiny", 8, 64, 32)
    }

    #[test]
    fn test_lowering_is_deterministic() {
        let target = ReferenceTarget::new();
        let shape = ShapeSpec::new(2, 16).unwrap();
        let first = target.lower(&definition(), shape).unwrap();
        let second = target.lower(&definition(), shape).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_decode_round_trip() {
        let target = ReferenceTarget::new();
        let shape = ShapeSpec::new(2, 16).unwrap();
        let payload = target.lower(&definition(), shape).unwrap();

        let program = ReferenceProgram::decode(&payload).unwrap();
        assert_eq!(program.header.batch_size, 2);
        assert_eq!(program.header.sequence_length, 16);
        assert_eq!(program.token_table.len(), 64 * 8);
        assert_eq!(program.position_table.len(), 16 * 8);
        assert!(program
            .token_table
            .iter()
            .all(|w| (-1.0..1.0).contains(w)));
        assert_eq!(program.encode(), payload);
    }

    #[test]
    fn test_shapes_share_position_rows() {
        let target = ReferenceTarget::new();
        let short = ReferenceProgram::decode(
            &target.lower(&definition(), ShapeSpec::new(1, 4).unwrap()).unwrap(),
        )
        .unwrap();
        let long = ReferenceProgram::decode(
            &target.lower(&definition(), ShapeSpec::new(1, 16).unwrap()).unwrap(),
        )
        .unwrap();

        assert_eq!(short.token_table, long.token_table);
        assert_eq!(short.position_table[..], long.position_table[..4 * 8]);
    }

    #[test]
    fn test_rejects_unsupported_operator() {
        let target = ReferenceTarget::new();
        let definition = definition()
            .with_modality(Modality::Text)
            .with_operations(["embedding", "conv2d"]);
        let err = target
            .lower(&definition, ShapeSpec::new(1, 8).unwrap())
            .unwrap_err();
        assert!(err.starts_with("unsupported operator 'conv2d'"), "{err}");
    }

    #[test]
    fn test_rejects_sequence_beyond_positions() {
        let target = ReferenceTarget::new();
        let err = target
            .lower(&definition(), ShapeSpec::new(1, 33).unwrap())
            .unwrap_err();
        assert_eq!(err, "sequence_length 33 exceeds max_position_embeddings 32");
    }

    #[test]
    fn test_rejects_oversized_token_table() {
        let target = ReferenceTarget::new();
        let huge = ModelDefinition::text_encoder("org/huge", 1024, 250_000, 512);
        let err = target
            .lower(&huge, ShapeSpec::new(1, 8).unwrap())
            .unwrap_err();
        assert!(err.starts_with("table of 250000 x 1024 weights"), "{err}");

        let overflow = ModelDefinition::text_encoder("org/overflow", usize::MAX, 2, 512);
        assert!(target
            .lower(&overflow, ShapeSpec::new(1, 8).unwrap())
            .is_err());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(ReferenceProgram::decode(b"nope").is_err());

        let target = ReferenceTarget::new();
        let mut payload = target
            .lower(&definition(), ShapeSpec::new(1, 4).unwrap())
            .unwrap();
        payload.truncate(payload.len() - 4);
        assert!(ReferenceProgram::decode(&payload)
            .unwrap_err()
            .contains("program body"));
    }
}
