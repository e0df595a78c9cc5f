//! Requests, padded batches and results
//!
//! The compiled computation only runs on its exact static shape, so every
//! request goes through three forms:
//!
//! 1. [`EmbeddingRequest`] - raw texts from the caller
//! 2. [`TokenBatch`] - ragged token ids, checked against the `ShapeSpec`
//! 3. [`PaddedBatch`] - right-padded to `sequence_length`, filled up to
//!    `batch_size` with all-padding rows, plus an attention mask
//!
//! Device output comes back at the compiled shape and is trimmed to the
//! caller's batch and each row's own token count in [`EmbeddingResult`].

use crate::error::TokenizerError;
use crate::tokenizer::Tokenizer;
use serde::{Deserialize, Serialize};
use shapeforge_core::{RequestShape, ShapeSpec};

/// Texts to embed in one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingRequest {
    text_inputs: Vec<String>,
    requested_batch_size: usize,
}

impl EmbeddingRequest {
    /// Request for `texts`; the batch size defaults to the number of texts
    pub fn new<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let text_inputs: Vec<String> = texts.into_iter().map(Into::into).collect();
        let requested_batch_size = text_inputs.len();
        Self {
            text_inputs,
            requested_batch_size,
        }
    }

    /// Declare a batch size; values below the text count are ignored
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.requested_batch_size = batch_size;
        self
    }

    pub fn text_inputs(&self) -> &[String] {
        &self.text_inputs
    }

    pub fn requested_batch_size(&self) -> usize {
        self.requested_batch_size
    }

    /// Batch dimension validated against the compiled shape
    pub fn effective_batch_size(&self) -> usize {
        self.requested_batch_size.max(self.text_inputs.len())
    }

    pub fn is_empty(&self) -> bool {
        self.text_inputs.is_empty()
    }
}

/// Tokenized request, one id sequence per text
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenBatch {
    sequences: Vec<Vec<u32>>,
    batch_size: usize,
}

impl TokenBatch {
    pub fn tokenize(
        tokenizer: &dyn Tokenizer,
        request: &EmbeddingRequest,
    ) -> Result<Self, TokenizerError> {
        let sequences = request
            .text_inputs()
            .iter()
            .map(|text| tokenizer.encode(text))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            sequences,
            batch_size: request.effective_batch_size(),
        })
    }

    pub fn from_sequences(sequences: Vec<Vec<u32>>) -> Self {
        let batch_size = sequences.len();
        Self {
            sequences,
            batch_size,
        }
    }

    pub fn sequences(&self) -> &[Vec<u32>] {
        &self.sequences
    }

    pub fn lengths(&self) -> Vec<usize> {
        self.sequences.iter().map(Vec::len).collect()
    }

    /// Actual dimensions, for validation against a `ShapeSpec`
    pub fn request_shape(&self) -> RequestShape {
        RequestShape::from_lengths(self.batch_size, self.sequences.iter().map(Vec::len))
    }

    /// Pad to `shape`. Callers check `shape.matches(..)` first; rows and
    /// positions beyond the shape are not representable.
    pub fn pad_to(&self, shape: ShapeSpec, pad_token_id: u32) -> PaddedBatch {
        let batch_size = shape.batch_size();
        let sequence_length = shape.sequence_length();

        let mut input_ids = vec![pad_token_id; batch_size * sequence_length];
        let mut attention_mask = vec![0u8; batch_size * sequence_length];

        for (row, sequence) in self.sequences.iter().take(batch_size).enumerate() {
            let offset = row * sequence_length;
            let len = sequence.len().min(sequence_length);
            input_ids[offset..offset + len].copy_from_slice(&sequence[..len]);
            attention_mask[offset..offset + len].fill(1);
        }

        PaddedBatch {
            batch_size,
            sequence_length,
            input_ids,
            attention_mask,
        }
    }
}

/// Fixed-shape device input, row-major `[batch_size, sequence_length]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaddedBatch {
    batch_size: usize,
    sequence_length: usize,
    input_ids: Vec<u32>,
    attention_mask: Vec<u8>,
}

impl PaddedBatch {
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    pub fn input_ids(&self) -> &[u32] {
        &self.input_ids
    }

    /// 1 for real tokens, 0 for padding
    pub fn attention_mask(&self) -> &[u8] {
        &self.attention_mask
    }

    /// Number of real tokens in `row`
    pub fn row_length(&self, row: usize) -> usize {
        let offset = row * self.sequence_length;
        self.attention_mask[offset..offset + self.sequence_length]
            .iter()
            .filter(|&&m| m == 1)
            .count()
    }
}

/// Raw device output at the compiled shape
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceOutput {
    /// `[batch_size][sequence_length][hidden_dim]`
    pub token_embeddings: Vec<Vec<Vec<f32>>>,
    /// `[batch_size][hidden_dim]`
    pub sentence_embedding: Vec<Vec<f32>>,
}

/// Embeddings for the caller's inputs, padding removed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingResult {
    /// One row per input text, each trimmed to that text's token count
    pub token_embeddings: Vec<Vec<Vec<f32>>>,
    /// One vector per input text
    pub sentence_embedding: Vec<Vec<f32>>,
    pub hidden_dim: usize,
}

impl EmbeddingResult {
    /// Trim device output to `lengths.len()` rows of `lengths[i]` tokens
    pub(crate) fn trim(output: DeviceOutput, lengths: &[usize], hidden_dim: usize) -> Self {
        let token_embeddings = output
            .token_embeddings
            .into_iter()
            .zip(lengths)
            .map(|(mut row, &len)| {
                row.truncate(len);
                row
            })
            .collect();

        let sentence_embedding = output
            .sentence_embedding
            .into_iter()
            .take(lengths.len())
            .collect();

        Self {
            token_embeddings,
            sentence_embedding,
            hidden_dim,
        }
    }

    pub fn batch_len(&self) -> usize {
        self.sentence_embedding.len()
    }

    /// `[batch, longest sequence, hidden_dim]`
    pub fn token_embeddings_shape(&self) -> [usize; 3] {
        let longest = self
            .token_embeddings
            .iter()
            .map(Vec::len)
            .max()
            .unwrap_or(0);
        [self.token_embeddings.len(), longest, self.hidden_dim]
    }

    /// `[batch, hidden_dim]`
    pub fn sentence_embedding_shape(&self) -> [usize; 2] {
        [self.sentence_embedding.len(), self.hidden_dim]
    }
}
