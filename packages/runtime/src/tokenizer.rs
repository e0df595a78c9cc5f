//! Tokenizers
//!
//! Tokenization is an external collaborator: the engine only needs text turned
//! into token ids, without truncation (oversized inputs must surface as a
//! shape mismatch, not be cut silently).
//!
//! - [`WordTokenizer`] - dependency-free word-level tokenizer with `[CLS]`/`[SEP]`
//! - `HfTokenizer` - HuggingFace `tokenizer.json` adapter (feature `hf-tokenizer`)

use crate::error::TokenizerError;
use xxhash_rust::xxh64::xxh64;

/// Turns text into token ids
pub trait Tokenizer: Send + Sync {
    /// Encode one input, including any special tokens the model expects
    fn encode(&self, text: &str) -> Result<Vec<u32>, TokenizerError>;

    /// Id used to right-pad sequences up to the compiled length
    fn pad_token_id(&self) -> u32;
}

pub const PAD_TOKEN_ID: u32 = 0;
pub const UNK_TOKEN_ID: u32 = 1;
pub const CLS_TOKEN_ID: u32 = 2;
pub const SEP_TOKEN_ID: u32 = 3;
const FIRST_WORD_ID: u32 = 4;

/// Word-level tokenizer hashing words into a fixed vocabulary.
///
/// Splits on whitespace, emits punctuation as separate tokens and wraps the
/// sequence in `[CLS] ... [SEP]`, so `"I like to eat apples"` encodes to 7 ids.
#[derive(Debug, Clone)]
pub struct WordTokenizer {
    vocab_size: u32,
    lowercase: bool,
}

impl WordTokenizer {
    pub fn new(vocab_size: usize) -> Result<Self, TokenizerError> {
        if vocab_size <= FIRST_WORD_ID as usize {
            return Err(TokenizerError::Config(format!(
                "vocab_size must exceed {} reserved ids, got {}",
                FIRST_WORD_ID, vocab_size
            )));
        }

        let vocab_size = u32::try_from(vocab_size).map_err(|_| {
            TokenizerError::Config(format!("vocab_size {} does not fit in u32", vocab_size))
        })?;

        Ok(Self {
            vocab_size,
            lowercase: true,
        })
    }

    pub fn case_sensitive(mut self) -> Self {
        self.lowercase = false;
        self
    }

    fn word_id(&self, word: &str) -> u32 {
        let buckets = u64::from(self.vocab_size - FIRST_WORD_ID);
        let hash = if self.lowercase {
            xxh64(word.to_lowercase().as_bytes(), 0)
        } else {
            xxh64(word.as_bytes(), 0)
        };
        FIRST_WORD_ID + (hash % buckets) as u32
    }
}

impl Tokenizer for WordTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>, TokenizerError> {
        let mut ids = vec![CLS_TOKEN_ID];

        for word in text.split_whitespace() {
            let mut start = 0;
            for (i, c) in word.char_indices() {
                if c.is_ascii_punctuation() {
                    if start < i {
                        ids.push(self.word_id(&word[start..i]));
                    }
                    ids.push(self.word_id(&word[i..i + c.len_utf8()]));
                    start = i + c.len_utf8();
                }
            }
            if start < word.len() {
                ids.push(self.word_id(&word[start..]));
            }
        }

        ids.push(SEP_TOKEN_ID);
        Ok(ids)
    }

    fn pad_token_id(&self) -> u32 {
        PAD_TOKEN_ID
    }
}

#[cfg(feature = "hf-tokenizer")]
pub use hf::HfTokenizer;

#[cfg(feature = "hf-tokenizer")]
mod hf {
    use super::Tokenizer;
    use crate::error::TokenizerError;
    use std::path::Path;

    /// Adapter over a HuggingFace `tokenizer.json`, with truncation and
    /// padding disabled
    pub struct HfTokenizer {
        inner: tokenizers::Tokenizer,
        pad_token_id: u32,
    }

    impl HfTokenizer {
        pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TokenizerError> {
            let path = path.as_ref();
            let mut inner = tokenizers::Tokenizer::from_file(path)
                .map_err(|e| TokenizerError::Load(format!("{}: {}", path.display(), e)))?;

            inner
                .with_truncation(None)
                .map_err(|e| TokenizerError::Load(e.to_string()))?;
            inner.with_padding(None);

            let pad_token_id = inner.token_to_id("[PAD]").unwrap_or(0);
            Ok(Self {
                inner,
                pad_token_id,
            })
        }
    }

    impl Tokenizer for HfTokenizer {
        fn encode(&self, text: &str) -> Result<Vec<u32>, TokenizerError> {
            let encoding = self
                .inner
                .encode(text, true)
                .map_err(|e| TokenizerError::Encode(e.to_string()))?;
            Ok(encoding.get_ids().to_vec())
        }

        fn pad_token_id(&self) -> u32 {
            self.pad_token_id
        }
    }
}
