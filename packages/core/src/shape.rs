//! Fixed input shapes
//!
//! A [`ShapeSpec`] is the exact `(batch_size, sequence_length)` an artifact was
//! compiled for. Requests are described by a [`RequestShape`] and must fit
//! inside the shape in both dimensions; smaller requests get padded up to it.

use crate::error::ShapeError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed input shape of a compiled artifact. Both dimensions are positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawShapeSpec")]
pub struct ShapeSpec {
    batch_size: usize,
    sequence_length: usize,
}

#[derive(Deserialize)]
struct RawShapeSpec {
    batch_size: usize,
    sequence_length: usize,
}

impl TryFrom<RawShapeSpec> for ShapeSpec {
    type Error = ShapeError;

    fn try_from(raw: RawShapeSpec) -> Result<Self, Self::Error> {
        ShapeSpec::new(raw.batch_size, raw.sequence_length)
    }
}

impl ShapeSpec {
    /// Create a shape, rejecting zero dimensions
    pub fn new(batch_size: usize, sequence_length: usize) -> Result<Self, ShapeError> {
        if batch_size == 0 || sequence_length == 0 {
            return Err(ShapeError::InvalidShape {
                batch_size,
                sequence_length,
            });
        }

        Ok(Self {
            batch_size,
            sequence_length,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    /// True iff the request fits: batch count and every tokenized sequence
    /// length are within the compiled dimensions.
    pub fn matches(&self, request: &RequestShape) -> bool {
        request.batch_size <= self.batch_size && request.sequence_length <= self.sequence_length
    }

    /// Directory-safe key used by the artifact store (`b1_s384`)
    pub fn key(&self) -> String {
        format!("b{}_s{}", self.batch_size, self.sequence_length)
    }

    /// Total number of token slots in one execution
    pub fn token_slots(&self) -> usize {
        self.batch_size * self.sequence_length
    }
}

impl fmt::Display for ShapeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "batch_size={}, sequence_length={}",
            self.batch_size, self.sequence_length
        )
    }
}

/// Actual dimensions of an incoming request after tokenization.
///
/// `sequence_length` is the longest tokenized input in the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RequestShape {
    pub batch_size: usize,
    pub sequence_length: usize,
}

impl RequestShape {
    /// Shape of a batch given its declared size and per-input token counts
    pub fn from_lengths<I>(batch_size: usize, lengths: I) -> Self
    where
        I: IntoIterator<Item = usize>,
    {
        Self {
            batch_size,
            sequence_length: lengths.into_iter().max().unwrap_or(0),
        }
    }
}

impl fmt::Display for RequestShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "batch_size={}, sequence_length={}",
            self.batch_size, self.sequence_length
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_zero_dimensions() {
        assert_eq!(
            ShapeSpec::new(0, 384),
            Err(ShapeError::InvalidShape {
                batch_size: 0,
                sequence_length: 384
            })
        );
        assert!(ShapeSpec::new(1, 0).is_err());
        assert!(ShapeSpec::new(1, 1).is_ok());
    }

    #[test]
    fn test_matches_within_and_at_bounds() {
        let shape = ShapeSpec::new(2, 8).unwrap();

        assert!(shape.matches(&RequestShape::from_lengths(1, [3])));
        assert!(shape.matches(&RequestShape::from_lengths(2, [8, 5])));
        assert!(!shape.matches(&RequestShape::from_lengths(3, [1, 1, 1])));
        assert!(!shape.matches(&RequestShape::from_lengths(1, [9])));
    }

    #[test]
    fn test_key_and_display() {
        let shape = ShapeSpec::new(1, 384).unwrap();
        assert_eq!(shape.key(), "b1_s384");
        assert_eq!(shape.to_string(), "batch_size=1, sequence_length=384");
        assert_eq!(shape.token_slots(), 384);
    }

    #[test]
    fn test_deserialize_validates() {
        let shape: ShapeSpec =
            serde_json::from_str(r#"{"batch_size":4,"sequence_length":128}"#).unwrap();
        assert_eq!(shape, ShapeSpec::new(4, 128).unwrap());

        let invalid = serde_json::from_str::<ShapeSpec>(r#"{"batch_size":0,"sequence_length":128}"#);
        assert!(invalid.is_err());

        let missing = serde_json::from_str::<ShapeSpec>(r#"{"batch_size":1}"#);
        assert!(missing.is_err());
    }

    #[test]
    fn test_request_shape_of_empty_batch() {
        let request = RequestShape::from_lengths(0, std::iter::empty());
        assert_eq!(request, RequestShape::default());
    }
}
