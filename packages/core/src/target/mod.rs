//! Compile targets
//!
//! A [`CompileTarget`] lowers a model definition into an executable payload
//! for one fixed shape. Targets are the accelerator-specific half of the
//! compiler; the fixed-shape constraint is a property of the target, not of
//! the callers.

pub mod reference;

use crate::registry::ModelDefinition;
use crate::shape::ShapeSpec;

/// Accelerator lowering backend
pub trait CompileTarget: Send + Sync {
    /// Target name recorded in artifact metadata
    fn name(&self) -> &str;

    /// Target compiler version; part of the artifact compiler version
    fn version(&self) -> &str;

    /// Lower `definition` for `shape`.
    ///
    /// Must be deterministic. On failure returns the target's diagnostic,
    /// which is surfaced to callers unmodified.
    fn lower(&self, definition: &ModelDefinition, shape: ShapeSpec) -> Result<Vec<u8>, String>;
}
