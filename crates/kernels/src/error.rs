//! Error types for kernel generation and validation.

use crate::config::Precision;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unknown placeholder `{name}` at byte {offset}")]
    UnknownPlaceholder { name: String, offset: usize },

    #[error("unterminated placeholder starting at byte {offset}")]
    Unterminated { offset: usize },

    #[error("unmatched `}}` at byte {offset}")]
    UnmatchedBrace { offset: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("tile width must be positive, got {0}")]
    InvalidTileWidth(u32),

    #[error("template rendering failed: {0}")]
    Template(#[from] TemplateError),
}

/// Computed product deviates from the reference beyond tolerance.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("{precision} product relative error {error:e} exceeds tolerance {tolerance:e}")]
    Mismatch {
        error: f64,
        tolerance: f64,
        precision: Precision,
    },
}
