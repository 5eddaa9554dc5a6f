//! Renders the matmul skeleton into concrete WGSL for one candidate.

use crate::config::KernelCandidate;
use crate::error::GenerationError;
use crate::template::{render, MATMUL_TEMPLATE};
use serde::Serialize;
use std::fmt::Write as _;

/// WGSL text produced for a single candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedSource {
    candidate: KernelCandidate,
    text: String,
}

impl GeneratedSource {
    /// Wraps externally produced text, e.g. a kernel file exported by an earlier run.
    pub fn from_parts(candidate: KernelCandidate, text: String) -> Self {
        Self { candidate, text }
    }

    pub fn candidate(&self) -> &KernelCandidate {
        &self.candidate
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

pub const ENTRY_POINT: &str = "matmul";

pub fn generate(candidate: &KernelCandidate) -> Result<GeneratedSource, GenerationError> {
    let tile_width = candidate.tile_width();
    if tile_width == 0 {
        return Err(GenerationError::InvalidTileWidth(tile_width));
    }

    let precision = candidate.precision();
    let tw = tile_width.to_string();
    let body = inner_loop(tile_width, candidate.unroll());
    let text = render(
        MATMUL_TEMPLATE,
        &[
            ("real", precision.scalar_type()),
            ("fzero", precision.zero_literal()),
            ("TW", &tw),
            ("loop", &body),
        ],
    )?;

    Ok(GeneratedSource {
        candidate: *candidate,
        text,
    })
}

/// Reduction over one staged tile pair, either as a counted loop or fully unrolled.
pub fn inner_loop(tile_width: u32, unroll: bool) -> String {
    if unroll {
        let mut body = String::new();
        for k in 0..tile_width {
            if k > 0 {
                body.push_str("\n        ");
            }
            let _ = write!(body, "Pvalue += Ms[ty][{k}] * Ns[{k}][tx];");
        }
        body
    } else {
        format!(
            "for (var k: u32 = 0u; k < {tile_width}u; k = k + 1u) {{\n            \
             Pvalue += Ms[ty][k] * Ns[k][tx];\n        \
             }}"
        )
    }
}
