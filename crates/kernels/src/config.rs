//! Kernel configuration structures.

use crate::error::GenerationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Floating point precision of a tuning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Single,
    Double,
}

impl Precision {
    /// WGSL scalar type name.
    pub fn scalar_type(&self) -> &'static str {
        match self {
            Precision::Single => "f32",
            Precision::Double => "f64",
        }
    }

    /// WGSL literal for zero in this precision.
    pub fn zero_literal(&self) -> &'static str {
        match self {
            Precision::Single => "0.0f",
            Precision::Double => "0.0lf",
        }
    }

    pub fn element_size_bytes(&self) -> usize {
        match self {
            Precision::Single => 4,
            Precision::Double => 8,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Precision::Single => "single",
            Precision::Double => "double",
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Precision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single" | "f32" | "float" => Ok(Precision::Single),
            "double" | "f64" => Ok(Precision::Double),
            other => Err(format!("unsupported precision `{other}`")),
        }
    }
}

/// One point of the search space. Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct KernelCandidate {
    precision: Precision,
    tile_width: u32,
    unroll: bool,
}

impl KernelCandidate {
    pub fn new(precision: Precision, tile_width: u32, unroll: bool) -> Result<Self, GenerationError> {
        if tile_width == 0 {
            return Err(GenerationError::InvalidTileWidth(tile_width));
        }
        Ok(Self {
            precision,
            tile_width,
            unroll,
        })
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    pub fn tile_width(&self) -> u32 {
        self.tile_width
    }

    pub fn unroll(&self) -> bool {
        self.unroll
    }

    /// Bytes of workgroup memory used by the two staged tiles.
    pub fn shared_tile_bytes(&self) -> u64 {
        let tw = u64::from(self.tile_width);
        2 * tw * tw * self.precision.element_size_bytes() as u64
    }
}

impl fmt::Display for KernelCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tw={} unroll={} {}",
            self.tile_width, self.unroll, self.precision
        )
    }
}

pub const DEFAULT_TILE_WIDTHS: [u32; 4] = [8, 16, 24, 32];

/// Grid of tile widths and unroll settings to search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateSet {
    tile_widths: Vec<u32>,
    unroll: Vec<bool>,
}

impl CandidateSet {
    /// Builds a set over the given tile widths and both unroll settings.
    pub fn new(tile_widths: impl IntoIterator<Item = u32>) -> Result<Self, GenerationError> {
        Self::with_unroll(tile_widths, [false, true])
    }

    pub fn with_unroll(
        tile_widths: impl IntoIterator<Item = u32>,
        unroll: impl IntoIterator<Item = bool>,
    ) -> Result<Self, GenerationError> {
        let mut widths = Vec::new();
        for tw in tile_widths {
            if tw == 0 {
                return Err(GenerationError::InvalidTileWidth(tw));
            }
            if !widths.contains(&tw) {
                widths.push(tw);
            }
        }
        let mut flags = Vec::new();
        for flag in unroll {
            if !flags.contains(&flag) {
                flags.push(flag);
            }
        }
        Ok(Self {
            tile_widths: widths,
            unroll: flags,
        })
    }

    pub fn tile_widths(&self) -> &[u32] {
        &self.tile_widths
    }

    pub fn unroll_flags(&self) -> &[bool] {
        &self.unroll
    }

    pub fn len(&self) -> usize {
        self.tile_widths.len() * self.unroll.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cartesian product in tile-width major, unroll minor order.
    pub fn enumerate(&self, precision: Precision) -> Vec<KernelCandidate> {
        self.tile_widths
            .iter()
            .flat_map(|&tile_width| {
                self.unroll.iter().map(move |&unroll| KernelCandidate {
                    precision,
                    tile_width,
                    unroll,
                })
            })
            .collect()
    }
}

impl Default for CandidateSet {
    fn default() -> Self {
        Self {
            tile_widths: DEFAULT_TILE_WIDTHS.to_vec(),
            unroll: vec![false, true],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precision_parses_aliases() {
        assert_eq!("double".parse::<Precision>().unwrap(), Precision::Double);
        assert_eq!("F32".parse::<Precision>().unwrap(), Precision::Single);
        assert!("half".parse::<Precision>().is_err());
    }

    #[test]
    fn zero_tile_width_is_rejected() {
        assert!(matches!(
            KernelCandidate::new(Precision::Single, 0, false),
            Err(GenerationError::InvalidTileWidth(0))
        ));
        assert!(CandidateSet::new([8, 0]).is_err());
    }

    #[test]
    fn enumeration_is_tile_major() {
        let set = CandidateSet::new([16, 8, 16]).unwrap();
        let order: Vec<(u32, bool)> = set
            .enumerate(Precision::Single)
            .iter()
            .map(|c| (c.tile_width(), c.unroll()))
            .collect();
        assert_eq!(order, vec![(16, false), (16, true), (8, false), (8, true)]);
    }

    #[test]
    fn default_set_has_eight_candidates() {
        let set = CandidateSet::default();
        assert_eq!(set.len(), 8);
        assert!(set
            .enumerate(Precision::Double)
            .iter()
            .all(|c| c.precision() == Precision::Double));
    }

    #[test]
    fn shared_tile_bytes_scale_with_precision() {
        let single = KernelCandidate::new(Precision::Single, 32, false).unwrap();
        let double = KernelCandidate::new(Precision::Double, 32, false).unwrap();
        assert_eq!(single.shared_tile_bytes(), 8192);
        assert_eq!(double.shared_tile_bytes(), 16384);
    }
}
