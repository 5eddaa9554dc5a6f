//! Host-side matrices: element types, seeded inputs and the CPU reference product.

use crate::config::Precision;
use crate::error::ValidationError;
use bytemuck::Pod;
use ndarray::{Array2, ArrayView2, Axis, LinalgScalar};
use rayon::prelude::*;
use std::fmt;

/// Scalar types a generated kernel can be instantiated for.
pub trait Element: LinalgScalar + Pod + Send + Sync + fmt::Debug {
    const PRECISION: Precision;

    fn to_f64(self) -> f64;
    fn from_f64(value: f64) -> Self;
}

impl Element for f32 {
    const PRECISION: Precision = Precision::Single;

    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    fn from_f64(value: f64) -> Self {
        value as f32
    }
}

impl Element for f64 {
    const PRECISION: Precision = Precision::Double;

    fn to_f64(self) -> f64 {
        self
    }

    fn from_f64(value: f64) -> Self {
        value
    }
}

/// Square matrix with entries drawn uniformly from [-1, 1).
pub fn random_matrix<T: Element>(width: usize, rng: &mut fastrand::Rng) -> Array2<T> {
    Array2::from_shape_fn((width, width), |_| T::from_f64(rng.f64() * 2.0 - 1.0))
}

/// The pair of operands shared by every candidate of a tuning run.
#[derive(Debug, Clone)]
pub enum MatrixPair {
    Single { lhs: Array2<f32>, rhs: Array2<f32> },
    Double { lhs: Array2<f64>, rhs: Array2<f64> },
}

impl MatrixPair {
    pub fn random(width: usize, precision: Precision, seed: u64) -> Self {
        let mut rng = fastrand::Rng::with_seed(seed);
        match precision {
            Precision::Single => MatrixPair::Single {
                lhs: random_matrix(width, &mut rng),
                rhs: random_matrix(width, &mut rng),
            },
            Precision::Double => MatrixPair::Double {
                lhs: random_matrix(width, &mut rng),
                rhs: random_matrix(width, &mut rng),
            },
        }
    }

    pub fn precision(&self) -> Precision {
        match self {
            MatrixPair::Single { .. } => Precision::Single,
            MatrixPair::Double { .. } => Precision::Double,
        }
    }

    pub fn width(&self) -> usize {
        match self {
            MatrixPair::Single { lhs, .. } => lhs.nrows(),
            MatrixPair::Double { lhs, .. } => lhs.nrows(),
        }
    }
}

pub fn validate_square_operands<T>(
    lhs: &ArrayView2<'_, T>,
    rhs: &ArrayView2<'_, T>,
) -> Result<usize, ValidationError> {
    let width = lhs.nrows();
    if lhs.dim() != (width, width) {
        return Err(ValidationError::ShapeMismatch {
            expected: (width, width),
            actual: lhs.dim(),
        });
    }
    if rhs.dim() != lhs.dim() {
        return Err(ValidationError::ShapeMismatch {
            expected: lhs.dim(),
            actual: rhs.dim(),
        });
    }
    Ok(width)
}

/// Sequential inner products per output element, rows spread over the rayon pool.
pub fn reference_matmul<T: Element>(
    lhs: ArrayView2<'_, T>,
    rhs: ArrayView2<'_, T>,
) -> Result<Array2<T>, ValidationError> {
    validate_square_operands(&lhs, &rhs)?;

    let mut output = Array2::<T>::zeros((lhs.nrows(), rhs.ncols()));
    output
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(row_idx, mut row)| {
            let lhs_row = lhs.row(row_idx);
            for (col_idx, value) in row.iter_mut().enumerate() {
                let mut acc = T::zero();
                for (a, b) in lhs_row.iter().zip(rhs.column(col_idx).iter()) {
                    acc = acc + *a * *b;
                }
                *value = acc;
            }
        });

    Ok(output)
}
