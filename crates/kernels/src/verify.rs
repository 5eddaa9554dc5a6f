//! Numerical comparison of device results against the CPU reference.

use crate::config::Precision;
use crate::error::ValidationError;
use crate::matrix::Element;
use ndarray::Array2;

/// Accepted relative error for a product, by precision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    pub max_rel_error: f64,
}

impl Tolerance {
    pub fn for_precision(precision: Precision) -> Self {
        let max_rel_error = match precision {
            Precision::Single => 1e-4,
            Precision::Double => 1e-9,
        };
        Self { max_rel_error }
    }
}

/// Norm-wise relative error: `max|candidate - reference| / max|reference|`.
///
/// Both operands must have the same shape; [`verify_product`] checks this first.
pub fn relative_error<T: Element>(reference: &Array2<T>, candidate: &Array2<T>) -> f64 {
    debug_assert_eq!(reference.dim(), candidate.dim(), "operand shapes differ");
    let mut max_abs = 0.0f64;
    let mut scale = 0.0f64;
    for (r, c) in reference.iter().zip(candidate.iter()) {
        let r = r.to_f64();
        let c = c.to_f64();
        let diff = (c - r).abs();
        // NaN must not compare as a pass
        if diff.is_nan() {
            return f64::INFINITY;
        }
        max_abs = max_abs.max(diff);
        scale = scale.max(r.abs());
    }
    if scale > 0.0 {
        max_abs / scale
    } else {
        max_abs
    }
}

pub fn verify_product<T: Element>(
    reference: &Array2<T>,
    candidate: &Array2<T>,
) -> Result<f64, ValidationError> {
    if reference.dim() != candidate.dim() {
        return Err(ValidationError::ShapeMismatch {
            expected: reference.dim(),
            actual: candidate.dim(),
        });
    }

    let tolerance = Tolerance::for_precision(T::PRECISION);
    let error = relative_error(reference, candidate);
    if error > tolerance.max_rel_error {
        return Err(ValidationError::Mismatch {
            error,
            tolerance: tolerance.max_rel_error,
            precision: T::PRECISION,
        });
    }
    Ok(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn identical_products_pass() {
        let a = Array2::from_elem((4, 4), 2.5f64);
        assert_eq!(verify_product(&a, &a.clone()).unwrap(), 0.0);
    }

    #[test]
    fn error_is_normalised_by_largest_reference_entry() {
        let reference = Array2::from_shape_vec((1, 2), vec![0.0f32, 10.0]).unwrap();
        let candidate = Array2::from_shape_vec((1, 2), vec![0.001f32, 10.0]).unwrap();
        assert_relative_eq!(relative_error(&reference, &candidate), 1e-4, max_relative = 1e-3);
    }

    #[test]
    fn single_precision_tolerance_rejects_large_error() {
        let reference = Array2::from_elem((2, 2), 1.0f32);
        let candidate = Array2::from_elem((2, 2), 1.01f32);
        assert!(matches!(
            verify_product(&reference, &candidate),
            Err(ValidationError::Mismatch {
                precision: Precision::Single,
                ..
            })
        ));
    }

    #[test]
    fn double_precision_is_stricter() {
        let reference = Array2::from_elem((2, 2), 1.0f64);
        let candidate = Array2::from_elem((2, 2), 1.0 + 1e-7);
        assert!(verify_product(&reference, &candidate).is_err());
        let close = Array2::from_elem((2, 2), 1.0 + 1e-12);
        assert!(verify_product(&reference, &close).is_ok());
    }

    #[test]
    fn nan_fails_validation() {
        let reference = Array2::from_elem((2, 2), 1.0f32);
        let mut candidate = reference.clone();
        candidate[(1, 1)] = f32::NAN;
        assert!(verify_product(&reference, &candidate).is_err());
    }

    #[test]
    fn shape_mismatch_is_reported() {
        let reference = Array2::<f32>::zeros((2, 2));
        let candidate = Array2::<f32>::zeros((3, 3));
        assert!(matches!(
            verify_product(&reference, &candidate),
            Err(ValidationError::ShapeMismatch { .. })
        ));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "operand shapes differ")]
    fn relative_error_requires_matching_shapes() {
        let reference = Array2::<f32>::zeros((2, 2));
        let candidate = Array2::<f32>::zeros((2, 3));
        relative_error(&reference, &candidate);
    }
}
