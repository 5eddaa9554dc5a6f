//! Device, build and launch errors.

use thiserror::Error;
use tiletune_kernels::{GeneratedSource, KernelCandidate, Precision, ValidationError};

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("no GPU adapter at index {index} ({available} available)")]
    NoAdapter { index: usize, available: usize },

    #[error("failed to open GPU device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),
}

/// The shader front end or pipeline creation rejected a generated kernel.
#[derive(Error, Debug, Clone)]
#[error("failed to build kernel ({candidate}): {message}")]
pub struct BuildError {
    pub candidate: KernelCandidate,
    pub message: String,
    pub kernel_source: String,
}

impl BuildError {
    pub fn new(source: &GeneratedSource, message: impl Into<String>) -> Self {
        Self {
            candidate: *source.candidate(),
            message: message.into(),
            kernel_source: source.as_str().to_string(),
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum LaunchError {
    #[error("invalid operands: {0}")]
    Shape(#[from] ValidationError),

    #[error("operands are empty")]
    Empty,

    #[error("kernel expects {expected} precision operands, got {actual}")]
    PrecisionMismatch {
        expected: Precision,
        actual: Precision,
    },

    #[error("matrix width {width} exceeds device limits: {reason}")]
    TooLarge { width: usize, reason: String },

    #[error("device error during {stage}: {message}")]
    Device { stage: &'static str, message: String },

    #[error("failed to read back {what}: {message}")]
    Readback { what: &'static str, message: String },

    #[error("kernel wrote past the end of the output matrix")]
    GuardViolated,
}
