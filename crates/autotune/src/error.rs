//! Run-level tuning errors.

use crate::result::CandidateFailure;
use thiserror::Error;
use tiletune_backend_gpu::LaunchError;
use tiletune_kernels::{GenerationError, Precision};

#[derive(Error, Debug)]
pub enum TuneError {
    #[error("matrix width must be positive")]
    InvalidWidth,

    #[error("trial count must be positive")]
    InvalidTrials,

    #[error("input matrices are {actual} precision but the run is {expected}")]
    InputMismatch {
        expected: Precision,
        actual: Precision,
    },

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("failed to stage input matrices on the device: {0}")]
    Upload(#[source] LaunchError),

    #[error("no viable candidate: all {attempted} kernels failed to build or launch")]
    NoViableCandidate {
        attempted: usize,
        failures: Vec<CandidateFailure>,
    },
}
