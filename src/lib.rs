//! tiletune: generate, build and time tiled matmul kernels, keep the fastest.

pub use tiletune_autotune as autotune;
pub use tiletune_backend_gpu as backend;
pub use tiletune_kernels as kernels;

pub use tiletune_autotune::{Autotuner, TuneError, TuningBackend, TuningResult};
pub use tiletune_backend_gpu::{GpuContext, MatmulKernel};
pub use tiletune_kernels::{generate, CandidateSet, GeneratedSource, KernelCandidate, Precision};
