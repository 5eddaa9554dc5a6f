//! Device seam used by the tuner.

use std::time::Duration;
use tiletune_backend_gpu::{BuildError, CompiledKernel, DeviceMatrices, GpuContext, LaunchError};
use tiletune_kernels::{GeneratedSource, MatrixPair};

/// Everything the tuner needs from a device: compile, stage inputs, time a launch.
pub trait TuningBackend {
    type Kernel;
    type Inputs;

    fn build(&self, source: &GeneratedSource) -> Result<Self::Kernel, BuildError>;

    fn upload(&self, inputs: &MatrixPair) -> Result<Self::Inputs, LaunchError>;

    /// Runs one launch to completion and returns its duration.
    fn launch_timed(&self, kernel: &Self::Kernel, inputs: &Self::Inputs)
        -> Result<Duration, LaunchError>;
}

impl TuningBackend for GpuContext {
    type Kernel = CompiledKernel;
    type Inputs = DeviceMatrices;

    fn build(&self, source: &GeneratedSource) -> Result<CompiledKernel, BuildError> {
        GpuContext::build(self, source)
    }

    fn upload(&self, inputs: &MatrixPair) -> Result<DeviceMatrices, LaunchError> {
        self.upload_pair(inputs)
    }

    fn launch_timed(
        &self,
        kernel: &CompiledKernel,
        inputs: &DeviceMatrices,
    ) -> Result<Duration, LaunchError> {
        self.launch(kernel, inputs, true)?
            .ok_or_else(|| LaunchError::Readback {
                what: "timing",
                message: "timed launch returned no duration".to_string(),
            })
    }
}
