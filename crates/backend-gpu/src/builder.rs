//! Compiles generated WGSL into a compute pipeline.

use crate::context::GpuContext;
use crate::error::BuildError;
use crate::planner::LaunchConfig;
use pollster::block_on;
use tiletune_kernels::{GeneratedSource, KernelCandidate, Precision, ENTRY_POINT};
use tracing::{debug, warn};

/// A generated kernel whose pipeline is ready to dispatch.
pub struct CompiledKernel {
    source: GeneratedSource,
    pub(crate) pipeline: wgpu::ComputePipeline,
}

impl CompiledKernel {
    pub fn candidate(&self) -> &KernelCandidate {
        self.source.candidate()
    }

    pub fn source(&self) -> &GeneratedSource {
        &self.source
    }

    /// Launch shape for the given live matrix width.
    pub fn launch_config(&self, width: u32) -> LaunchConfig {
        LaunchConfig::derive(self.candidate().tile_width(), width)
    }
}

impl GpuContext {
    pub fn build(&self, source: &GeneratedSource) -> Result<CompiledKernel, BuildError> {
        let candidate = *source.candidate();
        if let Err(message) = self.check_capabilities(&candidate) {
            warn!(candidate = %candidate, error = %message, "kernel exceeds device capabilities");
            return Err(BuildError::new(source, message));
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let shader_module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("matmul_shader"),
                source: wgpu::ShaderSource::Wgsl(source.as_str().into()),
            });
        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("matmul_pipeline"),
                layout: Some(&self.pipeline_layout),
                module: &shader_module,
                entry_point: ENTRY_POINT,
            });

        if let Some(err) = block_on(self.device.pop_error_scope()) {
            let err = BuildError::new(source, err.to_string());
            warn!(candidate = %candidate, error = %err.message, "kernel failed to build");
            debug!(candidate = %candidate, source = %err.kernel_source, "rejected kernel source");
            return Err(err);
        }

        debug!(candidate = %candidate, "kernel built");
        Ok(CompiledKernel {
            source: source.clone(),
            pipeline,
        })
    }

    fn check_capabilities(&self, candidate: &KernelCandidate) -> Result<(), String> {
        if candidate.precision() == Precision::Double && !self.supports(Precision::Double) {
            return Err("device does not support 64-bit floats (SHADER_F64)".to_string());
        }

        let tw = candidate.tile_width();
        let limits = &self.limits;
        if tw > limits.max_compute_workgroup_size_x || tw > limits.max_compute_workgroup_size_y {
            return Err(format!(
                "workgroup side {tw} exceeds device limit {}x{}",
                limits.max_compute_workgroup_size_x, limits.max_compute_workgroup_size_y
            ));
        }
        let invocations = u64::from(tw) * u64::from(tw);
        if invocations > u64::from(limits.max_compute_invocations_per_workgroup) {
            return Err(format!(
                "{invocations} invocations per workgroup exceed device limit {}",
                limits.max_compute_invocations_per_workgroup
            ));
        }
        let shared = candidate.shared_tile_bytes();
        if shared > u64::from(limits.max_compute_workgroup_storage_size) {
            return Err(format!(
                "{shared} bytes of workgroup storage exceed device limit {}",
                limits.max_compute_workgroup_storage_size
            ));
        }
        Ok(())
    }
}
