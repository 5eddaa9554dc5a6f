//! Tuning session orchestration.

use anyhow::{Context, Result};
use tiletune_autotune::{Autotuner, TuningResult, DEFAULT_SEED};
use tiletune_backend_gpu::{GpuContext, GpuDeviceInfo, MatmulKernel};
use tiletune_kernels::{
    reference_matmul, verify_product, CandidateSet, KernelCandidate, MatrixPair, Precision,
};
use tracing::info;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub device: usize,
    pub warmup_runs: usize,
    pub trials: usize,
    pub seed: u64,
}

impl SessionOptions {
    pub fn to_autotuner(&self) -> Autotuner {
        Autotuner::new()
            .with_runs(self.warmup_runs, self.trials)
            .with_seed(self.seed)
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            device: 0,
            warmup_runs: 1,
            trials: 5,
            seed: DEFAULT_SEED,
        }
    }
}

/// Outcome of checking one candidate against the CPU reference.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub candidate: KernelCandidate,
    pub relative_error: f64,
}

/// A device acquired for the duration of one command.
pub struct TuneSession {
    ctx: GpuContext,
    options: SessionOptions,
}

impl TuneSession {
    pub fn new(options: SessionOptions) -> Result<Self> {
        let ctx = GpuContext::acquire(options.device)
            .with_context(|| format!("failed to acquire GPU device {}", options.device))?;
        info!(
            device = %ctx.info().name,
            backend = %ctx.info().backend,
            timestamps = ctx.info().supports_timestamps,
            f64 = ctx.info().supports_f64,
            "session started"
        );
        Ok(Self { ctx, options })
    }

    pub fn device_info(&self) -> &GpuDeviceInfo {
        self.ctx.info()
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn tune(
        &self,
        width: usize,
        precision: Precision,
        candidates: &CandidateSet,
    ) -> Result<TuningResult> {
        let result = self
            .options
            .to_autotuner()
            .tune(&self.ctx, width, precision, candidates)
            .with_context(|| format!("autotuning a {width}x{width} {precision} matmul failed"))?;
        Ok(result)
    }

    /// Runs one candidate on seeded inputs and compares it with the CPU product.
    pub fn validate(
        &self,
        width: usize,
        precision: Precision,
        tile_width: u32,
        unroll: bool,
    ) -> Result<ValidationOutcome> {
        let kernel = MatmulKernel::new(&self.ctx, precision, tile_width, unroll, true)?;
        let inputs = MatrixPair::random(width, precision, self.options.seed);
        let relative_error = match &inputs {
            MatrixPair::Single { lhs, rhs } => {
                let product = kernel.matmul(lhs.view(), rhs.view())?;
                verify_product(&reference_matmul(lhs.view(), rhs.view())?, &product)?
            }
            MatrixPair::Double { lhs, rhs } => {
                let product = kernel.matmul(lhs.view(), rhs.view())?;
                verify_product(&reference_matmul(lhs.view(), rhs.view())?, &product)?
            }
        };
        info!(candidate = %kernel.candidate(), relative_error, "kernel matches reference");
        Ok(ValidationOutcome {
            candidate: *kernel.candidate(),
            relative_error,
        })
    }

    pub fn shutdown(self) -> Result<()> {
        drop(self.ctx);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_match_tuner_defaults() {
        let options = SessionOptions::default();
        let tuner = options.to_autotuner();
        let defaults = Autotuner::new();
        assert_eq!(tuner.trials(), defaults.trials());
        assert_eq!(tuner.warmup_runs(), defaults.warmup_runs());
        assert_eq!(tuner.seed(), defaults.seed());
        assert_eq!(options.device, 0);
    }

    #[test]
    fn options_flow_into_the_tuner() {
        let options = SessionOptions {
            warmup_runs: 0,
            trials: 9,
            seed: 42,
            ..SessionOptions::default()
        };
        let tuner = options.to_autotuner();
        assert_eq!(tuner.trials(), 9);
        assert_eq!(tuner.warmup_runs(), 0);
        assert_eq!(tuner.seed(), 42);
    }
}
