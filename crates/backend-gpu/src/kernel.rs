//! Programmatic entry point: one parametrised matmul kernel bound to a device.

use crate::builder::CompiledKernel;
use crate::context::GpuContext;
use crate::error::BuildError;
use anyhow::{anyhow, Context, Result};
use ndarray::{Array2, ArrayView2};
use std::time::Duration;
use tiletune_kernels::{generate, Element, GeneratedSource, KernelCandidate, Precision};

/// A generated kernel that may or may not have been compiled yet.
///
/// Construction always renders the source; compilation happens in the
/// constructor only when requested, otherwise on an explicit [`compile`](Self::compile).
pub struct MatmulKernel<'ctx> {
    ctx: &'ctx GpuContext,
    source: GeneratedSource,
    compiled: Option<CompiledKernel>,
}

impl<'ctx> MatmulKernel<'ctx> {
    pub fn new(
        ctx: &'ctx GpuContext,
        precision: Precision,
        tile_width: u32,
        loop_unroll: bool,
        compile: bool,
    ) -> Result<Self> {
        let candidate = KernelCandidate::new(precision, tile_width, loop_unroll)?;
        let source = generate(&candidate)?;
        let mut kernel = Self {
            ctx,
            source,
            compiled: None,
        };
        if compile {
            kernel.compile()?;
        }
        Ok(kernel)
    }

    pub fn compile(&mut self) -> Result<(), BuildError> {
        if self.compiled.is_none() {
            self.compiled = Some(self.ctx.build(&self.source)?);
        }
        Ok(())
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled.is_some()
    }

    pub fn candidate(&self) -> &KernelCandidate {
        self.source.candidate()
    }

    pub fn source(&self) -> &GeneratedSource {
        &self.source
    }

    /// Computes `m * n` on the device.
    pub fn matmul<T: Element>(&self, m: ArrayView2<'_, T>, n: ArrayView2<'_, T>) -> Result<Array2<T>> {
        let execution = self
            .ctx
            .run(self.compiled()?, m, n, false)
            .with_context(|| format!("matmul with {} failed", self.candidate()))?;
        Ok(execution.output)
    }

    /// Computes `m * n` and reports the kernel execution time.
    pub fn matmul_timed<T: Element>(
        &self,
        m: ArrayView2<'_, T>,
        n: ArrayView2<'_, T>,
    ) -> Result<(Array2<T>, Duration)> {
        let execution = self
            .ctx
            .run(self.compiled()?, m, n, true)
            .with_context(|| format!("timed matmul with {} failed", self.candidate()))?;
        let elapsed = execution
            .elapsed
            .ok_or_else(|| anyhow!("timed launch returned no duration"))?;
        Ok((execution.output, elapsed))
    }

    fn compiled(&self) -> Result<&CompiledKernel> {
        self.compiled
            .as_ref()
            .ok_or_else(|| anyhow!("kernel {} has not been compiled", self.candidate()))
    }
}
