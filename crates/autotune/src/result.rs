//! Outcome of a tuning run.

use serde::Serialize;
use std::time::Duration;
use tiletune_kernels::{GeneratedSource, KernelCandidate, Precision};

#[derive(Debug, Clone, Serialize)]
pub struct CandidateTiming {
    pub candidate: KernelCandidate,
    pub samples_ms: Vec<f64>,
    pub mean_ms: f64,
}

impl CandidateTiming {
    pub fn from_samples(candidate: KernelCandidate, samples: &[Duration]) -> Self {
        let samples_ms: Vec<f64> = samples
            .iter()
            .map(|sample| sample.as_secs_f64() * 1000.0)
            .collect();
        let mean_ms = if samples_ms.is_empty() {
            f64::NAN
        } else {
            samples_ms.iter().sum::<f64>() / samples_ms.len() as f64
        };
        Self {
            candidate,
            samples_ms,
            mean_ms,
        }
    }

    /// Effective throughput of the mean launch for a `width`-sized product.
    pub fn gflops(&self, width: usize) -> f64 {
        let flops = 2.0 * (width as f64).powi(3);
        if self.mean_ms > 0.0 {
            flops / (self.mean_ms * 1.0e6)
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Build,
    Launch,
}

#[derive(Debug, Clone, Serialize)]
pub struct CandidateFailure {
    pub candidate: KernelCandidate,
    pub stage: FailureStage,
    pub reason: String,
    /// Source text the device rejected, for build failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel_source: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TuningResult {
    pub width: usize,
    pub precision: Precision,
    pub trials: usize,
    pub best: CandidateTiming,
    pub source: GeneratedSource,
    /// Measured candidates in enumeration order.
    pub timings: Vec<CandidateTiming>,
    pub failures: Vec<CandidateFailure>,
}

impl TuningResult {
    pub fn best_candidate(&self) -> &KernelCandidate {
        &self.best.candidate
    }
}
