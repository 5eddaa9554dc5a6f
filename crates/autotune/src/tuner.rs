//! Core autotuning logic.

use crate::backend::TuningBackend;
use crate::error::TuneError;
use crate::result::{CandidateFailure, CandidateTiming, FailureStage, TuningResult};
use tiletune_kernels::{generate, CandidateSet, GeneratedSource, MatrixPair, Precision};
use tracing::{debug, info, warn};

pub const DEFAULT_SEED: u64 = 0x7117_7e5e;

#[derive(Debug, Clone)]
pub struct Autotuner {
    trials: usize,
    warmup_runs: usize,
    seed: u64,
}

impl Default for Autotuner {
    fn default() -> Self {
        Self::new()
    }
}

impl Autotuner {
    pub fn new() -> Self {
        Self {
            trials: 5,
            warmup_runs: 1,
            seed: DEFAULT_SEED,
        }
    }

    /// A zero trial count is kept as-is and rejected when tuning starts.
    pub fn with_runs(mut self, warmup_runs: usize, trials: usize) -> Self {
        self.warmup_runs = warmup_runs;
        self.trials = trials;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn trials(&self) -> usize {
        self.trials
    }

    pub fn warmup_runs(&self) -> usize {
        self.warmup_runs
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Draws seeded random inputs of the given width and tunes against them.
    pub fn tune<B: TuningBackend>(
        &self,
        backend: &B,
        width: usize,
        precision: Precision,
        candidates: &CandidateSet,
    ) -> Result<TuningResult, TuneError> {
        if width == 0 {
            return Err(TuneError::InvalidWidth);
        }
        if self.trials == 0 {
            return Err(TuneError::InvalidTrials);
        }
        let inputs = MatrixPair::random(width, precision, self.seed);
        self.tune_with_inputs(backend, precision, &inputs, candidates)
    }

    pub fn tune_with_inputs<B: TuningBackend>(
        &self,
        backend: &B,
        precision: Precision,
        inputs: &MatrixPair,
        candidates: &CandidateSet,
    ) -> Result<TuningResult, TuneError> {
        let width = inputs.width();
        if width == 0 {
            return Err(TuneError::InvalidWidth);
        }
        if self.trials == 0 {
            return Err(TuneError::InvalidTrials);
        }
        if inputs.precision() != precision {
            return Err(TuneError::InputMismatch {
                expected: precision,
                actual: inputs.precision(),
            });
        }

        let enumerated = candidates.enumerate(precision);
        info!(
            width,
            precision = %precision,
            candidates = enumerated.len(),
            trials = self.trials,
            warmup = self.warmup_runs,
            "starting autotune"
        );

        let mut resident: Option<B::Inputs> = None;
        let mut timings = Vec::with_capacity(enumerated.len());
        let mut failures = Vec::new();
        let mut best: Option<(CandidateTiming, GeneratedSource)> = None;

        for candidate in &enumerated {
            let source = generate(candidate)?;

            let kernel = match backend.build(&source) {
                Ok(kernel) => kernel,
                Err(err) => {
                    warn!(candidate = %candidate, error = %err, "excluding candidate: build failed");
                    failures.push(CandidateFailure {
                        candidate: *candidate,
                        stage: FailureStage::Build,
                        reason: err.message,
                        kernel_source: Some(err.kernel_source),
                    });
                    continue;
                }
            };

            let staged: &B::Inputs = match resident {
                Some(ref staged) => staged,
                None => resident.insert(backend.upload(inputs).map_err(TuneError::Upload)?),
            };

            let samples = (0..self.warmup_runs + self.trials)
                .map(|_| backend.launch_timed(&kernel, staged))
                .collect::<Result<Vec<_>, _>>();
            let samples = match samples {
                Ok(samples) => samples,
                Err(err) => {
                    warn!(candidate = %candidate, error = %err, "excluding candidate: launch failed");
                    failures.push(CandidateFailure {
                        candidate: *candidate,
                        stage: FailureStage::Launch,
                        reason: err.to_string(),
                        kernel_source: None,
                    });
                    continue;
                }
            };

            let timing = CandidateTiming::from_samples(*candidate, &samples[self.warmup_runs..]);
            info!(
                candidate = %candidate,
                mean_ms = timing.mean_ms,
                gflops = timing.gflops(width),
                "candidate measured"
            );

            match &best {
                Some((current, _)) if timing.mean_ms >= current.mean_ms => {
                    debug!(candidate = %candidate, "slower than current best");
                }
                _ => best = Some((timing.clone(), source)),
            }
            timings.push(timing);
        }

        let Some((best, source)) = best else {
            return Err(TuneError::NoViableCandidate {
                attempted: enumerated.len(),
                failures,
            });
        };

        info!(
            tile_width = best.candidate.tile_width(),
            unroll = best.candidate.unroll(),
            mean_ms = best.mean_ms,
            excluded = failures.len(),
            "selected kernel"
        );

        Ok(TuningResult {
            width,
            precision,
            trials: self.trials,
            best,
            source,
            timings,
            failures,
        })
    }
}
