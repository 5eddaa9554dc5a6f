//! Export of the selected kernel and the JSON tuning log.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tiletune_autotune::{FailureStage, TuningResult};
use tiletune_backend_gpu::GpuDeviceInfo;
use tiletune_kernels::GeneratedSource;

#[derive(Debug, Clone, Serialize)]
pub struct TuningReport {
    pub device: GpuDeviceInfo,
    pub generated_at_unix_ms: u128,
    pub result: TuningResult,
}

impl TuningReport {
    pub fn new(device: GpuDeviceInfo, result: TuningResult) -> Self {
        let generated_at_unix_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis())
            .unwrap_or_default();
        Self {
            device,
            generated_at_unix_ms,
            result,
        }
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        ensure_parent(path)?;
        let blob = serde_json::to_vec_pretty(self)?;
        fs::write(path, blob)
            .with_context(|| format!("failed to write tuning log {}", path.display()))?;
        Ok(())
    }
}

/// Writes kernel text verbatim, creating parent directories as needed.
pub fn write_source(path: &Path, source: &GeneratedSource) -> Result<()> {
    ensure_parent(path)?;
    fs::write(path, source.as_str())
        .with_context(|| format!("failed to write kernel source {}", path.display()))?;
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    Ok(())
}

/// Human-readable lines: one per candidate, then the selection.
pub fn summary_lines(result: &TuningResult) -> Vec<String> {
    let mut lines = Vec::with_capacity(result.timings.len() + result.failures.len() + 1);
    for timing in &result.timings {
        lines.push(format!(
            "- tile_width={:<3} unroll={:<5} mean_ms={:.4} gflops={:.2}",
            timing.candidate.tile_width(),
            timing.candidate.unroll(),
            timing.mean_ms,
            timing.gflops(result.width)
        ));
    }
    for failure in &result.failures {
        let stage = match failure.stage {
            FailureStage::Build => "build",
            FailureStage::Launch => "launch",
        };
        lines.push(format!(
            "- tile_width={:<3} unroll={:<5} excluded ({stage}): {}",
            failure.candidate.tile_width(),
            failure.candidate.unroll(),
            failure.reason
        ));
    }
    lines.push(format!(
        "selected tile_width={} unroll={} ({:.4} ms mean over {} trials)",
        result.best.candidate.tile_width(),
        result.best.candidate.unroll(),
        result.best.mean_ms,
        result.trials
    ));
    lines
}

pub fn print_summary(result: &TuningResult) {
    println!(
        "width={}, precision={}, candidates={}",
        result.width,
        result.precision,
        result.timings.len() + result.failures.len()
    );
    for line in summary_lines(result) {
        println!("{line}");
    }
}
