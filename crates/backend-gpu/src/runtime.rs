//! Execution harness: stages operands, dispatches compiled kernels and times them.
//!
//! Operands are uploaded once into [`DeviceMatrices`] and can be reused by any
//! number of launches, so allocation and transfer never fall inside a timed
//! region. A launch drains the queue before it is submitted and blocks on
//! `Maintain::Wait` afterwards; the recorded duration therefore covers one
//! complete kernel execution.

use crate::builder::CompiledKernel;
use crate::context::{GpuContext, TimestampQueries, TIMESTAMP_BYTES};
use crate::error::LaunchError;
use bytemuck::{cast_slice, try_cast_slice, Pod, Zeroable};
use ndarray::{Array2, ArrayView2};
use pollster::block_on;
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tiletune_kernels::{validate_square_operands, Element, MatrixPair, Precision};
use tracing::{debug, trace};
use wgpu::util::DeviceExt;

/// Elements of sentinel padding after the output matrix.
pub const GUARD_ELEMENTS: u64 = 64;
const GUARD_BYTE: u8 = 0xA5;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub(crate) struct ShaderParams {
    width: u32,
    _pad: [u32; 3],
}

/// Operands and output resident on the device for one matrix width.
pub struct DeviceMatrices {
    width: u32,
    precision: Precision,
    output_bytes: u64,
    guard_bytes: u64,
    output: wgpu::Buffer,
    staging: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    // Kept alive for the bind group.
    _lhs: wgpu::Buffer,
    _rhs: wgpu::Buffer,
    _params: wgpu::Buffer,
}

impl DeviceMatrices {
    pub fn width(&self) -> usize {
        self.width as usize
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }
}

/// Result of [`GpuContext::run`].
#[derive(Debug, Clone)]
pub struct Execution<T> {
    pub output: Array2<T>,
    pub elapsed: Option<Duration>,
}

impl GpuContext {
    pub fn upload<T: Element>(
        &self,
        lhs: ArrayView2<'_, T>,
        rhs: ArrayView2<'_, T>,
    ) -> Result<DeviceMatrices, LaunchError> {
        let width = validate_square_operands(&lhs, &rhs)?;
        if width == 0 {
            return Err(LaunchError::Empty);
        }
        let width_u32 = u32::try_from(width).map_err(|_| LaunchError::TooLarge {
            width,
            reason: "width does not fit in 32 bits".to_string(),
        })?;

        let elem = T::PRECISION.element_size_bytes() as u64;
        let output_bytes = (width as u64) * (width as u64) * elem;
        let guard_bytes = GUARD_ELEMENTS * elem;
        let binding_limit = u64::from(self.limits.max_storage_buffer_binding_size)
            .min(self.limits.max_buffer_size);
        if output_bytes + guard_bytes > binding_limit {
            return Err(LaunchError::TooLarge {
                width,
                reason: format!(
                    "{} bytes per matrix exceed the {binding_limit} byte buffer limit",
                    output_bytes + guard_bytes
                ),
            });
        }

        let lhs_data: Vec<T> = lhs.iter().copied().collect();
        let rhs_data: Vec<T> = rhs.iter().copied().collect();
        let mut output_init = vec![0u8; (output_bytes + guard_bytes) as usize];
        output_init[output_bytes as usize..].fill(GUARD_BYTE);
        let params = ShaderParams {
            width: width_u32,
            _pad: [0; 3],
        };

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let lhs_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("M"),
                contents: cast_slice(&lhs_data),
                usage: wgpu::BufferUsages::STORAGE,
            });
        let rhs_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("N"),
                contents: cast_slice(&rhs_data),
                usage: wgpu::BufferUsages::STORAGE,
            });
        let output = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("P"),
                contents: &output_init,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            });
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("P_staging"),
            size: output_bytes + guard_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let params_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("params"),
                contents: cast_slice(&[params]),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("matmul_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: lhs_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: rhs_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: output.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: params_buffer.as_entire_binding(),
                },
            ],
        });
        if let Some(err) = block_on(self.device.pop_error_scope()) {
            return Err(LaunchError::Device {
                stage: "upload",
                message: err.to_string(),
            });
        }

        debug!(width, precision = %T::PRECISION, "operands staged on device");
        Ok(DeviceMatrices {
            width: width_u32,
            precision: T::PRECISION,
            output_bytes,
            guard_bytes,
            output,
            staging,
            bind_group,
            _lhs: lhs_buffer,
            _rhs: rhs_buffer,
            _params: params_buffer,
        })
    }

    pub fn upload_pair(&self, pair: &MatrixPair) -> Result<DeviceMatrices, LaunchError> {
        match pair {
            MatrixPair::Single { lhs, rhs } => self.upload(lhs.view(), rhs.view()),
            MatrixPair::Double { lhs, rhs } => self.upload(lhs.view(), rhs.view()),
        }
    }

    /// Dispatches `kernel` over `inputs` and waits for completion. Returns the
    /// execution time when `timed` is set.
    pub fn launch(
        &self,
        kernel: &CompiledKernel,
        inputs: &DeviceMatrices,
        timed: bool,
    ) -> Result<Option<Duration>, LaunchError> {
        let candidate = kernel.candidate();
        if candidate.precision() != inputs.precision {
            return Err(LaunchError::PrecisionMismatch {
                expected: candidate.precision(),
                actual: inputs.precision,
            });
        }

        let config = kernel.launch_config(inputs.width);
        let max_groups = self.limits.max_compute_workgroups_per_dimension;
        if config.workgroups.0 > max_groups || config.workgroups.1 > max_groups {
            return Err(LaunchError::TooLarge {
                width: inputs.width(),
                reason: format!(
                    "{} workgroups per dimension exceed device limit {max_groups}",
                    config.workgroups.0
                ),
            });
        }

        // Start from an idle queue.
        self.device.poll(wgpu::Maintain::Wait);

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let timestamps = if timed { self.timestamps.as_ref() } else { None };
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("matmul_encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("matmul_pass"),
                timestamp_writes: timestamps.map(|ts| wgpu::ComputePassTimestampWrites {
                    query_set: &ts.query_set,
                    beginning_of_pass_write_index: Some(0),
                    end_of_pass_write_index: Some(1),
                }),
            });
            pass.set_pipeline(&kernel.pipeline);
            pass.set_bind_group(0, &inputs.bind_group, &[]);
            pass.dispatch_workgroups(config.workgroups.0, config.workgroups.1, 1);
        }
        if let Some(ts) = timestamps {
            encoder.resolve_query_set(&ts.query_set, 0..2, &ts.resolve, 0);
            encoder.copy_buffer_to_buffer(&ts.resolve, 0, &ts.staging, 0, TIMESTAMP_BYTES);
        }
        let commands = encoder.finish();

        let start = Instant::now();
        self.queue.submit(Some(commands));
        self.device.poll(wgpu::Maintain::Wait);
        let wall = start.elapsed();

        let validation = block_on(self.device.pop_error_scope());
        let out_of_memory = block_on(self.device.pop_error_scope());
        if let Some(err) = validation.or(out_of_memory) {
            return Err(LaunchError::Device {
                stage: "launch",
                message: err.to_string(),
            });
        }

        if !timed {
            return Ok(None);
        }

        let elapsed = match timestamps {
            Some(ts) => self.read_timestamps(ts).unwrap_or_else(|err| {
                debug!(error = %err, "timestamp readback failed, using wall time");
                wall
            }),
            None => wall,
        };
        trace!(
            candidate = %candidate,
            elapsed_us = elapsed.as_micros() as u64,
            wall_us = wall.as_micros() as u64,
            "kernel launch completed"
        );
        Ok(Some(elapsed))
    }

    /// Copies the product back to the host and checks the guard region.
    pub fn download<T: Element>(&self, inputs: &DeviceMatrices) -> Result<Array2<T>, LaunchError> {
        if T::PRECISION != inputs.precision {
            return Err(LaunchError::PrecisionMismatch {
                expected: inputs.precision,
                actual: T::PRECISION,
            });
        }

        let total = inputs.output_bytes + inputs.guard_bytes;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback_encoder"),
            });
        encoder.copy_buffer_to_buffer(&inputs.output, 0, &inputs.staging, 0, total);
        self.queue.submit(Some(encoder.finish()));

        let split = inputs.output_bytes as usize;
        let (values, guard_intact) = self.read_mapped(&inputs.staging, "output", |bytes| {
            let guard_intact = bytes[split..].iter().all(|b| *b == GUARD_BYTE);
            try_cast_slice::<u8, T>(&bytes[..split])
                .map(|values| (values.to_vec(), guard_intact))
                .map_err(|err| err.to_string())
        })?;
        if !guard_intact {
            return Err(LaunchError::GuardViolated);
        }

        let width = inputs.width();
        Array2::from_shape_vec((width, width), values).map_err(|err| LaunchError::Readback {
            what: "output",
            message: err.to_string(),
        })
    }

    /// Uploads `lhs` and `rhs`, launches `kernel` once and reads back the product.
    pub fn run<T: Element>(
        &self,
        kernel: &CompiledKernel,
        lhs: ArrayView2<'_, T>,
        rhs: ArrayView2<'_, T>,
        timed: bool,
    ) -> Result<Execution<T>, LaunchError> {
        let inputs = self.upload(lhs, rhs)?;
        let elapsed = self.launch(kernel, &inputs, timed)?;
        let output = self.download(&inputs)?;
        Ok(Execution { output, elapsed })
    }

    fn read_timestamps(&self, ts: &TimestampQueries) -> Result<Duration, LaunchError> {
        let (start, end) = self.read_mapped(&ts.staging, "timestamps", |bytes| {
            try_cast_slice::<u8, u64>(bytes)
                .map(|stamps| (stamps[0], stamps[1]))
                .map_err(|err| err.to_string())
        })?;
        let ticks = end.saturating_sub(start);
        if ticks == 0 {
            return Err(LaunchError::Readback {
                what: "timestamps",
                message: "empty timestamp interval".to_string(),
            });
        }
        let nanos = ticks as f64 * f64::from(ts.period_ns);
        Ok(Duration::from_nanos(nanos.round() as u64))
    }

    fn read_mapped<R>(
        &self,
        buffer: &wgpu::Buffer,
        what: &'static str,
        read: impl FnOnce(&[u8]) -> Result<R, String>,
    ) -> Result<R, LaunchError> {
        let slice = buffer.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = sender.send(res);
        });
        self.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|_| LaunchError::Readback {
                what,
                message: "map callback was dropped".to_string(),
            })?
            .map_err(|err| LaunchError::Readback {
                what,
                message: err.to_string(),
            })?;

        let result = {
            let view = slice.get_mapped_range();
            read(&view[..])
        };
        buffer.unmap();
        result.map_err(|message| LaunchError::Readback { what, message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::MatmulKernel;
    use approx::assert_abs_diff_eq;
    use tiletune_kernels::{generate, random_matrix, reference_matmul, verify_product, KernelCandidate};

    fn gpu() -> Option<GpuContext> {
        match GpuContext::acquire(0) {
            Ok(ctx) => Some(ctx),
            Err(err) => {
                eprintln!("skipping GPU test: {err}");
                None
            }
        }
    }

    fn build(ctx: &GpuContext, precision: Precision, tw: u32, unroll: bool) -> CompiledKernel {
        let candidate = KernelCandidate::new(precision, tw, unroll).unwrap();
        ctx.build(&generate(&candidate).unwrap()).expect("kernel builds")
    }

    #[test]
    fn ragged_width_matches_reference_for_every_variant() {
        let Some(ctx) = gpu() else { return };
        let mut rng = fastrand_rng();
        let lhs: Array2<f32> = random_matrix(33, &mut rng);
        let rhs: Array2<f32> = random_matrix(33, &mut rng);
        let expected = reference_matmul(lhs.view(), rhs.view()).unwrap();

        for tw in [8, 16] {
            for unroll in [false, true] {
                let kernel = build(&ctx, Precision::Single, tw, unroll);
                let execution = ctx.run(&kernel, lhs.view(), rhs.view(), false).unwrap();
                assert_eq!(execution.output.dim(), (33, 33));
                assert!(execution.elapsed.is_none());
                verify_product(&expected, &execution.output).expect("within tolerance");
            }
        }
    }

    #[test]
    fn identity_product_is_exact() {
        let Some(ctx) = gpu() else { return };
        let width = 20;
        let identity = Array2::<f32>::eye(width);
        let values = Array2::from_shape_fn((width, width), |(i, j)| (i * width + j) as f32);
        let kernel = build(&ctx, Precision::Single, 8, true);
        let product = ctx.run(&kernel, identity.view(), values.view(), false).unwrap();
        for (a, b) in product.output.iter().zip(values.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 0.0);
        }
    }

    #[test]
    fn timed_launch_reports_duration_and_reuses_buffers() {
        let Some(ctx) = gpu() else { return };
        let mut rng = fastrand_rng();
        let lhs: Array2<f32> = random_matrix(64, &mut rng);
        let rhs: Array2<f32> = random_matrix(64, &mut rng);
        let kernel = build(&ctx, Precision::Single, 16, false);
        let inputs = ctx.upload(lhs.view(), rhs.view()).unwrap();

        for _ in 0..3 {
            let elapsed = ctx.launch(&kernel, &inputs, true).unwrap();
            assert!(elapsed.is_some());
        }
        let output: Array2<f32> = ctx.download(&inputs).unwrap();
        let expected = reference_matmul(lhs.view(), rhs.view()).unwrap();
        verify_product(&expected, &output).unwrap();
    }

    #[test]
    fn double_precision_kernel_matches_reference() {
        let Some(ctx) = gpu() else { return };
        if !ctx.supports(Precision::Double) {
            eprintln!("skipping: adapter lacks SHADER_F64");
            return;
        }
        let mut rng = fastrand_rng();
        let lhs: Array2<f64> = random_matrix(37, &mut rng);
        let rhs: Array2<f64> = random_matrix(37, &mut rng);
        let expected = reference_matmul(lhs.view(), rhs.view()).unwrap();
        let looped = build(&ctx, Precision::Double, 16, false);
        let unrolled = build(&ctx, Precision::Double, 16, true);
        let a = ctx.run(&looped, lhs.view(), rhs.view(), false).unwrap().output;
        let b = ctx.run(&unrolled, lhs.view(), rhs.view(), false).unwrap().output;
        verify_product(&expected, &a).unwrap();
        verify_product(&expected, &b).unwrap();
        verify_product(&a, &b).unwrap();
    }

    #[test]
    fn precision_mismatch_is_rejected() {
        let Some(ctx) = gpu() else { return };
        let kernel = build(&ctx, Precision::Single, 8, false);
        let lhs = Array2::<f64>::zeros((8, 8));
        let err = ctx.run(&kernel, lhs.view(), lhs.view(), false).unwrap_err();
        assert!(matches!(err, LaunchError::PrecisionMismatch { .. }));
    }

    #[test]
    fn non_square_operands_are_rejected() {
        let Some(ctx) = gpu() else { return };
        let lhs = Array2::<f32>::zeros((4, 6));
        let err = ctx.upload(lhs.view(), lhs.view()).err().expect("upload must fail");
        assert!(matches!(err, LaunchError::Shape(_)));
    }

    #[test]
    fn malformed_source_is_a_build_error() {
        let Some(ctx) = gpu() else { return };
        let candidate = KernelCandidate::new(Precision::Single, 8, false).unwrap();
        let good = generate(&candidate).unwrap();
        let broken = good.as_str().replace("workgroupBarrier();", "workgroupBarrier(;");
        let source = tiletune_kernels::GeneratedSource::from_parts(candidate, broken);
        let err = ctx.build(&source).err().expect("build must fail");
        assert_eq!(err.candidate, candidate);
        assert!(err.kernel_source.contains("workgroupBarrier(;"));
    }

    #[test]
    fn write_past_the_output_trips_the_guard() {
        let Some(ctx) = gpu() else { return };
        let candidate = KernelCandidate::new(Precision::Single, 8, false).unwrap();
        let good = generate(&candidate).unwrap();
        let stray = good
            .as_str()
            .replace("P[Row * Width + Col] = Pvalue;", "P[Width * Width + tx] = Pvalue;");
        assert_ne!(stray, good.as_str());
        let source = tiletune_kernels::GeneratedSource::from_parts(candidate, stray);
        let kernel = ctx.build(&source).expect("kernel builds");

        let m = Array2::<f32>::from_elem((8, 8), 1.0);
        let err = ctx.run(&kernel, m.view(), m.view(), false).err().expect("guard must trip");
        assert!(matches!(err, LaunchError::GuardViolated));
    }

    #[test]
    fn facade_compiles_on_demand() {
        let Some(ctx) = gpu() else { return };
        let mut kernel = MatmulKernel::new(&ctx, Precision::Single, 8, true, false).unwrap();
        assert!(!kernel.is_compiled());
        let m = Array2::<f32>::from_elem((10, 10), 1.0);
        assert!(kernel.matmul(m.view(), m.view()).is_err());

        kernel.compile().unwrap();
        let (product, _elapsed) = kernel.matmul_timed(m.view(), m.view()).unwrap();
        assert!(product.iter().all(|v| (*v - 10.0).abs() < 1e-5));
    }

    fn fastrand_rng() -> fastrand::Rng {
        fastrand::Rng::with_seed(0x5eed)
    }
}
