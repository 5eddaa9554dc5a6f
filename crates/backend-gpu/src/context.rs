//! Scoped acquisition of a wgpu device for a tuning run.
//!
//! A [`GpuContext`] owns the device, its queue and the bind group layout that
//! every generated matmul kernel shares. Dropping the context waits for
//! outstanding work and releases all device resources.

use crate::error::DeviceError;
use pollster::block_on;
use serde::Serialize;
use std::num::NonZeroU64;
use tiletune_kernels::Precision;
use tracing::{debug, error, info};

pub(crate) const TIMESTAMP_BYTES: u64 = 2 * std::mem::size_of::<u64>() as u64;

/// Information about the GPU device.
#[derive(Debug, Clone, Serialize)]
pub struct GpuDeviceInfo {
    pub index: usize,
    pub name: String,
    pub backend: String,
    pub device_type: String,
    pub supports_timestamps: bool,
    pub supports_f64: bool,
}

impl GpuDeviceInfo {
    fn from_adapter(index: usize, adapter: &wgpu::Adapter) -> Self {
        let adapter_info = adapter.get_info();
        let features = adapter.features();
        Self {
            index,
            name: adapter_info.name,
            backend: format!("{:?}", adapter_info.backend),
            device_type: format!("{:?}", adapter_info.device_type),
            supports_timestamps: features.contains(wgpu::Features::TIMESTAMP_QUERY),
            supports_f64: features.contains(wgpu::Features::SHADER_F64),
        }
    }
}

pub(crate) struct TimestampQueries {
    pub(crate) query_set: wgpu::QuerySet,
    pub(crate) resolve: wgpu::Buffer,
    pub(crate) staging: wgpu::Buffer,
    pub(crate) period_ns: f32,
}

pub struct GpuContext {
    pub(crate) device: wgpu::Device,
    pub(crate) queue: wgpu::Queue,
    pub(crate) limits: wgpu::Limits,
    pub(crate) bind_group_layout: wgpu::BindGroupLayout,
    pub(crate) pipeline_layout: wgpu::PipelineLayout,
    pub(crate) timestamps: Option<TimestampQueries>,
    info: GpuDeviceInfo,
}

fn enumerate_adapters() -> Vec<wgpu::Adapter> {
    let instance = wgpu::Instance::default();
    instance
        .enumerate_adapters(wgpu::Backends::all())
        .into_iter()
        .collect()
}

impl GpuContext {
    /// Lists every adapter visible to wgpu, in selection order.
    pub fn list_devices() -> Vec<GpuDeviceInfo> {
        enumerate_adapters()
            .iter()
            .enumerate()
            .map(|(index, adapter)| GpuDeviceInfo::from_adapter(index, adapter))
            .collect()
    }

    /// Opens the adapter at `device_index` with the widest limits it offers.
    pub fn acquire(device_index: usize) -> Result<Self, DeviceError> {
        let adapters = enumerate_adapters();
        let available = adapters.len();
        let adapter = adapters
            .into_iter()
            .nth(device_index)
            .ok_or(DeviceError::NoAdapter {
                index: device_index,
                available,
            })?;

        let info = GpuDeviceInfo::from_adapter(device_index, &adapter);
        let mut required_features = wgpu::Features::empty();
        if info.supports_timestamps {
            required_features |= wgpu::Features::TIMESTAMP_QUERY;
        }
        if info.supports_f64 {
            required_features |= wgpu::Features::SHADER_F64;
        }
        let limits = adapter.limits();

        let (device, queue) = block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("tiletune device"),
                required_features,
                required_limits: limits.clone(),
            },
            None,
        ))?;

        device.on_uncaptured_error(Box::new(|err: wgpu::Error| {
            error!(error = %err, "uncaptured GPU error");
        }));

        let timestamps = info.supports_timestamps.then(|| TimestampQueries {
            query_set: device.create_query_set(&wgpu::QuerySetDescriptor {
                label: Some("timestamp_queries"),
                ty: wgpu::QueryType::Timestamp,
                count: 2,
            }),
            resolve: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("timestamp_resolve"),
                size: TIMESTAMP_BYTES,
                usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            }),
            staging: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("timestamp_staging"),
                size: TIMESTAMP_BYTES,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
            period_ns: queue.get_timestamp_period(),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("matmul_layout"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, true),
                storage_entry(2, false),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: NonZeroU64::new(
                            std::mem::size_of::<crate::runtime::ShaderParams>() as u64,
                        ),
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("matmul_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        info!(
            device = %info.name,
            backend = %info.backend,
            timestamps = info.supports_timestamps,
            f64 = info.supports_f64,
            "acquired GPU context"
        );

        Ok(Self {
            device,
            queue,
            limits,
            bind_group_layout,
            pipeline_layout,
            timestamps,
            info,
        })
    }

    pub fn info(&self) -> &GpuDeviceInfo {
        &self.info
    }

    pub fn limits(&self) -> &wgpu::Limits {
        &self.limits
    }

    pub fn supports(&self, precision: Precision) -> bool {
        match precision {
            Precision::Single => true,
            Precision::Double => self.info.supports_f64,
        }
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        self.device.poll(wgpu::Maintain::Wait);
        debug!(device = %self.info.name, "released GPU context");
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}
