//! GPU device management and initialization.
//!
//! This module handles the creation of wgpu devices and checks whether a
//! given distance-matrix shape fits the selected device's limits.

use crate::error::{KnnError, Result};
use log::{debug, info};
use std::sync::Arc;

/// Threads per workgroup along each axis of the distance kernel.
pub const WORKGROUP_SIDE: u32 = 16;

/// GPU device context containing all resources needed for compute operations.
#[derive(Clone)]
pub struct GpuContext {
    /// The wgpu device for creating GPU resources
    pub device: Arc<wgpu::Device>,
    /// The command queue for submitting GPU work
    pub queue: Arc<wgpu::Queue>,
    /// Information about the selected adapter
    pub adapter_info: wgpu::AdapterInfo,
    /// Configured limits for this device
    pub limits: wgpu::Limits,
}

impl GpuContext {
    /// Creates a new GPU context with the best available adapter.
    ///
    /// Discrete GPUs are preferred, then integrated, virtual and software
    /// adapters.
    ///
    /// # Errors
    /// Returns an error if no suitable GPU adapter is found or device creation fails.
    pub async fn new() -> Result<Self> {
        let instance = create_instance();
        let adapter = select_best_adapter(&instance).await?;

        Self::from_adapter(adapter).await
    }

    /// Creates a GPU context from a specific adapter.
    ///
    /// This is useful when you want to control adapter selection manually.
    pub async fn from_adapter(adapter: wgpu::Adapter) -> Result<Self> {
        let adapter_info = adapter.get_info();
        info!(
            "Selected GPU adapter: {} ({:?})",
            adapter_info.name, adapter_info.device_type
        );

        // The distance kernel needs nothing beyond what the adapter offers by default.
        let required_limits = adapter.limits();

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("KNN Compute Device"),
                required_features: wgpu::Features::empty(),
                required_limits,
                memory_hints: wgpu::MemoryHints::Performance,
                trace: Default::default(),
            })
            .await
            .map_err(|e| KnnError::GpuInitError(format!("Failed to create device: {}", e)))?;

        let limits = device.limits();
        debug!("Device limits: {:?}", limits);

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_info,
            limits,
        })
    }

    /// Largest number of `f32` elements a single storage binding can hold.
    pub fn max_binding_elements(&self) -> u64 {
        u64::from(self.limits.max_storage_buffer_binding_size).min(self.limits.max_buffer_size) / 4
    }

    /// Checks that a `(n_queries, n_reference, dim)` request fits this device.
    pub fn supports_shape(&self, n_queries: usize, n_reference: usize, dim: usize) -> Result<()> {
        let max_elements = self.max_binding_elements();
        let output = (n_queries as u64) * (n_reference as u64);
        let largest_input = (n_queries.max(n_reference) as u64) * dim as u64;

        if output > u64::from(u32::MAX) {
            return Err(KnnError::NotSupported(format!(
                "{}x{} distances exceed 32-bit shader indexing",
                n_queries, n_reference
            )));
        }
        if output > max_elements || largest_input > max_elements {
            return Err(KnnError::NotSupported(format!(
                "Request needs {} elements per buffer but device only binds {}",
                output.max(largest_input),
                max_elements
            )));
        }

        let max_groups = u64::from(self.limits.max_compute_workgroups_per_dimension);
        let groups_x = (n_reference as u64).div_ceil(u64::from(WORKGROUP_SIDE));
        let groups_y = (n_queries as u64).div_ceil(u64::from(WORKGROUP_SIDE));
        if groups_x > max_groups || groups_y > max_groups {
            return Err(KnnError::NotSupported(format!(
                "Dispatch of {}x{} workgroups exceeds device limit of {}",
                groups_x, groups_y, max_groups
            )));
        }

        Ok(())
    }

    /// Gets a human-readable description of the GPU device.
    pub fn device_description(&self) -> String {
        format!(
            "{} ({:?}, driver: {})",
            self.adapter_info.name, self.adapter_info.device_type, self.adapter_info.driver
        )
    }
}

/// Creates a wgpu instance with appropriate backends for the platform.
fn create_instance() -> wgpu::Instance {
    wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    })
}

/// Selects the best available adapter for compute workloads.
async fn select_best_adapter(instance: &wgpu::Instance) -> Result<wgpu::Adapter> {
    // First try to get a high-performance (discrete) GPU
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            compatible_surface: None,
        })
        .await;

    if let Ok(adapter) = adapter {
        let info = adapter.get_info();
        if matches!(info.device_type, wgpu::DeviceType::DiscreteGpu) {
            return Ok(adapter);
        }
    }

    // If no discrete GPU, try any available adapter
    let adapter = instance
        .enumerate_adapters(wgpu::Backends::all())
        .into_iter()
        .max_by_key(|adapter| adapter_rank(adapter.get_info().device_type));

    adapter.ok_or_else(|| KnnError::GpuInitError("No suitable GPU adapter found".to_string()))
}

fn adapter_rank(device_type: wgpu::DeviceType) -> u8 {
    match device_type {
        wgpu::DeviceType::DiscreteGpu => 3,
        wgpu::DeviceType::IntegratedGpu => 2,
        wgpu::DeviceType::VirtualGpu => 1,
        wgpu::DeviceType::Other => 1,
        wgpu::DeviceType::Cpu => 0,
    }
}
