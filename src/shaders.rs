//! Shader management module for loading and compiling WGSL shaders.

use crate::error::{KnnError, Result};
use std::borrow::Cow;

/// Entry point of the distance-matrix kernel.
pub const DISTANCE_ENTRY_POINT: &str = "compute_distances";

/// All shader sources used by the device backend.
pub struct ShaderSources {
    /// Pairwise distance-matrix shader
    pub distance: &'static str,
}

impl Default for ShaderSources {
    fn default() -> Self {
        Self {
            distance: include_str!("shaders/distance.wgsl"),
        }
    }
}

/// Compiled shader modules ready for use in pipelines.
pub struct CompiledShaders {
    /// Pairwise distance-matrix shader module
    pub distance: wgpu::ShaderModule,
}

impl CompiledShaders {
    /// Compiles all shaders for the given device.
    ///
    /// # Errors
    /// Returns an error if a shader source lacks its entry point or the
    /// device rejects the module.
    pub fn compile(device: &wgpu::Device, sources: &ShaderSources) -> Result<Self> {
        validate_shader_entry_points(sources.distance, &[DISTANCE_ENTRY_POINT])?;
        let distance = compile_shader(device, "distance", sources.distance)?;

        Ok(Self { distance })
    }
}

/// Compiles a single shader module, reporting validation failures as errors.
fn compile_shader(device: &wgpu::Device, name: &str, source: &str) -> Result<wgpu::ShaderModule> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(name),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
    });
    if let Some(err) = pollster::block_on(device.pop_error_scope()) {
        return Err(KnnError::ShaderError(format!("{}: {}", name, err)));
    }

    Ok(module)
}

/// Validates that a shader source contains expected entry points.
pub fn validate_shader_entry_points(source: &str, expected: &[&str]) -> Result<()> {
    for entry_point in expected {
        if !source.contains(&format!("fn {}", entry_point)) {
            return Err(KnnError::ShaderError(format!(
                "Missing entry point '{}' in shader",
                entry_point
            )));
        }
    }
    Ok(())
}
