//! Device-offloaded distance computation using a wgpu compute shader.
//!
//! Dispatch validates its inputs synchronously, uploads the buffers, submits
//! the work and returns immediately with a [`PendingDistances`] handle. The
//! distance matrix only exists once the handle has been awaited; failures the
//! device reports after submission surface there as well. Top-k selection of
//! a [`PendingSearch`] runs on the host after readback.

use crate::{
    cpu::{validate_k, validate_pair},
    device::{GpuContext, WORKGROUP_SIDE},
    error::{KnnError, Result},
    metric::Metric,
    select::select_neighbours,
    shaders::{CompiledShaders, ShaderSources, DISTANCE_ENTRY_POINT},
    types::{DistanceMatrix, DistanceParams, NeighbourIndices, PointSet, QuerySet},
};
use bytemuck::cast_slice;
use futures::channel::oneshot;
use log::{debug, info};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use wgpu::util::DeviceExt;

type ErrorScope = Pin<Box<dyn Future<Output = Option<wgpu::Error>> + Send>>;

/// Device KNN compute engine.
pub struct KnnCompute {
    /// GPU context
    context: GpuContext,
    /// Distance-matrix pipeline
    pipeline: wgpu::ComputePipeline,
}

impl KnnCompute {
    /// Creates a new compute engine, compiling the distance shader.
    ///
    /// # Errors
    /// Returns an error if the shader or pipeline cannot be created.
    pub fn new(context: GpuContext) -> Result<Self> {
        let start = Instant::now();
        let shaders = CompiledShaders::compile(&context.device, &ShaderSources::default())?;
        let pipeline = create_pipeline(&context.device, &shaders)?;
        info!(
            "Distance pipeline ready on {} in {:.2} ms",
            context.adapter_info.name,
            start.elapsed().as_secs_f32() * 1000.0
        );

        Ok(Self { context, pipeline })
    }

    /// The GPU context this engine dispatches to.
    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    /// Submits the distance computation and returns without waiting for it.
    ///
    /// # Errors
    /// Input validation and device-limit errors are reported here, before
    /// anything is uploaded.
    pub fn dispatch_distances(
        &self,
        queries: &QuerySet,
        reference: &PointSet,
        metric: Metric,
    ) -> Result<PendingDistances> {
        validate_pair(queries, reference)?;
        let (n_queries, n_reference, dim) = (queries.len(), reference.len(), queries.dim());
        self.context.supports_shape(n_queries, n_reference, dim)?;

        let params = DistanceParams {
            n_queries: shader_u32(n_queries)?,
            n_reference: shader_u32(n_reference)?,
            dim: shader_u32(dim)?,
            metric: metric.shader_code(),
        };
        let output_size = (n_queries * n_reference * std::mem::size_of::<f32>()) as u64;
        debug!(
            "Dispatching {}x{} {} distances (d={}, {} bytes)",
            n_queries, n_reference, metric, dim, output_size
        );

        let device = &self.context.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let query_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Query Buffer"),
            contents: cast_slice(queries.as_slice()),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let reference_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Reference Buffer"),
            contents: cast_slice(reference.as_slice()),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let distances_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Distances Buffer"),
            size: output_size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Distance Params Uniform"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let staging_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Distances Staging Buffer"),
            size: output_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Distance Bind Group"),
            layout: &self.pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: query_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: reference_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: distances_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: params_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Distance Encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Distance Compute Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(
                params.n_reference.div_ceil(WORKGROUP_SIDE),
                params.n_queries.div_ceil(WORKGROUP_SIDE),
                1,
            );
        }
        encoder.copy_buffer_to_buffer(&distances_buffer, 0, &staging_buffer, 0, output_size);
        self.context.queue.submit(Some(encoder.finish()));

        let (tx, rx) = oneshot::channel();
        staging_buffer
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                // The receiver is gone only if the handle was dropped unawaited.
                let _ = tx.send(result);
            });
        let error_scope: ErrorScope = Box::pin(device.pop_error_scope());

        Ok(PendingDistances {
            device: Arc::clone(&self.context.device),
            staging_buffer,
            mapped: rx,
            error_scope,
            n_queries,
            n_reference,
            submitted_at: Instant::now(),
        })
    }

    /// Submits a full search. Selection happens when the handle is awaited.
    pub fn dispatch_search(
        &self,
        queries: &QuerySet,
        reference: &PointSet,
        k: usize,
        metric: Metric,
    ) -> Result<PendingSearch> {
        validate_pair(queries, reference)?;
        validate_k(k, reference)?;
        let distances = self.dispatch_distances(queries, reference, metric)?;
        Ok(PendingSearch { distances, k })
    }

    /// Dispatches and awaits the distance matrix.
    pub async fn compute_distances(
        &self,
        queries: &QuerySet,
        reference: &PointSet,
        metric: Metric,
    ) -> Result<DistanceMatrix> {
        self.dispatch_distances(queries, reference, metric)?
            .wait()
            .await
    }

    /// Dispatches and awaits a search.
    pub async fn search(
        &self,
        queries: &QuerySet,
        reference: &PointSet,
        k: usize,
        metric: Metric,
    ) -> Result<NeighbourIndices> {
        self.dispatch_search(queries, reference, k, metric)?
            .wait()
            .await
    }
}

/// Handle to a distance matrix still being computed on the device.
///
/// Nothing about the result is observable until [`PendingDistances::wait`]
/// (or [`PendingDistances::wait_blocking`]) returns, so timings taken around
/// the wait cover the whole device computation.
#[must_use = "device results must be awaited before use"]
pub struct PendingDistances {
    device: Arc<wgpu::Device>,
    staging_buffer: wgpu::Buffer,
    mapped: oneshot::Receiver<std::result::Result<(), wgpu::BufferAsyncError>>,
    error_scope: ErrorScope,
    n_queries: usize,
    n_reference: usize,
    submitted_at: Instant,
}

impl PendingDistances {
    /// `(n_queries, n_reference)` of the eventual result.
    pub fn shape(&self) -> (usize, usize) {
        (self.n_queries, self.n_reference)
    }

    /// Blocks until the device finishes, then reads the matrix back.
    ///
    /// # Errors
    /// Validation errors raised by the device for this dispatch, polling
    /// failures and buffer-mapping failures are all reported here.
    pub async fn wait(self) -> Result<DistanceMatrix> {
        if let Some(err) = self.error_scope.await {
            return Err(KnnError::WgpuError(err));
        }
        self.device
            .poll(wgpu::PollType::Wait)
            .map_err(|e| KnnError::ComputeError(format!("Failed to poll device: {}", e)))?;
        self.mapped
            .await
            .map_err(|_| KnnError::TransferError("map callback dropped".to_string()))??;

        let data: Vec<f32> = {
            let view = self.staging_buffer.slice(..).get_mapped_range();
            cast_slice(&view).to_vec()
        };
        self.staging_buffer.unmap();

        info!(
            "Device distances {}x{} ready after {:.2} ms",
            self.n_queries,
            self.n_reference,
            self.submitted_at.elapsed().as_secs_f32() * 1000.0
        );
        DistanceMatrix::from_vec(data, self.n_queries, self.n_reference)
    }

    /// [`PendingDistances::wait`] driven to completion on the current thread.
    pub fn wait_blocking(self) -> Result<DistanceMatrix> {
        pollster::block_on(self.wait())
    }
}

/// Handle to a search whose distances are still being computed on the device.
#[must_use = "device results must be awaited before use"]
pub struct PendingSearch {
    distances: PendingDistances,
    k: usize,
}

impl PendingSearch {
    /// `(n_queries, k)` of the eventual result.
    pub fn shape(&self) -> (usize, usize) {
        (self.distances.n_queries, self.k)
    }

    /// Waits for the distances and selects the `k` nearest per query.
    pub async fn wait(self) -> Result<NeighbourIndices> {
        let distances = self.distances.wait().await?;
        select_neighbours(&distances, self.k)
    }

    /// [`PendingSearch::wait`] driven to completion on the current thread.
    pub fn wait_blocking(self) -> Result<NeighbourIndices> {
        pollster::block_on(self.wait())
    }
}

fn shader_u32(value: usize) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| KnnError::NotSupported(format!("{} exceeds 32-bit shader indexing", value)))
}

/// Creates the distance compute pipeline.
fn create_pipeline(device: &wgpu::Device, shaders: &CompiledShaders) -> Result<wgpu::ComputePipeline> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some("Distance Pipeline"),
        layout: None,
        module: &shaders.distance,
        entry_point: Some(DISTANCE_ENTRY_POINT),
        compilation_options: Default::default(),
        cache: None,
    });
    if let Some(err) = pollster::block_on(device.pop_error_scope()) {
        return Err(KnnError::ShaderError(format!("pipeline creation failed: {}", err)));
    }

    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shader_index_limits() {
        assert_eq!(shader_u32(7).unwrap(), 7);
        assert!(matches!(
            shader_u32(u32::MAX as usize + 1),
            Err(KnnError::NotSupported(_))
        ));
    }

    #[test]
    fn test_dispatch_validates_before_upload() {
        let Ok(gpu) = pollster::block_on(GpuContext::new()) else {
            eprintln!("no GPU adapter, skipping");
            return;
        };
        let engine = KnnCompute::new(gpu).unwrap();
        let reference = PointSet::from_rows(&[[0.0, 0.0], [1.0, 1.0]]).unwrap();
        let queries = PointSet::from_rows(&[[0.0, 0.0, 0.0]]).unwrap();
        assert!(matches!(
            engine.dispatch_distances(&queries, &reference, Metric::Euclidean),
            Err(KnnError::DimensionMismatch { .. })
        ));
        let queries = PointSet::from_rows(&[[0.5, 0.5]]).unwrap();
        assert!(matches!(
            engine.dispatch_search(&queries, &reference, 3, Metric::Euclidean),
            Err(KnnError::InvalidK { k: 3, n_reference: 2 })
        ));
    }
}
