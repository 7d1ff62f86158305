// ============================================================================
// GPU CONTEXT — wgpu Device, Queue, adapter init, readback and timing
// ============================================================================

use std::sync::Arc;
use std::time::Instant;

use bytemuck::Pod;

use crate::error::{FilterError, FilterResult};

/// Explicit handle to the one compute device this process uses.
///
/// Created once at startup and passed to everything that launches work; if
/// creation fails the engine runs the CPU backend instead.
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub adapter_name: String,
    pub backend: wgpu::Backend,
    /// `true` when running on the software fallback adapter.
    pub is_fallback: bool,
    /// Device timestamps are available around compute passes.
    pub timestamps: bool,
    pub max_invocations_per_workgroup: u32,
    pub max_storage_binding: u32,
}

impl GpuContext {
    /// Attempt to create a GPU context.  Tries hardware first, then (when
    /// `allow_fallback`) the software rasterizer adapter.
    ///
    /// We use `pollster::block_on` because the engine is fully synchronous:
    /// every request is a blocking round trip to the device.
    pub fn new(preferred_gpu: &str, allow_fallback: bool) -> Option<Self> {
        if let Some(ctx) = pollster::block_on(Self::new_async(preferred_gpu, false)) {
            return Some(ctx);
        }
        if !allow_fallback {
            return None;
        }
        log::warn!("hardware adapter unavailable, trying software fallback");
        pollster::block_on(Self::new_async(preferred_gpu, true))
    }

    async fn new_async(preferred_gpu: &str, force_fallback: bool) -> Option<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let power = match preferred_gpu.to_lowercase().as_str() {
            "low power" | "integrated" => wgpu::PowerPreference::LowPower,
            "high performance" | "discrete" => wgpu::PowerPreference::HighPerformance,
            _ => wgpu::PowerPreference::HighPerformance,
        };

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: power,
                compatible_surface: None,
                force_fallback_adapter: force_fallback,
            })
            .await?;

        let info = adapter.get_info();
        let limits = adapter.limits();
        let timestamps = adapter.features().contains(wgpu::Features::TIMESTAMP_QUERY);
        let required_features = if timestamps {
            wgpu::Features::TIMESTAMP_QUERY
        } else {
            wgpu::Features::empty()
        };

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("gpuconv device"),
                    required_features,
                    required_limits: wgpu::Limits {
                        max_storage_buffer_binding_size: limits.max_storage_buffer_binding_size,
                        max_buffer_size: limits.max_buffer_size,
                        max_storage_buffers_per_shader_stage: limits.max_storage_buffers_per_shader_stage,
                        max_compute_workgroup_size_x: limits.max_compute_workgroup_size_x,
                        max_compute_workgroup_size_y: limits.max_compute_workgroup_size_y,
                        max_compute_workgroup_size_z: limits.max_compute_workgroup_size_z,
                        max_compute_invocations_per_workgroup: limits.max_compute_invocations_per_workgroup,
                        max_compute_workgroups_per_dimension: limits.max_compute_workgroups_per_dimension,
                        ..wgpu::Limits::downlevel_defaults()
                    },
                },
                None,
            )
            .await
            .ok()?;

        // Errors are captured per launch through error scopes; anything that
        // escapes a scope is logged instead of aborting the process.
        device.on_uncaptured_error(Box::new(|e| {
            log::error!("uncaptured wgpu error: {e}");
        }));

        Some(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_name: info.name,
            backend: info.backend,
            is_fallback: force_fallback,
            timestamps,
            max_invocations_per_workgroup: limits.max_compute_invocations_per_workgroup,
            max_storage_binding: limits.max_storage_buffer_binding_size,
        })
    }

    /// Check a buffer of `bytes` can be bound as one storage binding.
    pub fn check_binding_size(&self, bytes: u64, what: &str) -> FilterResult<()> {
        if bytes > self.max_storage_binding as u64 {
            return Err(FilterError::device(format!(
                "{what} needs {bytes} bytes, device binding limit is {}",
                self.max_storage_binding
            )));
        }
        Ok(())
    }

    /// Submit a single encoder's commands.
    pub fn submit_one(&self, encoder: wgpu::CommandEncoder) {
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    /// Run `f` inside validation and out-of-memory error scopes.  Any error
    /// the device reports while `f` runs turns into `DeviceFailure`.
    pub fn scoped<T>(&self, label: &str, f: impl FnOnce() -> FilterResult<T>) -> FilterResult<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let result = f();
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());
        if let Some(e) = validation.or(oom) {
            return Err(FilterError::device(format!("{label}: {e}")));
        }
        result
    }

    /// Copy `size` bytes of `src` into a mappable staging buffer, wait for
    /// the device and return the contents reinterpreted as `T`.
    pub fn read_buffer<T: Pod>(&self, src: &wgpu::Buffer, size: u64) -> FilterResult<Vec<T>> {
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback_staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("readback_encoder"),
        });
        encoder.copy_buffer_to_buffer(src, 0, &staging, 0, size);
        self.submit_one(encoder);

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(FilterError::device(format!("readback map error: {e:?}"))),
            Err(e) => return Err(FilterError::device(format!("readback channel error: {e:?}"))),
        }

        let mapped = slice.get_mapped_range();
        let out = mapped
            .chunks_exact(std::mem::size_of::<T>())
            .map(bytemuck::pod_read_unaligned::<T>)
            .collect();
        drop(mapped);
        staging.unmap();
        Ok(out)
    }
}

// ============================================================================
// LAUNCH TIMER — device timestamps when available, host clock otherwise
// ============================================================================

/// Measures one compute pass.
///
/// With `TIMESTAMP_QUERY` a begin/end pair is written by the pass itself and
/// resolved after it; the queue's timestamp period converts ticks to ns.
/// Without it the host clock brackets submit → `poll(Wait)`.
pub struct LaunchTimer {
    queries: Option<(wgpu::QuerySet, wgpu::Buffer)>,
    host_start: Option<Instant>,
}

impl LaunchTimer {
    const RESOLVE_BYTES: u64 = 2 * std::mem::size_of::<u64>() as u64;

    pub fn new(ctx: &GpuContext, label: &str) -> Self {
        let queries = ctx.timestamps.then(|| {
            let set = ctx.device.create_query_set(&wgpu::QuerySetDescriptor {
                label: Some(label),
                ty: wgpu::QueryType::Timestamp,
                count: 2,
            });
            let resolve = ctx.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("timestamp_resolve"),
                size: Self::RESOLVE_BYTES,
                usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            });
            (set, resolve)
        });
        Self { queries, host_start: None }
    }

    /// Timestamp writes to attach to the compute pass, if supported.
    pub fn pass_writes(&self) -> Option<wgpu::ComputePassTimestampWrites<'_>> {
        self.queries.as_ref().map(|(set, _)| wgpu::ComputePassTimestampWrites {
            query_set: set,
            beginning_of_pass_write_index: Some(0),
            end_of_pass_write_index: Some(1),
        })
    }

    /// Record the resolve after the pass has been encoded.
    pub fn resolve(&self, encoder: &mut wgpu::CommandEncoder) {
        if let Some((set, resolve)) = &self.queries {
            encoder.resolve_query_set(set, 0..2, resolve, 0);
        }
    }

    /// Call right before submitting the pass.
    pub fn start_host_clock(&mut self) {
        self.host_start = Some(Instant::now());
    }

    /// Elapsed milliseconds.  Must be called after the device has finished.
    pub fn elapsed_ms(&self, ctx: &GpuContext) -> FilterResult<f64> {
        let host_ms = self
            .host_start
            .map(|t| t.elapsed().as_secs_f64() * 1000.0)
            .unwrap_or(0.0);
        let Some((_, resolve)) = &self.queries else {
            return Ok(host_ms);
        };
        let ticks: Vec<u64> = ctx.read_buffer(resolve, Self::RESOLVE_BYTES)?;
        let period_ns = ctx.queue.get_timestamp_period() as f64;
        match ticks.as_slice() {
            [begin, end] if end >= begin => Ok((end - begin) as f64 * period_ns / 1_000_000.0),
            _ => {
                log::debug!("timestamp pair out of order; falling back to host clock");
                Ok(host_ms)
            }
        }
    }
}
