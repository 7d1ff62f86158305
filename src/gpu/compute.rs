// ============================================================================
// GPU COMPUTE FILTERS — convolution, two-stage Sobel, box mean, highlight
// ============================================================================
//
// Programs are compiled once in `GpuPrograms::new` and are read-only after
// that.  Every `run_*` call owns its buffers for exactly one launch:
// allocate → upload → dispatch → wait → read back → drop.

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use super::context::{GpuContext, LaunchTimer};
use super::shaders;
use super::{normalization_divisor, KernelBackend, LaunchGeometry, SobelRun, WorkgroupSize, DEFAULT_WORKGROUP};
use crate::error::{FilterError, FilterResult};
use crate::ops::masks::Mask;
use crate::raster::{GrayF32, GrayU8, Raster, RgbU8};

// ============================================================================
// SHARED HELPERS
// ============================================================================

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ImageParams {
    width: u32,
    height: u32,
    ksize: u32,
    _pad0: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct SobelParams {
    width: u32,
    height: u32,
    ksize: u32,
    max_val: f32,
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

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Upload `contents` as a read-only storage buffer.
fn storage_input(device: &wgpu::Device, label: &str, contents: &[u8]) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents,
        usage: wgpu::BufferUsages::STORAGE,
    })
}

/// Writable storage buffer that can be copied back to the host.
fn storage_output(device: &wgpu::Device, label: &str, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        mapped_at_creation: false,
    })
}

fn uniform<T: Pod>(device: &wgpu::Device, label: &str, value: &T) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: bytemuck::bytes_of(value),
        usage: wgpu::BufferUsages::UNIFORM,
    })
}

fn bind_group(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::BindGroupLayout,
    buffers: &[(u32, &wgpu::Buffer)],
) -> wgpu::BindGroup {
    let entries: Vec<wgpu::BindGroupEntry> = buffers
        .iter()
        .map(|(binding, buf)| wgpu::BindGroupEntry {
            binding: *binding,
            resource: buf.as_entire_binding(),
        })
        .collect();
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &entries,
    })
}

/// Widen a byte plane to one u32 per sample.
fn widen(data: &[u8]) -> Vec<u32> {
    data.iter().map(|&v| v as u32).collect()
}

/// Pack interleaved RGB bytes as 0x00BBGGRR, one word per pixel.
fn pack_rgb(data: &[u8]) -> Vec<u32> {
    data.chunks_exact(3)
        .map(|p| p[0] as u32 | (p[1] as u32) << 8 | (p[2] as u32) << 16)
        .collect()
}

fn unpack_rgb(words: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(words.len() * 3);
    for &w in words {
        out.push((w & 0xff) as u8);
        out.push(((w >> 8) & 0xff) as u8);
        out.push(((w >> 16) & 0xff) as u8);
    }
    out
}

/// One compiled entry point and the layout its bind groups must match.
struct Program {
    pipeline: wgpu::ComputePipeline,
    bgl: wgpu::BindGroupLayout,
}

impl Program {
    fn new(
        device: &wgpu::Device,
        label: &str,
        module: &wgpu::ShaderModule,
        entry_point: &str,
        entries: &[wgpu::BindGroupLayoutEntry],
    ) -> Self {
        let bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries,
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &[&bgl],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(label),
            layout: Some(&layout),
            module,
            entry_point,
            compilation_options: Default::default(),
        });
        Self { pipeline, bgl }
    }
}

// ============================================================================
// PROGRAM SET
// ============================================================================

/// The four device programs, compiled for 16×16 blocks.
pub struct GpuPrograms {
    ctx: GpuContext,
    convolve: Program,
    sobel_magnitude: Program,
    sobel_normalize: Program,
    mean: Program,
    highlight: Program,
}

impl GpuPrograms {
    /// Compile every program.  Fails if a 16×16 block exceeds the device limit
    /// or the device rejects a program.
    pub fn new(ctx: GpuContext) -> FilterResult<Self> {
        let workgroup = DEFAULT_WORKGROUP;
        if workgroup.total() > ctx.max_invocations_per_workgroup {
            return Err(FilterError::invalid(format!(
                "workgroup {}x{} exceeds the device limit of {} invocations",
                workgroup.x, workgroup.y, ctx.max_invocations_per_workgroup
            )));
        }

        let programs = ctx.scoped("program compilation", || {
            let device = &ctx.device;
            let module = |label: &str, src: &str| {
                device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(label),
                    source: wgpu::ShaderSource::Wgsl(shaders::specialize(src, workgroup).into()),
                })
            };

            let conv_mod = module("convolve_shader", shaders::CONVOLVE_SHADER);
            let sobel_mod = module("sobel_shader", shaders::SOBEL_SHADER);
            let mean_mod = module("mean_shader", shaders::MEAN_SHADER);
            let hl_mod = module("highlight_shader", shaders::HIGHLIGHT_SHADER);

            let convolve = Program::new(
                device,
                "convolve",
                &conv_mod,
                "cs_convolve",
                &[storage_entry(0, true), storage_entry(1, false), storage_entry(2, true), uniform_entry(3)],
            );
            let sobel_magnitude = Program::new(
                device,
                "sobel_magnitude",
                &sobel_mod,
                "cs_sobel_magnitude",
                &[
                    storage_entry(0, true),
                    storage_entry(1, false),
                    storage_entry(2, true),
                    storage_entry(3, true),
                    uniform_entry(4),
                ],
            );
            let sobel_normalize = Program::new(
                device,
                "sobel_normalize",
                &sobel_mod,
                "cs_sobel_normalize",
                &[storage_entry(1, false), uniform_entry(4), storage_entry(5, false)],
            );
            let mean = Program::new(
                device,
                "mean",
                &mean_mod,
                "cs_mean",
                &[storage_entry(0, true), storage_entry(1, false), uniform_entry(2)],
            );
            let highlight = Program::new(
                device,
                "highlight",
                &hl_mod,
                "cs_highlight",
                &[storage_entry(0, true), storage_entry(1, false), uniform_entry(2)],
            );
            Ok((convolve, sobel_magnitude, sobel_normalize, mean, highlight))
        })?;

        let (convolve, sobel_magnitude, sobel_normalize, mean, highlight) = programs;
        log::info!(
            "compiled filter programs on '{}' ({:?}{}), workgroup {}x{}, timestamps: {}",
            ctx.adapter_name,
            ctx.backend,
            if ctx.is_fallback { ", software" } else { "" },
            workgroup.x,
            workgroup.y,
            ctx.timestamps
        );

        Ok(Self { ctx, convolve, sobel_magnitude, sobel_normalize, mean, highlight })
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    /// Encode one pass over `geom`, submit, wait, and return its time.
    fn launch(&self, label: &str, program: &Program, bg: &wgpu::BindGroup, geom: LaunchGeometry) -> FilterResult<f64> {
        let mut timer = LaunchTimer::new(&self.ctx, label);
        let mut encoder = self.ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(label),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(label),
                timestamp_writes: timer.pass_writes(),
            });
            pass.set_pipeline(&program.pipeline);
            pass.set_bind_group(0, bg, &[]);
            pass.dispatch_workgroups(geom.blocks_x, geom.blocks_y, 1);
        }
        timer.resolve(&mut encoder);
        timer.start_host_clock();
        self.ctx.submit_one(encoder);
        self.ctx.device.poll(wgpu::Maintain::Wait);
        timer.elapsed_ms(&self.ctx)
    }

    fn image_params(width: u32, height: u32, ksize: u32) -> ImageParams {
        ImageParams { width, height, ksize, _pad0: 0 }
    }
}

impl KernelBackend for GpuPrograms {
    fn name(&self) -> &str {
        &self.ctx.adapter_name
    }

    fn workgroup(&self) -> WorkgroupSize {
        DEFAULT_WORKGROUP
    }

    fn run_convolution(&self, src: &GrayF32, mask: &Mask, geom: LaunchGeometry) -> FilterResult<(GrayF32, f64)> {
        let (w, h) = (src.width(), src.height());
        let bytes = (src.len() * std::mem::size_of::<f32>()) as u64;
        self.ctx.check_binding_size(bytes, "convolution plane")?;

        self.ctx.scoped("convolution", || {
            let device = &self.ctx.device;
            let d_in = storage_input(device, "conv_in", bytemuck::cast_slice(src.data()));
            let d_out = storage_output(device, "conv_out", bytes);
            let d_mask = storage_input(device, "conv_mask", bytemuck::cast_slice(mask.weights()));
            let d_params = uniform(device, "conv_params", &Self::image_params(w, h, mask.size() as u32));

            let bg = bind_group(
                device,
                "conv_bg",
                &self.convolve.bgl,
                &[(0, &d_in), (1, &d_out), (2, &d_mask), (3, &d_params)],
            );
            let ms = self.launch("convolve", &self.convolve, &bg, geom)?;
            let out: Vec<f32> = self.ctx.read_buffer(&d_out, bytes)?;
            Ok((Raster::from_vec(w, h, 1, out)?, ms))
        })
    }

    fn run_sobel(&self, src: &GrayU8, kx: &Mask, ky: &Mask, geom: LaunchGeometry) -> FilterResult<SobelRun> {
        if kx.size() != ky.size() {
            return Err(FilterError::invalid("sobel masks must have the same size"));
        }
        let (w, h) = (src.width(), src.height());
        let bytes = (src.len() * std::mem::size_of::<u32>()) as u64;
        self.ctx.check_binding_size(bytes, "sobel plane")?;

        self.ctx.scoped("sobel", || {
            let device = &self.ctx.device;
            let ksize = kx.size() as u32;

            // Phase 1: gradient magnitude into a float buffer.
            let d_gray = storage_input(device, "sobel_in", bytemuck::cast_slice(&widen(src.data())));
            let d_mag = storage_output(device, "sobel_mag", bytes);
            let d_kx = storage_input(device, "sobel_kx", bytemuck::cast_slice(kx.weights()));
            let d_ky = storage_input(device, "sobel_ky", bytemuck::cast_slice(ky.weights()));
            let stage1 = SobelParams { width: w, height: h, ksize, max_val: 1.0 };
            let d_params1 = uniform(device, "sobel_params_mag", &stage1);

            let bg1 = bind_group(
                device,
                "sobel_mag_bg",
                &self.sobel_magnitude.bgl,
                &[(0, &d_gray), (1, &d_mag), (2, &d_kx), (3, &d_ky), (4, &d_params1)],
            );
            let magnitude_ms = self.launch("sobel_magnitude", &self.sobel_magnitude, &bg1, geom)?;

            // Barrier: global max on the host.
            let mag_host: Vec<f32> = self.ctx.read_buffer(&d_mag, bytes)?;
            let max_magnitude = normalization_divisor(&mag_host);

            // Phase 2: rescale with the scalar.
            let d_out = storage_output(device, "sobel_out", bytes);
            let stage2 = SobelParams { max_val: max_magnitude, ..stage1 };
            let d_params2 = uniform(device, "sobel_params_norm", &stage2);
            let bg2 = bind_group(
                device,
                "sobel_norm_bg",
                &self.sobel_normalize.bgl,
                &[(1, &d_mag), (4, &d_params2), (5, &d_out)],
            );
            let normalize_ms = self.launch("sobel_normalize", &self.sobel_normalize, &bg2, geom)?;

            let out: Vec<u32> = self.ctx.read_buffer(&d_out, bytes)?;
            let output = Raster::from_vec(w, h, 1, out.into_iter().map(|v| v as u8).collect())?;
            Ok(SobelRun { output, max_magnitude, magnitude_ms, normalize_ms })
        })
    }

    fn run_mean(&self, src: &GrayU8, kernel_size: u32, geom: LaunchGeometry) -> FilterResult<(GrayU8, f64)> {
        let (w, h) = (src.width(), src.height());
        let bytes = (src.len() * std::mem::size_of::<u32>()) as u64;
        self.ctx.check_binding_size(bytes, "mean plane")?;

        self.ctx.scoped("mean", || {
            let device = &self.ctx.device;
            let d_in = storage_input(device, "mean_in", bytemuck::cast_slice(&widen(src.data())));
            let d_out = storage_output(device, "mean_out", bytes);
            let d_params = uniform(device, "mean_params", &Self::image_params(w, h, kernel_size));

            let bg = bind_group(device, "mean_bg", &self.mean.bgl, &[(0, &d_in), (1, &d_out), (2, &d_params)]);
            let ms = self.launch("mean", &self.mean, &bg, geom)?;
            let out: Vec<u32> = self.ctx.read_buffer(&d_out, bytes)?;
            Ok((Raster::from_vec(w, h, 1, out.into_iter().map(|v| v as u8).collect())?, ms))
        })
    }

    fn run_color_highlight(&self, src: &RgbU8, geom: LaunchGeometry) -> FilterResult<(RgbU8, f64)> {
        if src.channels() != 3 {
            return Err(FilterError::invalid("color highlight needs an RGB image"));
        }
        let (w, h) = (src.width(), src.height());
        let bytes = (w as u64) * (h as u64) * std::mem::size_of::<u32>() as u64;
        self.ctx.check_binding_size(bytes, "highlight image")?;

        self.ctx.scoped("highlight", || {
            let device = &self.ctx.device;
            let d_in = storage_input(device, "hl_in", bytemuck::cast_slice(&pack_rgb(src.data())));
            let d_out = storage_output(device, "hl_out", bytes);
            let d_params = uniform(device, "hl_params", &Self::image_params(w, h, 0));

            let bg = bind_group(device, "hl_bg", &self.highlight.bgl, &[(0, &d_in), (1, &d_out), (2, &d_params)]);
            let ms = self.launch("highlight", &self.highlight, &bg, geom)?;
            let out: Vec<u32> = self.ctx.read_buffer(&d_out, bytes)?;
            Ok((Raster::from_vec(w, h, 3, unpack_rgb(&out))?, ms))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb_packing_round_trips_pixels() {
        let rgb = [1u8, 2, 3, 250, 128, 0];
        let packed = pack_rgb(&rgb);
        assert_eq!(packed, vec![0x0003_0201, 0x0000_80fa]);
        assert_eq!(unpack_rgb(&packed), rgb.to_vec());
    }

    #[test]
    fn params_are_sixteen_bytes() {
        assert_eq!(std::mem::size_of::<ImageParams>(), 16);
        assert_eq!(std::mem::size_of::<SobelParams>(), 16);
    }
}
