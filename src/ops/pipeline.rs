// ============================================================================
// PIPELINE SELECTOR — filter name + kernel size → views, dispatch, post-process
// ============================================================================
//
//   filter    view            buffer  channels            post-process
//   sobel     grayscale       u8      single              none
//   gaussian  RGB             f32     3 × single          clamp, round to u8
//   emboss    grayscale       f32     single              +128, clamp, round
//   mean      RGB             u8      3 × single          none
//   ups       RGB             u8      pointwise RGB       optional overlay
//
// All validation happens before the dispatch guard is taken, so a rejected
// request never touches the device.

use std::path::Path;
use std::sync::Mutex;

use image::DynamicImage;
use serde::Serialize;

use crate::config::{BackendChoice, EngineConfig};
use crate::error::{FilterError, FilterResult};
use crate::gpu::{GpuContext, GpuPrograms, KernelBackend, LaunchGeometry, WorkgroupSize, DEFAULT_WORKGROUP};
use crate::io::{self, ColorMode};
use crate::ops::cpu::CpuBackend;
use crate::ops::masks::{self, BuiltMask, KernelPreview, Mask};
use crate::ops::overlay::Overlay;
use crate::raster::{Raster, RgbU8};

/// Filters the engine can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    Sobel,
    Gaussian,
    Emboss,
    Mean,
    Ups,
}

impl FilterKind {
    pub const ALL: [FilterKind; 5] = [
        FilterKind::Sobel,
        FilterKind::Gaussian,
        FilterKind::Emboss,
        FilterKind::Mean,
        FilterKind::Ups,
    ];

    /// Case-insensitive lookup; unknown names are an `InvalidParameter`.
    pub fn from_name(name: &str) -> FilterResult<Self> {
        let lower = name.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|k| k.name() == lower)
            .ok_or_else(|| {
                FilterError::invalid(format!(
                    "filter_type must be one of 'gaussian', 'sobel', 'emboss', 'mean' or 'ups' (got '{name}')"
                ))
            })
    }

    pub fn name(self) -> &'static str {
        match self {
            FilterKind::Sobel => "sobel",
            FilterKind::Gaussian => "gaussian",
            FilterKind::Emboss => "emboss",
            FilterKind::Mean => "mean",
            FilterKind::Ups => "ups",
        }
    }

    /// Colour layout the filter's input view is decoded in.
    pub fn color_mode(self) -> ColorMode {
        match self {
            FilterKind::Sobel | FilterKind::Emboss => ColorMode::Grayscale,
            FilterKind::Gaussian | FilterKind::Mean | FilterKind::Ups => ColorMode::Rgb,
        }
    }

    /// Whether the filter needs a mask from the mask builder.
    pub fn uses_mask(self) -> bool {
        matches!(self, FilterKind::Sobel | FilterKind::Gaussian | FilterKind::Emboss)
    }
}

/// Per-filter details of a finished request.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FilterOutcome {
    Sobel {
        is_preset: bool,
        kx_preview: KernelPreview,
        ky_preview: KernelPreview,
        max_magnitude: f32,
        magnitude_ms: f64,
        normalize_ms: f64,
    },
    Gaussian {
        is_preset: bool,
        kernel_preview: KernelPreview,
        channel_ms: [f64; 3],
    },
    Emboss {
        is_preset: bool,
        kernel_preview: KernelPreview,
    },
    Mean {
        description: String,
        channel_ms: [f64; 3],
    },
    Ups {
        overlay_applied: bool,
    },
}

impl FilterOutcome {
    pub fn is_preset(&self) -> bool {
        match self {
            FilterOutcome::Sobel { is_preset, .. }
            | FilterOutcome::Gaussian { is_preset, .. }
            | FilterOutcome::Emboss { is_preset, .. } => *is_preset,
            FilterOutcome::Mean { .. } | FilterOutcome::Ups { .. } => false,
        }
    }
}

/// A complete result: output raster plus everything the boundary layer shows.
#[derive(Debug, Clone)]
pub struct FilterReport {
    /// Grayscale for sobel/emboss, RGB otherwise.
    pub image: Raster<u8>,
    pub filter: FilterKind,
    pub kernel_size: u32,
    pub geometry: LaunchGeometry,
    pub backend: String,
    pub elapsed_ms: f64,
    pub outcome: FilterOutcome,
}

/// Serializable view of a report without the pixels.
#[derive(Debug, Serialize)]
pub struct ReportMetadata<'a> {
    pub width: u32,
    pub height: u32,
    pub filter: FilterKind,
    pub kernel_size: u32,
    pub is_preset: bool,
    pub backend: &'a str,
    pub geometry: LaunchGeometry,
    pub threads_per_block: u32,
    pub gpu_time_ms: f64,
    pub details: &'a FilterOutcome,
}

impl FilterReport {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn metadata(&self) -> ReportMetadata<'_> {
        ReportMetadata {
            width: self.width(),
            height: self.height(),
            filter: self.filter,
            kernel_size: self.kernel_size,
            is_preset: self.outcome.is_preset(),
            backend: &self.backend,
            geometry: self.geometry,
            threads_per_block: self.geometry.threads_per_block(),
            gpu_time_ms: self.elapsed_ms,
            details: &self.outcome,
        }
    }

    /// Lossless PNG of the output image.
    pub fn encode_png(&self) -> FilterResult<Vec<u8>> {
        io::encode_png(&self.image)
    }
}

fn mean3(t: [f64; 3]) -> f64 {
    (t[0] + t[1] + t[2]) / 3.0
}

fn single_mask(built: &BuiltMask) -> FilterResult<&Mask> {
    built
        .single()
        .ok_or_else(|| FilterError::invalid(format!("{} has no single mask", built.filter.name())))
}

// ============================================================================
// ENGINE
// ============================================================================

/// Owns the kernel backend and serialises every device round trip through
/// one dispatch guard.
pub struct Engine {
    backend: Mutex<Box<dyn KernelBackend>>,
    backend_name: String,
    workgroup: WorkgroupSize,
    overlay: Option<Overlay>,
    allow_custom: bool,
}

impl Engine {
    pub fn new(backend: Box<dyn KernelBackend>) -> Self {
        let backend_name = backend.name().to_string();
        let workgroup = backend.workgroup();
        Self {
            backend: Mutex::new(backend),
            backend_name,
            workgroup,
            overlay: None,
            allow_custom: true,
        }
    }

    /// CPU reference engine.
    pub fn cpu() -> Self {
        Self::new(Box::new(CpuBackend))
    }

    pub fn with_overlay(mut self, overlay: Option<Overlay>) -> Self {
        self.overlay = overlay;
        self
    }

    /// When `false`, only preset kernel sizes are accepted for masked filters.
    pub fn allow_custom_sizes(mut self, allow: bool) -> Self {
        self.allow_custom = allow;
        self
    }

    /// Build the backend the configuration asks for, load the overlay, and
    /// compile device programs once.
    pub fn from_config(cfg: &EngineConfig) -> FilterResult<Self> {
        let backend = select_backend(cfg)?;
        let overlay = match &cfg.overlay_path {
            Some(path) => Some(Overlay::load(path, cfg.overlay_opacity)?),
            None => None,
        };
        Ok(Self::new(backend)
            .with_overlay(overlay)
            .allow_custom_sizes(cfg.allow_custom_sizes))
    }

    pub fn backend_name(&self) -> &str {
        &self.backend_name
    }

    /// Workgroup the backend's programs were compiled for.
    pub fn workgroup(&self) -> WorkgroupSize {
        self.workgroup
    }

    /// Decode an upload and run the named filter on it.
    pub fn process_upload(&self, bytes: &[u8], filter: &str, kernel_size: u32) -> FilterResult<FilterReport> {
        let img = io::decode(bytes)?;
        self.process_image(&img, filter, kernel_size)
    }

    /// Convenience for file inputs.
    pub fn process_file(&self, path: &Path, filter: &str, kernel_size: u32) -> FilterResult<FilterReport> {
        let img = io::load_image_file(path)?;
        self.process_image(&img, filter, kernel_size)
    }

    /// Validate, build masks and views, dispatch, post-process.
    pub fn process_image(&self, img: &DynamicImage, filter: &str, kernel_size: u32) -> FilterResult<FilterReport> {
        let kind = FilterKind::from_name(filter)?;
        let (w, h) = (img.width(), img.height());

        masks::validate_size(kernel_size)?;
        masks::validate_vs_image(kernel_size, w, h)?;

        // Launch shape is fixed; a backend compiled for anything else is refused.
        let geometry = LaunchGeometry::for_image(w, h, DEFAULT_WORKGROUP);
        geometry.validate(w, h, self.workgroup)?;

        let built = if kind.uses_mask() {
            Some(masks::build(kind.name(), kernel_size, self.allow_custom)?)
        } else {
            None
        };

        log::debug!(
            "{} {}x{} k={} grid {}x{} blocks of {}x{}",
            kind.name(),
            w,
            h,
            kernel_size,
            geometry.blocks_x,
            geometry.blocks_y,
            geometry.threads_x,
            geometry.threads_y
        );

        let (image, elapsed_ms, outcome) = match (kind, built.as_ref()) {
            (FilterKind::Sobel, Some(b)) => self.sobel(img, b, geometry)?,
            (FilterKind::Gaussian, Some(b)) => self.gaussian(img, b, geometry)?,
            (FilterKind::Emboss, Some(b)) => self.emboss(img, b, geometry)?,
            (FilterKind::Mean, _) => self.mean(img, kernel_size, geometry)?,
            (FilterKind::Ups, _) => self.ups(img, geometry)?,
            (_, None) => {
                return Err(FilterError::invalid(format!("{} requires a mask", kind.name())));
            }
        };

        log::info!(
            "{} {}x{} k={} on {}: {:.3} ms",
            kind.name(),
            w,
            h,
            kernel_size,
            self.backend_name,
            elapsed_ms
        );

        Ok(FilterReport {
            image,
            filter: kind,
            kernel_size,
            geometry,
            backend: self.backend_name.clone(),
            elapsed_ms,
            outcome,
        })
    }

    /// Run `f` while holding the dispatch guard.
    fn dispatch<T>(&self, f: impl FnOnce(&dyn KernelBackend) -> FilterResult<T>) -> FilterResult<T> {
        let guard = self
            .backend
            .lock()
            .map_err(|_| FilterError::device("dispatch guard poisoned by an earlier panic"))?;
        f(&**guard)
    }

    fn sobel(&self, img: &DynamicImage, built: &BuiltMask, geom: LaunchGeometry) -> FilterResult<(Raster<u8>, f64, FilterOutcome)> {
        let (kx, ky) = built
            .directional()
            .ok_or_else(|| FilterError::invalid("sobel needs a directional mask pair"))?;
        // Byte source is the float gray view truncated, not rounded.
        let gray = io::decode_f32(img, FilterKind::Sobel.color_mode())?.quantize_truncated();

        let run = self.dispatch(|b| b.run_sobel(&gray, kx, ky, geom))?;
        let elapsed = run.elapsed_ms();
        let outcome = FilterOutcome::Sobel {
            is_preset: built.is_preset,
            kx_preview: kx.preview(),
            ky_preview: ky.preview(),
            max_magnitude: run.max_magnitude,
            magnitude_ms: run.magnitude_ms,
            normalize_ms: run.normalize_ms,
        };
        Ok((run.output, elapsed, outcome))
    }

    fn gaussian(&self, img: &DynamicImage, built: &BuiltMask, geom: LaunchGeometry) -> FilterResult<(Raster<u8>, f64, FilterOutcome)> {
        let mask = single_mask(built)?;
        let rgb = io::decode_f32(img, FilterKind::Gaussian.color_mode())?;
        let planes = [rgb.extract_channel(0)?, rgb.extract_channel(1)?, rgb.extract_channel(2)?];

        let (outs, times) = self.dispatch(|b| {
            let mut outs = Vec::with_capacity(3);
            let mut times = [0.0f64; 3];
            for (c, plane) in planes.iter().enumerate() {
                let (out, ms) = b.run_convolution(plane, mask, geom)?;
                outs.push(out);
                times[c] = ms;
            }
            Ok((outs, times))
        })?;

        let merged = Raster::merge_channels([&outs[0], &outs[1], &outs[2]])?;
        let outcome = FilterOutcome::Gaussian {
            is_preset: built.is_preset,
            kernel_preview: mask.preview(),
            channel_ms: times,
        };
        Ok((merged.quantize_rounded(), mean3(times), outcome))
    }

    fn emboss(&self, img: &DynamicImage, built: &BuiltMask, geom: LaunchGeometry) -> FilterResult<(Raster<u8>, f64, FilterOutcome)> {
        let mask = single_mask(built)?;
        let gray = io::decode_f32(img, FilterKind::Emboss.color_mode())?;

        let (out, ms) = self.dispatch(|b| b.run_convolution(&gray, mask, geom))?;

        let image = out.map(|v| v + 128.0).quantize_rounded();
        let outcome = FilterOutcome::Emboss {
            is_preset: built.is_preset,
            kernel_preview: mask.preview(),
        };
        Ok((image, ms, outcome))
    }

    fn mean(&self, img: &DynamicImage, kernel_size: u32, geom: LaunchGeometry) -> FilterResult<(Raster<u8>, f64, FilterOutcome)> {
        let rgb: RgbU8 = io::rgb_u8(img)?;
        let planes = [rgb.extract_channel(0)?, rgb.extract_channel(1)?, rgb.extract_channel(2)?];

        let (outs, times) = self.dispatch(|b| {
            let mut outs = Vec::with_capacity(3);
            let mut times = [0.0f64; 3];
            for (c, plane) in planes.iter().enumerate() {
                let (out, ms) = b.run_mean(plane, kernel_size, geom)?;
                outs.push(out);
                times[c] = ms;
            }
            Ok((outs, times))
        })?;

        let merged = Raster::merge_channels([&outs[0], &outs[1], &outs[2]])?;
        let outcome = FilterOutcome::Mean {
            description: format!("mean {kernel_size}x{kernel_size}"),
            channel_ms: times,
        };
        Ok((merged, mean3(times), outcome))
    }

    fn ups(&self, img: &DynamicImage, geom: LaunchGeometry) -> FilterResult<(Raster<u8>, f64, FilterOutcome)> {
        let rgb = io::rgb_u8(img)?;
        let (mut out, ms) = self.dispatch(|b| b.run_color_highlight(&rgb, geom))?;

        // Host-side compositing; the device guard is already released.
        let overlay_applied = match &self.overlay {
            Some(ov) => {
                ov.composite_onto(&mut out)?;
                true
            }
            None => false,
        };
        Ok((out, ms, FilterOutcome::Ups { overlay_applied }))
    }
}

/// Pick the backend per configuration.  `Auto` degrades to the CPU backend
/// when no adapter exists or program compilation fails.
pub fn select_backend(cfg: &EngineConfig) -> FilterResult<Box<dyn KernelBackend>> {
    let gpu = || -> FilterResult<Box<dyn KernelBackend>> {
        let ctx = GpuContext::new(&cfg.preferred_gpu, cfg.allow_software_adapter)
            .ok_or_else(|| FilterError::device("no compatible GPU adapter found"))?;
        Ok(Box::new(GpuPrograms::new(ctx)?))
    };

    match cfg.backend {
        BackendChoice::Cpu => {
            log::info!("using CPU backend");
            Ok(Box::new(CpuBackend))
        }
        BackendChoice::Gpu => gpu(),
        BackendChoice::Auto => match gpu() {
            Ok(b) => Ok(b),
            Err(e) => {
                log::warn!("GPU backend unavailable ({e}); falling back to CPU");
                Ok(Box::new(CpuBackend))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn solid(w: u32, h: u32, v: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([v, v, v])))
    }

    #[test]
    fn filter_names_are_case_insensitive() {
        assert_eq!(FilterKind::from_name("SoBeL").unwrap(), FilterKind::Sobel);
        assert_eq!(FilterKind::from_name(" ups ").unwrap(), FilterKind::Ups);
        assert!(matches!(FilterKind::from_name("oil"), Err(FilterError::InvalidParameter(_))));
    }

    #[test]
    fn rejects_before_dispatch() {
        let engine = Engine::cpu();
        let img = solid(16, 16, 10);
        for (name, k) in [("blur", 3), ("mean", 4), ("gaussian", 17), ("sobel", 1)] {
            let err = engine.process_image(&img, name, k).unwrap_err();
            assert!(matches!(err, FilterError::InvalidParameter(_)), "{name}/{k}: {err}");
        }
    }

    #[test]
    fn strict_presets_reject_custom_sizes() {
        let engine = Engine::cpu().allow_custom_sizes(false);
        let img = solid(64, 64, 10);
        assert!(engine.process_image(&img, "sobel", 5).is_err());
        assert!(engine.process_image(&img, "sobel", 9).is_ok());
        // mean has no presets and is not affected.
        assert!(engine.process_image(&img, "mean", 5).is_ok());
    }

    #[test]
    fn emboss_of_flat_image_is_mid_gray() {
        let engine = Engine::cpu();
        let report = engine.process_image(&solid(32, 32, 70), "emboss", 9).unwrap();
        assert_eq!(report.image.channels(), 1);
        assert!(report.image.data().iter().all(|&v| v == 128));
        assert!(report.outcome.is_preset());
    }

    /// CPU kernels that claim to be compiled for another block shape.
    struct ReshapedCpu(WorkgroupSize);

    impl KernelBackend for ReshapedCpu {
        fn name(&self) -> &str {
            "cpu-reshaped"
        }
        fn workgroup(&self) -> WorkgroupSize {
            self.0
        }
        fn run_convolution(
            &self,
            src: &crate::raster::GrayF32,
            mask: &masks::Mask,
            geom: LaunchGeometry,
        ) -> FilterResult<(crate::raster::GrayF32, f64)> {
            CpuBackend.run_convolution(src, mask, geom)
        }
        fn run_sobel(
            &self,
            src: &crate::raster::GrayU8,
            kx: &masks::Mask,
            ky: &masks::Mask,
            geom: LaunchGeometry,
        ) -> FilterResult<crate::gpu::SobelRun> {
            CpuBackend.run_sobel(src, kx, ky, geom)
        }
        fn run_mean(
            &self,
            src: &crate::raster::GrayU8,
            kernel_size: u32,
            geom: LaunchGeometry,
        ) -> FilterResult<(crate::raster::GrayU8, f64)> {
            CpuBackend.run_mean(src, kernel_size, geom)
        }
        fn run_color_highlight(
            &self,
            src: &crate::raster::RgbU8,
            geom: LaunchGeometry,
        ) -> FilterResult<(crate::raster::RgbU8, f64)> {
            CpuBackend.run_color_highlight(src, geom)
        }
    }

    #[test]
    fn launch_shape_is_always_16x16() {
        let report = Engine::cpu().process_image(&solid(64, 64, 10), "mean", 5).unwrap();
        assert_eq!(
            report.geometry,
            LaunchGeometry { threads_x: 16, threads_y: 16, blocks_x: 4, blocks_y: 4 }
        );

        // Settings that look like a block-shape override are not config keys.
        let cfg = EngineConfig::parse("backend = cpu\nworkgroup = 8x4\n");
        let engine = Engine::from_config(&cfg).unwrap();
        let report = engine.process_image(&solid(64, 64, 10), "mean", 5).unwrap();
        assert_eq!((report.geometry.threads_x, report.geometry.threads_y), (16, 16));
    }

    #[test]
    fn backend_compiled_for_other_shape_is_refused() {
        let engine = Engine::new(Box::new(ReshapedCpu(WorkgroupSize { x: 8, y: 4 })));
        let err = engine.process_image(&solid(64, 64, 10), "mean", 5).unwrap_err();
        assert!(matches!(err, FilterError::InvalidParameter(_)), "{err}");
    }

    #[test]
    fn metadata_serialises_tagged_details() {
        let engine = Engine::cpu();
        let report = engine.process_image(&solid(20, 20, 5), "mean", 3).unwrap();
        let json = serde_json::to_value(report.metadata()).unwrap();
        assert_eq!(json["filter"], "mean");
        assert_eq!(json["details"]["type"], "mean");
        assert_eq!(json["details"]["description"], "mean 3x3");
        assert_eq!(json["threads_per_block"], 256);
        assert_eq!(json["geometry"]["blocks_x"], 2);
    }
}
