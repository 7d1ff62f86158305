// ============================================================================
// GPU MODULE — kernel execution layer
// ============================================================================
//
// Architecture:
//   context.rs — explicit wgpu Device/Queue handle, adapter selection, timing
//   shaders.rs — WGSL source for the four device programs
//   compute.rs — GpuPrograms: pipelines compiled once, one `run_*` per program
//
// Every backend (GPU here, CPU in ops::cpu) implements `KernelBackend`.
// A run allocates its buffers, launches over the supplied geometry, waits,
// copies back and frees; nothing outlives the call except compiled programs.
// ============================================================================

pub mod context;
pub mod shaders;
pub mod compute;

pub use compute::GpuPrograms;
pub use context::GpuContext;

use rayon::prelude::*;
use serde::Serialize;

use crate::error::{FilterError, FilterResult};
use crate::ops::masks::Mask;
use crate::raster::{GrayF32, GrayU8, RgbU8};

/// Threads per block used by every pipeline.
pub const DEFAULT_WORKGROUP: WorkgroupSize = WorkgroupSize { x: 16, y: 16 };

/// Threads per block (workgroup) in x and y.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkgroupSize {
    pub x: u32,
    pub y: u32,
}

impl WorkgroupSize {
    pub fn total(&self) -> u32 {
        self.x * self.y
    }
}

impl Default for WorkgroupSize {
    fn default() -> Self {
        DEFAULT_WORKGROUP
    }
}

/// 2-D launch shape: threads per block and blocks per grid.
///
/// Each thread maps to one output pixel `(bx * tx + ix, by * ty + iy)`;
/// threads past the image edge do nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LaunchGeometry {
    pub threads_x: u32,
    pub threads_y: u32,
    pub blocks_x: u32,
    pub blocks_y: u32,
}

impl LaunchGeometry {
    /// Smallest grid of `wg` blocks that covers a `width x height` image.
    pub fn for_image(width: u32, height: u32, wg: WorkgroupSize) -> Self {
        Self {
            threads_x: wg.x,
            threads_y: wg.y,
            blocks_x: width.div_ceil(wg.x),
            blocks_y: height.div_ceil(wg.y),
        }
    }

    pub fn threads_per_block(&self) -> u32 {
        self.threads_x * self.threads_y
    }

    /// Pixel extent reached by the grid (may exceed the image).
    pub fn extent(&self) -> (u32, u32) {
        (self.threads_x * self.blocks_x, self.threads_y * self.blocks_y)
    }

    /// Check the geometry against the compiled workgroup and the image.
    pub fn validate(&self, width: u32, height: u32, wg: WorkgroupSize) -> FilterResult<()> {
        if self.threads_x == 0 || self.threads_y == 0 {
            return Err(FilterError::invalid("launch geometry has zero threads per block"));
        }
        if self.threads_x != wg.x || self.threads_y != wg.y {
            return Err(FilterError::invalid(format!(
                "launch uses {}x{} threads but programs were compiled for {}x{}",
                self.threads_x, self.threads_y, wg.x, wg.y
            )));
        }
        let (ex, ey) = self.extent();
        if ex < width || ey < height {
            return Err(FilterError::invalid(format!(
                "grid covers {ex}x{ey} pixels, image is {width}x{height}"
            )));
        }
        Ok(())
    }
}

/// Output of the two-stage Sobel run.
#[derive(Debug, Clone)]
pub struct SobelRun {
    pub output: GrayU8,
    /// Global magnitude maximum used for stage 2 (1.0 when the image is flat).
    pub max_magnitude: f32,
    pub magnitude_ms: f64,
    pub normalize_ms: f64,
}

impl SobelRun {
    /// Device time of both stages.
    pub fn elapsed_ms(&self) -> f64 {
        self.magnitude_ms + self.normalize_ms
    }
}

/// The four kernel programs, executed one launch at a time.
///
/// Implementations must leave nothing allocated between calls.  Callers
/// serialise access (see `ops::pipeline::Engine`).
pub trait KernelBackend: Send {
    /// Human-readable device name for logs and reports.
    fn name(&self) -> &str;

    /// Workgroup the programs were built for.
    fn workgroup(&self) -> WorkgroupSize;

    /// Weighted K×K convolution of a float plane, edge-clamped.
    fn run_convolution(
        &self,
        src: &GrayF32,
        mask: &Mask,
        geom: LaunchGeometry,
    ) -> FilterResult<(GrayF32, f64)>;

    /// Gradient magnitude, global max reduction on the host, rescale to bytes.
    fn run_sobel(
        &self,
        src: &GrayU8,
        kx: &Mask,
        ky: &Mask,
        geom: LaunchGeometry,
    ) -> FilterResult<SobelRun>;

    /// Unweighted K×K mean of a byte plane, edge-clamped, rounded.
    fn run_mean(
        &self,
        src: &GrayU8,
        kernel_size: u32,
        geom: LaunchGeometry,
    ) -> FilterResult<(GrayU8, f64)>;

    /// Pointwise blue/yellow highlight; everything else goes gray.
    fn run_color_highlight(&self, src: &RgbU8, geom: LaunchGeometry) -> FilterResult<(RgbU8, f64)>;
}

/// Host-side barrier between the Sobel stages: global maximum of the
/// magnitude buffer, with 1.0 substituted for an all-zero buffer.
pub fn normalization_divisor(magnitude: &[f32]) -> f32 {
    let max = magnitude
        .par_iter()
        .copied()
        .reduce(|| 0.0f32, f32::max);
    if max == 0.0 { 1.0 } else { max }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_rounds_up() {
        let g = LaunchGeometry::for_image(100, 33, DEFAULT_WORKGROUP);
        assert_eq!((g.blocks_x, g.blocks_y), (7, 3));
        assert_eq!(g.threads_per_block(), 256);
        assert!(g.validate(100, 33, DEFAULT_WORKGROUP).is_ok());
    }

    #[test]
    fn geometry_rejects_mismatch_and_undercoverage() {
        let mut g = LaunchGeometry::for_image(64, 64, DEFAULT_WORKGROUP);
        g.blocks_x -= 1;
        assert!(g.validate(64, 64, DEFAULT_WORKGROUP).is_err());

        let g = LaunchGeometry::for_image(64, 64, WorkgroupSize { x: 8, y: 8 });
        assert!(g.validate(64, 64, DEFAULT_WORKGROUP).is_err());

        let g = LaunchGeometry { threads_x: 0, threads_y: 16, blocks_x: 1, blocks_y: 1 };
        assert!(g.validate(1, 1, DEFAULT_WORKGROUP).is_err());
    }

    #[test]
    fn divisor_substitutes_one_for_flat() {
        assert_eq!(normalization_divisor(&[0.0; 16]), 1.0);
        assert_eq!(normalization_divisor(&[0.0, 3.5, 2.0]), 3.5);
    }
}
