// ============================================================================
// CPU BACKEND — reference implementation of the four kernel programs
// ============================================================================
//
// Mirrors the WGSL programs in gpu/shaders.rs sample for sample: same f32
// arithmetic, same edge clamp, same quantisation.  Used when no adapter is
// available and as the oracle the GPU path is checked against.
//
// Work is split by output row with rayon.  Only pixels reached by the launch
// grid are written, so a short grid leaves the remainder zeroed exactly as a
// device launch would.

use std::time::Instant;

use rayon::prelude::*;

use crate::error::{FilterError, FilterResult};
use crate::gpu::{normalization_divisor, KernelBackend, LaunchGeometry, SobelRun, WorkgroupSize, DEFAULT_WORKGROUP};
use crate::ops::masks::Mask;
use crate::raster::{GrayF32, GrayU8, Raster, RgbU8};

#[derive(Debug, Default, Clone, Copy)]
pub struct CpuBackend;

#[inline]
fn clamp_coord(v: i64, len: u32) -> usize {
    v.clamp(0, len as i64 - 1) as usize
}

/// Run `f(x, y)` for every in-bounds pixel the grid reaches, writing `out`
/// row by row.  `per_pixel` samples are written for each pixel.
fn for_each_pixel<T, F>(out: &mut [T], width: u32, height: u32, per_pixel: usize, geom: LaunchGeometry, f: F)
where
    T: Send,
    F: Fn(u32, u32, &mut [T]) + Sync,
{
    if width == 0 || height == 0 {
        return;
    }
    let (ex, ey) = geom.extent();
    let cols = width.min(ex);
    let rows = height.min(ey) as usize;
    out.par_chunks_mut(width as usize * per_pixel)
        .take(rows)
        .enumerate()
        .for_each(|(y, row)| {
            for x in 0..cols {
                let i = x as usize * per_pixel;
                f(x, y as u32, &mut row[i..i + per_pixel]);
            }
        });
}

/// Edge-clamped weighted sum, generic over the source sample type.
fn weighted_sum<T: Copy + Into<f32>>(src: &[T], width: u32, height: u32, mask: &Mask, x: u32, y: u32) -> f32 {
    let n = mask.size();
    let pad = (n / 2) as i64;
    let w = width as usize;
    let mut acc = 0.0f32;
    for i in 0..n {
        let yy = clamp_coord(y as i64 + i as i64 - pad, height);
        let row = yy * w;
        for j in 0..n {
            let xx = clamp_coord(x as i64 + j as i64 - pad, width);
            acc += src[row + xx].into() * mask.at(i, j);
        }
    }
    acc
}

/// Magnitude stage: `sqrt(gx² + gy²)` per pixel.
pub fn sobel_magnitude(src: &GrayU8, kx: &Mask, ky: &Mask, geom: LaunchGeometry) -> FilterResult<GrayF32> {
    if kx.size() != ky.size() {
        return Err(FilterError::invalid("sobel masks must have the same size"));
    }
    let (w, h) = (src.width(), src.height());
    let mut mag = vec![0.0f32; src.len()];
    let data = src.data();
    let n = kx.size();
    let pad = (n / 2) as i64;
    for_each_pixel(&mut mag, w, h, 1, geom, |x, y, px| {
        let mut gx = 0.0f32;
        let mut gy = 0.0f32;
        for i in 0..n {
            let yy = clamp_coord(y as i64 + i as i64 - pad, h);
            for j in 0..n {
                let xx = clamp_coord(x as i64 + j as i64 - pad, w);
                let pixel = data[yy * w as usize + xx] as f32;
                gx += pixel * kx.at(i, j);
                gy += pixel * ky.at(i, j);
            }
        }
        px[0] = (gx * gx + gy * gy).sqrt();
    });
    Raster::from_vec(w, h, 1, mag)
}

/// Normalise stage: `(v / max) * 255`, clamped, truncated to a byte.
pub fn sobel_normalize(mag: &GrayF32, max_val: f32, geom: LaunchGeometry) -> FilterResult<GrayU8> {
    let (w, h) = (mag.width(), mag.height());
    let mut out = vec![0u8; mag.len()];
    let data = mag.data();
    for_each_pixel(&mut out, w, h, 1, geom, |x, y, px| {
        let v = (data[(y * w + x) as usize] / max_val) * 255.0;
        px[0] = v.clamp(0.0, 255.0) as u8;
    });
    Raster::from_vec(w, h, 1, out)
}

/// OpenCV-scaled HSV of an RGB byte triple: H in [0,179], S and V in [0,255].
pub fn rgb_to_hsv8(r8: u8, g8: u8, b8: u8) -> (u32, u32, u32) {
    let r = r8 as f32 / 255.0;
    let g = g8 as f32 / 255.0;
    let b = b8 as f32 / 255.0;

    let maxv = r.max(g.max(b));
    let minv = r.min(g.min(b));
    let delta = maxv - minv;

    let mut h_deg = 0.0f32;
    if delta > 1e-6 {
        h_deg = if maxv == r {
            60.0 * (((g - b) / delta) % 6.0)
        } else if maxv == g {
            60.0 * (((b - r) / delta) + 2.0)
        } else {
            60.0 * (((r - g) / delta) + 4.0)
        };
        if h_deg < 0.0 {
            h_deg += 360.0;
        }
    }
    let s = if maxv <= 0.0 { 0.0 } else { delta / maxv };

    (
        (h_deg / 2.0 + 0.5) as u32,
        (s * 255.0 + 0.5) as u32,
        (maxv * 255.0 + 0.5) as u32,
    )
}

/// Blue band `H∈[90,140], S≥50, V≥40` or yellow band `H∈[15,40], S≥70, V≥70`.
pub fn in_highlight_band(h: u32, s: u32, v: u32) -> bool {
    let blue = (90..=140).contains(&h) && s >= 50 && v >= 40;
    let yellow = (15..=40).contains(&h) && s >= 70 && v >= 70;
    blue || yellow
}

/// Rec.601 luma, truncated.
pub fn luma_gray(r: u8, g: u8, b: u8) -> u8 {
    (0.299f32 * r as f32 + 0.587f32 * g as f32 + 0.114f32 * b as f32) as u8
}

impl KernelBackend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn workgroup(&self) -> WorkgroupSize {
        DEFAULT_WORKGROUP
    }

    fn run_convolution(&self, src: &GrayF32, mask: &Mask, geom: LaunchGeometry) -> FilterResult<(GrayF32, f64)> {
        let (w, h) = (src.width(), src.height());
        let start = Instant::now();
        let mut out = vec![0.0f32; src.len()];
        let data = src.data();
        for_each_pixel(&mut out, w, h, 1, geom, |x, y, px| {
            px[0] = weighted_sum(data, w, h, mask, x, y);
        });
        let ms = start.elapsed().as_secs_f64() * 1000.0;
        Ok((Raster::from_vec(w, h, 1, out)?, ms))
    }

    fn run_sobel(&self, src: &GrayU8, kx: &Mask, ky: &Mask, geom: LaunchGeometry) -> FilterResult<SobelRun> {
        let start = Instant::now();
        let mag = sobel_magnitude(src, kx, ky, geom)?;
        let magnitude_ms = start.elapsed().as_secs_f64() * 1000.0;

        let max_magnitude = normalization_divisor(mag.data());

        let start = Instant::now();
        let output = sobel_normalize(&mag, max_magnitude, geom)?;
        let normalize_ms = start.elapsed().as_secs_f64() * 1000.0;

        Ok(SobelRun { output, max_magnitude, magnitude_ms, normalize_ms })
    }

    fn run_mean(&self, src: &GrayU8, kernel_size: u32, geom: LaunchGeometry) -> FilterResult<(GrayU8, f64)> {
        let (w, h) = (src.width(), src.height());
        let start = Instant::now();
        let mut out = vec![0u8; src.len()];
        let data = src.data();
        let n = kernel_size as i64;
        let pad = n / 2;
        let denom = (n * n) as f32;
        for_each_pixel(&mut out, w, h, 1, geom, |x, y, px| {
            let mut sum = 0.0f32;
            for i in 0..n {
                let yy = clamp_coord(y as i64 + i - pad, h);
                for j in 0..n {
                    let xx = clamp_coord(x as i64 + j - pad, w);
                    sum += data[yy * w as usize + xx] as f32;
                }
            }
            let val = (sum / denom).clamp(0.0, 255.0);
            px[0] = (val + 0.5) as u8;
        });
        let ms = start.elapsed().as_secs_f64() * 1000.0;
        Ok((Raster::from_vec(w, h, 1, out)?, ms))
    }

    fn run_color_highlight(&self, src: &RgbU8, geom: LaunchGeometry) -> FilterResult<(RgbU8, f64)> {
        if src.channels() != 3 {
            return Err(FilterError::invalid("color highlight needs an RGB image"));
        }
        let (w, h) = (src.width(), src.height());
        let start = Instant::now();
        let mut out = vec![0u8; src.len()];
        let data = src.data();
        for_each_pixel(&mut out, w, h, 3, geom, |x, y, px| {
            let idx = (y * w + x) as usize * 3;
            let (r, g, b) = (data[idx], data[idx + 1], data[idx + 2]);
            let (hh, s, v) = rgb_to_hsv8(r, g, b);
            if in_highlight_band(hh, s, v) {
                px.copy_from_slice(&[r, g, b]);
            } else {
                px.fill(luma_gray(r, g, b));
            }
        });
        let ms = start.elapsed().as_secs_f64() * 1000.0;
        Ok((Raster::from_vec(w, h, 3, out)?, ms))
    }
}
