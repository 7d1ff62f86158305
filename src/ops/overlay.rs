// ============================================================================
// OVERLAY — fixed RGBA artwork composited over the highlight result
// ============================================================================

use std::path::Path;

use image::{imageops, RgbaImage};
use rayon::prelude::*;

use crate::error::{FilterError, FilterResult};
use crate::raster::RgbU8;

/// An RGBA image stretched to each target's dimensions and alpha-blended on top.
#[derive(Debug, Clone)]
pub struct Overlay {
    rgba: RgbaImage,
    opacity: f32,
}

impl Overlay {
    pub fn new(rgba: RgbaImage, opacity: f32) -> Self {
        Self { rgba, opacity: opacity.clamp(0.0, 1.0) }
    }

    /// Load the overlay artwork.  A file that does not decode is a config
    /// error, reported as `DecodeFailure`.
    pub fn load(path: &Path, opacity: f32) -> FilterResult<Self> {
        let img = image::open(path)
            .map_err(|e| FilterError::DecodeFailure(format!("overlay {}: {e}", path.display())))?;
        Ok(Self::new(img.into_rgba8(), opacity))
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.rgba.dimensions()
    }

    /// Scale the artwork to the target and blend it in place:
    /// `out = ov * a + base * (1 - a)` with `a = alpha / 255 * opacity`.
    pub fn composite_onto(&self, target: &mut RgbU8) -> FilterResult<()> {
        if target.channels() != 3 {
            return Err(FilterError::invalid("overlay target must be RGB"));
        }
        let (w, h) = (target.width(), target.height());
        if w == 0 || h == 0 {
            return Ok(());
        }
        let scaled = if self.rgba.dimensions() == (w, h) {
            self.rgba.clone()
        } else {
            imageops::resize(&self.rgba, w, h, imageops::FilterType::Triangle)
        };

        let opacity = self.opacity;
        target
            .data_mut()
            .par_chunks_mut(w as usize * 3)
            .zip(scaled.as_raw().par_chunks(w as usize * 4))
            .for_each(|(dst_row, ov_row)| {
                for (dst, ov) in dst_row.chunks_exact_mut(3).zip(ov_row.chunks_exact(4)) {
                    let a = ov[3] as f32 / 255.0 * opacity;
                    if a <= 0.0 {
                        continue;
                    }
                    for c in 0..3 {
                        let v = ov[c] as f32 * a + dst[c] as f32 * (1.0 - a);
                        dst[c] = (v + 0.5).clamp(0.0, 255.0) as u8;
                    }
                }
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::Raster;
    use image::Rgba;

    #[test]
    fn transparent_overlay_changes_nothing() {
        let ov = Overlay::new(RgbaImage::from_pixel(4, 4, Rgba([255, 0, 0, 0])), 1.0);
        let mut img = Raster::filled(10, 6, 3, 128u8).unwrap();
        ov.composite_onto(&mut img).unwrap();
        assert!(img.data().iter().all(|&v| v == 128));
    }

    #[test]
    fn opaque_overlay_is_scaled_to_target() {
        let ov = Overlay::new(RgbaImage::from_pixel(2, 2, Rgba([10, 20, 30, 255])), 1.0);
        let mut img = Raster::filled(9, 5, 3, 200u8).unwrap();
        ov.composite_onto(&mut img).unwrap();
        assert_eq!(img.get(0, 0, 0), 10);
        assert_eq!(img.get(8, 4, 2), 30);
    }

    #[test]
    fn half_opacity_blends() {
        let ov = Overlay::new(RgbaImage::from_pixel(3, 3, Rgba([0, 0, 0, 255])), 0.5);
        let mut img = Raster::filled(3, 3, 3, 200u8).unwrap();
        ov.composite_onto(&mut img).unwrap();
        assert_eq!(img.get(1, 1, 1), 100);
    }
}
