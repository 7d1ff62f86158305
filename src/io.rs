// ============================================================================
// IMAGE I/O — decode uploads into rasters, encode results as PNG
// ============================================================================

use std::fs::File;
use std::io::{BufWriter, Cursor, Write};
use std::path::Path;

use image::codecs::png::PngEncoder;
use image::{DynamicImage, ImageEncoder};

use crate::error::{FilterError, FilterResult};
use crate::raster::{GrayF32, Raster, RgbF32, RgbU8};

/// Colour layout a pipeline asks the decoder for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    Grayscale,
    Rgb,
}

impl ColorMode {
    pub fn from_name(name: &str) -> FilterResult<Self> {
        match name.trim().to_lowercase().as_str() {
            "grayscale" | "gray" | "l" => Ok(ColorMode::Grayscale),
            "rgb" => Ok(ColorMode::Rgb),
            other => Err(FilterError::invalid(format!("unsupported color mode '{other}'"))),
        }
    }
}

/// Decode any supported container into an image.  No device work happens
/// before this succeeds.
pub fn decode(bytes: &[u8]) -> FilterResult<DynamicImage> {
    image::load_from_memory(bytes).map_err(|e| FilterError::DecodeFailure(e.to_string()))
}

/// Read a file and decode it.
pub fn load_image_file(path: &Path) -> FilterResult<DynamicImage> {
    let bytes = std::fs::read(path)?;
    decode(&bytes)
}

/// ITU-R 601-2 luma in fixed point: `(19595 R + 38470 G + 7471 B + 0x8000) >> 16`.
#[inline]
pub fn luma_601(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 19595 + g as u32 * 38470 + b as u32 * 7471 + 0x8000) >> 16) as u8
}

/// Single-channel float view; sample values are whole numbers in `[0, 255]`.
pub fn gray_f32(img: &DynamicImage) -> FilterResult<GrayF32> {
    let rgb = img.to_rgb8();
    let (w, h) = rgb.dimensions();
    let data = rgb
        .as_raw()
        .chunks_exact(3)
        .map(|p| luma_601(p[0], p[1], p[2]) as f32)
        .collect();
    Raster::from_vec(w, h, 1, data)
}

/// Interleaved RGB bytes; any alpha channel is dropped.
pub fn rgb_u8(img: &DynamicImage) -> FilterResult<RgbU8> {
    let rgb = img.to_rgb8();
    let (w, h) = rgb.dimensions();
    Raster::from_vec(w, h, 3, rgb.into_raw())
}

/// Interleaved RGB as f32.
pub fn rgb_f32(img: &DynamicImage) -> FilterResult<RgbF32> {
    Ok(rgb_u8(img)?.map(|v| v as f32))
}

/// Float view in the requested colour mode.
pub fn decode_f32(img: &DynamicImage, mode: ColorMode) -> FilterResult<Raster<f32>> {
    match mode {
        ColorMode::Grayscale => gray_f32(img),
        ColorMode::Rgb => rgb_f32(img),
    }
}

fn color_type(raster: &Raster<u8>) -> image::ColorType {
    if raster.channels() == 1 {
        image::ColorType::L8
    } else {
        image::ColorType::Rgb8
    }
}

/// Write a byte raster as PNG to any writer.
pub fn write_png<W: Write>(raster: &Raster<u8>, writer: W) -> FilterResult<()> {
    let encoder = PngEncoder::new(writer);
    encoder.write_image(raster.data(), raster.width(), raster.height(), color_type(raster))?;
    Ok(())
}

/// Lossless PNG bytes of a byte raster.
pub fn encode_png(raster: &Raster<u8>) -> FilterResult<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    write_png(raster, &mut buf)?;
    Ok(buf.into_inner())
}

/// Encode and write a PNG file.
pub fn save_png(raster: &Raster<u8>, path: &Path) -> FilterResult<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    write_png(raster, &mut writer)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn garbage_is_a_decode_failure() {
        let err = decode(b"definitely not an image").unwrap_err();
        assert!(matches!(err, FilterError::DecodeFailure(_)));
        assert!(err.is_client_error());
    }

    #[test]
    fn luma_matches_reference_transform() {
        assert_eq!(luma_601(128, 128, 128), 128);
        assert_eq!(luma_601(255, 255, 255), 255);
        assert_eq!(luma_601(255, 0, 0), 76);
        assert_eq!(luma_601(0, 0, 255), 29);
    }

    #[test]
    fn png_round_trip_keeps_pixels() {
        let img = RgbImage::from_fn(5, 4, |x, y| Rgb([x as u8 * 40, y as u8 * 60, 7]));
        let raster = rgb_u8(&DynamicImage::ImageRgb8(img.clone())).unwrap();
        let png = encode_png(&raster).unwrap();
        let back = decode(&png).unwrap().to_rgb8();
        assert_eq!(back, img);
    }

    #[test]
    fn gray_view_uses_whole_numbers() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(3, 3, Rgb([10, 200, 90])));
        let gray = gray_f32(&img).unwrap();
        assert_eq!(gray.channels(), 1);
        assert!(gray.data().iter().all(|v| v.fract() == 0.0));
    }

    #[test]
    fn color_mode_names() {
        assert_eq!(ColorMode::from_name("RGB").unwrap(), ColorMode::Rgb);
        assert_eq!(ColorMode::from_name("grayscale").unwrap(), ColorMode::Grayscale);
        assert!(matches!(ColorMode::from_name("cmyk"), Err(FilterError::InvalidParameter(_))));
    }
}
