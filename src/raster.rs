// ============================================================================
// RASTER — host-resident image buffers shared by every backend
// ============================================================================

use crate::error::{FilterError, FilterResult};

/// Row-major host image with `channels` interleaved samples per pixel.
///
/// The pitch (elements per row) is always `width * channels`; there is no
/// row padding on the host side.  Device copies are created per kernel call
/// and never outlive it.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster<T> {
    width: u32,
    height: u32,
    channels: usize,
    data: Vec<T>,
}

pub type GrayF32 = Raster<f32>;
pub type GrayU8 = Raster<u8>;
pub type RgbU8 = Raster<u8>;
pub type RgbF32 = Raster<f32>;

impl<T: Copy> Raster<T> {
    /// Wrap existing samples.  Fails if the channel count is not 1 or 3 or the
    /// sample count does not match the dimensions.
    pub fn from_vec(width: u32, height: u32, channels: usize, data: Vec<T>) -> FilterResult<Self> {
        if channels != 1 && channels != 3 {
            return Err(FilterError::invalid(format!(
                "unsupported channel count {channels} (expected 1 or 3)"
            )));
        }
        let expected = width as usize * height as usize * channels;
        if data.len() != expected {
            return Err(FilterError::invalid(format!(
                "buffer holds {} samples but {width}x{height}x{channels} needs {expected}",
                data.len()
            )));
        }
        Ok(Self { width, height, channels, data })
    }

    /// Solid image with every sample set to `value`.
    pub fn filled(width: u32, height: u32, channels: usize, value: T) -> FilterResult<Self> {
        let len = width as usize * height as usize * channels;
        Self::from_vec(width, height, channels, vec![value; len])
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Elements per row.
    pub fn pitch(&self) -> usize {
        self.width as usize * self.channels
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<T> {
        self.data
    }

    /// Sample at `(x, y)` in channel `c`.  Panics when out of bounds.
    pub fn get(&self, x: u32, y: u32, c: usize) -> T {
        self.data[y as usize * self.pitch() + x as usize * self.channels + c]
    }

    /// Copy one channel out as a single-channel raster.
    pub fn extract_channel(&self, c: usize) -> FilterResult<Raster<T>> {
        if c >= self.channels {
            return Err(FilterError::invalid(format!(
                "channel {c} out of range for a {}-channel image",
                self.channels
            )));
        }
        let data = self
            .data
            .iter()
            .skip(c)
            .step_by(self.channels)
            .copied()
            .collect();
        Raster::from_vec(self.width, self.height, 1, data)
    }

    /// Interleave three single-channel planes of equal size into one RGB raster.
    pub fn merge_channels(planes: [&Raster<T>; 3]) -> FilterResult<Raster<T>> {
        let (w, h) = (planes[0].width, planes[0].height);
        for p in &planes {
            if p.channels != 1 || p.width != w || p.height != h {
                return Err(FilterError::invalid(
                    "channel planes must be single-channel and the same size",
                ));
            }
        }
        let mut data = Vec::with_capacity(w as usize * h as usize * 3);
        for i in 0..(w as usize * h as usize) {
            data.push(planes[0].data[i]);
            data.push(planes[1].data[i]);
            data.push(planes[2].data[i]);
        }
        Raster::from_vec(w, h, 3, data)
    }

    /// Per-sample conversion into a raster of another element type.
    pub fn map<U: Copy>(&self, f: impl Fn(T) -> U) -> Raster<U> {
        Raster {
            width: self.width,
            height: self.height,
            channels: self.channels,
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }
}

impl Raster<f32> {
    /// Clamp to `[0, 255]` and round to the nearest byte.
    ///
    /// Used for the weighted convolutions on purpose: a flat plane through a
    /// normalised mask can come back as `127.99997`, which truncation would
    /// turn into 127. Rounding keeps a solid 128 at 128.
    pub fn quantize_rounded(&self) -> Raster<u8> {
        self.map(|v| (v.clamp(0.0, 255.0) + 0.5) as u8)
    }

    /// Clamp to `[0, 255]` and drop the fractional part.
    pub fn quantize_truncated(&self) -> Raster<u8> {
        self.map(|v| v.clamp(0.0, 255.0) as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_length() {
        let err = Raster::from_vec(4, 4, 1, vec![0u8; 15]).unwrap_err();
        assert!(matches!(err, FilterError::InvalidParameter(_)));
    }

    #[test]
    fn rejects_two_channels() {
        assert!(Raster::from_vec(2, 2, 2, vec![0u8; 8]).is_err());
    }

    #[test]
    fn split_and_merge_preserve_layout() {
        let data: Vec<u8> = (0..12).collect();
        let rgb = Raster::from_vec(2, 2, 3, data.clone()).unwrap();
        let r = rgb.extract_channel(0).unwrap();
        let g = rgb.extract_channel(1).unwrap();
        let b = rgb.extract_channel(2).unwrap();
        assert_eq!(r.data(), &[0, 3, 6, 9]);
        assert_eq!(b.data(), &[2, 5, 8, 11]);
        let merged = Raster::merge_channels([&r, &g, &b]).unwrap();
        assert_eq!(merged.data(), data.as_slice());
    }

    #[test]
    fn quantize_modes_differ_on_fractions() {
        let f = Raster::from_vec(3, 1, 1, vec![127.6f32, -4.0, 300.0]).unwrap();
        assert_eq!(f.quantize_rounded().data(), &[128, 0, 255]);
        assert_eq!(f.quantize_truncated().data(), &[127, 0, 255]);
    }
}
