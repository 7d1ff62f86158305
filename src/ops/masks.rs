// ============================================================================
// MASK BUILDER — Sobel, Gaussian and Emboss convolution weights
// ============================================================================
//
// Every mask is square with an odd side >= 3, stored row-major as f32 so it
// can be copied straight into a device storage buffer.  Masks are derived
// fresh for every request; nothing here caches.

use serde::Serialize;

use crate::error::{FilterError, FilterResult};

/// Recognised preset sizes per filter.  Anything else odd and >= 3 is "custom".
pub const GAUSSIAN_PRESETS: [u32; 3] = [31, 71, 141];
pub const SOBEL_PRESETS: [u32; 3] = [3, 9, 15];
pub const EMBOSS_PRESETS: [u32; 3] = [9, 21, 65];

/// How many leading weights a kernel preview shows.
pub const PREVIEW_LEN: usize = 12;

/// Filters whose kernels come from this module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MaskFilter {
    Sobel,
    Gaussian,
    Emboss,
}

impl MaskFilter {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "sobel" => Some(MaskFilter::Sobel),
            "gaussian" => Some(MaskFilter::Gaussian),
            "emboss" => Some(MaskFilter::Emboss),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MaskFilter::Sobel => "sobel",
            MaskFilter::Gaussian => "gaussian",
            MaskFilter::Emboss => "emboss",
        }
    }

    fn presets(self) -> &'static [u32] {
        match self {
            MaskFilter::Sobel => &SOBEL_PRESETS,
            MaskFilter::Gaussian => &GAUSSIAN_PRESETS,
            MaskFilter::Emboss => &EMBOSS_PRESETS,
        }
    }
}

/// Square weight matrix, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    size: usize,
    weights: Vec<f32>,
}

impl Mask {
    fn from_fn(size: usize, f: impl Fn(usize, usize) -> f32) -> Self {
        let mut weights = Vec::with_capacity(size * size);
        for i in 0..size {
            for j in 0..size {
                weights.push(f(i, j));
            }
        }
        Self { size, weights }
    }

    /// Wrap caller-supplied weights.  `weights.len()` must be `size * size`.
    pub fn from_weights(size: usize, weights: Vec<f32>) -> FilterResult<Self> {
        if weights.len() != size * size {
            return Err(FilterError::invalid(format!(
                "{} weights do not form a {size}x{size} mask",
                weights.len()
            )));
        }
        Ok(Self { size, weights })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Weight at row `i`, column `j`.
    pub fn at(&self, i: usize, j: usize) -> f32 {
        self.weights[i * self.size + j]
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn sum(&self) -> f32 {
        self.weights.iter().sum()
    }

    pub fn preview(&self) -> KernelPreview {
        KernelPreview {
            shape: [self.size, self.size],
            first_values: self.weights.iter().take(PREVIEW_LEN).copied().collect(),
        }
    }
}

/// Shape plus leading weights, surfaced in request metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KernelPreview {
    pub shape: [usize; 2],
    pub first_values: Vec<f32>,
}

/// Either a single weighted matrix or the directional Sobel pair.
#[derive(Debug, Clone, PartialEq)]
pub enum MaskSet {
    Single(Mask),
    Directional { kx: Mask, ky: Mask },
}

/// Result of [`build`].
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltMask {
    pub filter: MaskFilter,
    pub masks: MaskSet,
    pub is_preset: bool,
}

impl BuiltMask {
    /// The single matrix for Gaussian/Emboss; `None` for Sobel.
    pub fn single(&self) -> Option<&Mask> {
        match &self.masks {
            MaskSet::Single(m) => Some(m),
            MaskSet::Directional { .. } => None,
        }
    }

    /// The `(Kx, Ky)` pair for Sobel; `None` otherwise.
    pub fn directional(&self) -> Option<(&Mask, &Mask)> {
        match &self.masks {
            MaskSet::Directional { kx, ky } => Some((kx, ky)),
            MaskSet::Single(_) => None,
        }
    }
}

// ============================================================================
// GENERATORS
// ============================================================================

/// Dynamic Sobel pair of side `n`:
/// `Kx[i,j] = (j-c)(|i-c|+1)`, `Ky[i,j] = (i-c)(|j-c|+1)` with `c = n/2`.
pub fn sobel_masks(n: usize) -> (Mask, Mask) {
    let c = (n / 2) as i64;
    let kx = Mask::from_fn(n, |i, j| {
        let (i, j) = (i as i64, j as i64);
        ((j - c) * ((i - c).abs() + 1)) as f32
    });
    let ky = Mask::from_fn(n, |i, j| {
        let (i, j) = (i as i64, j as i64);
        ((i - c) * ((j - c).abs() + 1)) as f32
    });
    (kx, ky)
}

/// Normalised 1-D Gaussian.
///
/// `size` is raised to 3 and bumped to the next odd value when even.  A
/// missing or non-positive `sigma` becomes `radius / 3` (or 0.8 when the
/// radius is zero).  Sampling and normalisation run in f64; the result is f32.
pub fn gaussian_1d(size: usize, sigma: Option<f64>) -> Vec<f32> {
    let mut size = size.max(3);
    if size % 2 == 0 {
        size += 1;
    }
    let r = ((size - 1) / 2) as i64;

    let sigma = match sigma {
        Some(s) if s > 0.0 => s,
        _ if r > 0 => r as f64 / 3.0,
        _ => 0.8,
    };
    let two_sigma2 = 2.0 * sigma * sigma;

    let vals: Vec<f64> = (-r..=r)
        .map(|i| (-((i * i) as f64) / two_sigma2).exp())
        .collect();
    let sum: f64 = vals.iter().sum();
    vals.iter().map(|v| (v / sum) as f32).collect()
}

/// Outer product of [`gaussian_1d`] with itself; still sums to one.
pub fn gaussian_2d(size: usize, sigma: Option<f64>) -> Mask {
    let k1d = gaussian_1d(size, sigma);
    let n = k1d.len();
    Mask::from_fn(n, |i, j| k1d[i] * k1d[j])
}

/// Anti-diagonal emboss of side `k`: -1 above the anti-diagonal, +1 below,
/// 0 on it, every entry scaled by `1/sqrt(nonzero count)`.
pub fn emboss(k: usize) -> Mask {
    let diag = k.saturating_sub(1);
    let mut mask = Mask::from_fn(k, |i, j| match (i + j).cmp(&diag) {
        std::cmp::Ordering::Less => -1.0,
        std::cmp::Ordering::Greater => 1.0,
        std::cmp::Ordering::Equal => 0.0,
    });
    let non_zero = mask.weights.iter().filter(|&&w| w != 0.0).count();
    if non_zero > 0 {
        let scale = (1.0 / (non_zero as f64).sqrt()) as f32;
        for w in &mut mask.weights {
            *w *= scale;
        }
    }
    mask
}

// ============================================================================
// VALIDATION
// ============================================================================

/// `true` when `size` is one of the named filter's presets.  Unknown filter
/// names have no presets.
pub fn is_preset(filter: &str, size: u32) -> bool {
    MaskFilter::from_name(filter)
        .map(|f| f.presets().contains(&size))
        .unwrap_or(false)
}

/// Kernel sides must be odd and at least 3.
pub fn validate_size(size: u32) -> FilterResult<()> {
    if size < 3 || size % 2 == 0 {
        return Err(FilterError::invalid(format!(
            "kernel_size must be an odd integer >= 3 (got {size})"
        )));
    }
    Ok(())
}

/// A kernel may not be larger than the image's smaller dimension.
pub fn validate_vs_image(size: u32, width: u32, height: u32) -> FilterResult<()> {
    let min_dim = width.min(height);
    if size > min_dim {
        return Err(FilterError::invalid(format!(
            "kernel {size}x{size} is too large for a {width}x{height} image; must be <= {min_dim}"
        )));
    }
    Ok(())
}

/// Validate and generate the mask(s) for a named filter.
///
/// With `allow_custom == false` only preset sizes are accepted.
pub fn build(filter: &str, size: u32, allow_custom: bool) -> FilterResult<BuiltMask> {
    let kind = MaskFilter::from_name(filter).ok_or_else(|| {
        FilterError::invalid(format!(
            "filter_type must be 'gaussian', 'sobel' or 'emboss' (got '{filter}')"
        ))
    })?;

    validate_size(size)?;

    let preset = kind.presets().contains(&size);
    if !preset && !allow_custom {
        return Err(FilterError::invalid(format!(
            "kernel_size {size} is not a preset for {} (presets: {:?})",
            kind.name(),
            kind.presets()
        )));
    }

    let n = size as usize;
    let masks = match kind {
        MaskFilter::Sobel => {
            let (kx, ky) = sobel_masks(n);
            MaskSet::Directional { kx, ky }
        }
        MaskFilter::Gaussian => MaskSet::Single(gaussian_2d(n, None)),
        MaskFilter::Emboss => MaskSet::Single(emboss(n)),
    };

    Ok(BuiltMask { filter: kind, masks, is_preset: preset })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sobel_3_matches_closed_form() {
        let (kx, ky) = sobel_masks(3);
        assert_eq!(kx.at(0, 0), -2.0);
        assert_eq!(kx.weights(), &[-2.0, 0.0, 2.0, -1.0, 0.0, 1.0, -2.0, 0.0, 2.0]);
        assert_eq!(ky.weights(), &[-2.0, -1.0, -2.0, 0.0, 0.0, 0.0, 2.0, 1.0, 2.0]);
    }

    #[test]
    fn sobel_every_entry_matches_formula() {
        for n in [3usize, 5, 9, 15] {
            let (kx, ky) = sobel_masks(n);
            let c = (n / 2) as i64;
            for i in 0..n {
                for j in 0..n {
                    let (ii, jj) = (i as i64, j as i64);
                    assert_eq!(kx.at(i, j), ((jj - c) * ((ii - c).abs() + 1)) as f32);
                    assert_eq!(ky.at(i, j), ((ii - c) * ((jj - c).abs() + 1)) as f32);
                }
            }
        }
    }

    #[test]
    fn gaussian_1d_normalised_for_any_sigma() {
        for size in [3usize, 5, 31, 71, 141] {
            for sigma in [None, Some(0.5), Some(2.0), Some(10.0)] {
                let k = gaussian_1d(size, sigma);
                assert_eq!(k.len(), size);
                assert!((k.iter().sum::<f32>() - 1.0).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn gaussian_1d_coerces_size() {
        assert_eq!(gaussian_1d(1, None).len(), 3);
        assert_eq!(gaussian_1d(4, None).len(), 5);
        // Non-positive sigma falls back to the radius heuristic.
        assert_eq!(gaussian_1d(9, Some(-1.0)), gaussian_1d(9, None));
    }

    #[test]
    fn gaussian_2d_symmetric_and_normalised() {
        for n in [3usize, 5, 31, 71] {
            for sigma in [None, Some(0.5), Some(2.0), Some(10.0)] {
                let k = gaussian_2d(n, sigma);
                assert_eq!(k.size(), n);
                for i in 0..n {
                    for j in 0..n {
                        assert_eq!(k.at(i, j), k.at(j, i), "n={n} sigma={sigma:?}");
                        assert!((k.at(i, j) - k.at(n - 1 - i, n - 1 - j)).abs() < 1e-7);
                    }
                }
                assert!((k.sum() - 1.0).abs() < 1e-4, "n={n} sigma={sigma:?}");
            }
        }
    }

    #[test]
    fn emboss_3_layout_and_scale() {
        let k = emboss(3);
        let scale = 1.0 / (6.0f32).sqrt();
        for i in 0..3 {
            for j in 0..3 {
                let w = k.at(i, j);
                match (i + j).cmp(&2) {
                    std::cmp::Ordering::Less => assert!((w + scale).abs() < 1e-6),
                    std::cmp::Ordering::Greater => assert!((w - scale).abs() < 1e-6),
                    std::cmp::Ordering::Equal => assert_eq!(w, 0.0),
                }
            }
        }
    }

    #[test]
    fn validate_size_accepts_only_odd_at_least_three() {
        for bad in [0u32, 1, 2, 4, 10, 64] {
            assert!(validate_size(bad).is_err(), "{bad} should be rejected");
        }
        for good in [3u32, 5, 7, 31, 141, 1001] {
            assert!(validate_size(good).is_ok(), "{good} should be accepted");
        }
    }

    #[test]
    fn validate_vs_image_boundary() {
        assert!(validate_vs_image(31, 31, 64).is_ok());
        assert!(validate_vs_image(33, 31, 64).is_err());
        assert!(validate_vs_image(3, 640, 480).is_ok());
    }

    #[test]
    fn preset_membership() {
        assert!(is_preset("gaussian", 71));
        assert!(is_preset("SOBEL", 9));
        assert!(is_preset("emboss", 65));
        assert!(!is_preset("emboss", 3));
        assert!(!is_preset("mean", 3));
    }

    #[test]
    fn build_rejects_unknown_filter_and_custom_when_strict() {
        assert!(matches!(build("blur", 3, true), Err(FilterError::InvalidParameter(_))));
        assert!(matches!(build("gaussian", 5, false), Err(FilterError::InvalidParameter(_))));
        assert!(matches!(build("gaussian", 4, true), Err(FilterError::InvalidParameter(_))));
    }

    #[test]
    fn build_returns_expected_shapes() {
        let sobel = build("sobel", 9, false).unwrap();
        assert!(sobel.is_preset);
        let (kx, ky) = sobel.directional().unwrap();
        assert_eq!((kx.size(), ky.size()), (9, 9));

        let gauss = build("Gaussian", 7, true).unwrap();
        assert!(!gauss.is_preset);
        assert_eq!(gauss.single().unwrap().size(), 7);
        assert_eq!(gauss.single().unwrap().preview().first_values.len(), PREVIEW_LEN);
    }
}
