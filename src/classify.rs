//! Photograph detection for embedded raster images.
//!
//! Photographs are left alone in dark mode because inverting them destroys
//! them. The decision combines four cheap statistics computed on a downscaled
//! sample:
//! 1. **Average saturation**: mean HSL saturation
//! 2. **Color spread**: RMS RGB distance from the mean color
//! 3. **Luminance entropy**: Shannon entropy of a 64-bin luma histogram
//! 4. **Edge density**: share of interior pixels with a strong Sobel response

use image::imageops::{self, FilterType};
use image::RgbaImage;
use serde::Deserialize;

use crate::color::hsl_saturation;
use crate::error::{Error, Result};

/// Default longer-side size of the classification sample.
pub const DEFAULT_SAMPLE_MAX: u32 = 200;
/// Number of luma histogram bins.
const HIST_BINS: usize = 64;
/// Sobel magnitude above which a pixel counts as an edge.
const EDGE_THRESHOLD: f64 = 0.2;

/// Statistics extracted from one raster sample.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClassificationFeatures {
    /// Mean HSL saturation in `[0, 1]`.
    pub avg_saturation: f64,
    /// RMS Euclidean RGB distance from the mean color (0-255 scale).
    pub color_std: f64,
    /// Shannon entropy of the luma histogram, in bits.
    pub luminance_entropy: f64,
    /// Fraction of interior pixels whose gradient exceeds the edge threshold.
    pub edge_density: f64,
}

/// Decision thresholds for [`PhotoThresholds::is_photograph`].
///
/// The defaults were tuned by eye on scanned documents; treat them as
/// configuration.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct PhotoThresholds {
    /// Minimum average saturation.
    pub avg_saturation: f64,
    /// Minimum color spread (0-255 scale).
    pub color_std: f64,
    /// Minimum luma entropy in bits.
    pub entropy: f64,
    /// Minimum edge density.
    pub edge_density: f64,
}

impl Default for PhotoThresholds {
    fn default() -> Self {
        Self {
            avg_saturation: 0.05,
            color_std: 5.0,
            entropy: 4.0,
            edge_density: 0.06,
        }
    }
}

impl PhotoThresholds {
    /// Photograph if all four features pass, or if saturation and entropy are
    /// both comfortably high (blurred or smooth-gradient photos have few edges).
    #[must_use]
    pub fn is_photograph(&self, f: &ClassificationFeatures) -> bool {
        let all_pass = f.avg_saturation >= self.avg_saturation
            && f.color_std >= self.color_std
            && f.luminance_entropy >= self.entropy
            && f.edge_density >= self.edge_density;
        let vivid = f.avg_saturation >= self.avg_saturation * 1.2
            && f.luminance_entropy >= self.entropy * 0.9;
        all_pass || vivid
    }
}

/// Result of classifying one raster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    /// Whether the raster looks like a photograph.
    pub is_photograph: bool,
    /// The features the decision was made from.
    pub features: ClassificationFeatures,
}

/// Downscale so the longer side is at most `sample_max`.
///
/// Uses a triangle filter; nearest-neighbor would alias and inflate the edge
/// statistics. Rasters already within bounds are copied unchanged.
///
/// # Errors
///
/// Returns [`Error::Sample`] for zero-sized rasters or a zero `sample_max`.
pub fn downsample(image: &RgbaImage, sample_max: u32) -> Result<RgbaImage> {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 || sample_max == 0 {
        return Err(Error::Sample {
            width: w,
            height: h,
        });
    }

    let longer = w.max(h);
    if longer <= sample_max {
        return Ok(image.clone());
    }

    let scale = f64::from(sample_max) / f64::from(longer);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let (sw, sh) = (
        ((f64::from(w) * scale).floor() as u32).max(1),
        ((f64::from(h) * scale).floor() as u32).max(1),
    );
    Ok(imageops::resize(image, sw, sh, FilterType::Triangle))
}

/// Luma with Rec. 709 weights on the encoded channels, in `[0, 1]`.
fn luma(r: u8, g: u8, b: u8) -> f64 {
    (0.2126 * f64::from(r) + 0.7152 * f64::from(g) + 0.0722 * f64::from(b)) / 255.0
}

/// Shannon entropy in bits of a histogram with `total` samples.
fn entropy_bits(hist: &[u32], total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = total as f64;
    hist.iter()
        .filter(|&&count| count > 0)
        .map(|&count| {
            let p = f64::from(count) / n;
            -p * p.log2()
        })
        .sum()
}

/// Count interior pixels whose 3x3 Sobel magnitude exceeds `threshold`.
///
/// Border pixels are not tested.
fn sobel_edge_count(data: &[f64], width: usize, height: usize, threshold: f64) -> usize {
    if width < 3 || height < 3 {
        return 0;
    }

    let mut count = 0;
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let idx = |dy: usize, dx: usize| data[(y + dy - 1) * width + (x + dx - 1)];

            let gx = -idx(0, 0) + idx(0, 2) - 2.0 * idx(1, 0) + 2.0 * idx(1, 2) - idx(2, 0)
                + idx(2, 2);
            let gy = -idx(0, 0) - 2.0 * idx(0, 1) - idx(0, 2)
                + idx(2, 0)
                + 2.0 * idx(2, 1)
                + idx(2, 2);

            if gx.hypot(gy) > threshold {
                count += 1;
            }
        }
    }
    count
}

/// Compute the four classification features over every pixel of `sample`.
#[must_use]
pub fn compute_features(sample: &RgbaImage) -> ClassificationFeatures {
    let (w, h) = (sample.width() as usize, sample.height() as usize);
    let pixel_count = w * h;
    if pixel_count == 0 {
        return ClassificationFeatures::default();
    }
    #[allow(clippy::cast_precision_loss)]
    let n = pixel_count as f64;

    let mut sum_sat = 0.0;
    let (mut sum_r, mut sum_g, mut sum_b) = (0.0, 0.0, 0.0);
    let mut hist = [0u32; HIST_BINS];
    let mut lum = Vec::with_capacity(pixel_count);

    for px in sample.pixels() {
        let [r, g, b, _] = px.0;
        sum_sat += hsl_saturation(r, g, b);
        sum_r += f64::from(r);
        sum_g += f64::from(g);
        sum_b += f64::from(b);

        let l = luma(r, g, b);
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let bin = ((l * HIST_BINS as f64).floor() as usize).min(HIST_BINS - 1);
        hist[bin] += 1;
        lum.push(l);
    }

    let (mean_r, mean_g, mean_b) = (sum_r / n, sum_g / n, sum_b / n);
    let var_sum: f64 = sample
        .pixels()
        .map(|px| {
            let dr = f64::from(px[0]) - mean_r;
            let dg = f64::from(px[1]) - mean_g;
            let db = f64::from(px[2]) - mean_b;
            dr * dr + dg * dg + db * db
        })
        .sum();

    let interior = w.saturating_sub(2) * h.saturating_sub(2);
    let edges = sobel_edge_count(&lum, w, h, EDGE_THRESHOLD);
    #[allow(clippy::cast_precision_loss)]
    let edge_density = edges as f64 / interior.max(1) as f64;

    ClassificationFeatures {
        avg_saturation: sum_sat / n,
        color_std: (var_sum / n).sqrt(),
        luminance_entropy: entropy_bits(&hist, pixel_count),
        edge_density,
    }
}

/// Sample `image`, extract features, and decide whether it is a photograph.
///
/// # Errors
///
/// Returns [`Error::Sample`] if the raster cannot be sampled. Callers fall back
/// to a flat inversion in that case.
pub fn classify(
    image: &RgbaImage,
    sample_max: u32,
    thresholds: &PhotoThresholds,
) -> Result<Classification> {
    let sample = downsample(image, sample_max)?;
    let features = compute_features(&sample);
    let is_photograph = thresholds.is_photograph(&features);
    tracing::debug!(
        width = image.width(),
        height = image.height(),
        sample_w = sample.width(),
        sample_h = sample.height(),
        avg_saturation = features.avg_saturation,
        color_std = features.color_std,
        entropy = features.luminance_entropy,
        edge_density = features.edge_density,
        is_photograph,
        "classified raster"
    );
    Ok(Classification {
        is_photograph,
        features,
    })
}
