//! Detector output → pixel rectangles.
//!
//! The detector emits a flat `f64` array. Two layouts exist, so the layout is
//! always carried explicitly as a [`BoxFormat`] instead of being guessed.

use serde::{Deserialize, Serialize};

/// Boxes smaller than this many pixels are noise.
pub const MIN_BOX_AREA: u32 = 25;
/// Tuples whose absolute components sum to at most this value are padding.
const PADDING_SUM: f64 = 0.1;

/// Width of the legacy reference frame.
pub const LEGACY_BASE_WIDTH: f64 = 596.0;
/// Height of the legacy reference frame.
pub const LEGACY_BASE_HEIGHT: f64 = 842.0;
/// Factor applied to raw legacy model output before it is in reference units.
pub const LEGACY_OUTPUT_SCALE: f64 = 224.0;

/// An axis-aligned rectangle in pixel units of one specific raster.
///
/// Values produced by [`clamp_box_to_pixels`] always satisfy
/// `x + w <= width`, `y + h <= height` and `w * h >= 25`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width.
    pub w: u32,
    /// Height.
    pub h: u32,
}

impl BoundingBox {
    /// Area in pixels.
    #[must_use]
    pub fn area(&self) -> u64 {
        u64::from(self.w) * u64::from(self.h)
    }
}

/// Layout of the raw detector output.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "camelCase")]
pub enum BoxFormat {
    /// Repeating `[y1, x1, y2, x2]` tuples normalized to the target raster,
    /// padded with near-zero tuples. This is the canonical layout.
    #[default]
    NormalizedCorners,
    /// A single `[x, y, w, h]` box in a fixed reference frame. Raw values are
    /// multiplied by `output_scale` first, then rescaled from
    /// `base_width x base_height` to the target raster.
    #[serde(rename_all = "camelCase")]
    LegacyReference {
        /// Reference frame width.
        base_width: f64,
        /// Reference frame height.
        base_height: f64,
        /// Multiplier turning raw output into reference units.
        output_scale: f64,
    },
}

impl BoxFormat {
    /// The legacy layout with its stock 596x842 frame.
    #[must_use]
    pub const fn legacy() -> Self {
        Self::LegacyReference {
            base_width: LEGACY_BASE_WIDTH,
            base_height: LEGACY_BASE_HEIGHT,
            output_scale: LEGACY_OUTPUT_SCALE,
        }
    }
}

/// Normalize, clamp and validate a raw `[x, y, w, h]` box for a `width x height`
/// raster.
///
/// Non-finite components count as zero and negative extents move the origin.
/// Returns `None` when nothing of at least [`MIN_BOX_AREA`] pixels remains.
#[must_use]
pub fn clamp_box_to_pixels(raw: [f64; 4], width: u32, height: u32) -> Option<BoundingBox> {
    let [mut x, mut y, mut w, mut h] = raw.map(|v| if v.is_finite() { v } else { 0.0 });
    let (max_w, max_h) = (f64::from(width), f64::from(height));

    if w < 0.0 {
        x += w;
        w = -w;
    }
    if h < 0.0 {
        y += h;
        h = -h;
    }

    x = x.clamp(0.0, max_w);
    y = y.clamp(0.0, max_h);
    w = w.min(max_w - x).max(0.0);
    h = h.min(max_h - y).max(0.0);

    if w <= 0.0 || h <= 0.0 || w * h < f64::from(MIN_BOX_AREA) {
        return None;
    }

    // Rounding can push an edge one pixel past the raster; pull it back.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let round = |v: f64| v.round() as u32;
    let bx = round(x).min(width);
    let by = round(y).min(height);
    let bw = round(w).min(width - bx);
    let bh = round(h).min(height - by);

    let b = BoundingBox {
        x: bx,
        y: by,
        w: bw,
        h: bh,
    };
    (b.w > 0 && b.h > 0 && b.area() >= u64::from(MIN_BOX_AREA)).then_some(b)
}

/// Whether a detector tuple is an unused padding slot.
#[must_use]
pub fn is_padding(tuple: &[f64; 4]) -> bool {
    tuple.iter().map(|v| v.abs()).sum::<f64>() <= PADDING_SUM
}

/// Convert normalized corner coordinates into a raw `[x, y, w, h]` rectangle.
#[must_use]
pub fn normalized_corners_to_rect(
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
    width: u32,
    height: u32,
) -> [f64; 4] {
    let (w, h) = (f64::from(width), f64::from(height));
    [x1 * w, y1 * h, (x2 - x1) * w, (y2 - y1) * h]
}

/// Turn raw detector output into validated boxes for a `width x height` raster.
#[must_use]
pub fn boxes_from_raw(raw: &[f64], format: BoxFormat, width: u32, height: u32) -> Vec<BoundingBox> {
    match format {
        BoxFormat::NormalizedCorners => {
            let chunks = raw.chunks_exact(4);
            if !chunks.remainder().is_empty() {
                tracing::warn!(
                    len = raw.len(),
                    "detector output is not a multiple of 4, ignoring trailing values"
                );
            }
            chunks
                .filter_map(|c| {
                    let tuple = [c[0], c[1], c[2], c[3]];
                    if is_padding(&tuple) {
                        return None;
                    }
                    let [y1, x1, y2, x2] = tuple;
                    let rect = normalized_corners_to_rect(x1, y1, x2, y2, width, height);
                    clamp_box_to_pixels(rect, width, height)
                })
                .collect()
        }
        BoxFormat::LegacyReference {
            base_width,
            base_height,
            output_scale,
        } => {
            let Some(first) = raw.get(..4) else {
                return Vec::new();
            };
            let sx = f64::from(width) / base_width;
            let sy = f64::from(height) / base_height;
            let rect = [
                first[0] * output_scale * sx,
                first[1] * output_scale * sy,
                first[2] * output_scale * sx,
                first[3] * output_scale * sy,
            ];
            clamp_box_to_pixels(rect, width, height).into_iter().collect()
        }
    }
}
