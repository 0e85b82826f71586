//! Color parsing and the classification primitives shared by every stage.
//!
//! A paint is either "colored" (saturated, meaningful color such as a chart
//! series or a highlight) or achromatic (text, rules, line-art). Only the
//! achromatic ones get recolored for contrast against a dark canvas.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Default HSL saturation at or above which a paint counts as colored.
pub const DEFAULT_SAT_THRESHOLD: f64 = 0.15;

/// Linear-light threshold below which sRGB decoding is a straight division.
const SRGB_LINEAR_CUTOFF: f64 = 0.04045;

/// An 8-bit sRGB color with straight (non-premultiplied) alpha in `[0, 1]`.
///
/// Serializes as its CSS text form and deserializes through [`parse_color`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    /// Red channel.
    pub r: u8,
    /// Green channel.
    pub g: u8,
    /// Blue channel.
    pub b: u8,
    /// Alpha in `[0, 1]`.
    pub a: f64,
}

impl Color {
    /// Opaque black.
    pub const BLACK: Self = Self::rgb(0, 0, 0);
    /// Opaque white.
    pub const WHITE: Self = Self::rgb(255, 255, 255);

    /// Create an opaque color.
    #[must_use]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    /// Same color with a different alpha, clamped to `[0, 1]`.
    #[must_use]
    pub fn with_alpha(self, a: f64) -> Self {
        Self {
            a: a.clamp(0.0, 1.0),
            ..self
        }
    }

    /// Squared Euclidean distance in RGB space (alpha ignored).
    #[must_use]
    pub fn distance_sq(&self, other: &Self) -> f64 {
        let dr = f64::from(self.r) - f64::from(other.r);
        let dg = f64::from(self.g) - f64::from(other.g);
        let db = f64::from(self.b) - f64::from(other.b);
        dr * dr + dg * dg + db * db
    }

    /// Lowercase `#rrggbb` form, alpha dropped.
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.a < 1.0 {
            write!(f, "rgba({}, {}, {}, {})", self.r, self.g, self.b, self.a)
        } else {
            f.write_str(&self.to_hex())
        }
    }
}

impl TryFrom<String> for Color {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        parse_color(&value).ok_or_else(|| format!("unrecognized color `{value}`"))
    }
}

impl From<Color> for String {
    fn from(c: Color) -> Self {
        c.to_string()
    }
}

/// Parse a CSS/SVG color value.
///
/// Accepts `#rgb`, `#rrggbb`, `rgb(r, g, b)`, `rgba(r, g, b, a)` and the
/// keywords `black`, `white`, `gray`, `grey`. Input is trimmed and matched
/// case-insensitively.
///
/// Returns `None` for `none`, `currentColor`, `url(...)` references and any
/// syntax it does not recognize. Absence is never turned into black.
#[must_use]
pub fn parse_color(text: &str) -> Option<Color> {
    let s = text.trim().to_ascii_lowercase();
    if s.is_empty() {
        return None;
    }

    if let Some(hex) = s.strip_prefix('#') {
        return parse_hex(hex);
    }

    if let Some(inner) = s
        .strip_prefix("rgba(")
        .or_else(|| s.strip_prefix("rgb("))
        .and_then(|rest| rest.strip_suffix(')'))
    {
        return parse_rgb_function(inner);
    }

    match s.as_str() {
        "black" => Some(Color::BLACK),
        "white" => Some(Color::WHITE),
        "gray" | "grey" => Some(Color::rgb(128, 128, 128)),
        _ => None,
    }
}

fn parse_hex(hex: &str) -> Option<Color> {
    if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let digit = |i: usize| u8::from_str_radix(&hex[i..=i], 16).ok();
    match hex.len() {
        3 => {
            let (r, g, b) = (digit(0)?, digit(1)?, digit(2)?);
            Some(Color::rgb(r * 17, g * 17, b * 17))
        }
        6 => {
            let num = u32::from_str_radix(hex, 16).ok()?;
            let [_, r, g, b] = num.to_be_bytes();
            Some(Color::rgb(r, g, b))
        }
        _ => None,
    }
}

fn parse_rgb_function(inner: &str) -> Option<Color> {
    let parts: Vec<f64> = inner
        .split(',')
        .map(|p| p.trim().parse::<f64>().ok().filter(|v| v.is_finite()))
        .collect::<Option<_>>()?;

    let (r, g, b, a) = match parts.as_slice() {
        [r, g, b] => (*r, *g, *b, 1.0),
        [r, g, b, a] => (*r, *g, *b, *a),
        _ => return None,
    };

    // Alpha sometimes arrives on the 8-bit scale.
    let a = if a > 1.0 { a / 255.0 } else { a };

    Some(Color {
        r: channel_to_u8(r),
        g: channel_to_u8(g),
        b: channel_to_u8(b),
        a: a.clamp(0.0, 1.0),
    })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn channel_to_u8(v: f64) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Decode one 8-bit sRGB channel to linear light.
fn srgb_to_linear(channel: u8) -> f64 {
    let v = f64::from(channel) / 255.0;
    if v <= SRGB_LINEAR_CUTOFF {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

/// WCAG relative luminance of a color, in `[0, 1]`.
///
/// Channels are linearized first, so this is not the HSL lightness used by
/// [`saturation_hsl`].
#[must_use]
pub fn relative_luminance(c: &Color) -> f64 {
    0.2126 * srgb_to_linear(c.r) + 0.7152 * srgb_to_linear(c.g) + 0.0722 * srgb_to_linear(c.b)
}

/// Pick pure black or pure white, whichever reads on `bg`.
///
/// Luminance of exactly 0.5 counts as a light background.
#[must_use]
pub fn pick_foreground_for_background(bg: &Color) -> Color {
    if relative_luminance(bg) >= 0.5 {
        Color::BLACK
    } else {
        Color::WHITE
    }
}

/// Saturation component of the RGB → HSL conversion.
#[must_use]
pub fn saturation_hsl(c: &Color) -> f64 {
    hsl_saturation(c.r, c.g, c.b)
}

/// [`saturation_hsl`] on raw channels, for pixel loops.
pub(crate) fn hsl_saturation(r: u8, g: u8, b: u8) -> f64 {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    if max == min {
        return 0.0;
    }
    let mx = f64::from(max) / 255.0;
    let mn = f64::from(min) / 255.0;
    let d = mx - mn;
    let l = (mx + mn) / 2.0;
    if l > 0.5 {
        d / (2.0 - mx - mn)
    } else {
        d / (mx + mn)
    }
}

/// Whether `c` carries meaningful color and should be left alone.
#[must_use]
pub fn is_colored(c: &Color, sat_threshold: f64) -> bool {
    saturation_hsl(c) >= sat_threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_short_and_long_hex() {
        assert_eq!(parse_color("#fff"), Some(Color::WHITE));
        assert_eq!(parse_color("#FF8000"), Some(Color::rgb(255, 128, 0)));
        assert_eq!(parse_color("  #0a0B0c "), Some(Color::rgb(10, 11, 12)));
        assert_eq!(parse_color("#abcd"), None);
        assert_eq!(parse_color("#ggg"), None);
    }

    #[test]
    fn parses_rgb_functions() {
        assert_eq!(parse_color("rgb(1, 2, 3)"), Some(Color::rgb(1, 2, 3)));
        let c = parse_color("RGBA(10,20,30,0.5)").unwrap();
        assert_eq!((c.r, c.g, c.b), (10, 20, 30));
        assert!((c.a - 0.5).abs() < 1e-9);

        let eight_bit_alpha = parse_color("rgba(0,0,0,255)").unwrap();
        assert!((eight_bit_alpha.a - 1.0).abs() < 1e-9);

        assert_eq!(parse_color("rgb(300, -4, 12.6)"), Some(Color::rgb(255, 0, 13)));
        assert_eq!(parse_color("rgb(1, 2)"), None);
        assert_eq!(parse_color("rgb(a, b, c)"), None);
        assert_eq!(parse_color("rgb(NaN, 0, 0)"), None);
    }

    #[test]
    fn keywords_and_absence() {
        assert_eq!(parse_color("Black"), Some(Color::BLACK));
        assert_eq!(parse_color("grey"), parse_color("gray"));
        assert_eq!(parse_color("none"), None);
        assert_eq!(parse_color("currentColor"), None);
        assert_eq!(parse_color("url(#grad1)"), None);
        assert_eq!(parse_color("red"), None);
        assert_eq!(parse_color(""), None);
    }

    #[test]
    fn luminance_extremes() {
        assert!(relative_luminance(&Color::BLACK).abs() < 1e-12);
        assert!((relative_luminance(&Color::WHITE) - 1.0).abs() < 1e-12);
        // Linearization makes mid-gray darker than 0.5.
        let mid = relative_luminance(&Color::rgb(128, 128, 128));
        assert!(mid > 0.2 && mid < 0.23, "got {mid}");
    }

    #[test]
    fn foreground_contrasts_with_background() {
        assert_eq!(pick_foreground_for_background(&Color::BLACK).to_hex(), "#ffffff");
        assert_eq!(pick_foreground_for_background(&Color::WHITE).to_hex(), "#000000");
        assert_eq!(
            pick_foreground_for_background(&Color::rgb(128, 128, 128)),
            Color::WHITE
        );
        assert_eq!(
            pick_foreground_for_background(&Color::rgb(200, 200, 200)),
            Color::BLACK
        );
    }

    #[test]
    fn saturation_of_grays_is_zero() {
        for v in [0u8, 17, 128, 255] {
            assert!(saturation_hsl(&Color::rgb(v, v, v)).abs() < f64::EPSILON);
        }
        assert!((saturation_hsl(&Color::rgb(255, 0, 0)) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn is_colored_is_monotonic_in_saturation() {
        // Fixed hue (red) and lightness 0.5: channels 128±d.
        let mut previous = false;
        for d in 0..=127u8 {
            let c = Color::rgb(128 + d, 128 - d, 128 - d);
            let colored = is_colored(&c, DEFAULT_SAT_THRESHOLD);
            assert!(!(previous && !colored), "flipped back at d={d}");
            previous = colored;
        }
        assert!(previous);
    }

    #[test]
    fn display_uses_rgba_for_translucent_colors() {
        assert_eq!(Color::rgb(0, 0, 255).to_string(), "#0000ff");
        assert_eq!(
            Color::rgb(0, 0, 255).with_alpha(0.25).to_string(),
            "rgba(0, 0, 255, 0.25)"
        );
    }

    #[test]
    fn serde_uses_css_text() {
        let c: Color = serde_json::from_str("\"#336699\"").unwrap();
        assert_eq!(c, Color::rgb(0x33, 0x66, 0x99));
        assert_eq!(serde_json::to_string(&c).unwrap(), "\"#336699\"");
        assert!(serde_json::from_str::<Color>("\"none\"").is_err());
    }

    #[test]
    fn distance_ignores_alpha() {
        let a = Color::rgb(255, 255, 0);
        let b = Color::rgb(250, 250, 10).with_alpha(0.1);
        assert!((a.distance_sq(&b) - 150.0).abs() < 1e-9);
    }
}
