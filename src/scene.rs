//! Vector scene model and smart recoloring.
//!
//! A page's vector layer is a tree of [`VectorSceneNode`]s. Smart inversion
//! never touches geometry: it only swaps achromatic fill and stroke paints for
//! a color that reads on black, and leaves colored paints (charts, logos,
//! highlights) as they are.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::color::{is_colored, parse_color, pick_foreground_for_background, Color};

/// How a fill or stroke is painted.
///
/// Serialized in its SVG attribute form: `"none"`, a color, or `"url(#id)"`.
/// Values that cannot be parsed (`currentColor`, named colors, percentages)
/// are kept verbatim as [`Paint::Unrecognized`] and never recolored.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Paint {
    /// No paint.
    #[default]
    None,
    /// A flat color.
    Solid(Color),
    /// Reference to a gradient in the scene's gradient table.
    Gradient(String),
    /// Attribute text this crate does not understand, written back unchanged.
    Unrecognized(String),
}

impl Paint {
    /// Parse an SVG paint attribute.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let t = text.trim();
        if let Some(id) = t
            .strip_prefix("url(")
            .and_then(|rest| rest.strip_suffix(')'))
            .map(|inner| inner.trim().trim_start_matches('#'))
        {
            return Self::Gradient(id.to_string());
        }
        if t.is_empty() || t.eq_ignore_ascii_case("none") {
            return Self::None;
        }
        parse_color(t).map_or_else(|| Self::Unrecognized(text.to_string()), Self::Solid)
    }
}

impl fmt::Display for Paint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Solid(c) => write!(f, "{c}"),
            Self::Gradient(id) => write!(f, "url(#{id})"),
            Self::Unrecognized(raw) => f.write_str(raw),
        }
    }
}

impl From<String> for Paint {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<Paint> for String {
    fn from(p: Paint) -> Self {
        p.to_string()
    }
}

/// Fill and stroke of a paintable node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PaintStyle {
    /// Interior paint.
    pub fill: Paint,
    /// Outline paint. Never a gradient in practice, but tolerated.
    pub stroke: Paint,
}

impl PaintStyle {
    /// Style with a solid fill and no stroke.
    #[must_use]
    pub fn filled(color: Color) -> Self {
        Self {
            fill: Paint::Solid(color),
            stroke: Paint::None,
        }
    }
}

/// A text run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TextNode {
    /// Paints.
    pub style: PaintStyle,
    /// The text itself.
    pub content: String,
}

/// A group of child nodes, optionally carrying inherited paints.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupNode {
    /// Paints set on the group element.
    pub style: PaintStyle,
    /// Children in document order.
    pub children: Vec<VectorSceneNode>,
}

/// Display filter applied to an image node by the compositor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFilter {
    /// Uniform color inversion, the `invert(1)` CSS filter.
    Invert,
}

/// An embedded raster image.
///
/// Images are handled by the raster pipeline, never by paint recoloring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageNode {
    /// Stable element identifier.
    pub id: String,
    /// Image source.
    pub href: String,
    /// Filter to apply on display.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<ImageFilter>,
}

/// One node of a vector scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum VectorSceneNode {
    /// Text run.
    Text(TextNode),
    /// Arbitrary path.
    Path(PaintStyle),
    /// Rectangle.
    Rect(PaintStyle),
    /// Circle.
    Circle(PaintStyle),
    /// Ellipse.
    Ellipse(PaintStyle),
    /// Line segment.
    Line(PaintStyle),
    /// Open polyline.
    Polyline(PaintStyle),
    /// Closed polygon.
    Polygon(PaintStyle),
    /// Group of nodes.
    Group(GroupNode),
    /// Embedded raster image.
    Image(ImageNode),
}

impl VectorSceneNode {
    /// Paints of this node, or `None` for images.
    #[must_use]
    pub fn style(&self) -> Option<&PaintStyle> {
        match self {
            Self::Text(t) => Some(&t.style),
            Self::Group(g) => Some(&g.style),
            Self::Path(s)
            | Self::Rect(s)
            | Self::Circle(s)
            | Self::Ellipse(s)
            | Self::Line(s)
            | Self::Polyline(s)
            | Self::Polygon(s) => Some(s),
            Self::Image(_) => None,
        }
    }

    /// Mutable paints of this node, or `None` for images.
    pub fn style_mut(&mut self) -> Option<&mut PaintStyle> {
        match self {
            Self::Text(t) => Some(&mut t.style),
            Self::Group(g) => Some(&mut g.style),
            Self::Path(s)
            | Self::Rect(s)
            | Self::Circle(s)
            | Self::Ellipse(s)
            | Self::Line(s)
            | Self::Polyline(s)
            | Self::Polygon(s) => Some(s),
            Self::Image(_) => None,
        }
    }

    /// Child nodes (only groups have any).
    #[must_use]
    pub fn children(&self) -> &[VectorSceneNode] {
        match self {
            Self::Group(g) => &g.children,
            _ => &[],
        }
    }

    fn children_mut(&mut self) -> &mut [VectorSceneNode] {
        match self {
            Self::Group(g) => &mut g.children,
            _ => &mut [],
        }
    }
}

/// Color of a gradient stop.
///
/// Text that does not parse as a color is kept verbatim and counts as
/// achromatic, so it neither blocks nor takes part in recoloring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StopColor {
    /// A parsed color.
    Known(Color),
    /// Attribute text this crate does not understand, written back unchanged.
    Unrecognized(String),
}

impl StopColor {
    /// The parsed color, if any.
    #[must_use]
    pub fn color(&self) -> Option<&Color> {
        match self {
            Self::Known(c) => Some(c),
            Self::Unrecognized(_) => None,
        }
    }
}

impl From<String> for StopColor {
    fn from(value: String) -> Self {
        parse_color(&value).map_or(Self::Unrecognized(value), Self::Known)
    }
}

impl From<StopColor> for String {
    fn from(c: StopColor) -> Self {
        match c {
            StopColor::Known(c) => c.to_string(),
            StopColor::Unrecognized(raw) => raw,
        }
    }
}

/// One color stop of a gradient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientStop {
    /// Position along the gradient in `[0, 1]`.
    #[serde(default)]
    pub offset: f64,
    /// Stop color, absent if the stop has none.
    #[serde(default)]
    pub color: Option<StopColor>,
}

/// A linear or radial gradient definition.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Gradient {
    /// Stops in offset order.
    pub stops: Vec<GradientStop>,
}

impl Gradient {
    /// A gradient is colored if any of its stops is.
    #[must_use]
    pub fn is_colored(&self, sat_threshold: f64) -> bool {
        self.stops
            .iter()
            .filter_map(|s| s.color.as_ref().and_then(StopColor::color))
            .any(|c| is_colored(c, sat_threshold))
    }
}

fn lenient_color<'de, D>(deserializer: D) -> Result<Option<Color>, D::Error>
where
    D: Deserializer<'de>,
{
    let text = Option::<String>::deserialize(deserializer)?;
    Ok(text.as_deref().and_then(parse_color))
}

/// A page's vector layer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorScene {
    /// Canvas background, if set. Unparsable values read as unset.
    #[serde(deserialize_with = "lenient_color")]
    pub background: Option<Color>,
    /// Gradient table keyed by id (without the leading `#`).
    pub gradients: BTreeMap<String, Gradient>,
    /// Top-level nodes.
    pub nodes: Vec<VectorSceneNode>,
}

impl VectorScene {
    /// Visit every node depth-first, groups before their children.
    pub fn visit_mut(&mut self, mut f: impl FnMut(&mut VectorSceneNode)) {
        fn walk(nodes: &mut [VectorSceneNode], f: &mut dyn FnMut(&mut VectorSceneNode)) {
            for node in nodes {
                f(node);
                walk(node.children_mut(), f);
            }
        }
        walk(&mut self.nodes, &mut f);
    }

    /// Image nodes in document order.
    #[must_use]
    pub fn images(&self) -> Vec<&ImageNode> {
        fn walk<'a>(nodes: &'a [VectorSceneNode], out: &mut Vec<&'a ImageNode>) {
            for node in nodes {
                if let VectorSceneNode::Image(img) = node {
                    out.push(img);
                }
                walk(node.children(), out);
            }
        }
        let mut out = Vec::new();
        walk(&self.nodes, &mut out);
        out
    }
}

/// What [`invert_scene_smart`] changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecolorStats {
    /// Solid fills replaced.
    pub fills: usize,
    /// Solid strokes replaced.
    pub strokes: usize,
    /// Gradient stops replaced.
    pub gradient_stops: usize,
}

/// Recolor achromatic paints of `scene` for a black canvas.
///
/// Solid fills and strokes below `sat_threshold` saturation are replaced by
/// [`pick_foreground_for_background`]. A gradient fill is left alone when any
/// of its stops is colored (or when the id is unknown); otherwise each of its
/// achromatic stops is replaced, once per gradient no matter how many nodes
/// reference it. Image nodes are skipped. The background becomes black.
///
/// Mutates the scene in place.
pub fn invert_scene_smart(scene: &mut VectorScene, sat_threshold: f64) -> RecolorStats {
    let achromatic_gradients: BTreeSet<String> = scene
        .gradients
        .iter()
        .filter(|(_, g)| !g.is_colored(sat_threshold))
        .map(|(id, _)| id.clone())
        .collect();

    let mut stats = RecolorStats::default();
    let mut referenced = BTreeSet::new();

    scene.visit_mut(|node| {
        let Some(style) = node.style_mut() else {
            return;
        };

        match &style.fill {
            Paint::Gradient(id) => {
                if achromatic_gradients.contains(id) {
                    referenced.insert(id.clone());
                }
            }
            Paint::Solid(c) if !is_colored(c, sat_threshold) => {
                style.fill = Paint::Solid(pick_foreground_for_background(c));
                stats.fills += 1;
            }
            Paint::Solid(_) | Paint::None | Paint::Unrecognized(_) => {}
        }

        if let Paint::Solid(c) = &style.stroke {
            if !is_colored(c, sat_threshold) {
                style.stroke = Paint::Solid(pick_foreground_for_background(c));
                stats.strokes += 1;
            }
        }
    });

    for id in &referenced {
        let Some(gradient) = scene.gradients.get_mut(id) else {
            continue;
        };
        for stop in &mut gradient.stops {
            let Some(StopColor::Known(c)) = &stop.color else {
                continue;
            };
            if !is_colored(c, sat_threshold) {
                stop.color = Some(StopColor::Known(pick_foreground_for_background(c)));
                stats.gradient_stops += 1;
            }
        }
    }

    scene.background = Some(Color::BLACK);
    tracing::debug!(
        fills = stats.fills,
        strokes = stats.strokes,
        gradient_stops = stats.gradient_stops,
        "recolored vector scene"
    );
    stats
}

/// Map one highlight color to another.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HighlightMapping {
    /// Color to look for.
    pub source: Color,
    /// Replacement color.
    pub target: Color,
}

/// Per-channel tolerance used by [`default_highlight_tolerance_sq`].
pub const HIGHLIGHT_CHANNEL_TOLERANCE: f64 = 30.0;

/// Yellow, green and cyan markers become blue, which stays legible on black.
#[must_use]
pub fn default_highlight_mappings() -> Vec<HighlightMapping> {
    let blue = Color::rgb(0, 0, 255);
    [
        Color::rgb(255, 255, 0),
        Color::rgb(0, 255, 0),
        Color::rgb(0, 255, 255),
    ]
    .into_iter()
    .map(|source| HighlightMapping {
        source,
        target: blue,
    })
    .collect()
}

/// Squared RGB distance allowing [`HIGHLIGHT_CHANNEL_TOLERANCE`] on each channel.
#[must_use]
pub fn default_highlight_tolerance_sq() -> f64 {
    HIGHLIGHT_CHANNEL_TOLERANCE * HIGHLIGHT_CHANNEL_TOLERANCE * 3.0
}

/// Replace solid fills and strokes close to a mapping source by its target.
///
/// The first mapping within `tolerance_sq` wins. The source alpha is kept, so
/// translucent highlighter marks stay translucent. Returns the number of
/// paints changed. Keep a clone of the scene to undo.
pub fn remap_highlights(
    scene: &mut VectorScene,
    mappings: &[HighlightMapping],
    tolerance_sq: f64,
) -> usize {
    let remap = |paint: &mut Paint| -> bool {
        let Paint::Solid(src) = paint else {
            return false;
        };
        let Some(m) = mappings
            .iter()
            .find(|m| src.distance_sq(&m.source) <= tolerance_sq)
        else {
            return false;
        };
        *paint = Paint::Solid(m.target.with_alpha(src.a));
        true
    };

    let mut changed = 0;
    scene.visit_mut(|node| {
        if let Some(style) = node.style_mut() {
            changed += usize::from(remap(&mut style.fill));
            changed += usize::from(remap(&mut style.stroke));
        }
    });
    changed
}
