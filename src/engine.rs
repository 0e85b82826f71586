//! Core dark-mode engine.

use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat, RgbaImage};
use serde::Deserialize;

use crate::boxes::BoundingBox;
use crate::classify::{self, ClassificationFeatures, PhotoThresholds, DEFAULT_SAMPLE_MAX};
use crate::color::DEFAULT_SAT_THRESHOLD;
use crate::detector::{DetectReport, DetectRequest, DetectorQueue};
use crate::error::{Error, Result};
use crate::invert;
use crate::resources::{GeneratedFile, ResourceTable};
use crate::scene::{self, ImageFilter, RecolorStats, VectorScene, VectorSceneNode};

/// Options controlling dark-mode processing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProcessOptions {
    /// Invert embedded images even when they look like photographs.
    pub force: bool,
    /// Longer side of the classification sample.
    pub sample_max: u32,
    /// Photograph decision thresholds.
    pub thresholds: PhotoThresholds,
    /// Saturation at or above which a vector paint counts as colored.
    pub sat_threshold: f64,
    /// Images whose longer side exceeds this get the flat fallback inversion.
    pub max_full_size: u32,
    /// Detector model reference passed with page requests.
    pub model_ref: String,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            force: false,
            sample_max: DEFAULT_SAMPLE_MAX,
            thresholds: PhotoThresholds::default(),
            sat_threshold: DEFAULT_SAT_THRESHOLD,
            max_full_size: 2500,
            model_ref: "multi_bounding_box_model/model.json".to_string(),
        }
    }
}

impl ProcessOptions {
    /// Load options from a JSON file. Missing fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Why an image fell back to the flat inversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    /// The raster could not be sampled for classification.
    Unsampleable(String),
    /// The raster is larger than [`ProcessOptions::max_full_size`].
    TooLarge {
        /// Width in pixels.
        width: u32,
        /// Height in pixels.
        height: u32,
    },
}

/// What happened to one embedded image.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageOutcome {
    /// Classified as a photograph and left as-is.
    Photograph(ClassificationFeatures),
    /// Inverted at full resolution with alpha handling.
    Inverted {
        /// The inverted raster.
        image: RgbaImage,
        /// Features the decision was based on, absent in force mode.
        features: Option<ClassificationFeatures>,
    },
    /// Could not be processed properly; use a uniform inversion instead.
    FlatFallback(FallbackReason),
}

/// Result of processing one page raster.
#[derive(Debug)]
pub struct PageResult {
    /// Page with everything outside the detected regions inverted.
    pub image: RgbaImage,
    /// Regions kept in their original colors.
    pub boxes: Vec<BoundingBox>,
    /// Detector report, for diagnostics.
    pub report: DetectReport,
}

/// Result of processing a single image file.
#[derive(Debug)]
pub struct ProcessResult {
    /// Path of the processed file.
    pub path: PathBuf,
    /// Whether processing succeeded.
    pub success: bool,
    /// Whether the file was skipped (photograph or unreadable).
    pub skipped: bool,
    /// Features computed for the image, if any.
    pub features: Option<ClassificationFeatures>,
    /// Human-readable status message.
    pub message: String,
}

impl ProcessResult {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            success: false,
            skipped: false,
            features: None,
            message: String::new(),
        }
    }
}

/// Summary of processing a vector scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SceneSummary {
    /// Paint changes.
    pub recolor: RecolorStats,
    /// Image nodes replaced by an inverted copy.
    pub images_inverted: usize,
    /// Image nodes left alone as photographs.
    pub photographs: usize,
    /// Image nodes that got the display-side invert filter.
    pub flat_fallbacks: usize,
    /// Image nodes whose source could not be read.
    pub unreadable: usize,
}

/// The dark-mode engine.
///
/// Holds the processing options; create once and reuse for many pages.
#[derive(Debug, Clone, Default)]
pub struct DarkModeEngine {
    opts: ProcessOptions,
}

impl DarkModeEngine {
    /// Create an engine with the given options.
    #[must_use]
    pub fn new(opts: ProcessOptions) -> Self {
        Self { opts }
    }

    /// The options in effect.
    #[must_use]
    pub fn options(&self) -> &ProcessOptions {
        &self.opts
    }

    /// Decide what to do with an embedded raster image and do it.
    ///
    /// Photographs are skipped, everything else is inverted with
    /// [`invert::invert_full_premultiplied`]. Rasters that cannot be sampled
    /// or exceed `max_full_size` come back as [`ImageOutcome::FlatFallback`].
    #[must_use]
    pub fn process_image(&self, image: &RgbaImage) -> ImageOutcome {
        let (w, h) = image.dimensions();

        let features = if self.opts.force {
            None
        } else {
            match classify::classify(image, self.opts.sample_max, &self.opts.thresholds) {
                Ok(c) if c.is_photograph => return ImageOutcome::Photograph(c.features),
                Ok(c) => Some(c.features),
                Err(e) => {
                    tracing::warn!(%e, "classification failed, falling back to flat inversion");
                    return ImageOutcome::FlatFallback(FallbackReason::Unsampleable(e.to_string()));
                }
            }
        };

        if w.max(h) > self.opts.max_full_size {
            tracing::warn!(
                width = w,
                height = h,
                max = self.opts.max_full_size,
                "image too large for full inversion, falling back to flat inversion"
            );
            return ImageOutcome::FlatFallback(FallbackReason::TooLarge {
                width: w,
                height: h,
            });
        }

        ImageOutcome::Inverted {
            image: invert::invert_full_premultiplied(image),
            features,
        }
    }

    /// Invert a page raster while keeping the detected regions intact.
    ///
    /// The raster is handed to the detector and comes back with the response.
    /// If detection fails the whole page is inverted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DetectorUnavailable`] only if the detector worker
    /// vanished while holding the raster.
    pub async fn process_page(&self, queue: &DetectorQueue, page: RgbaImage) -> Result<PageResult> {
        let response = queue
            .detect(DetectRequest::new(self.opts.model_ref.clone(), page))
            .await?;
        let report = response.report();
        if let Some(error) = &report.error {
            tracing::warn!(%error, "detection failed, inverting the whole page");
        }

        let boxes = response.boxes().to_vec();
        let image = invert::invert_outside_boxes(&response.raster, &boxes);
        tracing::info!(
            width = image.width(),
            height = image.height(),
            regions = boxes.len(),
            "page inverted outside detected regions"
        );
        Ok(PageResult {
            image,
            boxes,
            report,
        })
    }

    /// Recolor a vector scene and process its embedded images.
    ///
    /// Image hrefs are resolved against `base_dir`. Inverted copies are written
    /// next to the source as `{stem}_dark.png`, owned by `generated` under the
    /// node id, and the node is pointed at them. Photographs are left alone,
    /// and images that cannot be handled get the display-side invert filter.
    pub fn process_scene(
        &self,
        scene: &mut VectorScene,
        base_dir: &Path,
        generated: &mut ResourceTable<String, GeneratedFile>,
    ) -> SceneSummary {
        let mut summary = SceneSummary {
            recolor: scene::invert_scene_smart(scene, self.opts.sat_threshold),
            ..SceneSummary::default()
        };

        scene.visit_mut(|node| {
            let VectorSceneNode::Image(img) = node else {
                return;
            };
            let source = base_dir.join(&img.href);
            let raster = match image::open(&source) {
                Ok(d) => d.to_rgba8(),
                Err(e) => {
                    tracing::warn!(id = %img.id, path = %source.display(), %e, "skipping unreadable image");
                    summary.unreadable += 1;
                    return;
                }
            };

            match self.process_image(&raster) {
                ImageOutcome::Photograph(_) => {
                    summary.photographs += 1;
                    release_stale(generated, &img.id, &source);
                    img.filter = None;
                }
                ImageOutcome::FlatFallback(_) => {
                    summary.flat_fallbacks += 1;
                    release_stale(generated, &img.id, &source);
                    img.filter = Some(ImageFilter::Invert);
                }
                ImageOutcome::Inverted { image, .. } => {
                    let out = dark_variant_path(&source);
                    if let Err(e) = image.save(&out) {
                        tracing::warn!(id = %img.id, %e, "cannot write inverted image, using invert filter");
                        summary.flat_fallbacks += 1;
                        img.filter = Some(ImageFilter::Invert);
                        return;
                    }
                    img.href = dark_variant_path(Path::new(&img.href))
                        .to_string_lossy()
                        .into_owned();
                    img.filter = None;
                    if generated.get(&img.id).map(GeneratedFile::path) != Some(out.as_path()) {
                        generated.replace(img.id.clone(), GeneratedFile::new(out));
                    }
                    summary.images_inverted += 1;
                }
            }
        });

        summary
    }

    /// Process a single image file: load, classify, invert, save.
    ///
    /// Returns a [`ProcessResult`] indicating success, skip, or failure.
    #[must_use]
    pub fn process_file(&self, input: &Path, output: &Path) -> ProcessResult {
        let mut result = ProcessResult::new(input);

        // Load image; undecodable inputs are skipped, not failed
        let mut rgba = match image::open(input) {
            Ok(img) => img.to_rgba8(),
            Err(e) => {
                result.skipped = true;
                result.success = true;
                result.message = format!("Cannot decode, left unchanged: {e}");
                return result;
            }
        };

        match self.process_image(&rgba) {
            ImageOutcome::Photograph(features) => {
                result.skipped = true;
                result.success = true;
                result.features = Some(features);
                result.message = format!(
                    "Photograph, left unchanged (sat={:.3}, std={:.1}, entropy={:.2}, edges={:.3})",
                    features.avg_saturation,
                    features.color_std,
                    features.luminance_entropy,
                    features.edge_density,
                );
                return result;
            }
            ImageOutcome::Inverted { image, features } => {
                rgba = image;
                result.features = features;
                result.message = "Inverted".to_string();
            }
            ImageOutcome::FlatFallback(reason) => {
                invert::invert_flat_in_place(&mut rgba);
                result.message = format!("Flat inversion ({reason:?})");
            }
        }

        // Save output
        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    result.message = format!("Failed to create output directory: {e}");
                    return result;
                }
            }
        }

        match save_image(&rgba, output) {
            Ok(()) => result.success = true,
            Err(e) => result.message = format!("Failed to save: {e}"),
        }

        result
    }

    /// Process all supported images in a directory.
    ///
    /// Uses parallel iteration when the `cli` feature is enabled (via rayon).
    /// Returns a [`ProcessResult`] for each image found.
    #[must_use]
    pub fn process_directory(&self, input_dir: &Path, output_dir: &Path) -> Vec<ProcessResult> {
        let entries: Vec<PathBuf> = match std::fs::read_dir(input_dir) {
            Ok(rd) => rd
                .filter_map(std::result::Result::ok)
                .filter(|e| e.file_type().map(|ft| ft.is_file()).unwrap_or(false))
                .map(|e| e.path())
                .filter(|p| is_supported_image(p))
                .collect(),
            Err(e) => {
                let mut failed = ProcessResult::new(input_dir);
                failed.message = format!("Failed to read directory: {e}");
                return vec![failed];
            }
        };

        // Create output directory
        if !output_dir.exists() {
            if let Err(e) = std::fs::create_dir_all(output_dir) {
                let mut failed = ProcessResult::new(output_dir);
                failed.message = format!("Failed to create output directory: {e}");
                return vec![failed];
            }
        }

        let process = |input_path: &PathBuf| match input_path.file_name() {
            Some(name) => self.process_file(input_path, &output_dir.join(name)),
            None => {
                let mut failed = ProcessResult::new(input_path);
                failed.message = "Path has no file name".to_string();
                failed
            }
        };

        #[cfg(feature = "cli")]
        {
            use rayon::prelude::*;
            entries.par_iter().map(process).collect()
        }

        #[cfg(not(feature = "cli"))]
        {
            entries.iter().map(process).collect()
        }
    }
}

/// Check if a file has a supported image extension.
#[must_use]
pub fn is_supported_image(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => matches!(
            ext.to_lowercase().as_str(),
            "jpg" | "jpeg" | "png" | "webp" | "bmp"
        ),
        None => false,
    }
}

/// Save an RGBA image with format-specific settings.
///
/// JPEG has no alpha channel, so the image is flattened to RGB first.
///
/// # Errors
///
/// Returns an error if the format is unsupported or writing fails.
pub fn save_image(img: &RgbaImage, path: &Path) -> Result<()> {
    let format =
        ImageFormat::from_path(path).map_err(|e| Error::UnsupportedFormat(e.to_string()))?;

    match format {
        ImageFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgba8(img.clone()).to_rgb8();
            let file = std::fs::File::create(path)?;
            let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(file, 95);
            encoder.encode_image(&rgb)?;
        }
        ImageFormat::Png | ImageFormat::WebP | ImageFormat::Bmp => {
            img.save_with_format(path, format)?;
        }
        _ => {
            return Err(Error::UnsupportedFormat(format!("{format:?}")));
        }
    }

    Ok(())
}

/// Generate a default output path from an input path.
///
/// Example: `"page.png"` becomes `"page_dark.png"`.
#[must_use]
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    let ext = input.extension().unwrap_or_default().to_string_lossy();
    let parent = input.parent().unwrap_or(Path::new("."));
    parent.join(format!("{stem}_dark.{ext}"))
}

/// Drop the copy generated for `id` in an earlier pass, unless the node is
/// still displaying it.
fn release_stale(generated: &mut ResourceTable<String, GeneratedFile>, id: &str, source: &Path) {
    let key = id.to_string();
    if generated.get(&key).is_some_and(|f| f.path() != source) {
        generated.release(&key);
    }
}

/// Where the inverted copy of an embedded image goes: always PNG, to keep
/// transparency.
fn dark_variant_path(source: &Path) -> PathBuf {
    let stem = source.file_stem().unwrap_or_default().to_string_lossy();
    source.with_file_name(format!("{stem}_dark.png"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn default_output_path_appends_dark_suffix() {
        let p = default_output_path(Path::new("/tmp/page.jpg"));
        assert_eq!(p, PathBuf::from("/tmp/page_dark.jpg"));

        let p = default_output_path(Path::new("scan.png"));
        assert_eq!(p.file_name().unwrap().to_str().unwrap(), "scan_dark.png");
    }

    #[test]
    fn dark_variant_is_png_next_to_source() {
        assert_eq!(
            dark_variant_path(Path::new("assets/figure.jpg")),
            PathBuf::from("assets/figure_dark.png")
        );
    }

    #[test]
    fn is_supported_image_accepts_common_formats() {
        assert!(is_supported_image(Path::new("page.jpg")));
        assert!(is_supported_image(Path::new("page.JPEG")));
        assert!(is_supported_image(Path::new("page.png")));
        assert!(is_supported_image(Path::new("page.webp")));
        assert!(is_supported_image(Path::new("page.bmp")));
    }

    #[test]
    fn is_supported_image_rejects_unsupported_formats() {
        assert!(!is_supported_image(Path::new("page.gif")));
        assert!(!is_supported_image(Path::new("page.pdf")));
        assert!(!is_supported_image(Path::new("page")));
    }

    #[test]
    fn graphics_are_inverted() {
        let engine = DarkModeEngine::default();
        let img = RgbaImage::from_pixel(40, 40, Rgba([255, 255, 255, 255]));
        match engine.process_image(&img) {
            ImageOutcome::Inverted { image, features } => {
                assert_eq!(image.get_pixel(0, 0), &Rgba([0, 0, 0, 255]));
                assert!(features.is_some());
            }
            other => panic!("expected inversion, got {other:?}"),
        }
    }

    #[test]
    fn empty_image_falls_back_to_flat_inversion() {
        let engine = DarkModeEngine::default();
        assert!(matches!(
            engine.process_image(&RgbaImage::new(0, 0)),
            ImageOutcome::FlatFallback(FallbackReason::Unsampleable(_))
        ));
    }

    #[test]
    fn oversized_image_falls_back_to_flat_inversion() {
        let engine = DarkModeEngine::new(ProcessOptions {
            max_full_size: 32,
            ..ProcessOptions::default()
        });
        let img = RgbaImage::from_pixel(64, 16, Rgba([250, 250, 250, 255]));
        assert_eq!(
            engine.process_image(&img),
            ImageOutcome::FlatFallback(FallbackReason::TooLarge {
                width: 64,
                height: 16
            })
        );
    }

    #[test]
    fn force_skips_classification() {
        let engine = DarkModeEngine::new(ProcessOptions {
            force: true,
            ..ProcessOptions::default()
        });
        let img = RgbaImage::from_pixel(4, 4, Rgba([10, 200, 30, 255]));
        assert!(matches!(
            engine.process_image(&img),
            ImageOutcome::Inverted { features: None, .. }
        ));
    }

    #[test]
    fn earlier_copy_is_released_when_image_is_no_longer_inverted() {
        let dir = tempfile::tempdir().unwrap();
        RgbaImage::from_pixel(48, 48, Rgba([255, 255, 255, 255]))
            .save(dir.path().join("big.png"))
            .unwrap();
        let stale = dir.path().join("stale_dark.png");
        std::fs::write(&stale, b"x").unwrap();

        let mut scene = VectorScene {
            nodes: vec![VectorSceneNode::Image(crate::scene::ImageNode {
                id: "big".to_string(),
                href: "big.png".to_string(),
                filter: None,
            })],
            ..VectorScene::default()
        };
        let mut generated = ResourceTable::new();
        generated.replace("big".to_string(), GeneratedFile::new(&stale));

        let engine = DarkModeEngine::new(ProcessOptions {
            max_full_size: 32,
            ..ProcessOptions::default()
        });
        let summary = engine.process_scene(&mut scene, dir.path(), &mut generated);

        assert_eq!(summary.flat_fallbacks, 1);
        assert!(generated.is_empty());
        assert!(!stale.exists());
    }

    #[test]
    fn options_parse_with_partial_json() {
        let opts: ProcessOptions =
            serde_json::from_str(r#"{"sample_max": 64, "thresholds": {"entropy": 3.5}}"#).unwrap();
        assert_eq!(opts.sample_max, 64);
        assert!((opts.thresholds.entropy - 3.5).abs() < f64::EPSILON);
        assert!((opts.thresholds.edge_density - 0.06).abs() < f64::EPSILON);
        assert_eq!(opts.max_full_size, 2500);
    }
}
