//! Region-aware selective color inversion for dark-mode document rendering.
//!
//! Line art, text and flat graphics are inverted so a page reads well on a
//! dark background, while photographs and detected regions of interest keep
//! their original colors.
//!
//! # Quick Start
//!
//! ```no_run
//! use smart_dark::{DarkModeEngine, ImageOutcome, ProcessOptions};
//!
//! let engine = DarkModeEngine::new(ProcessOptions::default());
//! let img = image::open("figure.png").unwrap().to_rgba8();
//! if let ImageOutcome::Inverted { image, .. } = engine.process_image(&img) {
//!     image.save("figure_dark.png").unwrap();
//! }
//! ```
//!
//! # Pages
//!
//! A rendered page raster goes through a [`detector::Detector`] that marks
//! regions to keep; everything outside them is inverted.
//!
//! ```no_run
//! use smart_dark::boxes::BoxFormat;
//! use smart_dark::detector::{DetectorQueue, ReplayDetector};
//! use smart_dark::DarkModeEngine;
//!
//! # async fn run(page: image::RgbaImage) -> smart_dark::Result<()> {
//! let queue = DetectorQueue::spawn(ReplayDetector::new(vec![0.1, 0.1, 0.5, 0.5]), BoxFormat::default());
//! let result = DarkModeEngine::default().process_page(&queue, page).await?;
//! println!("kept {} regions", result.boxes.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Vector scenes
//!
//! [`scene::invert_scene_smart`] recolors achromatic fills and strokes of a
//! [`scene::VectorScene`] and leaves colored paint alone.

#![deny(missing_docs)]

pub mod boxes;
pub mod classify;
pub mod color;
pub mod detector;
mod engine;
pub mod error;
pub mod invert;
pub mod resources;
pub mod scene;

pub use engine::{
    default_output_path, is_supported_image, save_image, DarkModeEngine, FallbackReason,
    ImageOutcome, PageResult, ProcessOptions, ProcessResult, SceneSummary,
};
pub use error::{Error, Result};
