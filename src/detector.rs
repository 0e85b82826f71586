//! Boundary to the region-of-interest detector.
//!
//! The detector holds mutable model state and answers one request at a time.
//! [`DetectorQueue`] owns it on a dedicated blocking worker and serializes
//! every request through a single-slot channel. The page raster moves into
//! the request and comes back in the response, so nothing reads it while the
//! detector works on it.

use std::panic::{self, AssertUnwindSafe};

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::boxes::{boxes_from_raw, BoundingBox, BoxFormat};
use crate::error::{Error, Result};

/// Side length of the square model input.
pub const MODEL_INPUT_SIZE: u32 = 224;

/// Error type returned by [`Detector::predict`].
pub type DetectorError = Box<dyn std::error::Error + Send + Sync>;

/// Model input: `size x size` RGB floats in `[0, 1]`, row-major, channels last.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorInput {
    /// Side length.
    pub size: u32,
    /// `size * size * 3` values.
    pub data: Vec<f32>,
}

/// Build the model input for `raster`.
///
/// The raster is composited over white (the model was trained on opaque
/// pages), resized with a smoothing filter to `size x size`, stripped of alpha
/// and scaled to `[0, 1]`.
#[must_use]
pub fn prepare_input(raster: &RgbaImage, size: u32) -> DetectorInput {
    let (w, h) = raster.dimensions();
    let len = size as usize * size as usize * 3;
    if w == 0 || h == 0 || size == 0 {
        return DetectorInput {
            size,
            data: vec![1.0; len],
        };
    }

    let opaque = RgbImage::from_fn(w, h, |x, y| {
        let px = raster.get_pixel(x, y);
        let a = u16::from(px[3]);
        let over_white = |c: u8| {
            let blended = (u16::from(c) * a + 255 * (255 - a) + 127) / 255;
            #[allow(clippy::cast_possible_truncation)]
            {
                blended as u8
            }
        };
        Rgb([over_white(px[0]), over_white(px[1]), over_white(px[2])])
    });
    let resized = imageops::resize(&opaque, size, size, FilterType::Triangle);

    let mut data = Vec::with_capacity(len);
    data.extend(resized.as_raw().iter().map(|&v| f32::from(v) / 255.0));
    DetectorInput { size, data }
}

/// An object-detection model.
pub trait Detector {
    /// Run the model identified by `model_ref` on `input` and return its flat
    /// raw output.
    ///
    /// # Errors
    ///
    /// Any model failure; the queue reports it as a failed detection.
    fn predict(
        &mut self,
        model_ref: &str,
        input: &DetectorInput,
    ) -> std::result::Result<Vec<f64>, DetectorError>;
}

/// Detector that answers every request with the same recorded output.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayDetector {
    raw: Vec<f64>,
}

impl ReplayDetector {
    /// Replay `raw` for every request.
    #[must_use]
    pub fn new(raw: Vec<f64>) -> Self {
        Self { raw }
    }
}

impl Detector for ReplayDetector {
    fn predict(
        &mut self,
        _model_ref: &str,
        _input: &DetectorInput,
    ) -> std::result::Result<Vec<f64>, DetectorError> {
        Ok(self.raw.clone())
    }
}

/// A detection request. Owns the raster until the response hands it back.
#[derive(Debug)]
pub struct DetectRequest {
    /// Which model to run.
    pub model_ref: String,
    /// The page raster.
    pub raster: RgbaImage,
    /// Width of the coordinate space boxes are produced in.
    pub width: u32,
    /// Height of the coordinate space boxes are produced in.
    pub height: u32,
}

impl DetectRequest {
    /// Request for `raster` with boxes in the raster's own pixel space.
    #[must_use]
    pub fn new(model_ref: impl Into<String>, raster: RgbaImage) -> Self {
        let (width, height) = raster.dimensions();
        Self {
            model_ref: model_ref.into(),
            raster,
            width,
            height,
        }
    }
}

/// Outcome of a detection.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectOutcome {
    /// The model ran. `boxes` may be empty.
    Found {
        /// Validated pixel rectangles.
        boxes: Vec<BoundingBox>,
        /// Untransformed model output.
        raw: Vec<f64>,
    },
    /// The model failed.
    Failed {
        /// Failure description.
        error: String,
    },
}

/// Answer to a [`DetectRequest`], returning ownership of the raster.
#[derive(Debug)]
pub struct DetectResponse {
    /// The raster that was sent.
    pub raster: RgbaImage,
    /// What the detector found.
    pub outcome: DetectOutcome,
}

impl DetectResponse {
    /// Detected boxes; empty when detection failed.
    #[must_use]
    pub fn boxes(&self) -> &[BoundingBox] {
        match &self.outcome {
            DetectOutcome::Found { boxes, .. } => boxes,
            DetectOutcome::Failed { .. } => &[],
        }
    }

    /// Serializable summary of the outcome.
    #[must_use]
    pub fn report(&self) -> DetectReport {
        match &self.outcome {
            DetectOutcome::Found { boxes, raw } => DetectReport {
                ok: true,
                boxes: boxes.clone(),
                raw: raw.clone(),
                error: None,
            },
            DetectOutcome::Failed { error } => DetectReport {
                ok: false,
                boxes: Vec::new(),
                raw: Vec::new(),
                error: Some(error.clone()),
            },
        }
    }
}

/// Summary of a detection result.
///
/// Serializes to the wire form below. Successful reports always carry
/// `boxes` and `raw`, even when empty; failed ones carry `error` instead.
///
/// ```json
/// { "kind": "detectResult", "ok": true, "boxes": [{"x":0,"y":0,"w":5,"h":5}], "raw": [0.0] }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireReport", from = "WireReport")]
pub struct DetectReport {
    /// Whether the detector ran successfully.
    pub ok: bool,
    /// Validated boxes.
    pub boxes: Vec<BoundingBox>,
    /// Untransformed model output.
    pub raw: Vec<f64>,
    /// Failure description.
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", rename = "detectResult")]
struct WireReport {
    ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    boxes: Option<Vec<BoundingBox>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    raw: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<DetectReport> for WireReport {
    fn from(r: DetectReport) -> Self {
        Self {
            ok: r.ok,
            boxes: r.ok.then_some(r.boxes),
            raw: r.ok.then_some(r.raw),
            error: r.error,
        }
    }
}

impl From<WireReport> for DetectReport {
    fn from(w: WireReport) -> Self {
        Self {
            ok: w.ok,
            boxes: w.boxes.unwrap_or_default(),
            raw: w.raw.unwrap_or_default(),
            error: w.error,
        }
    }
}

struct Worker<D> {
    detector: D,
    format: BoxFormat,
    input_size: u32,
}

impl<D: Detector> Worker<D> {
    fn handle(&mut self, request: DetectRequest) -> DetectResponse {
        let DetectRequest {
            model_ref,
            raster,
            width,
            height,
        } = request;

        let input = prepare_input(&raster, self.input_size);
        let detector = &mut self.detector;
        let predicted = panic::catch_unwind(AssertUnwindSafe(|| detector.predict(&model_ref, &input)));

        let outcome = match predicted {
            Ok(Ok(raw)) => {
                let boxes = boxes_from_raw(&raw, self.format, width, height);
                tracing::debug!(
                    model = %model_ref,
                    raw_len = raw.len(),
                    boxes = boxes.len(),
                    "detection finished"
                );
                DetectOutcome::Found { boxes, raw }
            }
            Ok(Err(e)) => {
                tracing::warn!(model = %model_ref, %e, "detector failed");
                DetectOutcome::Failed {
                    error: e.to_string(),
                }
            }
            Err(_) => {
                tracing::warn!(model = %model_ref, "detector panicked");
                DetectOutcome::Failed {
                    error: "detector panicked".to_string(),
                }
            }
        };

        DetectResponse { raster, outcome }
    }
}

struct Job {
    request: DetectRequest,
    reply: oneshot::Sender<DetectResponse>,
}

/// Serialized access to a single [`Detector`].
///
/// Requests are queued through a channel with one slot and answered strictly
/// one after another. Cloning the queue shares the same worker. There is no
/// cancellation: dropping a pending [`DetectorQueue::detect`] future does not
/// stop the detector from finishing that request.
#[derive(Clone)]
pub struct DetectorQueue {
    tx: mpsc::Sender<Job>,
}

impl DetectorQueue {
    /// Move `detector` onto a blocking worker of the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn spawn<D>(detector: D, format: BoxFormat) -> Self
    where
        D: Detector + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<Job>(1);
        let mut worker = Worker {
            detector,
            format,
            input_size: MODEL_INPUT_SIZE,
        };

        tokio::task::spawn_blocking(move || {
            while let Some(job) = rx.blocking_recv() {
                let response = worker.handle(job.request);
                if job.reply.send(response).is_err() {
                    tracing::debug!("detect caller went away before the response");
                }
            }
        });

        Self { tx }
    }

    /// Submit `request` and wait for its response.
    ///
    /// A worker that has already shut down yields a failed outcome with the
    /// raster handed back.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DetectorUnavailable`] if the worker disappeared while
    /// holding the request; the raster is lost with it.
    pub async fn detect(&self, request: DetectRequest) -> Result<DetectResponse> {
        let (reply, rx) = oneshot::channel();
        if let Err(mpsc::error::SendError(job)) = self.tx.send(Job { request, reply }).await {
            return Ok(DetectResponse {
                raster: job.request.raster,
                outcome: DetectOutcome::Failed {
                    error: "detector worker has shut down".to_string(),
                },
            });
        }
        rx.await
            .map_err(|_| Error::DetectorUnavailable("worker dropped the request".to_string()))
    }
}
