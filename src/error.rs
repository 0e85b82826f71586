//! Error types for the smart-dark crate.
//!
//! Most failure modes in the inversion pipeline degrade instead of erroring;
//! these are the ones that reach the caller.

/// Errors that can occur while classifying, inverting or loading documents.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The raster could not be sampled for classification.
    #[error("cannot sample {width}x{height} raster for classification")]
    Sample {
        /// Raster width in pixels.
        width: u32,
        /// Raster height in pixels.
        height: u32,
    },

    /// The detector worker is gone and the request could not be answered.
    #[error("detector unavailable: {0}")]
    DetectorUnavailable(String),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The image format is not supported.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// An error occurred during image processing (load, save, encode).
    #[error("image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// A scene, options or detector file was not valid JSON for its type.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let io_err = Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(io_err.to_string().contains("gone"));

        let unsupported = Error::UnsupportedFormat("tiff".to_string());
        assert!(unsupported.to_string().contains("tiff"));

        let sample = Error::Sample {
            width: 0,
            height: 20,
        };
        assert!(sample.to_string().contains("0x20"));

        let gone = Error::DetectorUnavailable("worker stopped".to_string());
        assert!(gone.to_string().contains("worker stopped"));

        let json = serde_json::from_str::<Vec<f64>>("[1,").unwrap_err();
        assert!(Error::from(json).to_string().starts_with("invalid JSON"));
    }
}
