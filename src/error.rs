//! Custom error types for rastertensor.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the rastertensor library.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration value is malformed or out of range.
    #[error("invalid configuration for {field}: {reason}")]
    ConfigValidation { field: String, reason: String },

    /// Configuration file could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// An inference backend could not be constructed or could not load its model.
    #[error("failed to load {backend} backend: {message}")]
    BackendLoad { backend: String, message: String },

    /// Backend execution failed.
    #[error("{backend} inference failed: {message}")]
    Inference { backend: String, message: String },

    /// Requested dtype cannot be serialized.
    #[error("unsupported dtype: {0}")]
    UnsupportedDtype(String),

    /// Requested numeric or image format is not implemented.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Failed to load an image file.
    #[error("failed to load image from {path}: {source}")]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Failed to save an image file.
    #[error("failed to save image to {path}: {source}")]
    ImageSave {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Failed to encode an image in memory.
    #[error("failed to encode image: {0}")]
    ImageEncode(#[source] image::ImageError),

    /// Shape mismatch in tensor or raster operations.
    #[error("shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    /// A pipeline stage failed.
    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: Box<Error>,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn inference(backend: impl Into<String>, message: impl ToString) -> Self {
        Self::Inference {
            backend: backend.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn backend_load(backend: impl Into<String>, message: impl ToString) -> Self {
        Self::BackendLoad {
            backend: backend.into(),
            message: message.to_string(),
        }
    }
}

/// Result type alias for rastertensor operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Tag errors from a pipeline stage with the stage name.
pub(crate) trait StageContext<T> {
    fn stage(self, stage: &'static str) -> Result<T>;
}

impl<T> StageContext<T> for Result<T> {
    fn stage(self, stage: &'static str) -> Result<T> {
        self.map_err(|source| Error::Stage {
            stage,
            source: Box::new(source),
        })
    }
}
