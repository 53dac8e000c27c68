//! Error types for the inspection pipeline.
//!
//! This module defines the error types that can occur while running the
//! detection pipeline, including image loading errors, processing errors,
//! inference errors, and configuration errors. It also provides utility
//! functions for creating these errors with appropriate context.
//!
//! Note that detector `detect()` calls never surface these errors directly:
//! per-image failures are carried inside [`crate::domain::DetectionResult`].
//! `InspectError` is the error type of the fallible plumbing around the
//! detectors (model loading, settings translation, image IO).

use thiserror::Error;

/// Enum representing different stages of processing in the inspection pipeline.
///
/// This enum is used to identify which stage of the pipeline an error occurred in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProcessingStage {
    /// Error occurred during tensor operations.
    TensorOperation,
    /// Error occurred during image preprocessing.
    Preprocessing,
    /// Error occurred during image resizing.
    Resize,
    /// Error occurred during post-processing.
    PostProcessing,
    /// Generic processing error.
    Generic,
}

impl std::fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingStage::TensorOperation => write!(f, "tensor operation"),
            ProcessingStage::Preprocessing => write!(f, "preprocessing"),
            ProcessingStage::Resize => write!(f, "resize"),
            ProcessingStage::PostProcessing => write!(f, "post-processing"),
            ProcessingStage::Generic => write!(f, "processing"),
        }
    }
}

/// Enum representing the errors that can occur in the inspection pipeline.
#[derive(Error, Debug)]
pub enum InspectError {
    /// Error occurred while loading an image.
    #[error("image load")]
    ImageLoad(#[source] image::ImageError),

    /// Error occurred during processing.
    #[error("{kind} failed: {context}")]
    Processing {
        /// The stage of processing where the error occurred.
        kind: ProcessingStage,
        /// Additional context about the error.
        context: String,
        /// The underlying error that caused this error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Error indicating invalid input.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// A message describing the invalid input.
        message: String,
    },

    /// Error indicating a configuration problem.
    #[error("configuration: {message}")]
    ConfigError {
        /// A message describing the configuration error.
        message: String,
    },

    /// Error indicating a model could not be loaded.
    #[error("model load failed for '{path}': {reason}")]
    ModelLoad {
        /// Path of the model file.
        path: String,
        /// Why the load failed.
        reason: String,
    },

    /// Error from the ONNX Runtime session.
    #[error(transparent)]
    Session(#[from] ort::Error),

    /// Error from tensor operations.
    #[error("tensor operation")]
    Tensor(#[from] ndarray::ShapeError),

    /// IO error.
    #[error("io")]
    Io(#[from] std::io::Error),
}

/// Convenient result alias for inspection operations.
pub type InspectResult<T> = Result<T, InspectError>;

impl InspectError {
    /// Creates an InspectError for post-processing operations.
    pub fn post_processing(
        context: &str,
        error: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Processing {
            kind: ProcessingStage::PostProcessing,
            context: context.to_string(),
            source: Box::new(error),
        }
    }

    /// Creates an InspectError for preprocessing operations.
    pub fn preprocessing(
        context: &str,
        error: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Processing {
            kind: ProcessingStage::Preprocessing,
            context: context.to_string(),
            source: Box::new(error),
        }
    }

    /// Creates an InspectError for invalid input.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Creates an InspectError for configuration errors.
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Creates an InspectError for model load failures.
    pub fn model_load(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ModelLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl From<ort::Error<ort::session::builder::SessionBuilder>> for InspectError {
    fn from(error: ort::Error<ort::session::builder::SessionBuilder>) -> Self {
        Self::Session(error.into())
    }
}

impl From<image::ImageError> for InspectError {
    fn from(error: image::ImageError) -> Self {
        Self::ImageLoad(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_stage_and_context() {
        let err = InspectError::post_processing(
            "contour extraction",
            std::io::Error::new(std::io::ErrorKind::InvalidData, "bad mask"),
        );
        let text = err.to_string();
        assert!(text.contains("post-processing"));
        assert!(text.contains("contour extraction"));
    }

    #[test]
    fn model_load_carries_path() {
        let err = InspectError::model_load("models/det.onnx", "file not found");
        assert!(err.to_string().contains("models/det.onnx"));
    }
}
