//! Error types for the recognition pipeline
//!
//! Acquisition errors reach the user. Model-load and inference errors are
//! absorbed by the classifier and only logged.

use thiserror::Error;

/// Problems with the image handed to the pipeline
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AcquisitionError {
    /// Upload rejected before any processing (wrong type or too large)
    #[error("invalid upload: {0}")]
    Validation(String),
    /// Camera has no frame available yet; retry after a short wait
    #[error("camera is not ready for capture")]
    DeviceNotReady,
    /// Corrupt, empty or zero-sized raster; the user has to recapture
    #[error("invalid image: {0}")]
    InvalidImage(String),
}

impl AcquisitionError {
    /// Whether retrying the same action shortly may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, AcquisitionError::DeviceNotReady)
    }
}

/// A model artifact could not be fetched or opened
#[derive(Debug, Error)]
#[error("failed to load {model}: {reason}")]
pub struct ModelLoadError {
    pub model: String,
    pub reason: String,
}

impl ModelLoadError {
    pub fn new(model: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self {
            model: model.into(),
            reason: reason.to_string(),
        }
    }
}

/// The neural forward pass failed for one request
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference runtime error: {0}")]
    Runtime(String),
    #[error("unexpected model output: {0}")]
    UnexpectedOutput(String),
}

/// Errors `FoodClassifier` can return
///
/// "No confident match" is not an error; it is reported on the result.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),
    /// A newer request started before this one finished
    #[error("request {0} was superseded by a newer classification")]
    Superseded(u64),
}
