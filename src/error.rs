//! Error types for the edgequake-ocr library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`OcrError`] (**fatal**): the operation cannot start or finish at all
//!   (invalid configuration, HTTP client cannot be built, report cannot be
//!   written). Returned as `Err(OcrError)` from the top-level functions.
//!
//! * [`ItemError`] (**non-fatal**): one input failed (corrupt file, endpoint
//!   returned 500) but its siblings are unaffected. Stored in
//!   [`crate::output::BatchReport::errors`] so a batch always accounts for
//!   every discovered path.
//!
//! Two narrower errors sit below the item boundary: [`InferenceError`] is what
//! a [`crate::pipeline::llm::VisionBackend`] returns (it does not know which
//! file it is reading), and [`PreprocessError`] is what the enhancement stage
//! returns. Both are lifted into an [`ItemError`] together with the path.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// All fatal errors returned by the edgequake-ocr library.
#[derive(Debug, Error)]
pub enum OcrError {
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The HTTP client for the inference endpoint could not be constructed.
    #[error("Failed to initialise HTTP client for '{endpoint}': {detail}")]
    ClientInit { endpoint: String, detail: String },

    /// The running-models query against the endpoint failed.
    #[error("Failed to list running models at '{endpoint}': {detail}\nIs the inference server running?")]
    ModelQueryFailed { endpoint: String, detail: String },

    /// Could not create or write the report file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Some items succeeded but at least one failed.
    ///
    /// Returned by [`crate::output::BatchReport::into_result`] when the caller
    /// wants to treat any item failure as an error.
    #[error("{failed}/{total} items failed during OCR")]
    PartialFailure {
        successful: usize,
        failed: usize,
        total: usize,
    },

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single input.
///
/// The `Display` output is prefixed with the failure context so single-item
/// callers can show it to a user as-is.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ItemError {
    /// The path does not exist or could not be opened.
    #[error("Cannot open '{}': {detail}", path.display())]
    FileNotFound { path: PathBuf, detail: String },

    /// A multi-page document has no renderable page or could not be parsed.
    #[error("Unreadable document '{}': {detail}", path.display())]
    UnreadableDocument { path: PathBuf, detail: String },

    /// The bytes could not be decoded into a pixel buffer.
    #[error("Unreadable image '{}': {detail}", path.display())]
    UnreadableImage { path: PathBuf, detail: String },

    /// The enhancement pipeline failed at some stage.
    #[error("Preprocessing failed for '{}': {detail}", path.display())]
    PreprocessingFailure { path: PathBuf, detail: String },

    /// The inference endpoint was unreachable or returned a failure status.
    #[error("Inference request failed for '{}': {detail}", path.display())]
    InferenceRequestError {
        path: PathBuf,
        status: Option<u16>,
        detail: String,
    },

    /// A worker task panicked or was cancelled.
    #[error("Internal error while processing '{}': {detail}", path.display())]
    Internal { path: PathBuf, detail: String },
}

impl ItemError {
    /// The input this error belongs to.
    pub fn path(&self) -> &Path {
        match self {
            ItemError::FileNotFound { path, .. }
            | ItemError::UnreadableDocument { path, .. }
            | ItemError::UnreadableImage { path, .. }
            | ItemError::PreprocessingFailure { path, .. }
            | ItemError::InferenceRequestError { path, .. }
            | ItemError::Internal { path, .. } => path,
        }
    }

    /// Whether repeating the inference call could plausibly succeed.
    ///
    /// Only endpoint failures qualify; a corrupt file stays corrupt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ItemError::InferenceRequestError { .. })
    }

    pub(crate) fn inference(path: &Path, err: InferenceError) -> Self {
        ItemError::InferenceRequestError {
            path: path.to_path_buf(),
            status: err.status,
            detail: err.detail,
        }
    }
}

/// Failure returned by a vision backend for one request.
#[derive(Debug, Clone, Error)]
#[error("{detail}")]
pub struct InferenceError {
    /// HTTP status when the endpoint answered, `None` when it was unreachable.
    pub status: Option<u16>,
    pub detail: String,
}

impl InferenceError {
    pub fn unreachable(detail: impl Into<String>) -> Self {
        Self {
            status: None,
            detail: detail.into(),
        }
    }

    pub fn status(status: u16, detail: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            detail: detail.into(),
        }
    }
}

/// Failure inside the image enhancement stage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreprocessError {
    #[error("image has zero width or height")]
    EmptyImage,

    #[error("invalid enhancement parameters: {0}")]
    InvalidParameters(String),
}
