//! Extraction error types.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::crop::CropError;
use crate::ocr::OcrError;

/// Why a claimed field could not produce a value this attempt.
///
/// Every variant is retryable; the pipeline decides whether the attempt cap
/// turns it into a terminal failure.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Crop(#[from] CropError),

    #[error("Recognition engine failure: {0}")]
    Recognition(#[from] OcrError),

    #[error("Failed to persist {}: {reason}", path.display())]
    Persist { path: PathBuf, reason: String },

    #[error("{step} timed out after {after:?}")]
    Timeout { step: &'static str, after: Duration },
}

impl ExtractError {
    /// Stable name of the failure kind, for logs and `last_error`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Crop(CropError::SourceUnavailable { .. }) => "source_unavailable",
            Self::Crop(CropError::InvalidRegion { .. }) => "invalid_region",
            Self::Crop(CropError::Task(_)) => "crop_task",
            Self::Recognition(_) => "recognition_engine",
            Self::Persist { .. } => "persist",
            Self::Timeout { .. } => "timeout",
        }
    }
}
