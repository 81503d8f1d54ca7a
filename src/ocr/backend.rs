//! Text recognizer abstraction.

use async_trait::async_trait;
use image::DynamicImage;
use thiserror::Error;

/// Errors from text recognition backends.
///
/// "No text found" is not an error: backends return an empty
/// [`OcrResult::text`] for that.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("Backend not available: {0}")]
    BackendNotAvailable(String),

    #[error("OCR failed: {0}")]
    OcrFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    ImageError(String),
}

/// Result of OCR processing.
#[derive(Debug, Clone)]
pub struct OcrResult {
    /// Extracted text content, untrimmed.
    pub text: String,
    /// Confidence score (0.0 - 1.0), if available.
    pub confidence: Option<f32>,
    /// Which backend produced this result.
    pub backend: &'static str,
    /// Processing time in milliseconds.
    pub processing_time_ms: u64,
}

/// Turns an image into text.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Check if this backend is available (dependencies installed).
    fn is_available(&self) -> bool;

    /// Get a description of what's needed to make this backend available.
    fn availability_hint(&self) -> String;

    async fn recognize(&self, image: DynamicImage) -> Result<OcrResult, OcrError>;
}

/// Check whether a binary is on `PATH` (or is an existing path).
pub fn check_binary(name: &str) -> bool {
    which::which(name).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_binary_missing() {
        assert!(!check_binary("cardscan-definitely-not-a-binary"));
    }
}
