//! Tesseract OCR backend implementation.
//!
//! Runs the `tesseract` command line over a temporary PNG of the region.

use std::io::{Cursor, Write};
use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};
use tempfile::NamedTempFile;
use tokio::process::Command;

use super::backend::{check_binary, OcrError, OcrResult, TextRecognizer};

pub const DEFAULT_LANGUAGE: &str = "eng";
pub const DEFAULT_BINARY: &str = "tesseract";

/// Tesseract OCR backend.
#[derive(Debug, Clone)]
pub struct TesseractBackend {
    language: String,
    binary: String,
}

impl TesseractBackend {
    /// Create a new Tesseract backend with default configuration.
    pub fn new() -> Self {
        Self {
            language: DEFAULT_LANGUAGE.to_string(),
            binary: DEFAULT_BINARY.to_string(),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Use a specific tesseract executable instead of the one on `PATH`.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    /// Run Tesseract on an image file.
    ///
    /// The child is killed if this future is dropped, so a caller-side
    /// timeout does not leave tesseract running.
    async fn run_tesseract(&self, image_path: &Path) -> Result<String, OcrError> {
        let output = Command::new(&self.binary)
            .arg(image_path)
            .arg("stdout")
            .args(["-l", &self.language])
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(output) => {
                if output.status.success() {
                    Ok(String::from_utf8_lossy(&output.stdout).to_string())
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    Err(OcrError::OcrFailed(format!("tesseract failed: {}", stderr.trim())))
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(
                OcrError::BackendNotAvailable(format!(
                    "{} not found (install tesseract-ocr)",
                    self.binary
                )),
            ),
            Err(e) => Err(OcrError::Io(e)),
        }
    }
}

impl Default for TesseractBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn write_temp_png(image: &DynamicImage) -> Result<NamedTempFile, OcrError> {
    let mut encoded = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)
        .map_err(|e| OcrError::ImageError(e.to_string()))?;

    let mut file = tempfile::Builder::new()
        .prefix("cardscan-ocr-")
        .suffix(".png")
        .tempfile()?;
    file.write_all(&encoded)?;
    file.flush()?;
    Ok(file)
}

#[async_trait]
impl TextRecognizer for TesseractBackend {
    fn backend_name(&self) -> &'static str {
        "tesseract"
    }

    fn is_available(&self) -> bool {
        check_binary(&self.binary)
    }

    fn availability_hint(&self) -> String {
        if self.is_available() {
            "Tesseract is available".to_string()
        } else {
            format!(
                "{} not installed. Install with: apt install tesseract-ocr",
                self.binary
            )
        }
    }

    async fn recognize(&self, image: DynamicImage) -> Result<OcrResult, OcrError> {
        let start = Instant::now();

        let file = tokio::task::spawn_blocking(move || write_temp_png(&image))
            .await
            .map_err(|e| OcrError::OcrFailed(format!("encode task failed: {}", e)))??;
        let text = self.run_tesseract(file.path()).await?;

        Ok(OcrResult {
            text,
            confidence: None,
            backend: self.backend_name(),
            processing_time_ms: start.elapsed().as_millis() as u64,
        })
    }
}
