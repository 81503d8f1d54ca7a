//! The two ways a cropped region becomes a field value.

use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};

use super::error::ExtractError;
use crate::models::{Capability, Card};
use crate::ocr::TextRecognizer;

/// Outcome of a successful extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Value(String),
    /// The engine ran but found nothing. The field's empty-result policy
    /// decides what happens next.
    Empty,
}

/// Produces a field value from a card's cropped region.
#[async_trait]
pub trait Extractor: Send + Sync {
    fn capability(&self) -> Capability;

    async fn extract(&self, card: &Card, region: DynamicImage)
        -> Result<Extraction, ExtractError>;
}

/// Recognize the text in the region.
pub struct TextExtraction {
    recognizer: Arc<dyn TextRecognizer>,
}

impl TextExtraction {
    pub fn new(recognizer: Arc<dyn TextRecognizer>) -> Self {
        Self { recognizer }
    }
}

#[async_trait]
impl Extractor for TextExtraction {
    fn capability(&self) -> Capability {
        Capability::TextExtraction
    }

    async fn extract(
        &self,
        card: &Card,
        region: DynamicImage,
    ) -> Result<Extraction, ExtractError> {
        let result = self.recognizer.recognize(region).await?;
        tracing::debug!(
            card_id = %card.id,
            backend = result.backend,
            elapsed_ms = result.processing_time_ms,
            "Recognized {} chars",
            result.text.len()
        );

        let text = result.text.trim();
        if text.is_empty() {
            Ok(Extraction::Empty)
        } else {
            Ok(Extraction::Value(text.to_string()))
        }
    }
}

/// Save the region as `<output_dir>/<card-id>.<ext>`; the path is the value.
///
/// The path depends only on the card, so a retry overwrites the same file.
pub struct ImagePersist {
    output_dir: PathBuf,
    format: ImageFormat,
}

impl ImagePersist {
    pub fn new(output_dir: impl Into<PathBuf>, format: ImageFormat) -> Self {
        Self {
            output_dir: output_dir.into(),
            format,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn extension(&self) -> &'static str {
        self.format.extensions_str().first().copied().unwrap_or("png")
    }

    pub fn path_for(&self, card_id: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", card_id, self.extension()))
    }
}

/// Write via a temp file in the same directory, then rename over `path`.
fn write_atomically(
    path: &Path,
    region: &DynamicImage,
    format: ImageFormat,
) -> Result<(), ExtractError> {
    let persist_error = |reason: String| ExtractError::Persist {
        path: path.to_path_buf(),
        reason,
    };
    let dir = path
        .parent()
        .ok_or_else(|| persist_error("no parent directory".to_string()))?;
    std::fs::create_dir_all(dir).map_err(|e| persist_error(e.to_string()))?;

    // JPEG has no alpha channel
    let rgb;
    let region = if format == ImageFormat::Jpeg {
        rgb = DynamicImage::ImageRgb8(region.to_rgb8());
        &rgb
    } else {
        region
    };

    let mut tmp = tempfile::Builder::new()
        .prefix(".cardscan-")
        .tempfile_in(dir)
        .map_err(|e| persist_error(e.to_string()))?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        region
            .write_to(&mut writer, format)
            .map_err(|e| persist_error(e.to_string()))?;
        writer
            .into_inner()
            .map_err(|e| persist_error(e.to_string()))?;
    }
    tmp.persist(path)
        .map_err(|e| persist_error(e.error.to_string()))?;
    Ok(())
}

#[async_trait]
impl Extractor for ImagePersist {
    fn capability(&self) -> Capability {
        Capability::ImagePersist
    }

    async fn extract(
        &self,
        card: &Card,
        region: DynamicImage,
    ) -> Result<Extraction, ExtractError> {
        let path = self.path_for(&card.id);
        let format = self.format;
        let target = path.clone();

        tokio::task::spawn_blocking(move || write_atomically(&target, &region, format))
            .await
            .map_err(|e| ExtractError::Persist {
                path: path.clone(),
                reason: format!("write task failed: {}", e),
            })??;

        tracing::debug!(card_id = %card.id, path = %path.display(), "Persisted region");
        Ok(Extraction::Value(path.display().to_string()))
    }
}
