//! Rectangular crops of card source images.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use image::{DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A region in source pixel space. `right` and `bottom` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CropBox {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl CropBox {
    pub const fn new(left: u32, top: u32, right: u32, bottom: u32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    /// A box with zero or negative extent on either axis.
    pub fn is_degenerate(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }

    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.right <= width && self.bottom <= height
    }
}

impl fmt::Display for CropBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.left, self.top, self.right, self.bottom)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid crop box '{input}': {reason}")]
pub struct ParseCropBoxError {
    pub input: String,
    pub reason: String,
}

impl TryFrom<&[u32]> for CropBox {
    type Error = String;

    fn try_from(values: &[u32]) -> Result<Self, Self::Error> {
        let [left, top, right, bottom] = values else {
            return Err(format!("expected 4 values, got {}", values.len()));
        };
        let region = CropBox::new(*left, *top, *right, *bottom);
        if region.is_degenerate() {
            return Err("right/bottom must be greater than left/top".to_string());
        }
        Ok(region)
    }
}

impl FromStr for CropBox {
    type Err = ParseCropBoxError;

    /// Parse `left,top,right,bottom`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let error = |reason: String| ParseCropBoxError {
            input: s.to_string(),
            reason,
        };
        let values = s
            .split(',')
            .map(|part| part.trim().parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| error(e.to_string()))?;
        CropBox::try_from(values.as_slice()).map_err(error)
    }
}

#[derive(Debug, Error)]
pub enum CropError {
    #[error("Source image unavailable at {}: {reason}", path.display())]
    SourceUnavailable { path: PathBuf, reason: String },

    #[error("Crop region {region} is invalid for a {width}x{height} image")]
    InvalidRegion {
        region: CropBox,
        width: u32,
        height: u32,
    },

    #[error("Crop task failed: {0}")]
    Task(String),
}

/// Crop an already decoded image.
pub fn crop_image(image: &DynamicImage, region: CropBox) -> Result<DynamicImage, CropError> {
    let (width, height) = image.dimensions();
    if region.is_degenerate() || !region.fits_within(width, height) {
        return Err(CropError::InvalidRegion {
            region,
            width,
            height,
        });
    }
    Ok(image.crop_imm(region.left, region.top, region.width(), region.height()))
}

/// Decode the image at `path` and crop it.
pub fn crop_file(path: &Path, region: CropBox) -> Result<DynamicImage, CropError> {
    let image = image::open(path).map_err(|e| CropError::SourceUnavailable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    crop_image(&image, region)
}

/// [`crop_file`] on the blocking pool.
pub async fn crop_source(path: PathBuf, region: CropBox) -> Result<DynamicImage, CropError> {
    tokio::task::spawn_blocking(move || crop_file(&path, region))
        .await
        .map_err(|e| CropError::Task(e.to_string()))?
}
