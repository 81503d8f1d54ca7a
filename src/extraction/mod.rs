//! Field extraction: cropping a card region and turning it into a value.

mod capability;
mod crop;
mod error;
mod field_spec;

pub use capability::{Extraction, Extractor, ImagePersist, TextExtraction};
pub use crop::{crop_file, crop_image, crop_source, CropBox, CropError, ParseCropBoxError};
pub use error::ExtractError;
pub use field_spec::{EmptyResultPolicy, FieldSpec, DEFAULT_SENTINEL};
