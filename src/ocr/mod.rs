//! Text recognition over cropped card regions.
//!
//! Tesseract is the only bundled backend. Anything implementing
//! [`TextRecognizer`] can be plugged into a text-extraction field instead.

mod backend;
mod tesseract;

pub use backend::{check_binary, OcrError, OcrResult, TextRecognizer};
pub use tesseract::{TesseractBackend, DEFAULT_BINARY, DEFAULT_LANGUAGE};
