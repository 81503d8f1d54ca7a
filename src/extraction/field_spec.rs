//! Per-field extraction parameters.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::capability::{Extractor, ImagePersist, TextExtraction};
use super::crop::CropBox;
use crate::config::FieldSettings;
use crate::models::{Capability, CardField};
use crate::ocr::TextRecognizer;

/// Value committed for an empty recognition result under the default policy.
pub const DEFAULT_SENTINEL: &str = "UNKNOWN";

/// What to do when text recognition ran but found nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmptyResultPolicy {
    /// Commit this value; the field is done.
    Sentinel(String),
    /// Release the claim; the field stays pending.
    Retry,
    /// Mark the field failed until an operator requeues it.
    Fail,
}

impl EmptyResultPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sentinel(_) => "sentinel",
            Self::Retry => "retry",
            Self::Fail => "fail",
        }
    }

    /// Parse a policy name. `sentinel` takes its value from `sentinel`,
    /// falling back to [`DEFAULT_SENTINEL`].
    pub fn parse(name: &str, sentinel: Option<&str>) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "sentinel" => Some(Self::Sentinel(
                sentinel.unwrap_or(DEFAULT_SENTINEL).to_string(),
            )),
            "retry" => Some(Self::Retry),
            "fail" => Some(Self::Fail),
            _ => None,
        }
    }
}

impl Default for EmptyResultPolicy {
    fn default() -> Self {
        Self::Sentinel(DEFAULT_SENTINEL.to_string())
    }
}

impl fmt::Display for EmptyResultPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sentinel(value) => write!(f, "sentinel({})", value),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

/// Everything a pipeline needs to know about the field it owns.
#[derive(Clone)]
pub struct FieldSpec {
    pub field: CardField,
    pub crop: CropBox,
    pub extractor: Arc<dyn Extractor>,
    pub on_empty: EmptyResultPolicy,
    pub poll_interval: Duration,
    /// None means retry forever.
    pub max_attempts: Option<u32>,
}

impl FieldSpec {
    pub fn new(field: CardField, crop: CropBox, extractor: Arc<dyn Extractor>) -> Self {
        Self {
            field,
            crop,
            extractor,
            on_empty: EmptyResultPolicy::default(),
            poll_interval: Duration::from_secs(3),
            max_attempts: None,
        }
    }

    pub fn with_on_empty(mut self, policy: EmptyResultPolicy) -> Self {
        self.on_empty = policy;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Build the spec for `field` from resolved settings. Text fields share
    /// `recognizer`; image fields write into their configured output dir.
    pub fn from_settings(
        field: CardField,
        settings: &FieldSettings,
        recognizer: Arc<dyn TextRecognizer>,
    ) -> Self {
        let extractor: Arc<dyn Extractor> = match field.capability() {
            Capability::TextExtraction => Arc::new(TextExtraction::new(recognizer)),
            Capability::ImagePersist => Arc::new(ImagePersist::new(
                settings.output_dir.clone(),
                settings.format,
            )),
        };

        Self::new(field, settings.crop_box, extractor)
            .with_on_empty(settings.on_empty.clone())
            .with_poll_interval(settings.poll_interval)
            .with_max_attempts(settings.max_attempts)
    }

    /// Whether a claim on its `attempt`-th try is the last one allowed.
    pub fn is_final_attempt(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt >= max)
    }
}

impl fmt::Debug for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSpec")
            .field("field", &self.field)
            .field("crop", &self.crop)
            .field("capability", &self.extractor.capability())
            .field("on_empty", &self.on_empty)
            .field("poll_interval", &self.poll_interval)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::ocr::TesseractBackend;

    #[test]
    fn test_parse_policy() {
        assert_eq!(
            EmptyResultPolicy::parse("sentinel", None),
            Some(EmptyResultPolicy::Sentinel("UNKNOWN".to_string()))
        );
        assert_eq!(
            EmptyResultPolicy::parse("Sentinel", Some("")),
            Some(EmptyResultPolicy::Sentinel(String::new()))
        );
        assert_eq!(EmptyResultPolicy::parse("retry", None), Some(EmptyResultPolicy::Retry));
        assert_eq!(EmptyResultPolicy::parse("fail", None), Some(EmptyResultPolicy::Fail));
        assert_eq!(EmptyResultPolicy::parse("ignore", None), None);
    }

    #[test]
    fn test_final_attempt() {
        let spec = FieldSpec::from_settings(
            CardField::Name,
            &Settings::default().fields[&CardField::Name],
            Arc::new(TesseractBackend::new()),
        );
        assert!(!spec.is_final_attempt(1_000));

        let capped = spec.with_max_attempts(Some(3));
        assert!(!capped.is_final_attempt(2));
        assert!(capped.is_final_attempt(3));
    }

    #[test]
    fn test_capability_follows_field() {
        let settings = Settings::default();
        for field in CardField::ALL {
            let spec = FieldSpec::from_settings(
                field,
                &settings.fields[&field],
                Arc::new(TesseractBackend::new()),
            );
            assert_eq!(spec.extractor.capability(), field.capability());
            assert_eq!(spec.crop, settings.fields[&field].crop_box);
        }
    }
}
