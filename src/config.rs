//! Configuration management for cardscan.
//!
//! Settings are resolved in layers, later ones winning: built-in defaults,
//! then a TOML file (`--config`, else `./cardscan.toml` when present), then
//! environment variables. `main` loads `.env` before any of this runs.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use image::ImageFormat;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::extraction::{CropBox, EmptyResultPolicy};
use crate::models::{Capability, CardField};
use crate::ocr::{TesseractBackend, DEFAULT_BINARY, DEFAULT_LANGUAGE};
use crate::repository::DieselDbContext;

/// Config file looked up in the working directory when `--config` is absent.
pub const CONFIG_FILENAME: &str = "cardscan.toml";

/// Default database filename inside the data directory.
pub const DEFAULT_DATABASE_FILENAME: &str = "cards.db";

const UPLOAD_SUBDIR: &str = "uploaded_images";

const DEFAULT_POLL_INTERVAL_SECS: u64 = 3;
const DEFAULT_BATCH_SIZE: usize = 100;
const DEFAULT_CLAIM_TTL_SECS: u64 = 600;
const DEFAULT_IO_TIMEOUT_SECS: u64 = 30;
const DEFAULT_EXTRACTION_TIMEOUT_SECS: u64 = 60;
const DEFAULT_STORE_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

impl ConfigError {
    fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Built-in crop region of each field, in source pixel space.
pub fn default_crop_box(field: CardField) -> CropBox {
    match field {
        CardField::Name => CropBox::new(50, 30, 500, 85),
        CardField::Lore => CropBox::new(228, 923, 699, 1016),
        CardField::Moves => CropBox::new(50, 400, 500, 600),
        CardField::Weakness => CropBox::new(33, 882, 206, 911),
        CardField::Resistance => CropBox::new(126, 33, 546, 93),
    }
}

/// Built-in output directory name of each field.
pub fn default_output_dir(field: CardField) -> &'static str {
    match field {
        CardField::Moves => "moves",
        CardField::Weakness => "weaknesses",
        CardField::Resistance => "resistances",
        CardField::Name | CardField::Lore => field.label(),
    }
}

/// Environment variable naming a field's output directory.
fn output_dir_env(field: CardField) -> Option<&'static str> {
    match field {
        CardField::Moves => Some("MOVES_DIR"),
        CardField::Weakness => Some("WEAKNESS_DIR"),
        CardField::Resistance => Some("RESISTANCE_DIR"),
        CardField::Name | CardField::Lore => None,
    }
}

/// Image formats a persisted region may be written as.
pub fn parse_extension(extension: &str) -> Option<ImageFormat> {
    ImageFormat::from_extension(extension).filter(|format| {
        matches!(
            format,
            ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::Bmp | ImageFormat::Tiff
        )
    })
}

/// A crop box as written in the config file: `"l,t,r,b"` or `[l, t, r, b]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CropBoxEntry {
    Text(String),
    Values(Vec<u32>),
}

impl CropBoxEntry {
    fn resolve(&self, key: &str) -> Result<CropBox, ConfigError> {
        match self {
            CropBoxEntry::Text(s) => s
                .parse()
                .map_err(|e: crate::extraction::ParseCropBoxError| {
                    ConfigError::invalid(key, e.to_string())
                }),
            CropBoxEntry::Values(values) => CropBox::try_from(values.as_slice())
                .map_err(|reason| ConfigError::invalid(key, reason)),
        }
    }
}

/// `[worker]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub poll_interval_secs: Option<f64>,
    pub batch_size: Option<usize>,
    pub claim_ttl_secs: Option<u64>,
    pub io_timeout_secs: Option<u64>,
    pub extraction_timeout_secs: Option<u64>,
    pub store_timeout_secs: Option<u64>,
}

/// `[ocr]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub language: Option<String>,
    pub binary: Option<String>,
}

/// `[fields.<field>]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldConfig {
    pub enabled: Option<bool>,
    pub crop_box: Option<CropBoxEntry>,
    pub poll_interval_secs: Option<f64>,
    pub output_dir: Option<PathBuf>,
    pub extension: Option<String>,
    /// `sentinel`, `retry` or `fail`.
    pub on_empty: Option<String>,
    pub sentinel: Option<String>,
    pub max_attempts: Option<u32>,
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: Option<PathBuf>,
    pub database_url: Option<String>,
    pub upload_dir: Option<PathBuf>,
    pub worker: WorkerConfig,
    pub ocr: OcrConfig,
    /// Keyed by field label (`name`, `lore`, `moves`, `weakness`, `resistance`).
    pub fields: BTreeMap<String, FieldConfig>,
}

impl Config {
    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load the explicit file, or `./cardscan.toml` if it exists, or defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => {
                let local = PathBuf::from(CONFIG_FILENAME);
                if local.is_file() {
                    tracing::debug!("Using config file {}", local.display());
                    Self::load_from_path(&local)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Overlay environment variables read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("CARDSCAN_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(url) = lookup("DATABASE_URL") {
            self.database_url = Some(url);
        }
        if let Some(dir) = lookup("UPLOAD_DIR") {
            self.upload_dir = Some(PathBuf::from(dir));
        }
        if let Some(interval) = lookup("POLL_INTERVAL") {
            let secs = interval.trim().parse::<f64>().map_err(|e| {
                ConfigError::invalid("POLL_INTERVAL", format!("'{}': {}", interval, e))
            })?;
            self.worker.poll_interval_secs = Some(secs);
        }
        if let Some(language) = lookup("TESSERACT_LANG") {
            self.ocr.language = Some(language);
        }
        if let Some(binary) = lookup("TESSERACT_CMD") {
            self.ocr.binary = Some(binary);
        }

        for field in CardField::ALL {
            let crop_var = format!("{}_CROP_BOX", field.label().to_uppercase());
            if let Some(crop) = lookup(&crop_var) {
                self.field_entry(field).crop_box = Some(CropBoxEntry::Text(crop));
            }
            if let Some(dir) = output_dir_env(field).and_then(&lookup) {
                self.field_entry(field).output_dir = Some(PathBuf::from(dir));
            }
        }
        Ok(())
    }

    fn field_entry(&mut self, field: CardField) -> &mut FieldConfig {
        // Reuse an entry written under the storage key if there is one
        let key = if self.fields.contains_key(field.as_str()) {
            field.as_str()
        } else {
            field.label()
        };
        self.fields.entry(key.to_string()).or_default()
    }

    /// Validate and resolve into [`Settings`].
    pub fn resolve(&self) -> Result<Settings, ConfigError> {
        let data_dir = self.data_dir.clone().unwrap_or_else(|| PathBuf::from("."));
        let mut settings = Settings::with_data_dir(data_dir.clone());

        settings.database_url = self.database_url.clone();
        if let Some(ref dir) = self.upload_dir {
            settings.upload_dir = resolve_path(&data_dir, dir);
        }

        let worker = &mut settings.worker;
        if let Some(secs) = self.worker.poll_interval_secs {
            worker.poll_interval = positive_secs("worker.poll_interval_secs", secs)?;
        }
        if let Some(size) = self.worker.batch_size {
            if size == 0 {
                return Err(ConfigError::invalid("worker.batch_size", "must be at least 1"));
            }
            worker.batch_size = size;
        }
        let timeouts = [
            ("worker.claim_ttl_secs", self.worker.claim_ttl_secs, &mut worker.claim_ttl),
            ("worker.io_timeout_secs", self.worker.io_timeout_secs, &mut worker.io_timeout),
            (
                "worker.extraction_timeout_secs",
                self.worker.extraction_timeout_secs,
                &mut worker.extraction_timeout,
            ),
            (
                "worker.store_timeout_secs",
                self.worker.store_timeout_secs,
                &mut worker.store_timeout,
            ),
        ];
        for (key, value, target) in timeouts {
            if let Some(secs) = value {
                if secs == 0 {
                    return Err(ConfigError::invalid(key, "must be at least 1 second"));
                }
                *target = Duration::from_secs(secs);
            }
        }
        let claim_span = worker
            .io_timeout
            .checked_add(worker.extraction_timeout)
            .and_then(|span| span.checked_add(worker.store_timeout));
        if claim_span.map_or(true, |span| worker.claim_ttl <= span) {
            return Err(ConfigError::invalid(
                "worker.claim_ttl_secs",
                format!(
                    "{}s must exceed the io, extraction and store timeouts combined",
                    worker.claim_ttl.as_secs()
                ),
            ));
        }

        if let Some(ref language) = self.ocr.language {
            settings.ocr.language = language.clone();
        }
        if let Some(ref binary) = self.ocr.binary {
            settings.ocr.binary = binary.clone();
        }

        let mut by_field: BTreeMap<CardField, &FieldConfig> = BTreeMap::new();
        for (key, entry) in &self.fields {
            let field = CardField::from_str(key).ok_or_else(|| {
                ConfigError::invalid(format!("fields.{}", key), "unknown field")
            })?;
            by_field.insert(field, entry);
        }

        let global_interval = settings.worker.poll_interval;
        for (field, field_settings) in settings.fields.iter_mut() {
            field_settings.poll_interval = global_interval;
            if let Some(entry) = by_field.get(field) {
                apply_field_config(*field, entry, &data_dir, field_settings)?;
            }
        }

        Ok(settings)
    }
}

fn positive_secs(key: &str, secs: f64) -> Result<Duration, ConfigError> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(ConfigError::invalid(key, format!("{} is not a positive duration", secs)));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|e| ConfigError::invalid(key, format!("{}: {}", secs, e)))
}

fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn apply_field_config(
    field: CardField,
    entry: &FieldConfig,
    data_dir: &Path,
    settings: &mut FieldSettings,
) -> Result<(), ConfigError> {
    let key = |name: &str| format!("fields.{}.{}", field.label(), name);

    if let Some(enabled) = entry.enabled {
        settings.enabled = enabled;
    }
    if let Some(ref crop) = entry.crop_box {
        settings.crop_box = crop.resolve(&key("crop_box"))?;
    }
    if let Some(secs) = entry.poll_interval_secs {
        settings.poll_interval = positive_secs(&key("poll_interval_secs"), secs)?;
    }
    if let Some(ref dir) = entry.output_dir {
        settings.output_dir = resolve_path(data_dir, dir);
    }
    if let Some(ref extension) = entry.extension {
        settings.format = parse_extension(extension).ok_or_else(|| {
            ConfigError::invalid(key("extension"), format!("unsupported image type '{}'", extension))
        })?;
    }
    match (&entry.on_empty, &entry.sentinel) {
        (Some(name), sentinel) => {
            settings.on_empty = EmptyResultPolicy::parse(name, sentinel.as_deref())
                .ok_or_else(|| {
                    ConfigError::invalid(
                        key("on_empty"),
                        format!("'{}' (expected sentinel, retry or fail)", name),
                    )
                })?;
        }
        (None, Some(sentinel)) => {
            settings.on_empty = EmptyResultPolicy::Sentinel(sentinel.clone());
        }
        (None, None) => {}
    }
    if let Some(max) = entry.max_attempts {
        if max == 0 {
            return Err(ConfigError::invalid(key("max_attempts"), "must be at least 1"));
        }
        settings.max_attempts = Some(max);
    }
    Ok(())
}

/// Scheduling and timeout settings shared by every worker.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSettings {
    pub poll_interval: Duration,
    pub batch_size: usize,
    /// How long an in-progress claim may sit before it is handed out again.
    pub claim_ttl: Duration,
    pub io_timeout: Duration,
    pub extraction_timeout: Duration,
    pub store_timeout: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            batch_size: DEFAULT_BATCH_SIZE,
            claim_ttl: Duration::from_secs(DEFAULT_CLAIM_TTL_SECS),
            io_timeout: Duration::from_secs(DEFAULT_IO_TIMEOUT_SECS),
            extraction_timeout: Duration::from_secs(DEFAULT_EXTRACTION_TIMEOUT_SECS),
            store_timeout: Duration::from_secs(DEFAULT_STORE_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OcrSettings {
    pub language: String,
    pub binary: String,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            language: DEFAULT_LANGUAGE.to_string(),
            binary: DEFAULT_BINARY.to_string(),
        }
    }
}

/// Resolved settings of one extraction field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSettings {
    pub enabled: bool,
    pub crop_box: CropBox,
    pub poll_interval: Duration,
    /// Only used by image-persisting fields.
    pub output_dir: PathBuf,
    pub format: ImageFormat,
    pub on_empty: EmptyResultPolicy,
    pub max_attempts: Option<u32>,
}

impl FieldSettings {
    fn defaults(field: CardField, data_dir: &Path) -> Self {
        Self {
            enabled: true,
            crop_box: default_crop_box(field),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            output_dir: data_dir.join(default_output_dir(field)),
            format: ImageFormat::Png,
            on_empty: EmptyResultPolicy::default(),
            max_attempts: None,
        }
    }
}

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database URL (overrides data_dir/cards.db if set).
    pub database_url: Option<String>,
    /// Where uploaded source images are stored.
    pub upload_dir: PathBuf,
    pub worker: WorkerSettings,
    pub ocr: OcrSettings,
    pub fields: BTreeMap<CardField, FieldSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::with_data_dir(PathBuf::from("."))
    }
}

impl Settings {
    /// Defaults rooted at `data_dir`.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            upload_dir: data_dir.join(UPLOAD_SUBDIR),
            database_url: None,
            worker: WorkerSettings::default(),
            ocr: OcrSettings::default(),
            fields: CardField::ALL
                .iter()
                .map(|field| (*field, FieldSettings::defaults(*field, &data_dir)))
                .collect(),
            data_dir,
        }
    }

    /// Defaults, then config file, then the process environment.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Config::load(config_path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.resolve()
    }

    /// Get the database URL, constructing from path if not explicitly set.
    pub fn database_url(&self) -> String {
        if let Some(ref url) = self.database_url {
            url.clone()
        } else {
            let path = self.data_dir.join(DEFAULT_DATABASE_FILENAME);
            format!("sqlite:{}", path.display())
        }
    }

    pub fn field(&self, field: CardField) -> Option<&FieldSettings> {
        self.fields.get(&field)
    }

    pub fn enabled_fields(&self) -> Vec<CardField> {
        self.fields
            .iter()
            .filter(|(_, settings)| settings.enabled)
            .map(|(field, _)| *field)
            .collect()
    }

    /// Directories the image-persisting fields write into.
    pub fn output_dirs(&self) -> Vec<&Path> {
        self.fields
            .iter()
            .filter(|(field, _)| field.capability() == Capability::ImagePersist)
            .map(|(_, settings)| settings.output_dir.as_path())
            .collect()
    }

    /// Ensure all directories exist.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        let mut dirs = vec![self.data_dir.as_path(), self.upload_dir.as_path()];
        dirs.extend(self.output_dirs());
        for dir in dirs {
            tracing::debug!("Ensuring directory {}", dir.display());
            fs::create_dir_all(dir).map_err(|e| {
                std::io::Error::new(
                    e.kind(),
                    format!("Failed to create directory '{}': {}", dir.display(), e),
                )
            })?;
        }
        Ok(())
    }

    /// Create a database context using the configured database URL or path.
    pub fn create_db_context(&self) -> DieselDbContext {
        DieselDbContext::from_url(&self.database_url())
    }

    /// Text recognizer shared by the text-extraction fields.
    pub fn recognizer(&self) -> TesseractBackend {
        TesseractBackend::new()
            .with_language(self.ocr.language.clone())
            .with_binary(self.ocr.binary.clone())
    }
}
