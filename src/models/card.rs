//! Card records and their independently-owned extraction fields.
//!
//! A card is created by the gateway with every extraction field pending.
//! Each field is then owned by exactly one worker type, which moves it
//! through `pending -> in_progress -> done` (or back to `pending` on a
//! retryable failure, or to `failed` when its policy gives up).

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One of the five fields extracted from a card image.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum CardField {
    Name,
    Lore,
    Moves,
    Weakness,
    Resistance,
}

/// How a field's value is produced from its cropped region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Run text recognition over the region; the text is the value.
    TextExtraction,
    /// Persist the region as an image file; its path is the value.
    ImagePersist,
}

impl CardField {
    pub const ALL: [CardField; 5] = [
        CardField::Name,
        CardField::Lore,
        CardField::Moves,
        CardField::Weakness,
        CardField::Resistance,
    ];

    /// Storage key of the field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Lore => "lore",
            Self::Moves => "moves_image_path",
            Self::Weakness => "weakness_image_path",
            Self::Resistance => "resistance_image_path",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "name" => Some(Self::Name),
            "lore" => Some(Self::Lore),
            "moves_image_path" | "moves" => Some(Self::Moves),
            "weakness_image_path" | "weakness" => Some(Self::Weakness),
            "resistance_image_path" | "resistance" => Some(Self::Resistance),
            _ => None,
        }
    }

    /// Short name used in configuration, environment variables and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Lore => "lore",
            Self::Moves => "moves",
            Self::Weakness => "weakness",
            Self::Resistance => "resistance",
        }
    }

    pub fn capability(&self) -> Capability {
        match self {
            Self::Name | Self::Lore => Capability::TextExtraction,
            Self::Moves | Self::Weakness | Self::Resistance => Capability::ImagePersist,
        }
    }
}

impl std::fmt::Display for CardField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Completion state of a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldStatus {
    Pending,
    InProgress,
    Done,
    Failed,
}

impl FieldStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for FieldStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Stored state of one extraction field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSlot {
    pub status: FieldStatus,
    /// Only meaningful once `status` is `Done`.
    pub value: Option<String>,
    /// Number of claims taken on this field so far.
    pub attempts: u32,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl FieldSlot {
    pub fn pending(at: DateTime<Utc>) -> Self {
        Self {
            status: FieldStatus::Pending,
            value: None,
            attempts: 0,
            last_error: None,
            updated_at: at,
        }
    }
}

/// A scanned card and its extracted fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    pub id: String,
    /// Filename the image was uploaded under.
    pub filename: String,
    /// Set at creation and never changed afterwards.
    pub source_image_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub fields: BTreeMap<CardField, FieldSlot>,
}

impl Card {
    /// Create a new card with every extraction field pending.
    pub fn new(filename: impl Into<String>, source_image_path: PathBuf) -> Self {
        Self::with_id(
            uuid::Uuid::new_v4().to_string(),
            filename,
            source_image_path,
        )
    }

    pub fn with_id(
        id: impl Into<String>,
        filename: impl Into<String>,
        source_image_path: PathBuf,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            filename: filename.into(),
            source_image_path,
            created_at: now,
            fields: CardField::ALL
                .iter()
                .map(|field| (*field, FieldSlot::pending(now)))
                .collect(),
        }
    }

    pub fn slot(&self, field: CardField) -> Option<&FieldSlot> {
        self.fields.get(&field)
    }

    /// A missing slot is treated as pending.
    pub fn status(&self, field: CardField) -> FieldStatus {
        self.slot(field)
            .map(|slot| slot.status)
            .unwrap_or(FieldStatus::Pending)
    }

    pub fn attempts(&self, field: CardField) -> u32 {
        self.slot(field).map(|slot| slot.attempts).unwrap_or(0)
    }

    /// Committed value of a field, if it is done.
    pub fn value(&self, field: CardField) -> Option<&str> {
        self.slot(field)
            .filter(|slot| slot.status == FieldStatus::Done)
            .and_then(|slot| slot.value.as_deref())
    }

    pub fn is_done(&self, field: CardField) -> bool {
        self.status(field) == FieldStatus::Done
    }

    pub fn name(&self) -> Option<&str> {
        self.value(CardField::Name)
    }

    pub fn lore(&self) -> Option<&str> {
        self.value(CardField::Lore)
    }

    pub fn moves_image_path(&self) -> Option<&str> {
        self.value(CardField::Moves)
    }

    pub fn weakness_image_path(&self) -> Option<&str> {
        self.value(CardField::Weakness)
    }

    pub fn resistance_image_path(&self) -> Option<&str> {
        self.value(CardField::Resistance)
    }
}
