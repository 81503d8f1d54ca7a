//! Data models for cardscan.

mod card;

pub use card::{Capability, Card, CardField, FieldSlot, FieldStatus};
