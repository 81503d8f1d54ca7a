//! Work handle — wraps a claimed card field.

use crate::models::{Card, CardField};

/// A claimed field of a card. Move semantics: consumed by `complete()`,
/// `release()` or `fail()`.
///
/// If dropped without being consumed, logs a warning. The claim TTL is the
/// real safety net; the warning is for debugging only.
#[derive(Debug)]
pub struct WorkHandle {
    card: Card,
    field: CardField,
    attempt: u32,
    consumed: bool,
}

impl WorkHandle {
    /// Wrap a freshly claimed field. For queue implementations.
    pub fn new(card: Card, field: CardField, attempt: u32) -> Self {
        Self {
            card,
            field,
            attempt,
            consumed: false,
        }
    }

    pub fn card(&self) -> &Card {
        &self.card
    }

    pub fn field(&self) -> CardField {
        self.field
    }

    /// 1-based number of this claim on the field.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Mark this handle as consumed and return the card id it held.
    /// For queue implementations recording an outcome.
    pub fn consume(mut self) -> String {
        self.consumed = true;
        std::mem::take(&mut self.card.id)
    }
}

impl Drop for WorkHandle {
    fn drop(&mut self) {
        if !self.consumed {
            tracing::warn!(
                card_id = %self.card.id,
                field = %self.field,
                "WorkHandle dropped without being completed, released or failed; \
                 the claim will be reclaimed once it goes stale"
            );
        }
    }
}
