//! Work queue abstraction for the claim/complete/release/fail lifecycle.
//!
//! Every extraction worker follows the same pattern: return stale claims,
//! fetch the cards still missing its field, claim each one, extract, and
//! record the outcome. The queue owns the claim lifecycle; pipelines own
//! the extraction.

mod db_fields;
mod error;
mod handle;
pub mod pipeline;
pub mod runner;
pub mod shutdown;

pub use db_fields::{generate_worker_id, DbFieldQueue};
pub use error::WorkQueueError;
pub use handle::WorkHandle;
pub use pipeline::{CycleReport, FieldPipeline, PipelineLimits};
pub use runner::{ExtractionWorker, WorkerPool, WorkerSummary};
pub use shutdown::{Shutdown, ShutdownTrigger};

use std::time::Duration;

use async_trait::async_trait;

use crate::models::{Card, CardField};

/// A queue of card fields awaiting extraction.
///
/// Claims are exclusive: at most one worker holds a given `(card, field)`
/// at a time, and only the holder can record its outcome.
#[async_trait]
pub trait FieldQueue: Send + Sync {
    /// Identifier written as the claim owner.
    fn worker_id(&self) -> &str;

    /// Count cards whose `field` is pending.
    async fn count(&self, field: CardField) -> Result<u64, WorkQueueError>;

    /// Fetch up to `limit` cards whose `field` is pending.
    async fn fetch_pending(
        &self,
        field: CardField,
        limit: usize,
    ) -> Result<Vec<Card>, WorkQueueError>;

    /// Claim `field` of `card`.
    ///
    /// Returns `WorkQueueError::AlreadyClaimed` if the field is no longer
    /// pending (another worker won it, or it finished in the meantime).
    async fn claim(&self, card: &Card, field: CardField) -> Result<WorkHandle, WorkQueueError>;

    /// Commit `value`; the field becomes done.
    async fn complete(&self, handle: WorkHandle, value: &str) -> Result<(), WorkQueueError>;

    /// Give the field back as pending so a later cycle retries it.
    async fn release(&self, handle: WorkHandle, error: &str) -> Result<(), WorkQueueError>;

    /// Mark the field as terminally failed.
    async fn fail(&self, handle: WorkHandle, error: &str) -> Result<(), WorkQueueError>;

    /// Return claims on `field` older than `older_than` to pending.
    async fn reclaim_stale(
        &self,
        field: CardField,
        older_than: Duration,
    ) -> Result<u64, WorkQueueError>;
}
