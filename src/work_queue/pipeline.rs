//! One poll-claim-crop-extract-update cycle for a single field.
//!
//! The pipeline is generic over the field: everything field-specific comes
//! from its [`FieldSpec`]. Nothing that goes wrong with one candidate stops
//! the cycle, and nothing that goes wrong in a cycle stops the worker.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{FieldQueue, Shutdown, WorkHandle, WorkQueueError};
use crate::config::WorkerSettings;
use crate::extraction::{crop_source, EmptyResultPolicy, ExtractError, Extraction, FieldSpec};
use crate::models::{Card, CardField};

/// Per-cycle bounds shared by every field.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineLimits {
    pub batch_size: usize,
    pub claim_ttl: Duration,
    pub io_timeout: Duration,
    pub extraction_timeout: Duration,
}

impl Default for PipelineLimits {
    fn default() -> Self {
        Self::from(&WorkerSettings::default())
    }
}

impl From<&WorkerSettings> for PipelineLimits {
    fn from(settings: &WorkerSettings) -> Self {
        Self {
            batch_size: settings.batch_size,
            claim_ttl: settings.claim_ttl,
            io_timeout: settings.io_timeout,
            extraction_timeout: settings.extraction_timeout,
        }
    }
}

/// What happened in one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub candidates: usize,
    /// Claims returned to pending before polling.
    pub reclaimed: u64,
    pub committed: usize,
    /// Commits of the empty-result sentinel.
    pub sentinels: usize,
    pub retried: usize,
    pub failed: usize,
    /// Candidates another worker held (or took over) first.
    pub contended: usize,
    pub store_errors: usize,
    /// Shutdown arrived before every candidate was processed.
    pub interrupted: bool,
}

impl CycleReport {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Committed => self.committed += 1,
            Outcome::Sentinel => self.sentinels += 1,
            Outcome::Retried => self.retried += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Contended => self.contended += 1,
            Outcome::StoreError => self.store_errors += 1,
        }
    }

    /// Nothing was attempted.
    pub fn is_idle(&self) -> bool {
        self.candidates == 0 && self.reclaimed == 0 && self.store_errors == 0
    }
}

/// Result of processing one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Committed,
    Sentinel,
    Retried,
    Failed,
    Contended,
    StoreError,
}

async fn bounded<T, E>(
    step: &'static str,
    after: Duration,
    fut: impl Future<Output = Result<T, E>>,
) -> Result<T, ExtractError>
where
    ExtractError: From<E>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(ExtractError::Timeout { step, after }),
    }
}

/// Drives extraction of one field through its queue.
pub struct FieldPipeline {
    spec: FieldSpec,
    queue: Arc<dyn FieldQueue>,
    limits: PipelineLimits,
}

impl FieldPipeline {
    pub fn new(spec: FieldSpec, queue: Arc<dyn FieldQueue>, limits: PipelineLimits) -> Self {
        Self {
            spec,
            queue,
            limits,
        }
    }

    pub fn field(&self) -> CardField {
        self.spec.field
    }

    pub fn spec(&self) -> &FieldSpec {
        &self.spec
    }

    pub fn worker_id(&self) -> &str {
        self.queue.worker_id()
    }

    /// Reclaim stale claims, poll, and process every candidate until done
    /// or until `shutdown` fires.
    pub async fn run_cycle(&self, shutdown: &Shutdown) -> CycleReport {
        let field = self.spec.field;
        let mut report = CycleReport::default();

        match self.queue.reclaim_stale(field, self.limits.claim_ttl).await {
            Ok(0) => {}
            Ok(n) => {
                info!(%field, reclaimed = n, "Returned stale claims to pending");
                report.reclaimed = n;
            }
            Err(e) => {
                warn!(%field, error = %e, "Failed to reclaim stale claims");
                report.store_errors += 1;
            }
        }

        let candidates = match self
            .queue
            .fetch_pending(field, self.limits.batch_size)
            .await
        {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(%field, error = %e, "Poll failed; treating cycle as empty");
                report.store_errors += 1;
                return report;
            }
        };
        report.candidates = candidates.len();
        if !candidates.is_empty() {
            debug!(%field, count = candidates.len(), "Polled candidates");
        }

        for card in &candidates {
            if shutdown.is_triggered() {
                report.interrupted = true;
                break;
            }
            let outcome = self.process(card).await;
            report.record(outcome);
        }

        report
    }

    async fn process(&self, card: &Card) -> Outcome {
        let field = self.spec.field;

        let handle = match self.queue.claim(card, field).await {
            Ok(handle) => handle,
            Err(WorkQueueError::AlreadyClaimed) => {
                debug!(%field, card_id = %card.id, "Skipping candidate claimed elsewhere");
                return Outcome::Contended;
            }
            Err(e) => {
                warn!(%field, card_id = %card.id, error = %e, "Claim failed");
                return Outcome::StoreError;
            }
        };

        match self.extract(handle.card()).await {
            Ok(Extraction::Value(value)) => {
                self.commit(handle, &value, Outcome::Committed).await
            }
            Ok(Extraction::Empty) => match &self.spec.on_empty {
                EmptyResultPolicy::Sentinel(sentinel) => {
                    info!(%field, card_id = %card.id, "No text recognized; writing sentinel");
                    self.commit(handle, sentinel, Outcome::Sentinel).await
                }
                EmptyResultPolicy::Retry => self.retry(handle, "no text recognized").await,
                EmptyResultPolicy::Fail => self.fail(handle, "no text recognized").await,
            },
            Err(e) => {
                warn!(
                    %field,
                    card_id = %card.id,
                    kind = e.kind(),
                    error = %e,
                    "Extraction failed"
                );
                self.retry(handle, &format!("{}: {}", e.kind(), e)).await
            }
        }
    }

    async fn extract(&self, card: &Card) -> Result<Extraction, ExtractError> {
        let region = bounded(
            "crop",
            self.limits.io_timeout,
            crop_source(card.source_image_path.clone(), self.spec.crop),
        )
        .await?;

        bounded(
            "extraction",
            self.limits.extraction_timeout,
            self.spec.extractor.extract(card, region),
        )
        .await
    }

    async fn commit(&self, handle: WorkHandle, value: &str, outcome: Outcome) -> Outcome {
        let field = self.spec.field;
        let card_id = handle.card().id.clone();
        match self.queue.complete(handle, value).await {
            Ok(()) => {
                info!(%field, %card_id, value, "Updated card");
                outcome
            }
            Err(WorkQueueError::ClaimLost) => {
                warn!(%field, %card_id, "Claim was reassigned before commit; discarding result");
                Outcome::Contended
            }
            Err(e) => {
                warn!(%field, %card_id, error = %e, "Failed to store result");
                Outcome::StoreError
            }
        }
    }

    /// Release for another attempt, or fail if this was the last one allowed.
    async fn retry(&self, handle: WorkHandle, error: &str) -> Outcome {
        if self.spec.is_final_attempt(handle.attempt()) {
            warn!(
                field = %self.spec.field,
                card_id = %handle.card().id,
                attempt = handle.attempt(),
                "Attempt limit reached"
            );
            return self.fail(handle, error).await;
        }

        let field = self.spec.field;
        let card_id = handle.card().id.clone();
        match self.queue.release(handle, error).await {
            Ok(()) => Outcome::Retried,
            Err(WorkQueueError::ClaimLost) => Outcome::Contended,
            Err(e) => {
                warn!(%field, %card_id, error = %e, "Failed to release claim");
                Outcome::StoreError
            }
        }
    }

    async fn fail(&self, handle: WorkHandle, error: &str) -> Outcome {
        let field = self.spec.field;
        let card_id = handle.card().id.clone();
        match self.queue.fail(handle, error).await {
            Ok(()) => {
                warn!(%field, %card_id, error, "Marked field as failed");
                Outcome::Failed
            }
            Err(WorkQueueError::ClaimLost) => Outcome::Contended,
            Err(e) => {
                warn!(%field, %card_id, error = %e, "Failed to record failure");
                Outcome::StoreError
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::{CropBox, Extractor, ImagePersist};
    use crate::models::{Capability, FieldStatus};
    use crate::repository::DieselDbContext;
    use crate::work_queue::DbFieldQueue;
    use async_trait::async_trait;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// Returns a fixed text result and counts calls.
    struct StubText {
        text: &'static str,
        calls: AtomicUsize,
    }

    impl StubText {
        fn new(text: &'static str) -> Arc<Self> {
            Arc::new(Self {
                text,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Extractor for StubText {
        fn capability(&self) -> Capability {
            Capability::TextExtraction
        }

        async fn extract(
            &self,
            _card: &Card,
            _region: DynamicImage,
        ) -> Result<Extraction, ExtractError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.text.is_empty() {
                Ok(Extraction::Empty)
            } else {
                Ok(Extraction::Value(self.text.to_string()))
            }
        }
    }

    async fn setup() -> (DieselDbContext, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let ctx = DieselDbContext::new(&dir.path().join("cards.db"));
        ctx.init_schema().await.unwrap();
        (ctx, dir)
    }

    fn write_image(path: &Path) {
        DynamicImage::ImageRgb8(RgbImage::new(600, 1100))
            .save(path)
            .unwrap();
    }

    async fn add_card(ctx: &DieselDbContext, dir: &Path, name: &str) -> Card {
        let path = dir.join(name);
        write_image(&path);
        let card = Card::new(name, path);
        ctx.cards().create(&card).await.unwrap();
        card
    }

    fn pipeline(
        ctx: &DieselDbContext,
        field: CardField,
        extractor: Arc<dyn Extractor>,
        on_empty: EmptyResultPolicy,
    ) -> FieldPipeline {
        let spec = FieldSpec::new(field, CropBox::new(50, 30, 500, 85), extractor)
            .with_on_empty(on_empty);
        let queue = Arc::new(DbFieldQueue::new(ctx.cards(), format!("test-{}", field)));
        FieldPipeline::new(spec, queue, PipelineLimits::default())
    }

    #[tokio::test]
    async fn test_value_is_committed_once() {
        let (ctx, dir) = setup().await;
        let card = add_card(&ctx, dir.path(), "a.png").await;
        let stub = StubText::new("CHARIZARD");
        let pipeline = pipeline(&ctx, CardField::Name, stub.clone(), EmptyResultPolicy::Retry);

        let report = pipeline.run_cycle(&Shutdown::never()).await;
        assert_eq!(report.candidates, 1);
        assert_eq!(report.committed, 1);

        let stored = ctx.cards().get(&card.id).await.unwrap().unwrap();
        assert_eq!(stored.name(), Some("CHARIZARD"));

        // Done fields are never selected again
        let report = pipeline.run_cycle(&Shutdown::never()).await;
        assert_eq!(report.candidates, 0);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_result_policies() {
        let (ctx, dir) = setup().await;
        let card = add_card(&ctx, dir.path(), "blank.png").await;

        let sentinel = pipeline(
            &ctx,
            CardField::Name,
            StubText::new(""),
            EmptyResultPolicy::Sentinel("UNKNOWN".into()),
        );
        let report = sentinel.run_cycle(&Shutdown::never()).await;
        assert_eq!(report.sentinels, 1);

        let retry = pipeline(&ctx, CardField::Lore, StubText::new(""), EmptyResultPolicy::Retry);
        let report = retry.run_cycle(&Shutdown::never()).await;
        assert_eq!(report.retried, 1);

        let fail = pipeline(&ctx, CardField::Moves, StubText::new(""), EmptyResultPolicy::Fail);
        let report = fail.run_cycle(&Shutdown::never()).await;
        assert_eq!(report.failed, 1);

        let stored = ctx.cards().get(&card.id).await.unwrap().unwrap();
        assert_eq!(stored.name(), Some("UNKNOWN"));
        assert_eq!(stored.status(CardField::Lore), FieldStatus::Pending);
        assert_eq!(stored.status(CardField::Moves), FieldStatus::Failed);
    }

    #[tokio::test]
    async fn test_missing_source_stays_pending() {
        let (ctx, dir) = setup().await;
        let card = Card::new("gone.png", dir.path().join("gone.png"));
        ctx.cards().create(&card).await.unwrap();

        let persist = Arc::new(ImagePersist::new(dir.path().join("moves"), ImageFormat::Png));
        let pipeline = pipeline(&ctx, CardField::Moves, persist, EmptyResultPolicy::Retry);

        for _ in 0..3 {
            let report = pipeline.run_cycle(&Shutdown::never()).await;
            assert_eq!(report.retried, 1);
        }
        let stored = ctx.cards().get(&card.id).await.unwrap().unwrap();
        let slot = stored.slot(CardField::Moves).unwrap();
        assert_eq!(slot.status, FieldStatus::Pending);
        assert_eq!(slot.attempts, 3);
        assert!(slot
            .last_error
            .as_deref()
            .unwrap()
            .starts_with("source_unavailable"));
        assert!(!dir.path().join("moves").join(format!("{}.png", card.id)).exists());
    }

    #[tokio::test]
    async fn test_attempt_cap_fails_field() {
        let (ctx, dir) = setup().await;
        let card = Card::new("gone.png", PathBuf::from(dir.path().join("gone.png")));
        ctx.cards().create(&card).await.unwrap();

        let spec = FieldSpec::new(
            CardField::Weakness,
            CropBox::new(0, 0, 10, 10),
            StubText::new("unused"),
        )
        .with_max_attempts(Some(2));
        let queue = Arc::new(DbFieldQueue::new(ctx.cards(), "capped"));
        let pipeline = FieldPipeline::new(spec, queue, PipelineLimits::default());

        assert_eq!(pipeline.run_cycle(&Shutdown::never()).await.retried, 1);
        assert_eq!(pipeline.run_cycle(&Shutdown::never()).await.failed, 1);
        assert_eq!(pipeline.run_cycle(&Shutdown::never()).await.candidates, 0);

        let stored = ctx.cards().get(&card.id).await.unwrap().unwrap();
        assert_eq!(stored.status(CardField::Weakness), FieldStatus::Failed);
    }

    #[tokio::test]
    async fn test_triggered_shutdown_skips_candidates() {
        let (ctx, dir) = setup().await;
        add_card(&ctx, dir.path(), "a.png").await;
        add_card(&ctx, dir.path(), "b.png").await;

        let stub = StubText::new("X");
        let pipeline = pipeline(&ctx, CardField::Name, stub.clone(), EmptyResultPolicy::Retry);
        let (trigger, shutdown) = crate::work_queue::shutdown::channel();
        trigger.trigger();

        let report = pipeline.run_cycle(&shutdown).await;
        assert_eq!(report.candidates, 2);
        assert!(report.interrupted);
        assert_eq!(report.committed, 0);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_attempt_cap_counts_other_workers_claims() {
        let (ctx, dir) = setup().await;
        let card = Card::new("gone.png", dir.path().join("gone.png"));
        ctx.cards().create(&card).await.unwrap();

        // Another instance of the same worker burns one attempt
        let other = DbFieldQueue::new(ctx.cards(), "other");
        let handle = other.claim(&card, CardField::Weakness).await.unwrap();
        other.release(handle, "source_unavailable").await.unwrap();

        let spec = FieldSpec::new(
            CardField::Weakness,
            CropBox::new(0, 0, 10, 10),
            StubText::new("unused"),
        )
        .with_max_attempts(Some(2));
        let queue = Arc::new(DbFieldQueue::new(ctx.cards(), "capped"));
        let pipeline = FieldPipeline::new(spec, queue, PipelineLimits::default());

        let report = pipeline.run_cycle(&Shutdown::never()).await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.retried, 0);

        let stored = ctx.cards().get(&card.id).await.unwrap().unwrap();
        assert_eq!(stored.status(CardField::Weakness), FieldStatus::Failed);
        assert_eq!(stored.attempts(CardField::Weakness), 2);
    }
}
