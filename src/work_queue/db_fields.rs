//! Database-backed work queue for field extraction.
//!
//! Wraps `DieselCardRepository` methods; every call is bounded by the
//! store timeout.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::models::{Card, CardField};
use crate::repository::{DieselCardRepository, DieselError};

use super::handle::WorkHandle;
use super::{FieldQueue, WorkQueueError};

/// Identifier for a worker instance: `host:pid:field:suffix`.
pub fn generate_worker_id(field: CardField) -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string());
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}:{}:{}:{}",
        host,
        std::process::id(),
        field.label(),
        &suffix[..8]
    )
}

/// Work queue that discovers pending fields via DB queries and claims them
/// with a conditional update on the `card_fields` row.
pub struct DbFieldQueue {
    repo: DieselCardRepository,
    worker_id: String,
    store_timeout: Duration,
}

impl DbFieldQueue {
    pub fn new(repo: DieselCardRepository, worker_id: impl Into<String>) -> Self {
        Self {
            repo,
            worker_id: worker_id.into(),
            store_timeout: Duration::from_secs(15),
        }
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, DieselError>>,
    ) -> Result<T, WorkQueueError> {
        match tokio::time::timeout(self.store_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(WorkQueueError::Timeout(op)),
        }
    }

    /// Record the outcome of a claim, reporting `ClaimLost` if it had
    /// already been taken away.
    fn expect_held(updated: bool) -> Result<(), WorkQueueError> {
        if updated {
            Ok(())
        } else {
            Err(WorkQueueError::ClaimLost)
        }
    }
}

#[async_trait]
impl FieldQueue for DbFieldQueue {
    fn worker_id(&self) -> &str {
        &self.worker_id
    }

    async fn count(&self, field: CardField) -> Result<u64, WorkQueueError> {
        self.bounded(
            "count",
            self.repo
                .count_by_status(field, crate::models::FieldStatus::Pending),
        )
        .await
    }

    async fn fetch_pending(
        &self,
        field: CardField,
        limit: usize,
    ) -> Result<Vec<Card>, WorkQueueError> {
        self.bounded("fetch_pending", self.repo.get_pending(field, limit))
            .await
    }

    async fn claim(&self, card: &Card, field: CardField) -> Result<WorkHandle, WorkQueueError> {
        let attempt = self
            .bounded(
                "claim",
                self.repo.claim_field(&card.id, field, &self.worker_id),
            )
            .await?
            .ok_or(WorkQueueError::AlreadyClaimed)?;
        Ok(WorkHandle::new(card.clone(), field, attempt))
    }

    async fn complete(&self, handle: WorkHandle, value: &str) -> Result<(), WorkQueueError> {
        let field = handle.field();
        let card_id = handle.consume();
        let updated = self
            .bounded(
                "complete",
                self.repo
                    .complete_field(&card_id, field, &self.worker_id, value),
            )
            .await?;
        Self::expect_held(updated)
    }

    async fn release(&self, handle: WorkHandle, error: &str) -> Result<(), WorkQueueError> {
        let field = handle.field();
        let card_id = handle.consume();
        let updated = self
            .bounded(
                "release",
                self.repo
                    .release_field(&card_id, field, &self.worker_id, error),
            )
            .await?;
        Self::expect_held(updated)
    }

    async fn fail(&self, handle: WorkHandle, error: &str) -> Result<(), WorkQueueError> {
        let field = handle.field();
        let card_id = handle.consume();
        let updated = self
            .bounded(
                "fail",
                self.repo.fail_field(&card_id, field, &self.worker_id, error),
            )
            .await?;
        Self::expect_held(updated)
    }

    async fn reclaim_stale(
        &self,
        field: CardField,
        older_than: Duration,
    ) -> Result<u64, WorkQueueError> {
        self.bounded("reclaim_stale", self.repo.reclaim_stale(field, older_than))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldStatus;
    use crate::repository::DieselDbContext;
    use std::path::PathBuf;
    use tempfile::tempdir;

    async fn setup() -> (DieselDbContext, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let ctx = DieselDbContext::new(&dir.path().join("cards.db"));
        ctx.init_schema().await.unwrap();
        (ctx, dir)
    }

    #[test]
    fn test_worker_id_format() {
        let id = generate_worker_id(CardField::Weakness);
        let parts: Vec<&str> = id.split(':').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[1], std::process::id().to_string());
        assert_eq!(parts[2], "weakness");
        assert_eq!(parts[3].len(), 8);
        assert_ne!(id, generate_worker_id(CardField::Weakness));
    }

    #[tokio::test]
    async fn test_claim_lifecycle() {
        let (ctx, _dir) = setup().await;
        let card = Card::new("a.png", PathBuf::from("a.png"));
        ctx.cards().create(&card).await.unwrap();

        let first = DbFieldQueue::new(ctx.cards(), "w1");
        let second = DbFieldQueue::new(ctx.cards(), "w2");

        assert_eq!(first.count(CardField::Name).await.unwrap(), 1);
        let pending = first.fetch_pending(CardField::Name, 10).await.unwrap();
        let handle = first.claim(&pending[0], CardField::Name).await.unwrap();
        assert_eq!(handle.attempt(), 1);

        let err = second.claim(&pending[0], CardField::Name).await.unwrap_err();
        assert!(matches!(err, WorkQueueError::AlreadyClaimed));

        first.complete(handle, "MEW").await.unwrap();
        assert_eq!(first.count(CardField::Name).await.unwrap(), 0);

        let stored = ctx.cards().get(&card.id).await.unwrap().unwrap();
        assert_eq!(stored.name(), Some("MEW"));
    }

    #[tokio::test]
    async fn test_outcome_after_reclaim_is_claim_lost() {
        let (ctx, _dir) = setup().await;
        let card = Card::new("b.png", PathBuf::from("b.png"));
        ctx.cards().create(&card).await.unwrap();

        let slow = DbFieldQueue::new(ctx.cards(), "slow");
        let handle = slow.claim(&card, CardField::Lore).await.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(
            slow.reclaim_stale(CardField::Lore, Duration::ZERO)
                .await
                .unwrap(),
            1
        );
        let fast = DbFieldQueue::new(ctx.cards(), "fast");
        let retaken = fast.claim(&card, CardField::Lore).await.unwrap();

        let err = slow.complete(handle, "stale").await.unwrap_err();
        assert!(matches!(err, WorkQueueError::ClaimLost));

        fast.release(retaken, "try later").await.unwrap();
        let stored = ctx.cards().get(&card.id).await.unwrap().unwrap();
        assert_eq!(stored.status(CardField::Lore), FieldStatus::Pending);
        assert_eq!(stored.attempts(CardField::Lore), 2);
        assert_eq!(stored.lore(), None);
    }

    #[tokio::test]
    async fn test_attempt_comes_from_stored_row() {
        let (ctx, _dir) = setup().await;
        let card = Card::new("c.png", PathBuf::from("c.png"));
        ctx.cards().create(&card).await.unwrap();

        let lagging = DbFieldQueue::new(ctx.cards(), "lagging");
        let racing = DbFieldQueue::new(ctx.cards(), "racing");

        // Snapshot taken before the other worker's attempt
        let snapshot = lagging.fetch_pending(CardField::Moves, 10).await.unwrap();
        let theirs = racing.claim(&card, CardField::Moves).await.unwrap();
        assert_eq!(theirs.attempt(), 1);
        racing.release(theirs, "crop failed").await.unwrap();

        let ours = lagging.claim(&snapshot[0], CardField::Moves).await.unwrap();
        assert_eq!(snapshot[0].attempts(CardField::Moves), 0);
        assert_eq!(ours.attempt(), 2);
        lagging.release(ours, "crop failed").await.unwrap();

        let stored = ctx.cards().get(&card.id).await.unwrap().unwrap();
        assert_eq!(stored.attempts(CardField::Moves), 2);
    }
}
