//! Card ingestion: store an uploaded image and create its pending card.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::models::Card;
use crate::repository::{DieselCardRepository, DieselError};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("No file provided")]
    MissingFile,

    #[error("Not a file: {}", .0.display())]
    NotFound(PathBuf),

    #[error("File save failed: {}: {source}", path.display())]
    Save {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Database insert failed: {0}")]
    Database(#[from] DieselError),
}

/// Reduce an uploaded filename to a safe single path component.
///
/// Directory parts are dropped and anything outside `[A-Za-z0-9._-]`
/// becomes `_`. Returns None when nothing usable is left.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Stores uploaded images under the upload dir and creates their cards.
#[derive(Clone)]
pub struct IngestService {
    repo: DieselCardRepository,
    upload_dir: PathBuf,
}

impl IngestService {
    pub fn new(repo: DieselCardRepository, upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo,
            upload_dir: upload_dir.into(),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Save `bytes` as `<upload_dir>/<card-id>-<filename>` and create the card.
    ///
    /// The saved file is removed again if the card cannot be created.
    pub async fn ingest_bytes(&self, filename: &str, bytes: &[u8]) -> Result<Card, IngestError> {
        let safe_name = sanitize_filename(filename).ok_or(IngestError::MissingFile)?;
        let id = uuid::Uuid::new_v4().to_string();
        let path = self.upload_dir.join(format!("{}-{}", id, safe_name));

        let save_error = |source| IngestError::Save {
            path: path.clone(),
            source,
        };
        tokio::fs::create_dir_all(&self.upload_dir)
            .await
            .map_err(save_error)?;
        tokio::fs::write(&path, bytes).await.map_err(save_error)?;

        let card = Card::with_id(id, filename.trim(), path.clone());
        if let Err(e) = self.repo.create(&card).await {
            if let Err(cleanup) = tokio::fs::remove_file(&path).await {
                tracing::warn!("Failed to remove {}: {}", path.display(), cleanup);
            }
            return Err(e.into());
        }

        info!(card_id = %card.id, filename = %card.filename, "Ingested card");
        Ok(card)
    }

    /// Ingest a local image file.
    pub async fn ingest_file(&self, path: &Path) -> Result<Card, IngestError> {
        if !path.is_file() {
            return Err(IngestError::NotFound(path.to_path_buf()));
        }
        let bytes = tokio::fs::read(path).await.map_err(|source| IngestError::Save {
            path: path.to_path_buf(),
            source,
        })?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.ingest_bytes(&filename, &bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CardField, FieldStatus};
    use crate::repository::DieselDbContext;
    use tempfile::tempdir;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("pikachu.png").as_deref(), Some("pikachu.png"));
        assert_eq!(
            sanitize_filename("../../etc/passwd").as_deref(),
            Some("passwd")
        );
        assert_eq!(
            sanitize_filename("C:\\scans\\mr mime.jpg").as_deref(),
            Some("mr_mime.jpg")
        );
        assert_eq!(sanitize_filename(".hidden").as_deref(), Some("hidden"));
        assert_eq!(sanitize_filename("  "), None);
        assert_eq!(sanitize_filename("dir/"), None);
    }

    #[tokio::test]
    async fn test_ingest_file_creates_pending_card() {
        let dir = tempdir().unwrap();
        let ctx = DieselDbContext::new(&dir.path().join("cards.db"));
        ctx.init_schema().await.unwrap();
        let service = IngestService::new(ctx.cards(), dir.path().join("uploads"));

        let source = dir.path().join("snorlax.png");
        std::fs::write(&source, b"image bytes").unwrap();
        let card = service.ingest_file(&source).await.unwrap();

        assert_eq!(card.filename, "snorlax.png");
        assert_eq!(
            card.source_image_path,
            dir.path()
                .join("uploads")
                .join(format!("{}-snorlax.png", card.id))
        );
        assert_eq!(std::fs::read(&card.source_image_path).unwrap(), b"image bytes");

        let stored = ctx.cards().get(&card.id).await.unwrap().unwrap();
        for field in CardField::ALL {
            assert_eq!(stored.status(field), FieldStatus::Pending);
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_rejected() {
        let dir = tempdir().unwrap();
        let ctx = DieselDbContext::new(&dir.path().join("cards.db"));
        ctx.init_schema().await.unwrap();
        let service = IngestService::new(ctx.cards(), dir.path().join("uploads"));

        let err = service
            .ingest_file(&dir.path().join("nope.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::NotFound(_)));

        let err = service.ingest_bytes("", b"data").await.unwrap_err();
        assert!(matches!(err, IngestError::MissingFile));
    }

    #[tokio::test]
    async fn test_failed_insert_removes_saved_file() {
        let dir = tempdir().unwrap();
        // No schema: the insert fails
        let ctx = DieselDbContext::new(&dir.path().join("cards.db"));
        let uploads = dir.path().join("uploads");
        let service = IngestService::new(ctx.cards(), &uploads);

        let err = service.ingest_bytes("a.png", b"data").await.unwrap_err();
        assert!(matches!(err, IngestError::Database(_)));
        assert_eq!(std::fs::read_dir(&uploads).unwrap().count(), 0);
    }
}
