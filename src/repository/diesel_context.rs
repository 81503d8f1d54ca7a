//! Diesel database context for managing connections and repository access.
//!
//! This is the explicit store session: one context is built at startup by
//! each command and handed to the components that need the store.

use std::path::Path;

use diesel_async::SimpleAsyncConnection;

use super::diesel_card::DieselCardRepository;
use super::diesel_pool::{AsyncSqlitePool, DieselError};

/// Diesel database context that owns the connection factory and provides
/// repository access.
///
/// # Example
/// ```ignore
/// let ctx = DieselDbContext::from_url("cards.db");
/// ctx.init_schema().await?;
/// let card = ctx.cards().get(&id).await?;
/// ```
#[derive(Clone)]
pub struct DieselDbContext {
    pool: AsyncSqlitePool,
}

impl DieselDbContext {
    /// Create a new database context from a file path.
    pub fn new(db_path: &Path) -> Self {
        Self {
            pool: AsyncSqlitePool::from_path(db_path),
        }
    }

    /// Create a new database context from a database URL
    /// (`sqlite:path/to/db` or a plain file path).
    pub fn from_url(database_url: &str) -> Self {
        Self {
            pool: AsyncSqlitePool::new(database_url),
        }
    }

    pub fn pool(&self) -> &AsyncSqlitePool {
        &self.pool
    }

    /// Get a card repository.
    pub fn cards(&self) -> DieselCardRepository {
        DieselCardRepository::new(self.pool.clone())
    }

    /// Verify that a connection can be opened.
    pub async fn test_connection(&self) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;
        conn.batch_execute("SELECT 1").await
    }

    /// Create tables and indexes if they don't exist.
    pub async fn init_schema(&self) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;
        conn.batch_execute(
            r#"
            PRAGMA journal_mode = WAL;

            CREATE TABLE IF NOT EXISTS cards (
                id TEXT PRIMARY KEY NOT NULL,
                filename TEXT NOT NULL,
                source_image_path TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS card_fields (
                card_id TEXT NOT NULL,
                field TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                value TEXT,
                claimed_by TEXT,
                claimed_at TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (card_id, field),
                FOREIGN KEY (card_id) REFERENCES cards(id)
            );

            CREATE INDEX IF NOT EXISTS idx_card_fields_field_status
                ON card_fields(field, status);
            CREATE INDEX IF NOT EXISTS idx_cards_created_at
                ON cards(created_at);
            "#,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_init_schema_is_idempotent() {
        let dir = tempdir().unwrap();
        let ctx = DieselDbContext::new(&dir.path().join("cards.db"));

        ctx.init_schema().await.unwrap();
        ctx.init_schema().await.unwrap();
        ctx.test_connection().await.unwrap();
    }
}
