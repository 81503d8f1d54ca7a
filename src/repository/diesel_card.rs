//! Diesel-based card repository.
//!
//! Cards live in `cards`; each of their extraction fields is a row in
//! `card_fields` keyed by `(card_id, field)`. Every write below touches
//! exactly one field row, and the claim/commit updates are conditional on
//! the row's current status so that a field has a single writer at a time.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};

use super::diesel_models::{CardFieldRecord, CardRecord, NewCard, NewCardField};
use super::diesel_pool::{AsyncSqliteConnection, AsyncSqlitePool, DieselError};
use super::util::{format_timestamp, parse_datetime};
use crate::models::{Card, CardField, FieldSlot, FieldStatus};
use crate::schema::{card_fields, cards};

/// Number of field rows in one status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldStatusCount {
    pub field: CardField,
    pub status: FieldStatus,
    pub count: u64,
}

fn slot_from_record(record: &CardFieldRecord) -> Option<(CardField, FieldSlot)> {
    let Some(field) = CardField::from_str(&record.field) else {
        tracing::warn!(card_id = %record.card_id, field = %record.field, "Ignoring unknown field row");
        return None;
    };
    let status = FieldStatus::from_str(&record.status).unwrap_or(FieldStatus::Pending);
    Some((
        field,
        FieldSlot {
            status,
            value: record.value.clone(),
            attempts: record.attempts.max(0) as u32,
            last_error: record.last_error.clone(),
            updated_at: parse_datetime(&record.updated_at),
        },
    ))
}

fn assemble(record: CardRecord, fields: &[CardFieldRecord]) -> Card {
    let created_at = parse_datetime(&record.created_at);
    let mut card = Card {
        id: record.id,
        filename: record.filename,
        source_image_path: PathBuf::from(record.source_image_path),
        created_at,
        fields: CardField::ALL
            .iter()
            .map(|field| (*field, FieldSlot::pending(created_at)))
            .collect(),
    };
    for (field, slot) in fields.iter().filter_map(slot_from_record) {
        card.fields.insert(field, slot);
    }
    card
}

async fn load_fields(
    conn: &mut AsyncSqliteConnection,
    ids: &[String],
) -> Result<HashMap<String, Vec<CardFieldRecord>>, DieselError> {
    let records = card_fields::table
        .filter(card_fields::card_id.eq_any(ids))
        .select(CardFieldRecord::as_select())
        .load::<CardFieldRecord>(conn)
        .await?;

    let mut by_card: HashMap<String, Vec<CardFieldRecord>> = HashMap::new();
    for record in records {
        by_card
            .entry(record.card_id.clone())
            .or_default()
            .push(record);
    }
    Ok(by_card)
}

/// Diesel-based card repository with compile-time query checking.
#[derive(Clone)]
pub struct DieselCardRepository {
    pool: AsyncSqlitePool,
}

impl DieselCardRepository {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a card and all of its field rows in one transaction.
    pub async fn create(&self, card: &Card) -> Result<(), DieselError> {
        let new_card = NewCard {
            id: card.id.clone(),
            filename: card.filename.clone(),
            source_image_path: card.source_image_path.display().to_string(),
            created_at: format_timestamp(card.created_at),
        };
        let new_fields: Vec<NewCardField> = CardField::ALL
            .iter()
            .map(|field| {
                let slot = card.slot(*field);
                NewCardField {
                    card_id: card.id.clone(),
                    field: field.as_str().to_string(),
                    status: slot
                        .map(|s| s.status)
                        .unwrap_or(FieldStatus::Pending)
                        .as_str()
                        .to_string(),
                    attempts: 0,
                    updated_at: format_timestamp(card.created_at),
                }
            })
            .collect();

        let mut conn = self.pool.get().await?;
        let result: Result<(), DieselError> = conn
            .transaction(|conn| {
                Box::pin(async move {
                    diesel::insert_into(cards::table)
                        .values(&new_card)
                        .execute(conn)
                        .await?;
                    for row in &new_fields {
                        diesel::insert_into(card_fields::table)
                            .values(row)
                            .execute(conn)
                            .await?;
                    }
                    Ok(())
                })
            })
            .await;
        result
    }

    /// Get a card by ID.
    pub async fn get(&self, id: &str) -> Result<Option<Card>, DieselError> {
        let mut conn = self.pool.get().await?;

        let record = cards::table
            .find(id)
            .select(CardRecord::as_select())
            .first::<CardRecord>(&mut conn)
            .await
            .optional()?;

        let Some(record) = record else {
            return Ok(None);
        };
        let mut fields = load_fields(&mut conn, std::slice::from_ref(&record.id)).await?;
        let rows = fields.remove(&record.id).unwrap_or_default();
        Ok(Some(assemble(record, &rows)))
    }

    /// Cards whose `field` is still pending.
    ///
    /// Ordered by attempts first so cards that keep failing sort behind
    /// fresh ones and cannot starve them when the batch is limited.
    pub async fn get_pending(
        &self,
        field: CardField,
        limit: usize,
    ) -> Result<Vec<Card>, DieselError> {
        let mut conn = self.pool.get().await?;

        let records = cards::table
            .inner_join(card_fields::table)
            .filter(card_fields::field.eq(field.as_str()))
            .filter(card_fields::status.eq(FieldStatus::Pending.as_str()))
            .order((
                card_fields::attempts.asc(),
                cards::created_at.asc(),
                cards::id.asc(),
            ))
            .limit(limit as i64)
            .select(CardRecord::as_select())
            .load::<CardRecord>(&mut conn)
            .await?;

        if records.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        let mut fields = load_fields(&mut conn, &ids).await?;

        Ok(records
            .into_iter()
            .map(|record| {
                let rows = fields.remove(&record.id).unwrap_or_default();
                assemble(record, &rows)
            })
            .collect())
    }

    /// Atomically move a pending field to in-progress for `worker_id`.
    ///
    /// Returns the field's stored attempt count including this claim, or
    /// `None` when the field was not pending (another worker holds it, or it
    /// is already done).
    pub async fn claim_field(
        &self,
        card_id: &str,
        field: CardField,
        worker_id: &str,
    ) -> Result<Option<u32>, DieselError> {
        let now = format_timestamp(Utc::now());
        let mut conn = self.pool.get().await?;

        let claimed: Result<Option<u32>, DieselError> = conn
            .transaction(|conn| {
                Box::pin(async move {
                    let rows = diesel::update(
                        card_fields::table
                            .filter(card_fields::card_id.eq(card_id))
                            .filter(card_fields::field.eq(field.as_str()))
                            .filter(card_fields::status.eq(FieldStatus::Pending.as_str())),
                    )
                    .set((
                        card_fields::status.eq(FieldStatus::InProgress.as_str()),
                        card_fields::claimed_by.eq(Some(worker_id)),
                        card_fields::claimed_at.eq(Some(&now)),
                        card_fields::attempts.eq(card_fields::attempts + 1),
                        card_fields::updated_at.eq(&now),
                    ))
                    .execute(conn)
                    .await?;
                    if rows != 1 {
                        return Ok(None);
                    }

                    let attempts: i32 = card_fields::table
                        .filter(card_fields::card_id.eq(card_id))
                        .filter(card_fields::field.eq(field.as_str()))
                        .select(card_fields::attempts)
                        .first(conn)
                        .await?;
                    Ok(Some(attempts.max(0) as u32))
                })
            })
            .await;
        claimed
    }

    /// Commit the value of a claimed field. The field becomes done.
    pub async fn complete_field(
        &self,
        card_id: &str,
        field: CardField,
        worker_id: &str,
        value: &str,
    ) -> Result<bool, DieselError> {
        self.finish_claim(card_id, field, worker_id, FieldStatus::Done, Some(value), None)
            .await
    }

    /// Give a claimed field back so a later cycle retries it.
    pub async fn release_field(
        &self,
        card_id: &str,
        field: CardField,
        worker_id: &str,
        error: &str,
    ) -> Result<bool, DieselError> {
        self.finish_claim(
            card_id,
            field,
            worker_id,
            FieldStatus::Pending,
            None,
            Some(error),
        )
        .await
    }

    /// Mark a claimed field as terminally failed.
    pub async fn fail_field(
        &self,
        card_id: &str,
        field: CardField,
        worker_id: &str,
        error: &str,
    ) -> Result<bool, DieselError> {
        self.finish_claim(
            card_id,
            field,
            worker_id,
            FieldStatus::Failed,
            None,
            Some(error),
        )
        .await
    }

    /// Only succeeds while the row is still in progress under `worker_id`.
    async fn finish_claim(
        &self,
        card_id: &str,
        field: CardField,
        worker_id: &str,
        status: FieldStatus,
        value: Option<&str>,
        error: Option<&str>,
    ) -> Result<bool, DieselError> {
        let now = format_timestamp(Utc::now());
        let mut conn = self.pool.get().await?;

        let rows = diesel::update(
            card_fields::table
                .filter(card_fields::card_id.eq(card_id))
                .filter(card_fields::field.eq(field.as_str()))
                .filter(card_fields::status.eq(FieldStatus::InProgress.as_str()))
                .filter(card_fields::claimed_by.eq(worker_id)),
        )
        .set((
            card_fields::status.eq(status.as_str()),
            card_fields::value.eq(value),
            card_fields::claimed_by.eq(None::<&str>),
            card_fields::claimed_at.eq(None::<&str>),
            card_fields::last_error.eq(error),
            card_fields::updated_at.eq(&now),
        ))
        .execute(&mut conn)
        .await?;

        Ok(rows == 1)
    }

    /// Return claims older than `older_than` to pending.
    ///
    /// A worker that crashed or timed out mid-candidate leaves its field in
    /// progress; this is what eventually makes it retryable.
    pub async fn reclaim_stale(
        &self,
        field: CardField,
        older_than: Duration,
    ) -> Result<u64, DieselError> {
        let now = Utc::now();
        let age = chrono::Duration::from_std(older_than).unwrap_or_else(|_| chrono::Duration::zero());
        let cutoff = format_timestamp(now - age);
        let now = format_timestamp(now);
        let mut conn = self.pool.get().await?;

        let rows = diesel::update(
            card_fields::table
                .filter(card_fields::field.eq(field.as_str()))
                .filter(card_fields::status.eq(FieldStatus::InProgress.as_str()))
                .filter(card_fields::claimed_at.lt(&cutoff)),
        )
        .set((
            card_fields::status.eq(FieldStatus::Pending.as_str()),
            card_fields::claimed_by.eq(None::<&str>),
            card_fields::claimed_at.eq(None::<&str>),
            card_fields::updated_at.eq(&now),
        ))
        .execute(&mut conn)
        .await?;

        Ok(rows as u64)
    }

    /// Count all cards.
    pub async fn count(&self) -> Result<u64, DieselError> {
        let mut conn = self.pool.get().await?;
        let count: i64 = cards::table.count().get_result(&mut conn).await?;
        Ok(count as u64)
    }

    /// Count rows of `field` in `status`.
    pub async fn count_by_status(
        &self,
        field: CardField,
        status: FieldStatus,
    ) -> Result<u64, DieselError> {
        let mut conn = self.pool.get().await?;

        let count: i64 = card_fields::table
            .filter(card_fields::field.eq(field.as_str()))
            .filter(card_fields::status.eq(status.as_str()))
            .select(count_star())
            .first(&mut conn)
            .await?;

        Ok(count as u64)
    }

    /// Counts for every (field, status) pair that has at least one row.
    pub async fn status_counts(&self) -> Result<Vec<FieldStatusCount>, DieselError> {
        let mut conn = self.pool.get().await?;

        let rows: Vec<(String, String, i64)> = card_fields::table
            .group_by((card_fields::field, card_fields::status))
            .select((card_fields::field, card_fields::status, count_star()))
            .load::<(String, String, i64)>(&mut conn)
            .await?;

        let mut counts: Vec<FieldStatusCount> = rows
            .into_iter()
            .filter_map(|(field, status, count)| {
                Some(FieldStatusCount {
                    field: CardField::from_str(&field)?,
                    status: FieldStatus::from_str(&status)?,
                    count: count as u64,
                })
            })
            .collect();
        counts.sort_by_key(|c| (c.field, c.status.as_str()));
        Ok(counts)
    }

    /// Move failed rows of `field` back to pending with a fresh attempt count.
    pub async fn requeue_failed(&self, field: CardField) -> Result<u64, DieselError> {
        let now = format_timestamp(Utc::now());
        let mut conn = self.pool.get().await?;

        let rows = diesel::update(
            card_fields::table
                .filter(card_fields::field.eq(field.as_str()))
                .filter(card_fields::status.eq(FieldStatus::Failed.as_str())),
        )
        .set((
            card_fields::status.eq(FieldStatus::Pending.as_str()),
            card_fields::attempts.eq(0),
            card_fields::updated_at.eq(&now),
        ))
        .execute(&mut conn)
        .await?;

        Ok(rows as u64)
    }
}
