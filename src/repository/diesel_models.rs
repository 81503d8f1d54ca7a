//! Diesel ORM models for database tables.

use diesel::prelude::*;

use crate::schema;

/// Card record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::cards)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CardRecord {
    pub id: String,
    pub filename: String,
    pub source_image_path: String,
    pub created_at: String,
}

/// New card for insertion.
#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = schema::cards)]
pub struct NewCard {
    pub id: String,
    pub filename: String,
    pub source_image_path: String,
    pub created_at: String,
}

/// Per-field extraction state from the database.
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = schema::card_fields)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CardFieldRecord {
    pub card_id: String,
    pub field: String,
    pub status: String,
    pub value: Option<String>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<String>,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub updated_at: String,
}

/// New field row for insertion. Fields always start pending.
#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = schema::card_fields)]
pub struct NewCardField {
    pub card_id: String,
    pub field: String,
    pub status: String,
    pub attempts: i32,
    pub updated_at: String,
}
