//! Repository layer for database persistence.
//!
//! All database access uses Diesel ORM with compile-time query checking
//! against SQLite.

pub mod diesel_card;
pub mod diesel_context;
pub mod diesel_models;
pub mod diesel_pool;

// Utilities
pub mod util;

pub use diesel_card::{DieselCardRepository, FieldStatusCount};
pub use diesel_context::DieselDbContext;
pub use diesel_pool::{AsyncSqlitePool, DieselError};
pub use util::{format_timestamp, parse_datetime};
