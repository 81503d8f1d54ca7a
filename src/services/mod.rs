//! Service layer for cardscan business logic.
//!
//! Services can be used by the CLI, the web server, or other interfaces.

pub mod ingest;

pub use ingest::{sanitize_filename, IngestError, IngestService};
