//! Work queue error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkQueueError {
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("Field already claimed by another worker")]
    AlreadyClaimed,
    /// The claim expired and was reassigned before the outcome was written.
    #[error("Claim no longer held by this worker")]
    ClaimLost,
    #[error("Store call '{0}' timed out")]
    Timeout(&'static str),
    #[error("{0}")]
    Other(String),
}
