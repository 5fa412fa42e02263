use thiserror::Error;

/// Errors raised by job stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A job with this id is already stored.
    #[error("Job already exists: {id}")]
    Conflict { id: String },

    /// No job with the given id exists in the store.
    #[error("Job not found: {id}")]
    NotFound { id: String },

    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A persisted job state could not be turned back into a job.
    #[error("Cannot decode job {id}: {reason}")]
    Decode { id: String, reason: String },

    #[error("Cannot encode job state: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
