//! Error taxonomy for the processing server.
//!
//! `anyhow` is internal transport for wrapping a backing store's native error
//! (e.g. `sqlx::Error`); it never crosses a public trait boundary. Public trait
//! methods return [`StorageError`] so callers can match on retriability without
//! string inspection.

use uuid::Uuid;

/// Error surfaced by a [`crate::storage::Storage`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Connectivity hiccup, deadlock, or other condition expected to clear up.
    /// The caller should retry on its next iteration.
    #[error("transient storage failure: {0}")]
    Transient(#[source] anyhow::Error),

    /// Schema mismatch or other condition that will not clear up on its own.
    /// Surfaced by the `InfiniteRetryProcessor` wrapper, which logs and keeps
    /// retrying — an operator must intervene.
    #[error("permanent storage failure: {0}")]
    Permanent(#[source] anyhow::Error),

    /// The job referenced by id does not exist.
    #[error("job {0} not found")]
    NotFound(Uuid),
}

/// Outcome of attempting to execute a deserialized job.
#[derive(Debug, thiserror::Error)]
pub enum JobExecutionError {
    /// The invocation descriptor could not be reconstituted into a command.
    /// Always terminal: bytes are broken, retrying will not help.
    #[error("invocation could not be deserialized: {0}")]
    Deserialization(#[from] seesaw_core::job::DeserializationError),

    /// The reconstituted command ran and reported failure (or panicked).
    /// Routed through the retry policy.
    #[error("job execution failed: {0}")]
    Failed(#[source] anyhow::Error),
}
