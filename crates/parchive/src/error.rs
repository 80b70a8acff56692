//! Error and Result types for parameter archive operations.

use std::io;
use thiserror::Error;

/// A convenience `Result` type for archive operations.
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// The error type for archive encoding, merging and backfilling.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Invalid or missing configuration. Fatal at construction.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Configuration document could not be parsed.
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// A caller-built value is out of range.
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Truncated or malformed encoded bytes.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A tuple lacks the merge key column or carries a key of another type.
    #[error("Malformed tuple: merge column '{column}' missing or of incompatible type")]
    MalformedTuple {
        /// Name of the merge key column.
        column: String,
    },

    /// A backfill task failed; the scheduler keeps running.
    #[error("Fill task failed: {0}")]
    TaskFailed(String),

    /// A backfill task was intentionally aborted.
    #[error("Fill task aborted")]
    Aborted,

    /// Error reported by the replay provider.
    #[error("Replay error: {0}")]
    Replay(String),

    /// Error reported by a segment writer or segment store.
    #[error("Segment writer error: {0}")]
    Writer(String),

    /// Operation not allowed in the current scheduler state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The scheduler worker was cancelled before the request completed.
    #[error("Backfill scheduler stopped")]
    SchedulerStopped,

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
}
