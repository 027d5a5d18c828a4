//! Failure taxonomy for the ingestion pipeline.
//!
//! Every failure is classified into one of the kinds below, each with a
//! fixed handling policy:
//!
//! | Kind | Policy |
//! |------|--------|
//! | [`IngestError::Config`] | Fatal at startup; process exits non-zero |
//! | [`IngestError::RepoNotFound`] | Warn, skip repository, continue |
//! | [`IngestError::FileRead`] / [`IngestError::FileTooLarge`] / [`IngestError::Decode`] | Record, skip file, continue |
//! | [`IngestError::Parse`] | Record, skip file, continue |
//! | [`IngestError::EmbedTransient`] | Retried with backoff; exhaustion becomes a batch failure |
//! | [`IngestError::EmbedFatal`] | Batch failure, no retry |
//! | [`IngestError::BatchFailed`] | Batch stores zero chunks; next batch proceeds |
//! | [`IngestError::VectorInvalid`] | Point dropped; batch proceeds with the rest |
//! | [`IngestError::UpsertFailed`] | Retried once, then recorded; other batches proceed |
//! | [`IngestError::CheckpointWrite`] | Warning only; the run never aborts on it |
//! | [`IngestError::Cancelled`] | Not an error: partial completion with a durable checkpoint |
//!
//! Only configuration errors are allowed to terminate the process.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classified pipeline error.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Missing or invalid configuration. The only fatal kind.
    #[error("configuration error in `{field}`: {message}")]
    Config { field: String, message: String },

    /// Repository directory does not exist on disk.
    #[error("repository not found on disk: {path}")]
    RepoNotFound { path: String },

    /// Filesystem read failure for a single file.
    #[error("failed to read {path}: {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// File exceeds the configured size budget.
    #[error("{path} is {size} bytes, over the {limit} byte limit")]
    FileTooLarge { path: String, size: u64, limit: u64 },

    /// File bytes are not valid UTF-8.
    #[error("{path} is not valid UTF-8")]
    Decode { path: String },

    /// A parser could not build a syntax tree for the file.
    #[error("parse failed for {path}: {message}")]
    Parse { path: String, message: String },

    /// Retryable embedding failure: timeout, connection error, 429, 5xx.
    #[error("transient embedding failure: {0}")]
    EmbedTransient(String),

    /// Non-retryable embedding failure: auth or any 4xx other than 429.
    #[error("fatal embedding failure: {0}")]
    EmbedFatal(String),

    /// A whole batch failed; storage was never called for it.
    #[error("batch {batch_id} ({file_range}) failed: {cause}")]
    BatchFailed {
        batch_id: usize,
        file_range: String,
        cause: String,
    },

    /// A returned vector had the wrong dimension or non-finite components.
    #[error("invalid vector for {chunk}: {reason}")]
    VectorInvalid { chunk: String, reason: String },

    /// The vector store rejected an upsert twice.
    #[error("upsert to `{collection}` failed: {message}")]
    UpsertFailed { collection: String, message: String },

    /// Checkpoint persistence failed; progress tracking continues in memory.
    #[error("checkpoint write failed: {0}")]
    CheckpointWrite(String),

    /// Cooperative cancellation was requested.
    #[error("ingestion cancelled")]
    Cancelled,
}

impl IngestError {
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether this error should terminate the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config { .. })
    }
}

/// User-facing error descriptor collected into the run statistics.
///
/// Carries the file path (or batch range) and a one-line cause; stack
/// traces never reach the summary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorRecord {
    /// File path or batch range the error applies to.
    pub path: String,
    /// Classified, human-readable cause.
    pub cause: String,
}

impl ErrorRecord {
    pub fn new(path: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            cause: cause.into(),
        }
    }
}

impl From<&IngestError> for ErrorRecord {
    fn from(err: &IngestError) -> Self {
        let path = match err {
            IngestError::RepoNotFound { path }
            | IngestError::FileRead { path, .. }
            | IngestError::FileTooLarge { path, .. }
            | IngestError::Decode { path }
            | IngestError::Parse { path, .. } => path.clone(),
            IngestError::BatchFailed { file_range, .. } => file_range.clone(),
            IngestError::VectorInvalid { chunk, .. } => chunk.clone(),
            IngestError::UpsertFailed { collection, .. } => collection.clone(),
            _ => String::new(),
        };
        Self {
            path,
            cause: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_config_errors_are_fatal() {
        assert!(IngestError::config("QDRANT_URL", "not set").is_fatal());
        assert!(!IngestError::EmbedTransient("timeout".into()).is_fatal());
        assert!(!IngestError::Cancelled.is_fatal());
    }

    #[test]
    fn error_record_carries_the_path() {
        let err = IngestError::Parse {
            path: "src/lib.rs".into(),
            message: "syntax error".into(),
        };
        let record = ErrorRecord::from(&err);
        assert_eq!(record.path, "src/lib.rs");
        assert!(record.cause.contains("syntax error"));
    }
}
