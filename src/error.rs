use std::path::PathBuf;
use thiserror::Error;

/// Failures of a history merge.
///
/// A history file that is not valid JSON is not represented here: the store
/// recovers from it with an empty document and reports it through
/// [`crate::history::Loaded::recovered`]. Valid JSON of the wrong shape is a
/// [`HistoryError::Decode`] and leaves the file untouched.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("malformed event #{index} for user {user}: missing or invalid `{field}`")]
    MalformedEvent {
        user: String,
        index: usize,
        field: &'static str,
    },

    #[error("failed to create data directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not a history document: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode history document: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to format timestamp: {0}")]
    Timestamp(#[from] time::error::Format),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to rename {from} to {to}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl HistoryError {
    /// True for errors caused by the caller's payload rather than storage.
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::InvalidPayload(_) | Self::MalformedEvent { .. })
    }
}
