//! Error taxonomy shared by every public notegraph operation.

use thiserror::Error;

use crate::model::note::NoteId;

/// Failure returned by store, service and provider operations.
///
/// Vector math never produces one of these: a malformed vector scores 0 instead
/// so that a single bad record cannot abort a computation over many notes.
#[derive(Debug, Error)]
pub enum NoteError {
    /// The embedding provider was unreachable or returned a malformed response.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// The operation referenced a note id that does not exist.
    #[error("note {0} not found")]
    NotFound(NoteId),

    /// The persistence layer rejected a read or write.
    #[error("storage error: {0}")]
    Storage(String),

    /// Empty content, a dimension mismatch or an unparsable embedding.
    #[error("invalid input: {0}")]
    Validation(String),
}

impl NoteError {
    /// Stable, machine-readable tag for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Embedding(_) => "embedding",
            Self::NotFound(_) => "not_found",
            Self::Storage(_) => "storage",
            Self::Validation(_) => "validation",
        }
    }
}

impl From<std::io::Error> for NoteError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for NoteError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

pub type NoteResult<T> = Result<T, NoteError>;
