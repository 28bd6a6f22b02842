use thiserror::Error;

/// Top-level error type for the matching system.
///
/// The first three variants are the failure taxonomy. `InvalidInput` is
/// always rejected before any mutation happens; `CollaboratorUnavailable` and
/// `CorruptState` are folded into boolean or empty-result contracts at the
/// request boundary. Absent IDs are never an error: deletes report a zero
/// count and searches return fewer hits.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MatchError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Collaborator unavailable: {0}")]
    CollaboratorUnavailable(String),

    #[error("Corrupt state: {0}")]
    CorruptState(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Operation timed out after {millis} ms: {operation}")]
    Timeout { operation: String, millis: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl MatchError {
    /// True for failures of an outside dependency (embedding model, lexical
    /// engine, rewriter) as opposed to bad input or local state.
    pub fn is_collaborator_failure(&self) -> bool {
        matches!(
            self,
            MatchError::CollaboratorUnavailable(_)
                | MatchError::Embedding(_)
                | MatchError::Timeout { .. }
        )
    }
}

impl From<toml::de::Error> for MatchError {
    fn from(err: toml::de::Error) -> Self {
        MatchError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for MatchError {
    fn from(err: toml::ser::Error) -> Self {
        MatchError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for MatchError {
    fn from(err: serde_json::Error) -> Self {
        MatchError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for matching operations.
pub type Result<T> = std::result::Result<T, MatchError>;
