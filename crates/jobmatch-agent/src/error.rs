//! Error types for the retrieval agent.

use jobmatch_core::error::MatchError;
use serde::{Deserialize, Serialize};

/// Errors from the retrieval agent.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("query cannot be empty")]
    EmptyQuery,
    #[error("search error: {0}")]
    Search(String),
    #[error("rewrite error: {0}")]
    Rewrite(String),
    #[error("lexical search error: {0}")]
    Lexical(String),
    #[error("session error: {0}")]
    Session(String),
}

impl AgentError {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            AgentError::EmptyQuery => "empty_query",
            AgentError::Search(_) => "search_failed",
            AgentError::Rewrite(_) => "rewrite_failed",
            AgentError::Lexical(_) => "lexical_failed",
            AgentError::Session(_) => "session_failed",
        }
    }

    /// Structured error value returned to callers instead of a failure.
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: self.code().to_string(),
            message: self.to_string(),
        }
    }
}

impl From<MatchError> for AgentError {
    fn from(err: MatchError) -> Self {
        AgentError::Search(err.to_string())
    }
}

/// JSON error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g. "empty_query").
    pub error: String,
    /// Human-readable error message.
    pub message: String,
}
