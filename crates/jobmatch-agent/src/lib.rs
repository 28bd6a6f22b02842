//! Conversational retrieval for the job board.
//!
//! Turns a free-text query into a ranked list of job offers or candidates:
//! target detection, keyword extraction, optional LLM rewriting, vector and
//! lexical search, score fusion and per-session memory.

pub mod error;
pub mod fusion;
pub mod intent;
pub mod keywords;
pub mod lexical;
pub mod orchestrator;
pub mod rewriter;
pub mod session;

pub use error::{AgentError, ErrorBody};
pub use fusion::{fuse, FusionWeights};
pub use intent::detect_target;
pub use keywords::extract_keywords;
pub use lexical::{ElasticsearchLexical, LexicalSearch};
pub use orchestrator::{AskRequest, AskResponse, MatchSources, RetrievalAgent};
pub use rewriter::{ChatCompletionRewriter, QueryRewriter};
pub use session::{Role, SessionMemory, Turn};
