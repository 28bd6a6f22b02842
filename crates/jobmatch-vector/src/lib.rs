//! Vector side of the matching backend: the exact-similarity store, the
//! embedding providers, text projection of entities and the matching
//! service that composes them.

pub mod embedding;
pub mod index;
pub mod matching;
pub mod projection;

pub use embedding::{DynEmbeddingService, EmbeddingService, MockEmbedding, OnnxEmbeddingService, StaticEmbedding};
pub use index::{CollectionState, FlatIndex, IndexStats, VectorStore};
pub use matching::{MatchingService, MatchingStats};
pub use projection::{project, project_candidate, project_job_offer};
