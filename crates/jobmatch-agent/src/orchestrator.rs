//! Retrieval agent: free-text query in, fused ranking out.
//!
//! Wires target detection, keyword extraction, the optional rewriter, vector
//! search through the matching service, the optional lexical engine, score
//! fusion and session memory.

use std::sync::Arc;
use std::time::Duration;

use jobmatch_core::config::MatchConfig;
use jobmatch_core::types::{EntityKind, ScoredId};
use jobmatch_vector::matching::MatchingService;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::AgentError;
use crate::fusion::{fuse, FusionWeights};
use crate::intent::detect_target;
use crate::keywords::extract_keywords;
use crate::lexical::{ElasticsearchLexical, LexicalSearch};
use crate::rewriter::{ChatCompletionRewriter, QueryRewriter};
use crate::session::{Role, SessionMemory};

const DEFAULT_TOP_K: usize = 10;
const DEFAULT_MAX_TOP_K: usize = 100;
const DEFAULT_COLLABORATOR_TIMEOUT: Duration = Duration::from_secs(30);

/// A free-text retrieval request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AskRequest {
    /// The user's query in natural language.
    pub query: String,
    /// Session whose memory records this exchange.
    pub session_id: Option<String>,
    /// Number of results; falls back to the configured default.
    pub top_k: Option<usize>,
    /// `"jobs"` or `"candidates"`; anything else triggers detection.
    pub target: Option<String>,
    /// Extra text steering the search (e.g. a candidate summary).
    pub context: Option<String>,
}

impl AskRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }
}

/// Per-source rankings, before fusion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchSources {
    pub vector: Vec<ScoredId>,
    pub lexical: Vec<ScoredId>,
}

/// Result of a retrieval request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AskResponse {
    pub target: EntityKind,
    pub query: String,
    pub reformulated: Option<String>,
    pub keywords: Vec<String>,
    pub matches: Vec<ScoredId>,
    pub top_k: usize,
    pub sources: MatchSources,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_len: Option<usize>,
}

/// Hybrid retrieval over the matching service and optional collaborators.
///
/// Collaborator capabilities are fixed at construction; `rewrite_enabled`
/// and `lexical_enabled` report them.
pub struct RetrievalAgent {
    matching: Arc<MatchingService>,
    rewriter: Option<Arc<dyn QueryRewriter>>,
    lexical: Option<Arc<dyn LexicalSearch>>,
    memory: SessionMemory,
    weights: FusionWeights,
    default_top_k: usize,
    max_top_k: usize,
    rewrite_timeout: Duration,
    lexical_timeout: Duration,
}

impl RetrievalAgent {
    /// Vector-only agent with default weights and session limits.
    pub fn new(matching: Arc<MatchingService>) -> Self {
        Self {
            matching,
            rewriter: None,
            lexical: None,
            memory: SessionMemory::default(),
            weights: FusionWeights::default(),
            default_top_k: DEFAULT_TOP_K,
            max_top_k: DEFAULT_MAX_TOP_K,
            rewrite_timeout: DEFAULT_COLLABORATOR_TIMEOUT,
            lexical_timeout: DEFAULT_COLLABORATOR_TIMEOUT,
        }
    }

    /// Build an agent from configuration, creating the HTTP collaborators
    /// that are configured.
    pub fn from_config(config: &MatchConfig, matching: Arc<MatchingService>) -> Result<Self, AgentError> {
        let mut agent = Self::new(matching)
            .with_weights(FusionWeights::from(&config.fusion))
            .with_memory(SessionMemory::new(&config.session))
            .with_top_k(config.fusion.default_top_k, config.fusion.max_top_k);
        agent.rewrite_timeout = Duration::from_millis(config.rewriter.timeout_ms);
        agent.lexical_timeout = Duration::from_millis(config.lexical.timeout_ms);

        if let Some(rewriter) = ChatCompletionRewriter::from_config(&config.rewriter)? {
            agent = agent.with_rewriter(Arc::new(rewriter));
        }
        if let Some(lexical) = ElasticsearchLexical::from_config(&config.lexical)? {
            agent = agent.with_lexical(Arc::new(lexical));
        }

        info!(
            rewrite = agent.rewrite_enabled(),
            lexical = agent.lexical_enabled(),
            "Retrieval agent ready"
        );
        Ok(agent)
    }

    pub fn with_rewriter(mut self, rewriter: Arc<dyn QueryRewriter>) -> Self {
        self.rewriter = Some(rewriter);
        self
    }

    pub fn with_lexical(mut self, lexical: Arc<dyn LexicalSearch>) -> Self {
        self.lexical = Some(lexical);
        self
    }

    pub fn with_weights(mut self, weights: FusionWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_memory(mut self, memory: SessionMemory) -> Self {
        self.memory = memory;
        self
    }

    /// Default and maximum number of results per request.
    pub fn with_top_k(mut self, default_top_k: usize, max_top_k: usize) -> Self {
        self.max_top_k = max_top_k.max(1);
        self.default_top_k = default_top_k.clamp(1, self.max_top_k);
        self
    }

    pub fn rewrite_enabled(&self) -> bool {
        self.rewriter.is_some()
    }

    pub fn lexical_enabled(&self) -> bool {
        self.lexical.is_some()
    }

    pub fn memory(&self) -> &SessionMemory {
        &self.memory
    }

    /// Run one retrieval request.
    ///
    /// A blank query is rejected before any collaborator is called. Rewrite
    /// and lexical failures degrade silently to the original query and the
    /// vector-only ranking; a vector search failure is an error.
    pub async fn ask(&self, request: &AskRequest) -> Result<AskResponse, AgentError> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(AgentError::EmptyQuery);
        }

        let session_id = request.session_id.as_deref().filter(|s| !s.is_empty());
        if let Some(sid) = session_id {
            self.memory.add_turn(sid, Role::User, query)?;
        }

        let target = detect_target(query, request.target.as_deref());
        let keywords = extract_keywords(query);
        let top_k = match request.top_k {
            Some(k) if k > 0 => k.min(self.max_top_k),
            _ => self.default_top_k,
        };

        let reformulated = self.rewrite(query, target).await;
        let enriched = enrich(
            reformulated.as_deref().unwrap_or(query),
            &keywords,
            request.context.as_deref(),
        );

        let collection = self.matching.collection_for(target).to_string();
        let (vector_hits, lexical_hits) = tokio::join!(
            self.matching.search_text(&collection, &enriched, top_k),
            self.lexical_search(&collection, &enriched, top_k),
        );
        let vector_hits = vector_hits?;

        let matches = fuse(&vector_hits, &lexical_hits, self.weights, top_k);
        info!(
            search_target = %target,
            vector = vector_hits.len(),
            lexical = lexical_hits.len(),
            matches = matches.len(),
            "Answered query"
        );

        let history_len = match session_id {
            Some(sid) => {
                let summary = format!("{}:{} results", target, matches.len());
                Some(self.memory.add_turn(sid, Role::Assistant, &summary)?)
            }
            None => None,
        };

        Ok(AskResponse {
            target,
            query: query.to_string(),
            reformulated,
            keywords,
            matches,
            top_k,
            sources: MatchSources {
                vector: vector_hits,
                lexical: lexical_hits.into_iter().take(top_k).collect(),
            },
            history_len,
        })
    }

    /// Drop idle sessions every `every` until the returned task is aborted.
    pub fn spawn_session_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                match self.memory.purge_expired() {
                    Ok(0) => {}
                    Ok(purged) => debug!(
                        purged,
                        remaining = self.memory.session_count(),
                        "Purged idle sessions"
                    ),
                    Err(e) => warn!(error = %e, "Session sweep failed"),
                }
            }
        })
    }

    /// Like [`ask`](Self::ask), but always returns JSON: the response on
    /// success, an error body otherwise.
    pub async fn ask_json(&self, request: &AskRequest) -> serde_json::Value {
        let result = match self.ask(request).await {
            Ok(response) => serde_json::to_value(&response),
            Err(e) => {
                warn!(error = %e, "Query failed");
                serde_json::to_value(e.to_body())
            }
        };
        result.unwrap_or_else(|e| {
            serde_json::json!({ "error": "serialization_failed", "message": e.to_string() })
        })
    }

    async fn rewrite(&self, query: &str, target: EntityKind) -> Option<String> {
        let rewriter = self.rewriter.as_ref()?;
        match tokio::time::timeout(self.rewrite_timeout, rewriter.rewrite(query, target)).await {
            Ok(Ok(rewritten)) => Some(rewritten),
            Ok(Err(e)) => {
                warn!(error = %e, "Query rewrite failed, using original query");
                None
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.rewrite_timeout.as_millis() as u64,
                    "Query rewrite timed out, using original query"
                );
                None
            }
        }
    }

    async fn lexical_search(&self, collection: &str, text: &str, size: usize) -> Vec<ScoredId> {
        let Some(lexical) = self.lexical.as_ref() else {
            return Vec::new();
        };
        match tokio::time::timeout(self.lexical_timeout, lexical.search(collection, text, size)).await {
            Ok(Ok(hits)) => hits,
            Ok(Err(e)) => {
                warn!(collection, error = %e, "Lexical search failed, using vector ranking only");
                Vec::new()
            }
            Err(_) => {
                warn!(collection, "Lexical search timed out, using vector ranking only");
                Vec::new()
            }
        }
    }
}

/// Query text plus the keyword and context lines.
fn enrich(base: &str, keywords: &[String], context: Option<&str>) -> String {
    let mut enriched = base.to_string();
    if !keywords.is_empty() {
        enriched.push_str("\nKeywords: ");
        enriched.push_str(&keywords.join(", "));
    }
    if let Some(context) = context.map(str::trim).filter(|c| !c.is_empty()) {
        enriched.push_str("\nContext: ");
        enriched.push_str(context);
    }
    enriched
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use jobmatch_vector::embedding::StaticEmbedding;
    use jobmatch_vector::index::VectorStore;

    #[derive(Default)]
    struct CountingRewriter {
        calls: AtomicUsize,
        reply: Option<String>,
    }

    #[async_trait]
    impl QueryRewriter for CountingRewriter {
        async fn rewrite(&self, _query: &str, _target: EntityKind) -> Result<String, AgentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply
                .clone()
                .ok_or_else(|| AgentError::Rewrite("quota exceeded".into()))
        }
    }

    #[derive(Default)]
    struct CountingLexical {
        calls: AtomicUsize,
        hits: Option<Vec<ScoredId>>,
    }

    #[async_trait]
    impl LexicalSearch for CountingLexical {
        async fn search(
            &self,
            _collection: &str,
            _query: &str,
            _size: usize,
        ) -> Result<Vec<ScoredId>, AgentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.hits
                .clone()
                .ok_or_else(|| AgentError::Lexical("connection refused".into()))
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        embedder: Arc<StaticEmbedding>,
        matching: Arc<MatchingService>,
    }

    /// Job offers "a" → [1,0] and "b" → [0,1]; every query embeds to [1,0]
    /// unless `table` maps it elsewhere.
    fn fixture(table: &[(&str, Vec<f32>)]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut embedder = StaticEmbedding::new(2).with_fallback(vec![1.0, 0.0]);
        for (text, vector) in table {
            embedder = embedder.with(*text, vector.clone());
        }
        let embedder = Arc::new(embedder);
        let store = Arc::new(VectorStore::open(dir.path(), 2).unwrap());
        store
            .upsert(
                "job_offers",
                &["a".to_string(), "b".to_string()],
                &[vec![1.0, 0.0], vec![0.0, 1.0]],
            )
            .unwrap();
        let matching = Arc::new(MatchingService::new(store, embedder.clone()).unwrap());
        Fixture {
            _dir: dir,
            embedder,
            matching,
        }
    }

    #[tokio::test]
    async fn test_empty_query_rejected_without_collaborator_calls() {
        let fx = fixture(&[]);
        let rewriter = Arc::new(CountingRewriter {
            reply: Some("x".into()),
            ..Default::default()
        });
        let lexical = Arc::new(CountingLexical {
            hits: Some(vec![]),
            ..Default::default()
        });
        let agent = RetrievalAgent::new(fx.matching.clone())
            .with_rewriter(rewriter.clone())
            .with_lexical(lexical.clone());

        let mut request = AskRequest::new("   \n ");
        request.session_id = Some("s1".into());
        let err = agent.ask(&request).await.unwrap_err();

        assert!(matches!(err, AgentError::EmptyQuery));
        assert_eq!(rewriter.calls.load(Ordering::SeqCst), 0);
        assert_eq!(lexical.calls.load(Ordering::SeqCst), 0);
        assert_eq!(fx.embedder.calls(), 0);
        assert_eq!(agent.memory().len("s1").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_vector_only_response() {
        let fx = fixture(&[]);
        let agent = RetrievalAgent::new(fx.matching.clone());
        assert!(!agent.rewrite_enabled());
        assert!(!agent.lexical_enabled());

        let response = agent.ask(&AskRequest::new("offres rust")).await.unwrap();
        assert_eq!(response.target, EntityKind::JobOffer);
        assert_eq!(response.keywords, vec!["offres", "rust"]);
        assert_eq!(response.reformulated, None);
        assert_eq!(response.top_k, 10);
        assert_eq!(response.matches[0].id, "a");
        assert_eq!(response.matches, response.sources.vector);
        assert!(response.sources.lexical.is_empty());
        assert_eq!(response.history_len, None);
    }

    #[tokio::test]
    async fn test_lexical_results_are_fused() {
        let fx = fixture(&[]);
        let lexical = Arc::new(CountingLexical {
            hits: Some(vec![ScoredId::new("b", 2.0), ScoredId::new("z", 1.0)]),
            ..Default::default()
        });
        let agent = RetrievalAgent::new(fx.matching.clone()).with_lexical(lexical.clone());

        let response = agent.ask(&AskRequest::new("jobs")).await.unwrap();
        assert_eq!(lexical.calls.load(Ordering::SeqCst), 1);

        let score = |id: &str| {
            response
                .matches
                .iter()
                .find(|m| m.id == id)
                .map(|m| m.score)
                .unwrap()
        };
        assert!((score("a") - 1.0).abs() < 1e-6);
        assert!((score("b") - (0.6 * 0.0 + 0.4 * 2.0)).abs() < 1e-6);
        assert!((score("z") - 0.4).abs() < 1e-6);
        let ids: Vec<&str> = response.matches.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "z"]);
    }

    #[tokio::test]
    async fn test_lexical_failure_keeps_vector_ranking() {
        let fx = fixture(&[]);
        let lexical = Arc::new(CountingLexical::default());
        let agent = RetrievalAgent::new(fx.matching.clone()).with_lexical(lexical.clone());

        let response = agent.ask(&AskRequest::new("jobs")).await.unwrap();
        assert_eq!(lexical.calls.load(Ordering::SeqCst), 1);
        assert_eq!(response.matches, response.sources.vector);
        assert!(response.sources.lexical.is_empty());
    }

    #[tokio::test]
    async fn test_rewritten_query_drives_vector_search() {
        // Only the rewritten, enriched text points at offer "b".
        let fx = fixture(&[(
            "Night shift nurse\nKeywords: nurse, nights",
            vec![0.0, 1.0],
        )]);
        let rewriter = Arc::new(CountingRewriter {
            reply: Some("Night shift nurse".into()),
            ..Default::default()
        });
        let agent = RetrievalAgent::new(fx.matching.clone()).with_rewriter(rewriter.clone());

        let response = agent.ask(&AskRequest::new("nurse nights")).await.unwrap();
        assert_eq!(response.reformulated.as_deref(), Some("Night shift nurse"));
        assert_eq!(response.matches[0].id, "b");
        assert_eq!(rewriter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rewrite_failure_falls_back_to_original() {
        let fx = fixture(&[]);
        let rewriter = Arc::new(CountingRewriter::default());
        let agent = RetrievalAgent::new(fx.matching.clone()).with_rewriter(rewriter.clone());

        let response = agent.ask(&AskRequest::new("welder")).await.unwrap();
        assert_eq!(response.reformulated, None);
        assert_eq!(response.matches[0].id, "a");
        assert_eq!(rewriter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_session_memory_records_turns() {
        let fx = fixture(&[]);
        let agent = RetrievalAgent::new(fx.matching.clone());

        let mut request = AskRequest::new("jobs in Lyon");
        request.session_id = Some("abc".into());
        let first = agent.ask(&request).await.unwrap();
        assert_eq!(first.history_len, Some(2));
        let second = agent.ask(&request).await.unwrap();
        assert_eq!(second.history_len, Some(4));

        let history = agent.memory().history("abc").unwrap();
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].content, "jobs in Lyon");
        assert_eq!(history[1].content, "jobs:2 results");
    }

    #[tokio::test]
    async fn test_top_k_defaults_and_cap() {
        let fx = fixture(&[]);
        let agent = RetrievalAgent::new(fx.matching.clone()).with_top_k(1, 5);

        let response = agent.ask(&AskRequest::new("jobs")).await.unwrap();
        assert_eq!(response.top_k, 1);
        assert_eq!(response.matches.len(), 1);

        let mut request = AskRequest::new("jobs");
        request.top_k = Some(500);
        let response = agent.ask(&request).await.unwrap();
        assert_eq!(response.top_k, 5);
        assert_eq!(response.matches.len(), 2);
    }

    #[tokio::test]
    async fn test_explicit_target_and_missing_collection() {
        let fx = fixture(&[]);
        let agent = RetrievalAgent::new(fx.matching.clone());
        let mut request = AskRequest::new("jobs");
        request.target = Some("candidates".into());

        let response = agent.ask(&request).await.unwrap();
        assert_eq!(response.target, EntityKind::Candidate);
        assert!(response.matches.is_empty());
    }

    #[tokio::test]
    async fn test_ask_json_renders_errors() {
        let fx = fixture(&[]);
        let agent = RetrievalAgent::new(fx.matching.clone());

        let json = agent.ask_json(&AskRequest::new("")).await;
        assert_eq!(json["error"], "empty_query");

        fx.embedder.set_failing(true);
        let json = agent.ask_json(&AskRequest::new("jobs")).await;
        assert_eq!(json["error"], "search_failed");

        fx.embedder.set_failing(false);
        let json = agent.ask_json(&AskRequest::new("jobs")).await;
        assert_eq!(json["target"], "jobs");
        assert!(json.get("history_len").is_none());
    }

    #[tokio::test]
    async fn test_session_sweeper_drops_idle_sessions() {
        let fx = fixture(&[]);
        let memory = SessionMemory::new(&jobmatch_core::config::SessionConfig {
            max_turns: 50,
            idle_timeout_minutes: 5,
            max_sessions: 0,
        });
        let agent = Arc::new(RetrievalAgent::new(fx.matching.clone()).with_memory(memory));
        let stale = chrono::Utc::now() - chrono::Duration::hours(1);
        agent.memory().add_turn_at("idle", Role::User, "old query", stale).unwrap();
        agent.memory().add_turn("live", Role::User, "new query").unwrap();

        let sweeper = Arc::clone(&agent).spawn_session_sweeper(Duration::from_millis(10));
        for _ in 0..100 {
            if agent.memory().session_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        sweeper.abort();

        assert_eq!(agent.memory().session_count(), 1);
        assert_eq!(agent.memory().len("live").unwrap(), 1);
    }

    #[test]
    fn test_enrich() {
        assert_eq!(enrich("q", &[], None), "q");
        assert_eq!(
            enrich("q", &["rust".into(), "lyon".into()], Some("  senior profile ")),
            "q\nKeywords: rust, lyon\nContext: senior profile"
        );
        assert_eq!(enrich("q", &[], Some("   ")), "q");
    }
}
