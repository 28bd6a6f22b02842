//! Lexical (full-text) search through an Elasticsearch-compatible engine.
//!
//! Used as a secondary ranking signal next to vector search. Disabled when
//! no base URL is configured.

use std::time::Duration;

use async_trait::async_trait;
use jobmatch_core::config::LexicalConfig;
use jobmatch_core::types::ScoredId;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::AgentError;

/// Full-text search over one collection.
#[async_trait]
pub trait LexicalSearch: Send + Sync {
    async fn search(
        &self,
        collection: &str,
        query: &str,
        size: usize,
    ) -> Result<Vec<ScoredId>, AgentError>;
}

/// `multi_match` query over the entity text fields, titles and skills boosted.
pub fn build_text_query(text: &str) -> Value {
    json!({
        "multi_match": {
            "query": text,
            "fields": ["title^3", "description", "skills^2", "summary", "headline"],
            "type": "best_fields"
        }
    })
}

/// Turn a `_search` response body into scored IDs.
///
/// The ID comes from `_id`, falling back to `_source.id`; hits with neither
/// are skipped. A missing `_score` counts as 1.0.
pub fn parse_hits(body: &Value) -> Vec<ScoredId> {
    let hits = match body.pointer("/hits/hits").and_then(Value::as_array) {
        Some(hits) => hits,
        None => return Vec::new(),
    };

    hits.iter()
        .filter_map(|hit| {
            let id = id_string(hit.get("_id"))
                .or_else(|| id_string(hit.pointer("/_source/id")))?;
            let score = hit.get("_score").and_then(Value::as_f64).unwrap_or(1.0);
            Some(ScoredId::new(id, score as f32))
        })
        .collect()
}

fn id_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// HTTP client for an Elasticsearch `_search` endpoint.
#[derive(Debug, Clone)]
pub struct ElasticsearchLexical {
    client: reqwest::Client,
    base_url: String,
    credentials: Option<(String, String)>,
}

impl ElasticsearchLexical {
    /// Build a client from configuration, or `None` when no base URL is set.
    pub fn from_config(config: &LexicalConfig) -> Result<Option<Self>, AgentError> {
        if !config.is_enabled() {
            return Ok(None);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| AgentError::Lexical(format!("failed to build HTTP client: {}", e)))?;
        let credentials = if !config.username.is_empty() && !config.password.is_empty() {
            Some((config.username.clone(), config.password.clone()))
        } else {
            None
        };
        Ok(Some(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials,
        }))
    }
}

#[async_trait]
impl LexicalSearch for ElasticsearchLexical {
    async fn search(
        &self,
        collection: &str,
        query: &str,
        size: usize,
    ) -> Result<Vec<ScoredId>, AgentError> {
        let url = format!("{}/{}/_search", self.base_url, collection);
        let payload = json!({ "query": build_text_query(query), "size": size });

        let mut request = self.client.post(&url).json(&payload);
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, Some(password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| AgentError::Lexical(format!("request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| AgentError::Lexical(e.to_string()))?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| AgentError::Lexical(format!("invalid response: {}", e)))?;

        let hits = parse_hits(&body);
        debug!(collection, hits = hits.len(), "Lexical search");
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[test]
    fn test_build_text_query() {
        let query = build_text_query("rust lyon");
        assert_eq!(query["multi_match"]["query"], "rust lyon");
        assert_eq!(query["multi_match"]["type"], "best_fields");
        assert_eq!(query["multi_match"]["fields"][0], "title^3");
        assert_eq!(query["multi_match"]["fields"][2], "skills^2");
    }

    #[test]
    fn test_parse_hits_id_fallbacks_and_default_score() {
        let body = json!({
            "hits": {"hits": [
                {"_id": "12", "_score": 4.5},
                {"_source": {"id": 13}, "_score": 2.0},
                {"_id": "14"},
                {"_source": {"title": "no id"}, "_score": 9.0}
            ]}
        });
        let hits = parse_hits(&body);
        assert_eq!(
            hits,
            vec![
                ScoredId::new("12", 4.5),
                ScoredId::new("13", 2.0),
                ScoredId::new("14", 1.0),
            ]
        );
    }

    #[test]
    fn test_parse_hits_malformed_body() {
        assert!(parse_hits(&json!({"error": "index_not_found"})).is_empty());
        assert!(parse_hits(&json!({"hits": {"hits": "nope"}})).is_empty());
    }

    #[test]
    fn test_disabled_without_base_url() {
        assert!(ElasticsearchLexical::from_config(&LexicalConfig::default())
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_search_posts_to_collection_index() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/job_offers/_search");
                then.status(200).json_body(json!({
                    "hits": {"hits": [{"_id": "7", "_score": 3.25}]}
                }));
            })
            .await;

        let config = LexicalConfig {
            base_url: format!("{}/", server.base_url()),
            ..Default::default()
        };
        let lexical = ElasticsearchLexical::from_config(&config).unwrap().unwrap();
        let hits = lexical.search("job_offers", "rust", 5).await.unwrap();

        assert_eq!(hits, vec![ScoredId::new("7", 3.25)]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_search_server_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/candidates/_search");
                then.status(503);
            })
            .await;

        let config = LexicalConfig {
            base_url: server.base_url(),
            ..Default::default()
        };
        let lexical = ElasticsearchLexical::from_config(&config).unwrap().unwrap();
        let err = lexical.search("candidates", "rust", 5).await.unwrap_err();
        assert!(matches!(err, AgentError::Lexical(_)));
    }
}
