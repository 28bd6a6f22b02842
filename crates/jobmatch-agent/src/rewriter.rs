//! Query rewriting through a chat-completions LLM.
//!
//! The rewriter turns a conversational query into one search-optimised
//! sentence. It is optional: without an API key no client is built and the
//! agent uses the original query.

use std::time::Duration;

use async_trait::async_trait;
use jobmatch_core::config::RewriterConfig;
use jobmatch_core::types::EntityKind;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AgentError;

/// Rewrites a user query for a given search target.
#[async_trait]
pub trait QueryRewriter: Send + Sync {
    async fn rewrite(&self, query: &str, target: EntityKind) -> Result<String, AgentError>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: String,
}

/// OpenAI/Mistral-style chat-completions client.
#[derive(Debug, Clone)]
pub struct ChatCompletionRewriter {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl ChatCompletionRewriter {
    /// Build a client from configuration, or `None` when no API key is set.
    pub fn from_config(config: &RewriterConfig) -> Result<Option<Self>, AgentError> {
        if !config.is_enabled() {
            return Ok(None);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| AgentError::Rewrite(format!("failed to build HTTP client: {}", e)))?;
        Ok(Some(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }))
    }

    fn system_prompt(target: EntityKind) -> String {
        let subject = match target {
            EntityKind::JobOffer => "job offers",
            EntityKind::Candidate => "candidate profiles",
        };
        format!(
            "You are a recruiting search assistant. Rewrite the user's request as one \
             sentence optimised for searching {}. No greetings, no explanations.",
            subject
        )
    }
}

#[async_trait]
impl QueryRewriter for ChatCompletionRewriter {
    async fn rewrite(&self, query: &str, target: EntityKind) -> Result<String, AgentError> {
        let system = Self::system_prompt(target);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &system,
                },
                ChatMessage {
                    role: "user",
                    content: query,
                },
            ],
            temperature: 0.1,
            max_tokens: 128,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AgentError::Rewrite(format!("request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| AgentError::Rewrite(e.to_string()))?;

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Rewrite(format!("invalid response: {}", e)))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .unwrap_or_default();
        if content.is_empty() {
            return Err(AgentError::Rewrite("empty completion".to_string()));
        }
        debug!(search_target = %target, rewritten = %content, "Query rewritten");
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn config(endpoint: String) -> RewriterConfig {
        RewriterConfig {
            api_key: "test-key".into(),
            endpoint,
            model: "small".into(),
            timeout_ms: 2_000,
        }
    }

    #[test]
    fn test_disabled_without_api_key() {
        let rewriter = ChatCompletionRewriter::from_config(&RewriterConfig::default()).unwrap();
        assert!(rewriter.is_none());
    }

    #[test]
    fn test_system_prompt_mentions_target() {
        assert!(ChatCompletionRewriter::system_prompt(EntityKind::JobOffer).contains("job offers"));
        assert!(ChatCompletionRewriter::system_prompt(EntityKind::Candidate)
            .contains("candidate profiles"));
    }

    #[tokio::test]
    async fn test_rewrite_returns_trimmed_completion() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .header("authorization", "Bearer test-key");
                then.status(200).json_body(json!({
                    "choices": [{"message": {"role": "assistant", "content": "  Senior Rust backend developer in Lyon \n"}}]
                }));
            })
            .await;

        let rewriter = ChatCompletionRewriter::from_config(&config(server.url("/v1/chat/completions")))
            .unwrap()
            .unwrap();
        let rewritten = rewriter
            .rewrite("je cherche du rust à lyon", EntityKind::JobOffer)
            .await
            .unwrap();

        assert_eq!(rewritten, "Senior Rust backend developer in Lyon");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rewrite_http_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(401).body("unauthorized");
            })
            .await;

        let rewriter = ChatCompletionRewriter::from_config(&config(server.url("/v1/chat/completions")))
            .unwrap()
            .unwrap();
        let err = rewriter.rewrite("query", EntityKind::Candidate).await.unwrap_err();
        assert!(matches!(err, AgentError::Rewrite(_)));
    }

    #[tokio::test]
    async fn test_rewrite_empty_choices() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200).json_body(json!({"choices": []}));
            })
            .await;

        let rewriter = ChatCompletionRewriter::from_config(&config(server.url("/v1/chat/completions")))
            .unwrap()
            .unwrap();
        let err = rewriter.rewrite("query", EntityKind::JobOffer).await.unwrap_err();
        assert!(err.to_string().contains("empty completion"));
    }
}
