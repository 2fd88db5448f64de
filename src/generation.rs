//! Generative model collaborator.
//!
//! Defines the [`GenerationService`] trait consumed by the classifier, the
//! feedback analyzer, and the knowledge gateway, plus two implementations:
//!
//! - **[`DisabledGeneration`]**: every call fails; classification then
//!   degrades to `Other` and feedback analysis to its raw-input fallback.
//! - **[`GeminiGeneration`]**: the Gemini `generateContent` REST endpoint,
//!   with the file-search tool attached for grounded answers.
//!
//! Rate limiting (HTTP 429 / `RESOURCE_EXHAUSTED`) is surfaced as a distinct
//! [`GenerationError::ResourceExhausted`] carrying the raw error body, so
//! callers can look for a server-suggested retry delay. This module does not
//! retry on its own.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::GenerationConfig;

const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("resource exhausted: {body}")]
    ResourceExhausted { body: String },
    #[error("{0}")]
    Other(String),
}

/// One prior turn of a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    /// `"user"` or `"assistant"`.
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct AnswerRequest {
    /// Corpus references to search, in the order they should be consulted.
    pub corpora: Vec<String>,
    pub system_instruction: String,
    pub history: Vec<ChatTurn>,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Citation {
    pub title: String,
    pub uri: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
    pub model: String,
}

#[async_trait]
pub trait GenerationService: Send + Sync {
    fn model_name(&self) -> &str;

    /// Plain single-prompt completion.
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;

    /// Retrieval-grounded answer over the given corpora.
    async fn answer(&self, request: &AnswerRequest) -> Result<Answer, GenerationError>;
}

/// Build the configured provider.
pub fn create_service(config: &GenerationConfig) -> Result<Arc<dyn GenerationService>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGeneration)),
        "gemini" => Ok(Arc::new(GeminiGeneration::new(config)?)),
        other => anyhow::bail!("Unknown generation provider: {}", other),
    }
}

// ============ Disabled ============

pub struct DisabledGeneration;

#[async_trait]
impl GenerationService for DisabledGeneration {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
        Err(GenerationError::Other(
            "generation provider is disabled".to_string(),
        ))
    }

    async fn answer(&self, _request: &AnswerRequest) -> Result<Answer, GenerationError> {
        Err(GenerationError::Other(
            "generation provider is disabled".to_string(),
        ))
    }
}

// ============ Gemini ============

pub struct GeminiGeneration {
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiGeneration {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            anyhow::anyhow!("{} environment variable not set", config.api_key_env)
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.model.clone(),
            api_key,
            client,
        })
    }

    async fn call(&self, body: serde_json::Value) -> Result<serde_json::Value, GenerationError> {
        let url = format!("{}/models/{}:generateContent", GEMINI_BASE, self.model);
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Other(e.to_string()))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if status.as_u16() == 429 || text.contains("RESOURCE_EXHAUSTED") {
            return Err(GenerationError::ResourceExhausted { body: text });
        }
        if !status.is_success() {
            return Err(GenerationError::Other(format!(
                "Gemini API error {}: {}",
                status, text
            )));
        }

        serde_json::from_str(&text)
            .map_err(|e| GenerationError::Other(format!("invalid Gemini response: {}", e)))
    }
}

fn user_content(text: &str) -> serde_json::Value {
    serde_json::json!({ "role": "user", "parts": [{ "text": text }] })
}

#[async_trait]
impl GenerationService for GeminiGeneration {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let body = serde_json::json!({ "contents": [user_content(prompt)] });
        let json = self.call(body).await?;
        Ok(response_text(&json))
    }

    async fn answer(&self, request: &AnswerRequest) -> Result<Answer, GenerationError> {
        let mut contents: Vec<serde_json::Value> = request
            .history
            .iter()
            .map(|turn| {
                let role = if turn.role == "assistant" {
                    "model"
                } else {
                    "user"
                };
                serde_json::json!({ "role": role, "parts": [{ "text": turn.content }] })
            })
            .collect();
        contents.push(user_content(&request.message));

        let body = serde_json::json!({
            "contents": contents,
            "systemInstruction": { "parts": [{ "text": request.system_instruction }] },
            "tools": [{ "fileSearch": { "fileSearchStoreNames": request.corpora } }],
        });

        let json = self.call(body).await?;
        Ok(Answer {
            text: response_text(&json),
            citations: parse_citations(&json),
            model: self.model.clone(),
        })
    }
}

/// Concatenated text parts of the first candidate.
fn response_text(json: &serde_json::Value) -> String {
    json.pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

fn parse_citations(json: &serde_json::Value) -> Vec<Citation> {
    let Some(chunks) = json
        .pointer("/candidates/0/groundingMetadata/groundingChunks")
        .and_then(|c| c.as_array())
    else {
        return Vec::new();
    };

    chunks
        .iter()
        .filter_map(|chunk| {
            let ctx = chunk.get("retrievedContext")?;
            let field = |name: &str| {
                ctx.get(name)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string()
            };
            Some(Citation {
                title: field("title"),
                uri: field("uri"),
                text: field("text"),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_text_joins_parts() {
        let body = json!({
            "candidates": [{ "content": { "parts": [{ "text": "Annual leave " }, { "text": "is 16 days." }] } }]
        });
        assert_eq!(response_text(&body), "Annual leave is 16 days.");
    }

    #[test]
    fn test_response_text_missing_candidates() {
        assert_eq!(response_text(&json!({})), "");
    }

    #[test]
    fn test_parse_citations() {
        let body = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "x" }] },
                "groundingMetadata": { "groundingChunks": [
                    { "retrievedContext": { "title": "인사규정_20260101.hwp", "text": "제12조" } },
                    { "web": { "uri": "ignored" } }
                ]}
            }]
        });
        let citations = parse_citations(&body);
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].title, "인사규정_20260101.hwp");
        assert_eq!(citations[0].uri, "");
    }

    #[tokio::test]
    async fn test_disabled_provider_fails() {
        let svc = DisabledGeneration;
        assert!(matches!(
            svc.generate("hi").await,
            Err(GenerationError::Other(_))
        ));
    }
}
