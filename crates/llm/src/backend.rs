//! LLM backend implementations
//!
//! Both backends implement `ragbridge_core::LlmClient::complete`, the
//! single collaborator method the pipeline calls (spec §6.2). Retry and
//! backoff happen inside the backend, never in the pipeline stages —
//! QueryRewriter/ScopeDetector/AsyncEnricher treat a backend failure as
//! final and fall back deterministically.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use ragbridge_core::error::Result;
use ragbridge_core::traits::LlmClient;

use crate::LlmError;

/// Configuration for the local (Ollama-style) backend.
#[derive(Debug, Clone)]
pub struct LocalLlmConfig {
    pub model: String,
    pub endpoint: String,
    pub temperature: f32,
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for LocalLlmConfig {
    fn default() -> Self {
        Self {
            model: "qwen2.5:1.5b".to_string(),
            endpoint: "http://localhost:11434".to_string(),
            temperature: 0.2,
            max_retries: 2,
            initial_backoff: Duration::from_millis(100),
        }
    }
}

/// Process-local LLM backend talking to an Ollama-compatible `/api/chat`
/// endpoint. Used as the primary classifier/rewriter backend in
/// development and as the `local` option of `embedding.backend`'s LLM
/// counterpart.
#[derive(Clone)]
pub struct LocalLlmClient {
    client: Client,
    config: LocalLlmConfig,
}

impl LocalLlmClient {
    pub fn new(config: LocalLlmConfig) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| LlmError::Configuration(format!("failed to build http client: {e}")))?;
        Ok(Self { client, config })
    }

    fn api_url(&self) -> String {
        format!("{}/api/chat", self.config.endpoint)
    }

    fn is_retryable(error: &LlmError) -> bool {
        matches!(error, LlmError::Network(_) | LlmError::Timeout)
    }
}

#[async_trait]
impl LlmClient for LocalLlmClient {
    async fn complete(
        &self,
        prompt: &str,
        max_tokens: usize,
        stop: Option<&[String]>,
        deadline: Duration,
    ) -> Result<String> {
        let request = OllamaChatRequest {
            model: self.config.model.clone(),
            messages: vec![OllamaMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            stream: false,
            options: OllamaOptions {
                temperature: self.config.temperature,
                num_predict: max_tokens as i32,
                stop: stop.map(|s| s.to_vec()).unwrap_or_default(),
            },
        };

        let mut backoff = self.config.initial_backoff;
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tracing::warn!(attempt, "llm request retrying after transient failure");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }

            let call = self
                .client
                .post(self.api_url())
                .json(&request)
                .timeout(deadline)
                .send();

            match tokio::time::timeout(deadline, call).await {
                Err(_) => return Err(LlmError::Timeout.into()),
                Ok(Err(e)) => {
                    let err: LlmError = e.into();
                    if Self::is_retryable(&err) {
                        last_error = Some(err);
                        continue;
                    }
                    return Err(err.into());
                }
                Ok(Ok(response)) => {
                    if !response.status().is_success() {
                        let status = response.status();
                        let body = response.text().await.unwrap_or_default();
                        let err = if status.is_server_error() {
                            LlmError::Network(format!("{status}: {body}"))
                        } else {
                            LlmError::Api(format!("{status}: {body}"))
                        };
                        if Self::is_retryable(&err) {
                            last_error = Some(err);
                            continue;
                        }
                        return Err(err.into());
                    }
                    let parsed: OllamaChatResponse = response
                        .json()
                        .await
                        .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
                    return Ok(parsed.message.content);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| LlmError::Network("max retries exceeded".to_string()))
            .into())
    }
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: i32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
}

/// Configuration for an OpenAI-compatible remote backend (OpenAI, Azure,
/// vLLM, or any hosted endpoint that speaks the same wire format).
#[derive(Debug, Clone)]
pub struct RemoteLlmConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl RemoteLlmConfig {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
            max_retries: 3,
            initial_backoff: Duration::from_millis(200),
        }
    }
}

pub struct RemoteLlmClient {
    client: Client,
    config: RemoteLlmConfig,
}

impl RemoteLlmClient {
    pub fn new(config: RemoteLlmConfig) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| LlmError::Configuration(format!("failed to build http client: {e}")))?;
        Ok(Self { client, config })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.config.endpoint.trim_end_matches('/'))
    }

    fn is_retryable(error: &LlmError) -> bool {
        matches!(error, LlmError::Network(_) | LlmError::Timeout)
    }
}

#[async_trait]
impl LlmClient for RemoteLlmClient {
    async fn complete(
        &self,
        prompt: &str,
        max_tokens: usize,
        stop: Option<&[String]>,
        deadline: Duration,
    ) -> Result<String> {
        let request = OpenAiChatRequest {
            model: self.config.model.clone(),
            messages: vec![OpenAiMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens,
            stop: stop.map(|s| s.to_vec()).unwrap_or_default(),
        };

        let mut backoff = self.config.initial_backoff;
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                // 429/5xx get exponential backoff, per spec §5's shared-resource
                // retry policy for remote backends.
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }

            let call = self
                .client
                .post(self.chat_url())
                .bearer_auth(&self.config.api_key)
                .json(&request)
                .timeout(deadline)
                .send();

            match tokio::time::timeout(deadline, call).await {
                Err(_) => return Err(LlmError::Timeout.into()),
                Ok(Err(e)) => {
                    let err: LlmError = e.into();
                    if Self::is_retryable(&err) {
                        last_error = Some(err);
                        continue;
                    }
                    return Err(err.into());
                }
                Ok(Ok(response)) => {
                    let status = response.status();
                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                        last_error = Some(LlmError::Network(format!("retryable status {status}")));
                        continue;
                    }
                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(LlmError::Api(format!("{status}: {body}")).into());
                    }
                    let parsed: OpenAiChatResponse = response
                        .json()
                        .await
                        .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
                    let content = parsed
                        .choices
                        .into_iter()
                        .next()
                        .map(|c| c.message.content)
                        .ok_or_else(|| LlmError::InvalidResponse("no choices in response".to_string()))?;
                    return Ok(content);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| LlmError::Network("max retries exceeded".to_string()))
            .into())
    }
}

#[derive(Debug, Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_config_defaults_to_ollama_endpoint() {
        let config = LocalLlmConfig::default();
        assert_eq!(config.endpoint, "http://localhost:11434");
        assert_eq!(config.max_retries, 2);
    }

    #[test]
    fn remote_config_builder_sets_fields() {
        let config = RemoteLlmConfig::new("https://api.openai.com/v1", "sk-xxx", "gpt-4o-mini");
        assert_eq!(config.api_key, "sk-xxx");
        assert_eq!(config.model, "gpt-4o-mini");
    }

    #[test]
    fn remote_client_chat_url_trims_trailing_slash() {
        let config = RemoteLlmConfig::new("https://api.openai.com/v1/", "sk-xxx", "gpt-4o-mini");
        let client = RemoteLlmClient::new(config).unwrap();
        assert_eq!(client.chat_url(), "https://api.openai.com/v1/chat/completions");
    }
}
