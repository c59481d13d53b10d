//! LLM client backends for the retrieval bridge
//!
//! Implements `ragbridge_core::LlmClient` against a local/Ollama-style
//! backend and an OpenAI-compatible remote backend (used for Azure,
//! vLLM and hosted OpenAI alike). QueryRewriter, ScopeDetector and
//! AsyncEnricher consume the trait, not these concrete types, so the
//! pipeline is agnostic to which one is wired up.

pub mod backend;
pub mod prompt;

pub use backend::{LocalLlmClient, LocalLlmConfig, RemoteLlmClient, RemoteLlmConfig};
pub use prompt::{rewrite_prompt, scope_prompt, summary_prompt, Message, Role};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("generation error: {0}")]
    Generation(String),

    #[error("api error: {0}")]
    Api(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("timeout")]
    Timeout,

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<LlmError> for ragbridge_core::Error {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Timeout => ragbridge_core::Error::DeadlineExceeded { stage: "llm" },
            LlmError::Network(_) | LlmError::Api(_) => {
                ragbridge_core::Error::BackendUnavailable(err.to_string())
            }
            LlmError::Generation(_) | LlmError::InvalidResponse(_) | LlmError::Configuration(_) => {
                ragbridge_core::Error::Internal(err.to_string())
            }
        }
    }
}
