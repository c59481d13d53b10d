//! Configuration management for the RAG retrieval bridge
//!
//! Supports loading configuration from:
//! - YAML files (`config/default.yaml`, `config/{env}.yaml`)
//! - Environment variables (`RAGBRIDGE_` prefix)
//!
//! Alias tables (language/area/domain) are loaded separately via
//! [`aliases`] since they are data, not tunables, and may be large.

pub mod aliases;
pub mod constants;
pub mod settings;

pub use aliases::{AliasTables, DomainAliases};
pub use settings::{
    load_settings, EnricherConfig, FormatterConfig, MemoryConfig, QueryConfig, RerankerWeights,
    RetrieverConfig, RuntimeEnvironment, ScopeKRange, ScopeRanges, ServerConfig, Settings,
    SimilarityThresholds,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
