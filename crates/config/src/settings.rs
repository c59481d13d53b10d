//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::constants::{endpoints, formatter, memory, retrieval, scope, timeouts};
use crate::ConfigError;

/// Runtime environment; changes validation strictness, mirroring the
/// teacher crate's development/staging/production split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }
}

/// Top-level application settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub query: QueryConfig,

    #[serde(default)]
    pub scope_ranges: ScopeRanges,

    #[serde(default)]
    pub retriever: RetrieverConfig,

    #[serde(default)]
    pub similarity: SimilarityThresholds,

    #[serde(default)]
    pub reranker: RerankerConfig,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub formatter: FormatterConfig,

    #[serde(default)]
    pub enricher: EnricherConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Path to the area/domain/language alias tables YAML file.
    #[serde(default = "default_aliases_path")]
    pub aliases_path: String,
}

fn default_aliases_path() -> String {
    "config/aliases.yaml".to_string()
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_embedding()?;
        self.validate_query()?;
        self.validate_reranker()?;
        self.validate_server()?;
        Ok(())
    }

    fn validate_embedding(&self) -> Result<(), ConfigError> {
        if self.embedding.dimension == 0 {
            return Err(ConfigError::InvalidValue {
                field: "embedding.dimension".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    fn validate_query(&self) -> Result<(), ConfigError> {
        if !(1..=8).contains(&self.query.expansion_max_variants) {
            return Err(ConfigError::InvalidValue {
                field: "query.expansion.max_variants".to_string(),
                message: "must be between 1 and 8".to_string(),
            });
        }
        if self.query.rewrite_cache_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "query.rewrite.cache_size".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    fn validate_reranker(&self) -> Result<(), ConfigError> {
        let sum: f32 = self.reranker.weights.as_array().iter().sum();
        if sum <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "reranker.weights".to_string(),
                message: "weights must sum to a positive value".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.retriever.hybrid_vector_weight) {
            return Err(ConfigError::InvalidValue {
                field: "retriever.hybrid.vector_weight".to_string(),
                message: "must be between 0.0 and 1.0".to_string(),
            });
        }
        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "port cannot be 0".to_string(),
            });
        }
        Ok(())
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    #[serde(default)]
    pub cors_origins: Vec<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_true() -> bool {
    true
}
fn default_request_timeout_ms() -> u64 {
    timeouts::REQUEST_MS
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// `embedding.backend` / `embedding.dimension` (§6.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackendKind {
    #[default]
    Local,
    RemoteA,
    RemoteB,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub backend: EmbeddingBackendKind,
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,
    #[serde(default)]
    pub remote_endpoint: Option<String>,
    #[serde(default)]
    pub remote_api_key: Option<String>,
}

fn default_embedding_dimension() -> usize {
    768
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackendKind::default(),
            dimension: default_embedding_dimension(),
            remote_endpoint: None,
            remote_api_key: None,
        }
    }
}

/// `query.rewrite.*` / `query.expansion.*` (§6.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_true")]
    pub rewrite_enabled: bool,
    #[serde(default = "default_rewrite_timeout_ms")]
    pub rewrite_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub expansion_enabled: bool,
    #[serde(default = "default_max_variants")]
    pub expansion_max_variants: usize,
    #[serde(default = "default_rewrite_cache_size")]
    pub rewrite_cache_size: usize,
}

fn default_rewrite_timeout_ms() -> u64 {
    timeouts::REWRITER_MS
}
fn default_max_variants() -> usize {
    retrieval::MAX_QUERY_VARIANTS
}
fn default_rewrite_cache_size() -> usize {
    retrieval::REWRITE_CACHE_SIZE
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            rewrite_enabled: true,
            rewrite_timeout_ms: default_rewrite_timeout_ms(),
            expansion_enabled: true,
            expansion_max_variants: default_max_variants(),
            rewrite_cache_size: default_rewrite_cache_size(),
        }
    }
}

/// A single `{min, base, max}` triplet for one scope (§6.3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScopeKRange {
    pub min: usize,
    pub base: usize,
    pub max: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeRanges {
    pub micro: ScopeKRange,
    pub macro_: ScopeKRange,
    pub overview: ScopeKRange,
}

impl Default for ScopeRanges {
    fn default() -> Self {
        Self {
            micro: ScopeKRange {
                min: scope::MICRO_MIN,
                base: scope::MICRO_BASE,
                max: scope::MICRO_MAX,
            },
            macro_: ScopeKRange {
                min: scope::MACRO_MIN,
                base: scope::MACRO_BASE,
                max: scope::MACRO_MAX,
            },
            overview: ScopeKRange {
                min: scope::OVERVIEW_MIN,
                base: scope::OVERVIEW_BASE,
                max: scope::OVERVIEW_MAX,
            },
        }
    }
}

/// `retriever.cluster.*` / `retriever.hybrid.*` (§6.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieverConfig {
    #[serde(default = "default_cluster_top_m")]
    pub cluster_top_m: usize,
    #[serde(default = "default_hybrid_vector_weight")]
    pub hybrid_vector_weight: f32,
    #[serde(default = "default_cluster_fanout")]
    pub cluster_embed_fanout: usize,
}

fn default_cluster_top_m() -> usize {
    retrieval::CLUSTER_TOP_M
}
fn default_hybrid_vector_weight() -> f32 {
    retrieval::HYBRID_VECTOR_WEIGHT
}
fn default_cluster_fanout() -> usize {
    retrieval::CLUSTER_EMBED_FANOUT
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            cluster_top_m: default_cluster_top_m(),
            hybrid_vector_weight: default_hybrid_vector_weight(),
            cluster_embed_fanout: default_cluster_fanout(),
        }
    }
}

/// `similarity.thresholds` (§6.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityThresholds {
    pub excellent: f32,
    pub good: f32,
    pub acceptable: f32,
    pub minimum: f32,
}

impl Default for SimilarityThresholds {
    fn default() -> Self {
        Self {
            excellent: retrieval::SIM_EXCELLENT,
            good: retrieval::SIM_GOOD,
            acceptable: retrieval::SIM_ACCEPTABLE,
            minimum: retrieval::SIM_MINIMUM,
        }
    }
}

/// Seven reranker factor weights (§4.7). Normalized to sum 1.0 if the
/// configured values don't, per §6.3.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RerankerWeights {
    pub semantic: f32,
    pub lexical: f32,
    pub area_match: f32,
    pub domain_match: f32,
    pub intent_fit: f32,
    pub memory_boost: f32,
    pub recency: f32,
}

impl Default for RerankerWeights {
    fn default() -> Self {
        let w = retrieval::RERANK_WEIGHTS;
        Self {
            semantic: w[0],
            lexical: w[1],
            area_match: w[2],
            domain_match: w[3],
            intent_fit: w[4],
            memory_boost: w[5],
            recency: w[6],
        }
    }
}

impl RerankerWeights {
    pub fn as_array(&self) -> [f32; 7] {
        [
            self.semantic,
            self.lexical,
            self.area_match,
            self.domain_match,
            self.intent_fit,
            self.memory_boost,
            self.recency,
        ]
    }

    /// Normalize so the seven weights sum to 1.0; no-op if already close.
    pub fn normalized(&self) -> Self {
        let sum: f32 = self.as_array().iter().sum();
        if sum <= 0.0 || (sum - 1.0).abs() < 1e-6 {
            return *self;
        }
        Self {
            semantic: self.semantic / sum,
            lexical: self.lexical / sum,
            area_match: self.area_match / sum,
            domain_match: self.domain_match / sum,
            intent_fit: self.intent_fit / sum,
            memory_boost: self.memory_boost / sum,
            recency: self.recency / sum,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerConfig {
    #[serde(default)]
    pub weights: RerankerWeights,
    #[serde(default = "default_rerank_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_rerank_timeout_ms() -> u64 {
    timeouts::RERANKER_MS
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            weights: RerankerWeights::default(),
            timeout_ms: default_rerank_timeout_ms(),
        }
    }
}

/// `memory.*` (§6.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: i64,
    #[serde(default = "default_max_entries_per_session")]
    pub max_entries_per_session: usize,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_ttl_seconds() -> i64 {
    memory::TTL_SECONDS
}
fn default_max_entries_per_session() -> usize {
    memory::MAX_ENTRIES_PER_SESSION
}
fn default_sweep_interval_secs() -> u64 {
    memory::SWEEP_INTERVAL_SECS
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl_seconds(),
            max_entries_per_session: default_max_entries_per_session(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// `formatter.*` (§6.3, §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatterConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_hard_cap_chars")]
    pub hard_cap_chars: usize,
}

fn default_max_chars() -> usize {
    formatter::MAX_CHARS
}
fn default_hard_cap_chars() -> usize {
    formatter::HARD_CAP_CHARS
}

impl Default for FormatterConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            hard_cap_chars: default_hard_cap_chars(),
        }
    }
}

/// `enricher.*` (§6.3, §5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnricherConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_queue_capacity() -> usize {
    memory::ENRICHER_QUEUE_CAPACITY
}
fn default_workers() -> usize {
    memory::ENRICHER_WORKERS
}

impl Default for EnricherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            workers: default_workers(),
        }
    }
}

/// Structured logging / metrics (ambient stack, not in spec.md §6.3 but
/// carried per SPEC_FULL.md's ambient-stack addition).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_metrics_port() -> u16 {
    9090
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: true,
            metrics_port: default_metrics_port(),
        }
    }
}

/// Load settings from files and environment.
///
/// Priority (highest to lowest):
/// 1. Environment variables (`RAGBRIDGE__` prefix, `__` separator)
/// 2. `config/{env}.yaml` (if env specified)
/// 3. `config/default.yaml`
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("RAGBRIDGE")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;
    settings.validate()?;

    // Surface the qdrant/llm defaults so they're visible in logs at startup
    // even when nothing overrides them.
    tracing::debug!(
        qdrant = %*endpoints::QDRANT_DEFAULT,
        llm = %*endpoints::LLM_DEFAULT,
        "resolved default endpoints"
    );

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.server.port, 8080);
    }

    #[test]
    fn reranker_weights_default_sums_to_one() {
        let w = RerankerWeights::default();
        let sum: f32 = w.as_array().iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn reranker_weights_normalize_unnormalized_input() {
        let w = RerankerWeights {
            semantic: 4.0,
            lexical: 2.0,
            area_match: 1.0,
            domain_match: 1.0,
            intent_fit: 0.5,
            memory_boost: 1.0,
            recency: 0.5,
        };
        let normalized = w.normalized();
        let sum: f32 = normalized.as_array().iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
    }

    #[test]
    fn embedding_dimension_zero_is_invalid() {
        let mut settings = Settings::default();
        settings.embedding.dimension = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn expansion_max_variants_out_of_range_is_invalid() {
        let mut settings = Settings::default();
        settings.query.expansion_max_variants = 9;
        assert!(settings.validate().is_err());
        settings.query.expansion_max_variants = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn server_port_zero_is_invalid() {
        let mut settings = Settings::default();
        settings.server.port = 0;
        assert!(settings.validate().is_err());
    }
}
