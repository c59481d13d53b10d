//! Centralized constants for the retrieval bridge
//!
//! Single source of truth for default values referenced from both
//! `settings.rs` (as `#[serde(default = ...)]` fallbacks) and the
//! pipeline stages that don't take a `Settings` reference directly.
//!
//! DO NOT add per-deployment business data here (area/domain vocab lives
//! in `aliases.rs`, loaded from YAML at startup).

/// Service endpoints (env var overridable, generic infrastructure).
pub mod endpoints {
    use once_cell::sync::Lazy;

    /// Qdrant vector store endpoint (env: `QDRANT_URL`).
    pub static QDRANT_DEFAULT: Lazy<String> = Lazy::new(|| {
        std::env::var("QDRANT_URL").unwrap_or_else(|_| "http://127.0.0.1:6333".to_string())
    });

    /// Local LLM endpoint, e.g. an Ollama server (env: `LLM_URL`).
    pub static LLM_DEFAULT: Lazy<String> = Lazy::new(|| {
        std::env::var("LLM_URL").unwrap_or_else(|_| "http://localhost:11434".to_string())
    });
}

/// Per-stage and request timeouts (milliseconds unless noted), spec §5.
pub mod timeouts {
    pub const ANALYZER_MS: u64 = 100;
    pub const REWRITER_MS: u64 = 1500;
    pub const SCOPE_MS: u64 = 1500;
    pub const EXPANDER_MS: u64 = 500;
    pub const CLUSTER_SEARCH_MS: u64 = 2000;
    pub const HYBRID_SEARCH_MS: u64 = 3000;
    pub const RERANKER_MS: u64 = 1500;
    pub const FORMATTER_MS: u64 = 100;
    pub const REQUEST_MS: u64 = 30_000;
}

/// Scope → K defaults (spec §4.5). `base` feeds
/// `K = clamp(base + 3*area_count + 2*domain_count, min, max)`. `base`
/// equals `min` so that K = min exactly when area_count = domain_count = 0
/// (spec §8's documented boundary property).
pub mod scope {
    pub const MICRO_MIN: usize = 5;
    pub const MICRO_BASE: usize = 5;
    pub const MICRO_MAX: usize = 20;

    pub const MACRO_MIN: usize = 15;
    pub const MACRO_BASE: usize = 15;
    pub const MACRO_MAX: usize = 30;

    pub const OVERVIEW_MIN: usize = 30;
    pub const OVERVIEW_BASE: usize = 30;
    pub const OVERVIEW_MAX: usize = 50;
}

/// Retrieval and reranking defaults (spec §4.6, §4.7, §6.3).
pub mod retrieval {
    /// Top-M clusters considered by ClusterSearch.
    pub const CLUSTER_TOP_M: usize = 5;
    /// Weight given to vector similarity vs text match in hybrid search.
    pub const HYBRID_VECTOR_WEIGHT: f32 = 0.7;
    /// Bounded fan-out for per-variant embedding lookups within ClusterSearch.
    pub const CLUSTER_EMBED_FANOUT: usize = 4;

    /// Adaptive similarity thresholds (§4.6.2), process default table.
    pub const SIM_EXCELLENT: f32 = 0.85;
    pub const SIM_GOOD: f32 = 0.70;
    pub const SIM_ACCEPTABLE: f32 = 0.55;
    pub const SIM_MINIMUM: f32 = 0.35;

    /// Default reranker factor weights f1..f7, must sum to 1.0 (§4.7).
    pub const RERANK_WEIGHTS: [f32; 7] = [0.40, 0.20, 0.10, 0.10, 0.05, 0.10, 0.05];

    pub const MAX_QUERY_VARIANTS: usize = 3;

    /// QueryRewriter's LLM-prompt cache (§4.3), keyed by a hash of the
    /// prompt plus the last 3 turns.
    pub const REWRITE_CACHE_SIZE: usize = 256;
}

/// ConversationMemory and AsyncEnricher defaults (spec §5, §6.3).
pub mod memory {
    pub const TTL_SECONDS: i64 = 900;
    pub const MAX_ENTRIES_PER_SESSION: usize = 64;
    pub const SWEEP_INTERVAL_SECS: u64 = 60;
    pub const ENRICHER_QUEUE_CAPACITY: usize = 1024;
    pub const ENRICHER_WORKERS: usize = 2;
}

/// ContextFormatter defaults (spec §4.8).
pub mod formatter {
    pub const MAX_CHARS: usize = 4096;
    pub const HARD_CAP_CHARS: usize = 8192;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rerank_weights_sum_to_one() {
        let sum: f32 = retrieval::RERANK_WEIGHTS.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn scope_ranges_are_ordered() {
        assert!(scope::MICRO_MIN <= scope::MICRO_BASE && scope::MICRO_BASE <= scope::MICRO_MAX);
        assert!(scope::MACRO_MIN <= scope::MACRO_BASE && scope::MACRO_BASE <= scope::MACRO_MAX);
        assert!(
            scope::OVERVIEW_MIN <= scope::OVERVIEW_BASE
                && scope::OVERVIEW_BASE <= scope::OVERVIEW_MAX
        );
    }

    /// K = clamp(base + 3*areas + 2*domains, min, max) must equal `min`
    /// when areas = domains = 0 (spec §8's documented boundary property),
    /// which only holds if `base == min`.
    #[test]
    fn scope_base_equals_min() {
        assert_eq!(scope::MICRO_BASE, scope::MICRO_MIN);
        assert_eq!(scope::MACRO_BASE, scope::MACRO_MIN);
        assert_eq!(scope::OVERVIEW_BASE, scope::OVERVIEW_MIN);
    }

    #[test]
    fn similarity_thresholds_are_increasing() {
        assert!(retrieval::SIM_MINIMUM < retrieval::SIM_ACCEPTABLE);
        assert!(retrieval::SIM_ACCEPTABLE < retrieval::SIM_GOOD);
        assert!(retrieval::SIM_GOOD < retrieval::SIM_EXCELLENT);
    }
}
