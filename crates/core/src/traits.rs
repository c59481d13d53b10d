//! Collaborator interfaces consumed by the pipeline (spec §6.2)
//!
//! These traits are the seams at which the pipeline is explicitly
//! out-of-process: their *contracts* are specified here, their
//! implementations live in `ragbridge-retrieval` (document store,
//! embedding backends) and `ragbridge-llm` (LLM client).

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::types::{Cluster, Entity};

/// Whether a text is being embedded as a search query or as a stored
/// document — some backends use asymmetric encoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingKind {
    Query,
    Document,
}

/// `embed(texts, kind) -> [vector]` (§6.2).
///
/// Implementations: a process-local model, or either of two remote APIs,
/// selected by `embedding.backend` config. Swapping implementations MUST
/// be transparent to callers — every implementation returns vectors of
/// the configured dimension or fails loudly.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    async fn embed(&self, texts: &[String], kind: EmbeddingKind) -> Result<Vec<Vec<f32>>>;

    /// Dimension this backend produces; checked against `embedding.dimension`
    /// at startup.
    fn dimension(&self) -> usize;
}

/// Result row from a document-store vector or hybrid search.
#[derive(Debug, Clone)]
pub struct ScoredEntityId {
    pub entity_id: String,
    pub vector_score: f32,
    pub text_score: f32,
}

/// The document store collaborator (§6.2, §6.4).
///
/// Read-only within the query path; ingestion/schema bootstrap are
/// explicitly out of scope (§1).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn vector_search(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredEntityId>>;

    async fn hybrid_search(
        &self,
        vector: &[f32],
        text: &str,
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredEntityId>>;

    async fn get_entities(&self, ids: &[String]) -> Result<Vec<Entity>>;

    async fn get_cluster_embeddings(&self) -> Result<Vec<Cluster>>;

    /// `(entity_id, weight)` pairs for a cluster's members.
    async fn get_cluster_members(&self, cluster_id: &str) -> Result<Vec<(String, f32)>>;
}

/// Minimum-viability filter applied server-side by the document store;
/// kept intentionally small since schema/index design is out of scope (§1).
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub domains: Vec<String>,
    pub areas: Vec<String>,
}

/// `complete(prompt, max_tokens, stop?, deadline) -> string` (§6.2).
///
/// Used by QueryRewriter, ScopeDetector (primary classifier) and
/// AsyncEnricher. Deadline-bounded; on failure the caller falls back
/// deterministically — this trait never retries internally.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        max_tokens: usize,
        stop: Option<&[String]>,
        deadline: Duration,
    ) -> Result<String>;
}

/// `score(query, [doc]) -> [float in 0..1]` (§6.2), batched.
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    async fn score(&self, query: &str, docs: &[String]) -> Result<Vec<f32>>;
}
