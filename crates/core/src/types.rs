//! Persisted and wire data model (spec §3)

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An addressable device or sensor ingested from the smart-home controller.
///
/// Invariant: exactly one row per `id`; `embedding.len()` equals the
/// process-wide index dimension (enforced by the document store at
/// startup, see `EmbeddingVector`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    /// Stable id, conventionally `domain.name` (e.g. `sensor.living_room_temp`).
    pub id: String,
    /// Domain the entity belongs to (`sensor`, `light`, `climate`, ...).
    pub domain: String,
    pub area_id: Option<String>,
    pub area_name: Option<String>,
    pub device_id: Option<String>,
    pub device_name: Option<String>,
    /// Language-localized display name.
    pub friendly_name: String,
    pub device_class: Option<String>,
    pub state: Option<String>,
    pub unit: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
    /// Display text used for the text-search side of hybrid search.
    pub display_text: String,
    /// Normalized English text the stored embedding was computed from.
    pub system_text: String,
    pub embedding: EmbeddingVector,
    /// Stable hash of ingestion inputs, used for change detection.
    pub content_hash: String,
    /// Anything not covered by the fixed schema above (§9 design note:
    /// dynamic attribute bags collapse to this single escape hatch).
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

/// Cluster type constrains which scopes a cluster is eligible for (§4.6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterType {
    Micro,
    Macro,
    Overview,
}

impl ClusterType {
    /// Cluster types compatible with a detected scope, per §4.6.1's
    /// `micro→{micro}; macro→{micro,macro}; overview→{micro,macro,overview}`.
    pub fn compatible_with(scope: Scope) -> &'static [ClusterType] {
        use ClusterType::*;
        match scope {
            Scope::Micro => &[Micro],
            Scope::Macro => &[Micro, Macro],
            Scope::Overview => &[Micro, Macro, Overview],
        }
    }
}

/// A pre-computed named grouping of semantically related entities.
///
/// Invariant: a cluster with zero members must still be queryable (returns
/// empty, never an error).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: String,
    pub name: String,
    pub cluster_type: ClusterType,
    /// Free-form scope label, e.g. an area id or domain name.
    pub scope_label: String,
    pub tags: Vec<String>,
    pub description: Option<String>,
    pub embedding: EmbeddingVector,
}

/// Directed edge cluster→entity with a relevance weight.
///
/// Invariant: `(cluster_id, entity_id)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterMembership {
    pub cluster_id: String,
    pub entity_id: String,
    /// Relevance weight in `[0, 1]`.
    pub weight: f32,
}

/// Role of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
    System,
}

/// A single message in the conversation passed to the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
    /// Position in the conversation (0-indexed, oldest first).
    pub position: usize,
}

/// Classification of a query's breadth, determining the result-size
/// budget K (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Micro,
    Macro,
    Overview,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Micro => "micro",
            Scope::Macro => "macro",
            Scope::Overview => "overview",
        }
    }
}

/// Conversational intent classified by ConversationAnalyzer (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Read,
    Control,
    Unknown,
}

/// Fixed-length ordered sequence of 32-bit floats.
///
/// Invariant: all stored entity vectors and all query vectors within a
/// deployment share a single dimension; dimension mismatches must fail
/// loudly at startup (see `ragbridge_config::Settings::embedding`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingVector(pub Vec<f32>);

impl EmbeddingVector {
    pub fn dim(&self) -> usize {
        self.0.len()
    }

    /// Cosine similarity. Returns 0.0 if either vector is zero-length or
    /// the dimensions disagree (callers are expected to have already
    /// validated dimension equality at startup).
    pub fn cosine_similarity(&self, other: &EmbeddingVector) -> f32 {
        if self.0.len() != other.0.len() || self.0.is_empty() {
            return 0.0;
        }
        let dot: f32 = self.0.iter().zip(other.0.iter()).map(|(a, b)| a * b).sum();
        let norm_a = self.0.iter().map(|v| v * v).sum::<f32>().sqrt();
        let norm_b = other.0.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }
        (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
    }
}

impl From<Vec<f32>> for EmbeddingVector {
    fn from(v: Vec<f32>) -> Self {
        EmbeddingVector(v)
    }
}

/// Keyed by session id; value tracks which entities were last surfaced so
/// the Reranker's memory-boost factor (f6) can reward continuity.
///
/// TTL = 15 minutes from last access. Invariant: entries older than TTL
/// are never returned by a read; cleanup is opportunistic and idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMemoryEntry {
    pub session_id: String,
    /// entity_id -> (last_seen, boost_counter)
    pub entities: HashMap<String, EntityMemory>,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    /// Summary produced by AsyncEnricher for the next turn, if ready in time.
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityMemory {
    pub last_seen: DateTime<Utc>,
    pub boost_counter: u32,
}

impl ConversationMemoryEntry {
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            entities: HashMap::new(),
            created_at: now,
            last_access: now,
            summary: None,
        }
    }

    pub fn is_expired(&self, ttl: chrono::Duration, now: DateTime<Utc>) -> bool {
        now - self.last_access > ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        let a = EmbeddingVector(vec![1.0, 0.0, 0.0]);
        assert!((a.cosine_similarity(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_orthogonal_vectors_is_zero() {
        let a = EmbeddingVector(vec![1.0, 0.0]);
        let b = EmbeddingVector(vec![0.0, 1.0]);
        assert!(a.cosine_similarity(&b).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_mismatched_dims_is_zero() {
        let a = EmbeddingVector(vec![1.0, 0.0]);
        let b = EmbeddingVector(vec![1.0, 0.0, 0.0]);
        assert_eq!(a.cosine_similarity(&b), 0.0);
    }

    #[test]
    fn cluster_type_compatibility_widens_with_scope() {
        assert_eq!(ClusterType::compatible_with(Scope::Micro), &[ClusterType::Micro]);
        assert_eq!(
            ClusterType::compatible_with(Scope::Overview),
            &[ClusterType::Micro, ClusterType::Macro, ClusterType::Overview]
        );
    }

    #[test]
    fn memory_entry_expires_after_ttl() {
        let entry = ConversationMemoryEntry::new("s1");
        let ttl = chrono::Duration::minutes(15);
        assert!(!entry.is_expired(ttl, entry.last_access));
        assert!(entry.is_expired(ttl, entry.last_access + chrono::Duration::minutes(16)));
    }
}
