//! HybridVectorSearch (spec §4.6.2)
//!
//! Single-stage hybrid search over the document store: vector similarity
//! on the system-text embedding plus text match on display text, already
//! combined and normalized by the document store's `hybrid_search`. This
//! module applies the adaptive minimum-similarity cutoff and shapes the
//! result into `CandidateEntity` rows.

use std::sync::Arc;

use ragbridge_core::error::Result;
use ragbridge_core::state::CandidateEntity;
use ragbridge_core::traits::{DocumentStore, SearchFilter};

/// Weighted-sum combination of vector and text scores (spec §4.6.2:
/// "combined by a weighted sum, default 0.7*vector + 0.3*text"). Shared
/// with `document_store::QdrantDocumentStore::hybrid_search`'s ranking so
/// the two never disagree on what "combined score" means.
pub fn combined_score(vector_score: f32, text_score: f32, vector_weight: f32) -> f32 {
    vector_weight * vector_score + (1.0 - vector_weight) * text_score
}

/// Run hybrid search for a single query embedding/text pair, discarding
/// results whose combined score falls below `minimum`.
pub async fn hybrid_search(
    query_embedding: &[f32],
    query_text: &str,
    top_k: usize,
    minimum: f32,
    vector_weight: f32,
    filter: Option<&SearchFilter>,
    store: &Arc<dyn DocumentStore>,
) -> Result<Vec<CandidateEntity>> {
    let results = store
        .hybrid_search(query_embedding, query_text, top_k, filter)
        .await?;

    Ok(results
        .into_iter()
        .filter(|r| combined_score(r.vector_score, r.text_score, vector_weight) >= minimum)
        .map(|r| CandidateEntity {
            entity_id: r.entity_id,
            vector_score: Some(r.vector_score),
            text_score: Some(r.text_score),
            ..Default::default()
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ragbridge_core::traits::ScoredEntityId;
    use ragbridge_core::types::{Cluster, Entity};

    struct FakeStore {
        results: Vec<ScoredEntityId>,
    }

    #[async_trait]
    impl DocumentStore for FakeStore {
        async fn vector_search(&self, _v: &[f32], _k: usize, _f: Option<&SearchFilter>) -> Result<Vec<ScoredEntityId>> {
            Ok(Vec::new())
        }
        async fn hybrid_search(&self, _v: &[f32], _t: &str, _k: usize, _f: Option<&SearchFilter>) -> Result<Vec<ScoredEntityId>> {
            Ok(self.results.clone())
        }
        async fn get_entities(&self, _ids: &[String]) -> Result<Vec<Entity>> {
            Ok(Vec::new())
        }
        async fn get_cluster_embeddings(&self) -> Result<Vec<Cluster>> {
            Ok(Vec::new())
        }
        async fn get_cluster_members(&self, _cluster_id: &str) -> Result<Vec<(String, f32)>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn discards_results_below_minimum_threshold() {
        let store: Arc<dyn DocumentStore> = Arc::new(FakeStore {
            results: vec![
                ScoredEntityId { entity_id: "good".to_string(), vector_score: 0.9, text_score: 0.1 },
                ScoredEntityId { entity_id: "bad".to_string(), vector_score: 0.1, text_score: 0.1 },
            ],
        });
        let out = hybrid_search(&[1.0, 0.0], "query", 10, 0.35, 0.7, None, &store).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].entity_id, "good");
    }

    #[tokio::test]
    async fn empty_results_from_store_yield_empty_candidates() {
        let store: Arc<dyn DocumentStore> = Arc::new(FakeStore { results: Vec::new() });
        let out = hybrid_search(&[1.0, 0.0], "query", 10, 0.35, 0.7, None, &store).await.unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn combined_score_uses_weighted_sum_not_max() {
        // vector=0.9, text=0.1 at 0.7/0.3 -> 0.66, below a 0.7 threshold
        // even though max(vector, text) = 0.9 would pass it.
        let score = combined_score(0.9, 0.1, 0.7);
        assert!((score - 0.66).abs() < 1e-6);
        assert!(score < 0.7);
    }
}
