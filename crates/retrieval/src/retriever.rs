//! CandidateRetriever (spec §4.6)
//!
//! Runs ClusterSearch and HybridVectorSearch, merges their output by
//! entity id with max-score fusion, and applies the failure-recovery and
//! deficit-filling rules from §4.6's merging-policy paragraph. The two
//! searches are independent document-store round trips so they run
//! concurrently via `tokio::join!`.

use std::collections::HashMap;
use std::sync::Arc;

use ragbridge_config::SimilarityThresholds;
use ragbridge_core::state::{CandidateEntity, Diagnostics};
use ragbridge_core::traits::{DocumentStore, EmbeddingBackend, EmbeddingKind, SearchFilter};
use ragbridge_core::types::Scope;

use crate::cluster_search::cluster_search;
use crate::hybrid_search::hybrid_search;

fn merge(cluster_candidates: Vec<CandidateEntity>, hybrid_candidates: Vec<CandidateEntity>) -> Vec<CandidateEntity> {
    let mut merged: HashMap<String, CandidateEntity> = HashMap::new();

    for c in cluster_candidates {
        merged.insert(c.entity_id.clone(), c);
    }
    for h in hybrid_candidates {
        merged
            .entry(h.entity_id.clone())
            .and_modify(|existing| {
                if h.vector_score.is_some() {
                    existing.vector_score = h.vector_score;
                }
                if h.text_score.is_some() {
                    existing.text_score = h.text_score;
                }
            })
            .or_insert(h);
    }

    merged.into_values().collect()
}

/// Produce an unranked candidate set for the Reranker to score (spec §4.6).
///
/// `variants` (already capped by QueryExpander) drive ClusterSearch, which
/// embeds each separately; `rewritten_query` is embedded once more here for
/// HybridVectorSearch.
#[allow(clippy::too_many_arguments)]
pub async fn retrieve_candidates(
    rewritten_query: &str,
    variants: &[String],
    scope: Scope,
    k: usize,
    embedder: &Arc<dyn EmbeddingBackend>,
    store: &Arc<dyn DocumentStore>,
    thresholds: &SimilarityThresholds,
    cluster_top_m: usize,
    cluster_embed_fanout: usize,
    hybrid_vector_weight: f32,
    filter: Option<&SearchFilter>,
    diagnostics: &mut Diagnostics,
) -> Vec<CandidateEntity> {
    let query_embedding = match embedder.embed(&[rewritten_query.to_string()], EmbeddingKind::Query).await {
        Ok(mut v) => v.pop().unwrap_or_default(),
        Err(e) => {
            diagnostics.record_fallback("candidate_retriever", format!("query embedding failed: {e}"));
            Vec::new()
        }
    };

    let (cluster_result, hybrid_result) = tokio::join!(
        cluster_search(variants, scope, cluster_top_m, cluster_embed_fanout, embedder, store),
        hybrid_search(&query_embedding, rewritten_query, 3 * k, thresholds.minimum, hybrid_vector_weight, filter, store),
    );

    let cluster_candidates = match cluster_result {
        Ok(c) => c,
        Err(e) => {
            diagnostics.record_fallback("cluster_search", format!("failed, proceeding with hybrid only: {e}"));
            diagnostics.cluster_skipped = true;
            Vec::new()
        }
    };

    let hybrid_candidates = match hybrid_result {
        Ok(h) => h,
        Err(first_err) => {
            diagnostics.record_fallback("hybrid_search", format!("retrying with relaxed threshold: {first_err}"));
            match hybrid_search(&query_embedding, rewritten_query, 6 * k, 0.0, hybrid_vector_weight, filter, store).await {
                Ok(h) => h,
                Err(second_err) => {
                    diagnostics.record_fallback("hybrid_search", format!("second failure, cluster-only: {second_err}"));
                    return cluster_candidates;
                }
            }
        }
    };

    if cluster_candidates.len() < k / 2 {
        diagnostics.record_fallback("cluster_search", "under K/2 candidates, hybrid search fills deficit");
    }

    merge(cluster_candidates, hybrid_candidates)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, cluster: Option<f32>, vector: Option<f32>, text: Option<f32>) -> CandidateEntity {
        CandidateEntity {
            entity_id: id.to_string(),
            cluster_score: cluster,
            vector_score: vector,
            text_score: text,
            rerank_score: None,
            factors: None,
        }
    }

    #[test]
    fn merge_keeps_both_scores_on_overlap() {
        let cluster = vec![candidate("e1", Some(0.8), None, None)];
        let hybrid = vec![candidate("e1", None, Some(0.6), Some(0.4))];
        let merged = merge(cluster, hybrid);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].cluster_score, Some(0.8));
        assert_eq!(merged[0].vector_score, Some(0.6));
    }

    #[test]
    fn merge_is_union_by_entity_id() {
        let cluster = vec![candidate("e1", Some(0.8), None, None)];
        let hybrid = vec![candidate("e2", None, Some(0.6), Some(0.4))];
        let merged = merge(cluster, hybrid);
        assert_eq!(merged.len(), 2);
    }
}
