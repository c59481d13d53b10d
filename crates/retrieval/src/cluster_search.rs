//! ClusterSearch (spec §4.6.1)
//!
//! For each query variant, embed it and compare against all cluster
//! embeddings by cosine similarity; select the top M clusters restricted
//! to cluster types compatible with the detected scope, then emit their
//! members with `cluster_score = cluster_similarity * membership_weight`.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;

use ragbridge_core::error::Result;
use ragbridge_core::state::CandidateEntity;
use ragbridge_core::traits::{DocumentStore, EmbeddingBackend, EmbeddingKind};
use ragbridge_core::types::{Cluster, Scope};

/// Run cluster search across every query variant, bounded fan-out for the
/// per-variant embedding lookups (default 4, spec §5).
pub async fn cluster_search(
    variants: &[String],
    scope: Scope,
    top_m: usize,
    embed_fanout: usize,
    embedder: &Arc<dyn EmbeddingBackend>,
    store: &Arc<dyn DocumentStore>,
) -> Result<Vec<CandidateEntity>> {
    let clusters = store.get_cluster_embeddings().await?;
    if clusters.is_empty() {
        return Ok(Vec::new());
    }

    let compatible_types = ragbridge_core::types::ClusterType::compatible_with(scope);
    let eligible: Vec<&Cluster> = clusters
        .iter()
        .filter(|c| compatible_types.contains(&c.cluster_type))
        .collect();

    let mut best_similarity: HashMap<String, f32> = HashMap::new();

    for chunk in variants.chunks(embed_fanout.max(1)) {
        let lookups = chunk.iter().map(|variant| {
            let embedder = Arc::clone(embedder);
            let variant = variant.clone();
            async move { embedder.embed(&[variant], EmbeddingKind::Query).await }
        });

        for result in join_all(lookups).await {
            let Ok(vectors) = result else { continue };
            let Some(query_vec) = vectors.into_iter().next() else { continue };
            let query_embedding = ragbridge_core::types::EmbeddingVector(query_vec);

            for cluster in &eligible {
                let similarity = cluster.embedding.cosine_similarity(&query_embedding);
                best_similarity
                    .entry(cluster.id.clone())
                    .and_modify(|existing| {
                        if similarity > *existing {
                            *existing = similarity;
                        }
                    })
                    .or_insert(similarity);
            }
        }
    }

    let mut ranked: Vec<(&Cluster, f32)> = eligible
        .into_iter()
        .filter_map(|c| best_similarity.get(&c.id).map(|&sim| (c, sim)))
        .collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(top_m);

    let mut candidates: HashMap<String, CandidateEntity> = HashMap::new();
    for (cluster, similarity) in ranked {
        let members = store.get_cluster_members(&cluster.id).await?;
        for (entity_id, weight) in members {
            let score = similarity * weight;
            candidates
                .entry(entity_id.clone())
                .and_modify(|c| {
                    let existing = c.cluster_score.unwrap_or(0.0);
                    if score > existing {
                        c.cluster_score = Some(score);
                    }
                })
                .or_insert(CandidateEntity {
                    entity_id,
                    cluster_score: Some(score),
                    ..Default::default()
                });
        }
    }

    Ok(candidates.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ragbridge_core::traits::{ScoredEntityId, SearchFilter};
    use ragbridge_core::types::{ClusterType, Entity, EmbeddingVector};

    struct FakeEmbedder;
    #[async_trait]
    impl EmbeddingBackend for FakeEmbedder {
        async fn embed(&self, texts: &[String], _kind: EmbeddingKind) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
        fn dimension(&self) -> usize {
            2
        }
    }

    struct FakeStore {
        clusters: Vec<Cluster>,
        members: HashMap<String, Vec<(String, f32)>>,
    }

    #[async_trait]
    impl DocumentStore for FakeStore {
        async fn vector_search(&self, _v: &[f32], _k: usize, _f: Option<&SearchFilter>) -> Result<Vec<ScoredEntityId>> {
            Ok(Vec::new())
        }
        async fn hybrid_search(&self, _v: &[f32], _t: &str, _k: usize, _f: Option<&SearchFilter>) -> Result<Vec<ScoredEntityId>> {
            Ok(Vec::new())
        }
        async fn get_entities(&self, _ids: &[String]) -> Result<Vec<Entity>> {
            Ok(Vec::new())
        }
        async fn get_cluster_embeddings(&self) -> Result<Vec<Cluster>> {
            Ok(self.clusters.clone())
        }
        async fn get_cluster_members(&self, cluster_id: &str) -> Result<Vec<(String, f32)>> {
            Ok(self.members.get(cluster_id).cloned().unwrap_or_default())
        }
    }

    fn cluster(id: &str, cluster_type: ClusterType) -> Cluster {
        Cluster {
            id: id.to_string(),
            name: id.to_string(),
            cluster_type,
            scope_label: "living_room".to_string(),
            tags: Vec::new(),
            description: None,
            embedding: EmbeddingVector(vec![1.0, 0.0]),
        }
    }

    #[tokio::test]
    async fn restricts_to_compatible_cluster_types() {
        let store: Arc<dyn DocumentStore> = Arc::new(FakeStore {
            clusters: vec![cluster("c1", ClusterType::Micro), cluster("c2", ClusterType::Overview)],
            members: HashMap::from([
                ("c1".to_string(), vec![("e1".to_string(), 1.0)]),
                ("c2".to_string(), vec![("e2".to_string(), 1.0)]),
            ]),
        });
        let embedder: Arc<dyn EmbeddingBackend> = Arc::new(FakeEmbedder);

        let candidates = cluster_search(&["q".to_string()], Scope::Micro, 5, 4, &embedder, &store)
            .await
            .unwrap();

        assert!(candidates.iter().any(|c| c.entity_id == "e1"));
        assert!(!candidates.iter().any(|c| c.entity_id == "e2"));
    }

    #[tokio::test]
    async fn empty_clusters_yields_empty_candidates() {
        let store: Arc<dyn DocumentStore> = Arc::new(FakeStore {
            clusters: Vec::new(),
            members: HashMap::new(),
        });
        let embedder: Arc<dyn EmbeddingBackend> = Arc::new(FakeEmbedder);
        let candidates = cluster_search(&["q".to_string()], Scope::Overview, 5, 4, &embedder, &store)
            .await
            .unwrap();
        assert!(candidates.is_empty());
    }
}
