//! `DocumentStore` implementation over Qdrant + the Tantivy sparse index
//! (spec §6.2, §6.4)
//!
//! Three Qdrant collections back the persisted model: `entity`, `cluster`,
//! `cluster_entity`. Ingestion and schema bootstrap are out of scope (§1) —
//! this module only ever reads, except for the `index_entities` hook the
//! (out-of-scope) bulk writer would call after a write to Qdrant.

use std::collections::HashMap;

use async_trait::async_trait;
use qdrant_client::{
    qdrant::{
        condition::ConditionOneOf, point_id::PointIdOptions, r#match::MatchValue, value::Kind,
        Condition, FieldCondition, Filter, Match, PointId, SearchPointsBuilder, Value as QdrantValue,
    },
    Qdrant,
};
use chrono::{DateTime, Utc};

use ragbridge_core::error::Result;
use ragbridge_core::traits::{DocumentStore, ScoredEntityId, SearchFilter};
use ragbridge_core::types::{Cluster, ClusterType, EmbeddingVector, Entity};

use crate::error::RetrievalError;
use crate::sparse_search::SparseIndex;

pub const ENTITY_COLLECTION: &str = "entity";
pub const CLUSTER_COLLECTION: &str = "cluster";
pub const CLUSTER_ENTITY_COLLECTION: &str = "cluster_entity";

pub struct QdrantDocumentStore {
    client: Qdrant,
    sparse: SparseIndex,
}

impl QdrantDocumentStore {
    pub fn new(endpoint: &str, api_key: Option<&str>, sparse: SparseIndex) -> Result<Self> {
        let mut builder = Qdrant::from_url(endpoint);
        if let Some(key) = api_key {
            builder = builder.api_key(key.to_string());
        }
        let client = builder
            .build()
            .map_err(|e| RetrievalError::Connection(e.to_string()))?;
        Ok(Self { client, sparse })
    }

    fn build_filter(filter: Option<&SearchFilter>) -> Option<Filter> {
        let filter = filter?;
        let mut conditions = Vec::new();
        for domain in &filter.domains {
            conditions.push(field_match("domain", domain));
        }
        for area in &filter.areas {
            conditions.push(field_match("area_id", area));
        }
        if conditions.is_empty() {
            None
        } else {
            Some(Filter {
                should: conditions,
                ..Default::default()
            })
        }
    }

    fn point_id_to_string(id: Option<PointId>) -> String {
        id.and_then(|p| p.point_id_options)
            .map(|opts| match opts {
                PointIdOptions::Uuid(u) => u,
                PointIdOptions::Num(n) => n.to_string(),
            })
            .unwrap_or_default()
    }

    fn payload_str(payload: &HashMap<String, QdrantValue>, key: &str) -> Option<String> {
        payload.get(key).and_then(|v| match &v.kind {
            Some(Kind::StringValue(s)) => Some(s.clone()),
            _ => None,
        })
    }

    fn payload_entity(&self, id: String, payload: HashMap<String, QdrantValue>, embedding: Vec<f32>) -> Entity {
        let last_updated = Self::payload_str(&payload, "last_updated")
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Entity {
            id,
            domain: Self::payload_str(&payload, "domain").unwrap_or_default(),
            area_id: Self::payload_str(&payload, "area_id"),
            area_name: Self::payload_str(&payload, "area_name"),
            device_id: Self::payload_str(&payload, "device_id"),
            device_name: Self::payload_str(&payload, "device_name"),
            friendly_name: Self::payload_str(&payload, "friendly_name").unwrap_or_default(),
            device_class: Self::payload_str(&payload, "device_class"),
            state: Self::payload_str(&payload, "state"),
            unit: Self::payload_str(&payload, "unit"),
            last_updated,
            display_text: Self::payload_str(&payload, "display_text").unwrap_or_default(),
            system_text: Self::payload_str(&payload, "system_text").unwrap_or_default(),
            embedding: EmbeddingVector(embedding),
            content_hash: Self::payload_str(&payload, "content_hash").unwrap_or_default(),
            attributes: HashMap::new(),
        }
    }
}

fn field_match(key: &str, value: &str) -> Condition {
    Condition {
        condition_one_of: Some(ConditionOneOf::Field(FieldCondition {
            key: key.to_string(),
            r#match: Some(Match {
                match_value: Some(MatchValue::Keyword(value.to_string())),
            }),
            ..Default::default()
        })),
    }
}

#[async_trait]
impl DocumentStore for QdrantDocumentStore {
    async fn vector_search(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredEntityId>> {
        let mut search = SearchPointsBuilder::new(ENTITY_COLLECTION, vector.to_vec(), k as u64)
            .with_payload(false);
        if let Some(f) = Self::build_filter(filter) {
            search = search.filter(f);
        }

        let response = self
            .client
            .search_points(search)
            .await
            .map_err(|e| RetrievalError::Search(e.to_string()))?;

        Ok(response
            .result
            .into_iter()
            .map(|point| ScoredEntityId {
                entity_id: Self::point_id_to_string(point.id),
                vector_score: point.score,
                text_score: 0.0,
            })
            .collect())
    }

    async fn hybrid_search(
        &self,
        vector: &[f32],
        text: &str,
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredEntityId>> {
        let vector_results = self.vector_search(vector, k, filter).await?;
        let text_results = self.sparse.search(text, k).map_err(ragbridge_core::Error::from)?;

        let max_vector = vector_results.iter().map(|r| r.vector_score).fold(0.0f32, f32::max).max(1e-6);
        let max_text = text_results.iter().map(|r| r.score).fold(0.0f32, f32::max).max(1e-6);

        let mut merged: HashMap<String, ScoredEntityId> = HashMap::new();
        for r in vector_results {
            merged.insert(
                r.entity_id.clone(),
                ScoredEntityId {
                    entity_id: r.entity_id,
                    vector_score: r.vector_score / max_vector,
                    text_score: 0.0,
                },
            );
        }
        for r in text_results {
            merged
                .entry(r.entity_id.clone())
                .and_modify(|e| e.text_score = r.score / max_text)
                .or_insert(ScoredEntityId {
                    entity_id: r.entity_id,
                    vector_score: 0.0,
                    text_score: r.score / max_text,
                });
        }

        let weight = ragbridge_config::constants::retrieval::HYBRID_VECTOR_WEIGHT;
        let mut out: Vec<ScoredEntityId> = merged.into_values().collect();
        out.sort_by(|a, b| {
            let a_score = crate::hybrid_search::combined_score(a.vector_score, a.text_score, weight);
            let b_score = crate::hybrid_search::combined_score(b.vector_score, b.text_score, weight);
            b_score.partial_cmp(&a_score).unwrap_or(std::cmp::Ordering::Equal)
        });
        out.truncate(k);
        Ok(out)
    }

    async fn get_entities(&self, ids: &[String]) -> Result<Vec<Entity>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let point_ids: Vec<PointId> = ids.iter().map(|id| PointId::from(id.clone())).collect();
        let response = self
            .client
            .get_points(qdrant_client::qdrant::GetPointsBuilder::new(ENTITY_COLLECTION, point_ids).with_vectors(true).with_payload(true))
            .await
            .map_err(|e| RetrievalError::DocumentStore(e.to_string()))?;

        Ok(response
            .result
            .into_iter()
            .map(|point| {
                let id = Self::point_id_to_string(point.id);
                let embedding = point
                    .vectors
                    .and_then(|v| v.vectors_options)
                    .and_then(|opts| match opts {
                        qdrant_client::qdrant::vectors::VectorsOptions::Vector(v) => Some(v.data),
                        _ => None,
                    })
                    .unwrap_or_default();
                self.payload_entity(id, point.payload, embedding)
            })
            .collect())
    }

    async fn get_cluster_embeddings(&self) -> Result<Vec<Cluster>> {
        let response = self
            .client
            .scroll(
                qdrant_client::qdrant::ScrollPointsBuilder::new(CLUSTER_COLLECTION)
                    .with_payload(true)
                    .with_vectors(true)
                    .limit(1000),
            )
            .await
            .map_err(|e| RetrievalError::DocumentStore(e.to_string()))?;

        Ok(response
            .result
            .into_iter()
            .map(|point| {
                let id = Self::point_id_to_string(point.id);
                let embedding = point
                    .vectors
                    .and_then(|v| v.vectors_options)
                    .and_then(|opts| match opts {
                        qdrant_client::qdrant::vectors::VectorsOptions::Vector(v) => Some(v.data),
                        _ => None,
                    })
                    .unwrap_or_default();
                let cluster_type = match Self::payload_str(&point.payload, "cluster_type").as_deref() {
                    Some("macro") => ClusterType::Macro,
                    Some("overview") => ClusterType::Overview,
                    _ => ClusterType::Micro,
                };
                Cluster {
                    id: id.clone(),
                    name: Self::payload_str(&point.payload, "name").unwrap_or(id),
                    cluster_type,
                    scope_label: Self::payload_str(&point.payload, "scope_label").unwrap_or_default(),
                    tags: Vec::new(),
                    description: Self::payload_str(&point.payload, "description"),
                    embedding: EmbeddingVector(embedding),
                }
            })
            .collect())
    }

    async fn get_cluster_members(&self, cluster_id: &str) -> Result<Vec<(String, f32)>> {
        let filter = Filter {
            must: vec![field_match("cluster_id", cluster_id)],
            ..Default::default()
        };
        let response = self
            .client
            .scroll(
                qdrant_client::qdrant::ScrollPointsBuilder::new(CLUSTER_ENTITY_COLLECTION)
                    .filter(filter)
                    .with_payload(true)
                    .limit(1000),
            )
            .await
            .map_err(|e| RetrievalError::DocumentStore(e.to_string()))?;

        Ok(response
            .result
            .into_iter()
            .filter_map(|point| {
                let entity_id = Self::payload_str(&point.payload, "entity_id")?;
                let weight = point.payload.get("weight").and_then(|v| match v.kind {
                    Some(Kind::DoubleValue(d)) => Some(d as f32),
                    Some(Kind::IntegerValue(i)) => Some(i as f32),
                    _ => None,
                })?;
                Some((entity_id, weight))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_with_no_domains_or_areas_is_none() {
        let filter = SearchFilter::default();
        assert!(QdrantDocumentStore::build_filter(Some(&filter)).is_none());
    }

    #[test]
    fn filter_with_domains_produces_should_clause() {
        let filter = SearchFilter {
            domains: vec!["light".to_string()],
            areas: vec![],
        };
        let built = QdrantDocumentStore::build_filter(Some(&filter)).unwrap();
        assert_eq!(built.should.len(), 1);
    }
}
