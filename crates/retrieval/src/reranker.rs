//! Reranker (spec §4.7)
//!
//! Weighted seven-factor scorer over CandidateRetriever's output. The
//! cross-encoder (f1) is the single batched, timeout-bounded external
//! call; every other factor is computed locally from already-available
//! state (ConversationContext, ConversationMemoryEntry, Entity metadata).
//!
//! On cross-encoder timeout/failure, falls back to ranking by f2 (lexical)
//! alone rather than attempting a degraded weighted sum — a cross-encoder
//! failure means f1 is meaningless, not merely delayed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ragbridge_config::settings::RerankerWeights;
use ragbridge_core::error::Result;
use ragbridge_core::state::{CandidateEntity, ConversationContext, Diagnostics, RerankFactors};
use ragbridge_core::traits::CrossEncoder;
use ragbridge_core::types::{ConversationMemoryEntry, Entity, Intent};

/// Domains actionable under `Intent::Control` (spec §4.7 f5).
const ACTIONABLE_DOMAINS: &[&str] = &["light", "switch", "climate", "lock", "cover", "media_player", "fan", "vacuum"];

/// Half-life for the memory-boost time decay (spec §4.7 f6: "decayed by
/// turns since last seen" — approximated here by wall-clock recency since
/// `ConversationMemoryEntry` only tracks timestamps, not turn indices).
const MEMORY_BOOST_HALF_LIFE_MINUTES: f64 = 5.0;
/// Age at which f7 recency bottoms out at 0 (spec §4.7 f7).
const RECENCY_FLOOR_HOURS: f64 = 24.0;

fn area_match(entity: &Entity, context: &ConversationContext) -> f32 {
    entity
        .area_id
        .as_deref()
        .map(|a| context.areas.iter().any(|c| c == a))
        .unwrap_or(false) as u8 as f32
}

fn domain_match(entity: &Entity, context: &ConversationContext) -> f32 {
    context.domains.iter().any(|d| d == &entity.domain) as u8 as f32
}

fn intent_fit(entity: &Entity, context: &ConversationContext) -> f32 {
    match context.intent {
        Some(Intent::Control) => ACTIONABLE_DOMAINS.contains(&entity.domain.as_str()) as u8 as f32,
        Some(Intent::Read) => 1.0,
        Some(Intent::Unknown) | None => 0.5,
    }
}

fn memory_boost(entity_id: &str, memory: Option<&ConversationMemoryEntry>, now: chrono::DateTime<chrono::Utc>) -> f32 {
    let Some(memory) = memory else { return 0.0 };
    let Some(entry) = memory.entities.get(entity_id) else { return 0.0 };
    let elapsed_minutes = (now - entry.last_seen).num_seconds().max(0) as f64 / 60.0;
    let decay = 0.5f64.powf(elapsed_minutes / MEMORY_BOOST_HALF_LIFE_MINUTES);
    (decay as f32).clamp(0.0, 1.0)
}

fn recency(entity: &Entity, now: chrono::DateTime<chrono::Utc>) -> f32 {
    let Some(last_updated) = entity.last_updated else { return 0.0 };
    let age_hours = (now - last_updated).num_seconds().max(0) as f32 / 3600.0;
    (1.0 - age_hours / RECENCY_FLOOR_HOURS as f32).clamp(0.0, 1.0)
}

fn weighted_score(factors: &RerankFactors, weights: &RerankerWeights) -> f32 {
    factors.semantic * weights.semantic
        + factors.lexical * weights.lexical
        + factors.area_match * weights.area_match
        + factors.domain_match * weights.domain_match
        + factors.intent_fit * weights.intent_fit
        + factors.memory_boost * weights.memory_boost
        + factors.recency * weights.recency
}

/// Score and sort candidates, truncating to `optimal_k` (spec §4.7).
#[allow(clippy::too_many_arguments)]
pub async fn rerank(
    candidates: Vec<CandidateEntity>,
    entities: &[Entity],
    query: &str,
    context: &ConversationContext,
    memory: Option<&ConversationMemoryEntry>,
    cross_encoder: &Arc<dyn CrossEncoder>,
    weights: &RerankerWeights,
    optimal_k: usize,
    timeout: Duration,
    diagnostics: &mut Diagnostics,
) -> Vec<CandidateEntity> {
    if candidates.is_empty() {
        return candidates;
    }

    let weights = weights.normalized();
    let by_id: HashMap<&str, &Entity> = entities.iter().map(|e| (e.id.as_str(), e)).collect();
    let now = chrono::Utc::now();

    let docs: Vec<String> = candidates
        .iter()
        .map(|c| by_id.get(c.entity_id.as_str()).map(|e| e.system_text.clone()).unwrap_or_default())
        .collect();

    let semantic_scores = match tokio::time::timeout(timeout, cross_encoder.score(query, &docs)).await {
        Ok(Ok(scores)) if scores.len() == candidates.len() => Some(scores),
        Ok(Ok(_)) => {
            diagnostics.record_fallback("reranker", "cross-encoder returned mismatched batch size, falling back to f2-only");
            None
        }
        Ok(Err(e)) => {
            diagnostics.record_fallback("reranker", format!("cross-encoder failed, falling back to f2-only: {e}"));
            None
        }
        Err(_) => {
            diagnostics.record_fallback("reranker", "cross-encoder timed out, falling back to f2-only");
            None
        }
    };

    let mut scored: Vec<CandidateEntity> = candidates
        .into_iter()
        .enumerate()
        .map(|(i, mut candidate)| {
            let entity = by_id.get(candidate.entity_id.as_str());
            let lexical = candidate.best_source_score();
            let factors = match (&semantic_scores, entity) {
                (Some(scores), Some(entity)) => RerankFactors {
                    semantic: scores[i],
                    lexical,
                    area_match: area_match(entity, context),
                    domain_match: domain_match(entity, context),
                    intent_fit: intent_fit(entity, context),
                    memory_boost: memory_boost(&candidate.entity_id, memory, now),
                    recency: recency(entity, now),
                },
                (None, Some(entity)) => RerankFactors {
                    semantic: 0.0,
                    lexical,
                    area_match: area_match(entity, context),
                    domain_match: domain_match(entity, context),
                    intent_fit: intent_fit(entity, context),
                    memory_boost: memory_boost(&candidate.entity_id, memory, now),
                    recency: recency(entity, now),
                },
                (_, None) => RerankFactors {
                    semantic: semantic_scores.as_ref().map(|s| s[i]).unwrap_or(0.0),
                    lexical,
                    ..Default::default()
                },
            };

            candidate.rerank_score = Some(if semantic_scores.is_some() {
                weighted_score(&factors, &weights)
            } else {
                factors.lexical
            });
            candidate.factors = Some(factors);
            candidate
        })
        .collect();

    scored.sort_by(|a, b| {
        b.rerank_score
            .unwrap_or(0.0)
            .partial_cmp(&a.rerank_score.unwrap_or(0.0))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });
    scored.truncate(optimal_k);
    scored
}

/// Lexical-overlap cross-encoder: no model dependency, used when no ONNX
/// reranker model is configured. TF-IDF-like term weighting rather than
/// plain Jaccard, to better separate specific from generic matches.
pub struct LexicalCrossEncoder;

impl LexicalCrossEncoder {
    const STOPWORDS: &'static [&'static str] = &[
        "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "to", "of", "in", "for", "on", "with",
        "at", "by", "from", "as", "and", "or", "if", "what", "which", "this", "that", "it", "its",
    ];

    fn score_pair(query: &str, document: &str) -> f32 {
        let stopwords: std::collections::HashSet<&str> = Self::STOPWORDS.iter().copied().collect();
        let query_lower = query.to_lowercase();
        let doc_lower = document.to_lowercase();

        let query_terms: Vec<&str> = query_lower
            .split_whitespace()
            .filter(|w| w.len() > 1 && !stopwords.contains(*w))
            .collect();
        if query_terms.is_empty() {
            return 0.0;
        }

        let doc_words: Vec<&str> = doc_lower.split_whitespace().collect();
        let mut total = 0.0f32;
        let mut matched = 0usize;
        for term in &query_terms {
            let tf = doc_words.iter().filter(|w| *w == term).count() as f32;
            if tf > 0.0 {
                matched += 1;
                let idf_approx = (1.0 + term.len() as f32).ln();
                total += tf.sqrt() * idf_approx;
            }
        }
        let coverage = matched as f32 / query_terms.len() as f32;
        let raw = total + coverage * 0.3;
        (raw / (raw + 1.0)).min(1.0)
    }
}

#[async_trait::async_trait]
impl CrossEncoder for LexicalCrossEncoder {
    async fn score(&self, query: &str, docs: &[String]) -> Result<Vec<f32>> {
        Ok(docs.iter().map(|d| Self::score_pair(query, d)).collect())
    }
}

/// ONNX-model-backed cross-encoder, feature-gated behind `onnx`.
pub struct OnnxCrossEncoder {
    #[cfg(feature = "onnx")]
    session: parking_lot::Mutex<ort::session::Session>,
    #[cfg(feature = "onnx")]
    tokenizer: tokenizers::Tokenizer,
    max_seq_len: usize,
}

impl OnnxCrossEncoder {
    #[cfg(feature = "onnx")]
    pub fn new(model_path: impl AsRef<std::path::Path>, tokenizer_path: impl AsRef<std::path::Path>, max_seq_len: usize) -> Result<Self> {
        use crate::error::RetrievalError;
        let session = ort::session::Session::builder()
            .map_err(|e| RetrievalError::Reranker(e.to_string()))?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)
            .map_err(|e| RetrievalError::Reranker(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e| RetrievalError::Reranker(e.to_string()))?;
        let tokenizer = tokenizers::Tokenizer::from_file(tokenizer_path).map_err(|e| RetrievalError::Reranker(e.to_string()))?;
        Ok(Self {
            session: parking_lot::Mutex::new(session),
            tokenizer,
            max_seq_len,
        })
    }

    #[cfg(feature = "onnx")]
    fn score_pair(&self, query: &str, document: &str) -> Result<f32> {
        use crate::error::RetrievalError;
        use ndarray::Array2;
        use ort::value::Tensor;

        let encoding = self
            .tokenizer
            .encode((query, document), true)
            .map_err(|e| RetrievalError::Reranker(e.to_string()))?;

        let mut ids: Vec<i64> = encoding.get_ids().iter().take(self.max_seq_len).map(|&id| id as i64).collect();
        let mut mask = vec![1i64; ids.len()];
        ids.resize(self.max_seq_len, 0);
        mask.resize(self.max_seq_len, 0);

        let input_ids = Array2::from_shape_vec((1, self.max_seq_len), ids).map_err(|e| RetrievalError::Reranker(e.to_string()))?;
        let attention_mask = Array2::from_shape_vec((1, self.max_seq_len), mask).map_err(|e| RetrievalError::Reranker(e.to_string()))?;

        let input_ids_tensor = Tensor::from_array(input_ids).map_err(|e| RetrievalError::Reranker(e.to_string()))?;
        let attention_tensor = Tensor::from_array(attention_mask).map_err(|e| RetrievalError::Reranker(e.to_string()))?;

        let session = self.session.lock();
        let outputs = session
            .run(ort::inputs![
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_tensor,
            ])
            .map_err(|e| RetrievalError::Reranker(e.to_string()))?;

        let (_, logits) = outputs
            .get("logits")
            .ok_or_else(|| RetrievalError::Reranker("missing logits output".to_string()))?
            .try_extract_tensor::<f32>()
            .map_err(|e| RetrievalError::Reranker(e.to_string()))?;

        Ok(if logits.len() >= 2 {
            let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            let exp_sum: f32 = logits.iter().map(|&x| (x - max).exp()).sum();
            (logits[1] - max).exp() / exp_sum
        } else if logits.len() == 1 {
            1.0 / (1.0 + (-logits[0]).exp())
        } else {
            0.0
        })
    }
}

#[cfg(feature = "onnx")]
#[async_trait::async_trait]
impl CrossEncoder for OnnxCrossEncoder {
    async fn score(&self, query: &str, docs: &[String]) -> Result<Vec<f32>> {
        docs.iter().map(|d| self.score_pair(query, d)).collect()
    }
}

#[cfg(not(feature = "onnx"))]
#[async_trait::async_trait]
impl CrossEncoder for OnnxCrossEncoder {
    async fn score(&self, _query: &str, _docs: &[String]) -> Result<Vec<f32>> {
        Err(ragbridge_core::Error::Internal("OnnxCrossEncoder requires the onnx feature".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ragbridge_core::types::EmbeddingVector;
    use std::collections::HashMap as StdHashMap;

    fn entity(id: &str, domain: &str, area_id: Option<&str>, system_text: &str) -> Entity {
        Entity {
            id: id.to_string(),
            domain: domain.to_string(),
            area_id: area_id.map(String::from),
            area_name: None,
            device_id: None,
            device_name: None,
            friendly_name: id.to_string(),
            device_class: None,
            state: None,
            unit: None,
            last_updated: Some(Utc::now()),
            display_text: id.to_string(),
            system_text: system_text.to_string(),
            embedding: EmbeddingVector(vec![]),
            content_hash: "h".to_string(),
            attributes: StdHashMap::new(),
        }
    }

    fn candidate(id: &str, score: f32) -> CandidateEntity {
        CandidateEntity {
            entity_id: id.to_string(),
            cluster_score: None,
            vector_score: Some(score),
            text_score: None,
            rerank_score: None,
            factors: None,
        }
    }

    #[tokio::test]
    async fn output_is_truncated_to_optimal_k() {
        let entities = vec![
            entity("e1", "light", Some("living_room"), "living room light"),
            entity("e2", "light", Some("kitchen"), "kitchen light"),
            entity("e3", "sensor", Some("kitchen"), "kitchen temperature"),
        ];
        let candidates = vec![candidate("e1", 0.9), candidate("e2", 0.8), candidate("e3", 0.7)];
        let context = ConversationContext::default();
        let cross_encoder: Arc<dyn CrossEncoder> = Arc::new(LexicalCrossEncoder);
        let mut diagnostics = Diagnostics::default();

        let out = rerank(
            candidates,
            &entities,
            "kitchen light",
            &context,
            None,
            &cross_encoder,
            &RerankerWeights::default(),
            2,
            Duration::from_millis(100),
            &mut diagnostics,
        )
        .await;

        assert_eq!(out.len(), 2);
    }

    #[tokio::test]
    async fn ties_break_by_entity_id_ascending() {
        let entities = vec![entity("b", "light", None, "x"), entity("a", "light", None, "x")];
        let candidates = vec![candidate("b", 0.5), candidate("a", 0.5)];
        let context = ConversationContext::default();
        struct ZeroEncoder;
        #[async_trait::async_trait]
        impl CrossEncoder for ZeroEncoder {
            async fn score(&self, _q: &str, docs: &[String]) -> Result<Vec<f32>> {
                Ok(vec![0.0; docs.len()])
            }
        }
        let cross_encoder: Arc<dyn CrossEncoder> = Arc::new(ZeroEncoder);
        let mut diagnostics = Diagnostics::default();

        let out = rerank(
            candidates,
            &entities,
            "query",
            &context,
            None,
            &cross_encoder,
            &RerankerWeights::default(),
            2,
            Duration::from_millis(100),
            &mut diagnostics,
        )
        .await;

        assert_eq!(out[0].entity_id, "a");
    }

    #[tokio::test]
    async fn cross_encoder_timeout_falls_back_to_lexical_only() {
        struct SlowEncoder;
        #[async_trait::async_trait]
        impl CrossEncoder for SlowEncoder {
            async fn score(&self, _q: &str, docs: &[String]) -> Result<Vec<f32>> {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(vec![1.0; docs.len()])
            }
        }
        let entities = vec![entity("e1", "light", None, "x")];
        let candidates = vec![candidate("e1", 0.6)];
        let context = ConversationContext::default();
        let cross_encoder: Arc<dyn CrossEncoder> = Arc::new(SlowEncoder);
        let mut diagnostics = Diagnostics::default();

        let out = rerank(
            candidates,
            &entities,
            "query",
            &context,
            None,
            &cross_encoder,
            &RerankerWeights::default(),
            1,
            Duration::from_millis(5),
            &mut diagnostics,
        )
        .await;

        assert_eq!(out[0].rerank_score, Some(0.6));
        assert_eq!(diagnostics.fallbacks.len(), 1);
    }
}
