//! Pipeline orchestrator (spec §4.1, §4.9)
//!
//! Wires every stage module in this crate together behind a single
//! `Pipeline::run` entry point, in the declared order:
//! ConversationAnalyzer -> QueryRewriter -> ScopeDetector -> QueryExpander
//! -> CandidateRetriever -> Reranker -> ContextFormatter. Each stage's
//! elapsed time lands in `Diagnostics::stage_timings_ms`; every
//! skip/retry/fallback decision from §4.9 is recorded via
//! `Diagnostics::record_fallback`.
//!
//! `Pipeline::run` enqueues the AsyncEnricher snapshot itself at the very
//! end of the request; callers never trigger enrichment separately, and
//! `/process-response` (tool-call execution) has no access to the
//! pipeline at all.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

use ragbridge_config::settings::SimilarityThresholds;
use ragbridge_config::{AliasTables, Settings};
use ragbridge_core::state::RAGState;
use ragbridge_core::traits::{CrossEncoder, DocumentStore, EmbeddingBackend, LlmClient};

use crate::async_enricher::{AsyncEnricher, EnrichmentJob};
use crate::conversation_memory::{spawn_sweeper, ConversationMemory};
use crate::{conversation_analyzer, context_formatter, query_expansion, query_rewriter, reranker, retriever, scope_detector};

/// Process-scoped pipeline: one instance is built at startup and shared
/// (behind an `Arc`, owned by the server crate) across every request.
pub struct Pipeline {
    settings: Settings,
    aliases: AliasTables,
    embedder: Arc<dyn EmbeddingBackend>,
    store: Arc<dyn DocumentStore>,
    llm: Option<Arc<dyn LlmClient>>,
    cross_encoder: Arc<dyn CrossEncoder>,
    memory: Arc<ConversationMemory>,
    enricher: Option<AsyncEnricher>,
    rewrite_cache: query_rewriter::RewriteCache,
    _sweeper: tokio::task::JoinHandle<()>,
}

impl Pipeline {
    pub fn new(
        settings: Settings,
        aliases: AliasTables,
        embedder: Arc<dyn EmbeddingBackend>,
        store: Arc<dyn DocumentStore>,
        llm: Option<Arc<dyn LlmClient>>,
        cross_encoder: Arc<dyn CrossEncoder>,
    ) -> Self {
        let memory = Arc::new(ConversationMemory::new(
            settings.memory.ttl_seconds,
            settings.memory.max_entries_per_session,
        ));
        let sweeper = spawn_sweeper(Arc::clone(&memory), Duration::from_secs(settings.memory.sweep_interval_secs));
        let enricher = llm.clone().map(|llm| {
            AsyncEnricher::spawn(
                settings.enricher.workers,
                settings.enricher.queue_capacity,
                llm,
                Arc::clone(&memory),
                Duration::from_millis(settings.query.rewrite_timeout_ms),
            )
        });

        let rewrite_cache = query_rewriter::RewriteCache::new(settings.query.rewrite_cache_size);

        Self {
            settings,
            aliases,
            embedder,
            store,
            llm,
            cross_encoder,
            memory,
            enricher,
            rewrite_cache,
            _sweeper: sweeper,
        }
    }

    pub fn memory(&self) -> &Arc<ConversationMemory> {
        &self.memory
    }

    /// Enqueue the end-of-request enrichment snapshot (spec §5: "a
    /// snapshot of (session id, final rewritten query, top entities,
    /// timings) is enqueued"). `summary_prompt`'s two-turn shape is reused
    /// here with the rewritten query standing in for the user's turn and
    /// a compact listing of the surfaced entities standing in for the
    /// assistant's, since there's no actual assistant turn at this point
    /// in the request - timings live in Diagnostics, not in the prompt.
    /// Fire-and-forget; returns `false` if there is no configured LLM or
    /// the queue was full.
    fn enqueue_enrichment(&self, session_id: &str, rewritten_query: &str, reranked: &[ragbridge_core::state::CandidateEntity]) -> bool {
        let Some(enricher) = &self.enricher else { return false };
        let top_entities = reranked
            .iter()
            .take(6)
            .map(|c| c.entity_id.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        enricher.enqueue(EnrichmentJob {
            session_id: session_id.to_string(),
            user_turn: rewritten_query.to_string(),
            assistant_turn: format!("surfaced entities: {top_entities}"),
        })
    }

    pub fn enrichment_dropped_count(&self) -> u64 {
        self.enricher.as_ref().map(|e| e.dropped_count()).unwrap_or(0)
    }

    /// Run the full query-time pipeline, mutating and returning `state`
    /// with every stage's output and diagnostics populated. Every stage is
    /// individually resilient (fallback on timeout/error per §4.9), so a
    /// truly empty result is a valid, diagnosable outcome, not an error.
    /// The request-scoped deadline (`state.request_deadline`) is checked
    /// before every stage dispatch; once it's passed, no further stage
    /// runs and the `Error::DeadlineExceeded` kind is recorded in
    /// `diagnostics.errors` rather than aborting the whole response.
    pub async fn run(&self, mut state: RAGState) -> RAGState {
        'pipeline: {
            let t0 = Instant::now();
            if self.deadline_exceeded(&mut state, "conversation_analyzer") {
                break 'pipeline;
            }
            let context = conversation_analyzer::analyze_conversation(&state.turns, &self.aliases);
            state.diagnostics.record_timing("conversation_analyzer", t0.elapsed());

            let raw_query = state.latest_user_turn().map(|t| t.content.clone()).unwrap_or_default();

            // Skip QueryRewriter when the analyzer is unsure and there's no
            // history to rewrite from anyway (§4.9).
            let skip_rewrite = context.confidence < 0.3 && state.turns.len() <= 1;
            if skip_rewrite {
                state.diagnostics.record_fallback("query_rewriter", "skipped: low analyzer confidence on a single-turn conversation");
            }

            if self.deadline_exceeded(&mut state, "query_rewriter") {
                break 'pipeline;
            }
            let t0 = Instant::now();
            let rewritten = query_rewriter::rewrite_query(
                &state.turns,
                &context,
                if skip_rewrite { None } else { self.llm.as_ref() },
                self.settings.query.rewrite_enabled && !skip_rewrite,
                Duration::from_millis(self.settings.query.rewrite_timeout_ms),
                &self.rewrite_cache,
            )
            .await;
            state.diagnostics.record_timing("query_rewriter", t0.elapsed());
            state.rewritten_query = Some(rewritten.clone());
            state.context = Some(context.clone());

            if self.deadline_exceeded(&mut state, "scope_detector") {
                break 'pipeline;
            }
            let t0 = Instant::now();
            let scope_decision = scope_detector::detect_scope(
                &rewritten,
                &context,
                &self.settings.scope_ranges,
                self.llm.as_ref(),
                Duration::from_millis(ragbridge_config::constants::timeouts::SCOPE_MS),
            )
            .await;
            state.diagnostics.record_timing("scope_detector", t0.elapsed());
            state.diagnostics.scope = Some(scope_decision.scope);
            state.diagnostics.optimal_k = Some(scope_decision.optimal_k);
            state.scope = Some(scope_decision.clone());

            // Skip QueryExpander when the rewrite changed nothing and this
            // isn't a follow-up: the original query is already the best query.
            let skip_expand = rewritten == raw_query && !context.is_follow_up;
            if skip_expand {
                state.diagnostics.record_fallback("query_expander", "skipped: rewrite is unchanged and not a follow-up");
            }

            if self.deadline_exceeded(&mut state, "query_expander") {
                break 'pipeline;
            }
            let t0 = Instant::now();
            let variants = if self.settings.query.expansion_enabled && !skip_expand {
                let expander = query_expansion::QueryExpander::new(self.aliases.clone(), self.settings.query.expansion_max_variants);
                expander.expand(&rewritten).variants
            } else {
                vec![rewritten.clone()]
            };
            state.diagnostics.record_timing("query_expander", t0.elapsed());
            state.query_variants = variants.clone();

            if self.deadline_exceeded(&mut state, "candidate_retriever") {
                break 'pipeline;
            }
            let t0 = Instant::now();
            let mut candidates = retriever::retrieve_candidates(
                &rewritten,
                &variants,
                scope_decision.scope,
                scope_decision.optimal_k,
                &self.embedder,
                &self.store,
                &self.settings.similarity,
                self.settings.retriever.cluster_top_m,
                self.settings.retriever.cluster_embed_fanout,
                self.settings.retriever.hybrid_vector_weight,
                None,
                &mut state.diagnostics,
            )
            .await;

            // Empty first pass: retry once with thresholds floored and K doubled (§4.9).
            if candidates.is_empty() {
                state.diagnostics.record_fallback("candidate_retriever", "empty result, retrying with minimum threshold and 2x K");
                let relaxed = SimilarityThresholds {
                    minimum: 0.0,
                    ..self.settings.similarity.clone()
                };
                candidates = retriever::retrieve_candidates(
                    &rewritten,
                    &variants,
                    scope_decision.scope,
                    scope_decision.optimal_k * 2,
                    &self.embedder,
                    &self.store,
                    &relaxed,
                    self.settings.retriever.cluster_top_m,
                    self.settings.retriever.cluster_embed_fanout,
                    self.settings.retriever.hybrid_vector_weight,
                    None,
                    &mut state.diagnostics,
                )
                .await;
            }
            state.diagnostics.record_timing("candidate_retriever", t0.elapsed());
            state.candidates = candidates.clone();

            let mut entities = self.fetch_entities(&candidates, &mut state).await;

            let memory_entry = self.memory.get(&state.session_id);

            if self.deadline_exceeded(&mut state, "reranker") {
                break 'pipeline;
            }
            let t0 = Instant::now();
            let mut reranked = reranker::rerank(
                candidates,
                &entities,
                &rewritten,
                &context,
                memory_entry.as_ref(),
                &self.cross_encoder,
                &self.settings.reranker.weights,
                scope_decision.optimal_k,
                Duration::from_millis(self.settings.reranker.timeout_ms),
                &mut state.diagnostics,
            )
            .await;
            state.diagnostics.record_timing("reranker", t0.elapsed());

            // Re-expand and re-retrieve once if the top result is below the
            // acceptable similarity band (§4.9). This block runs at most once
            // per request by construction - there is no surrounding loop.
            let top_score = reranked.first().and_then(|c| c.rerank_score).unwrap_or(0.0);
            if !reranked.is_empty() && top_score < self.settings.similarity.acceptable && !self.deadline_exceeded(&mut state, "reranker") {
                state
                    .diagnostics
                    .record_fallback("reranker", "top score below acceptable threshold, re-expanding and re-retrieving once");
                let wider_expander =
                    query_expansion::QueryExpander::new(self.aliases.clone(), (self.settings.query.expansion_max_variants).max(3));
                let wider_variants = wider_expander.expand(&rewritten).variants;
                let retry_candidates = retriever::retrieve_candidates(
                    &rewritten,
                    &wider_variants,
                    scope_decision.scope,
                    scope_decision.optimal_k,
                    &self.embedder,
                    &self.store,
                    &self.settings.similarity,
                    self.settings.retriever.cluster_top_m,
                    self.settings.retriever.cluster_embed_fanout,
                    self.settings.retriever.hybrid_vector_weight,
                    None,
                    &mut state.diagnostics,
                )
                .await;

                if !retry_candidates.is_empty() {
                    entities = self.fetch_entities(&retry_candidates, &mut state).await;
                    reranked = reranker::rerank(
                        retry_candidates,
                        &entities,
                        &rewritten,
                        &context,
                        memory_entry.as_ref(),
                        &self.cross_encoder,
                        &self.settings.reranker.weights,
                        scope_decision.optimal_k,
                        Duration::from_millis(self.settings.reranker.timeout_ms),
                        &mut state.diagnostics,
                    )
                    .await;
                }
            }
            state.reranked = reranked.clone();

            if self.deadline_exceeded(&mut state, "context_formatter") {
                break 'pipeline;
            }
            let t0 = Instant::now();
            let formatted = context_formatter::format_context(
                &reranked,
                &entities,
                scope_decision.scope,
                self.settings.formatter.max_chars,
                self.settings.formatter.hard_cap_chars,
            );
            state.diagnostics.record_timing("context_formatter", t0.elapsed());
            state.formatted_context = Some(formatted.text);

            let surfaced_ids: Vec<String> = reranked.iter().map(|c| c.entity_id.clone()).collect();
            self.memory.record_turn(&state.session_id, &surfaced_ids);
            self.enqueue_enrichment(&state.session_id, &rewritten, &reranked);
        }

        state
    }

    /// Checks the request-scoped deadline before a stage dispatch (§4.1).
    /// Records `Error::DeadlineExceeded` into diagnostics and returns
    /// `true` if it has already passed; a request with no deadline set
    /// never trips this.
    fn deadline_exceeded(&self, state: &mut RAGState, stage: &'static str) -> bool {
        if !state.deadline_exceeded(Utc::now()) {
            return false;
        }
        let err = ragbridge_core::Error::DeadlineExceeded { stage };
        state.diagnostics.errors.push(err.to_string());
        state.diagnostics.record_fallback(stage, "skipped: request deadline exceeded");
        true
    }

    async fn fetch_entities(
        &self,
        candidates: &[ragbridge_core::state::CandidateEntity],
        state: &mut RAGState,
    ) -> Vec<ragbridge_core::types::Entity> {
        if candidates.is_empty() {
            return Vec::new();
        }
        let ids: Vec<String> = candidates.iter().map(|c| c.entity_id.clone()).collect();
        match self.store.get_entities(&ids).await {
            Ok(entities) => entities,
            Err(e) => {
                state
                    .diagnostics
                    .record_fallback("candidate_retriever", format!("failed to fetch entity details: {e}"));
                Vec::new()
            }
        }
    }
}

/// Wall-clock helper kept separate from `RAGState::deadline_exceeded` so
/// callers building a deadline from a per-request timeout don't need to
/// reach into `chrono` themselves.
pub fn deadline_from_now(timeout: Duration) -> chrono::DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ragbridge_core::error::Result;
    use ragbridge_core::traits::{EmbeddingKind, ScoredEntityId, SearchFilter};
    use ragbridge_core::types::{Cluster, ConversationTurn, Entity, EmbeddingVector, Scope, TurnRole};
    use std::collections::HashMap;

    struct FakeEmbedder;
    #[async_trait]
    impl EmbeddingBackend for FakeEmbedder {
        async fn embed(&self, texts: &[String], _kind: EmbeddingKind) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.1, 0.2, 0.3]).collect())
        }
        fn dimension(&self) -> usize {
            3
        }
    }

    struct FakeStore {
        entities: Vec<Entity>,
    }

    #[async_trait]
    impl DocumentStore for FakeStore {
        async fn vector_search(&self, _vector: &[f32], k: usize, _filter: Option<&SearchFilter>) -> Result<Vec<ScoredEntityId>> {
            Ok(self
                .entities
                .iter()
                .take(k)
                .map(|e| ScoredEntityId {
                    entity_id: e.id.clone(),
                    vector_score: 0.9,
                    text_score: 0.0,
                })
                .collect())
        }

        async fn hybrid_search(&self, _vector: &[f32], _text: &str, k: usize, _filter: Option<&SearchFilter>) -> Result<Vec<ScoredEntityId>> {
            Ok(self
                .entities
                .iter()
                .take(k)
                .map(|e| ScoredEntityId {
                    entity_id: e.id.clone(),
                    vector_score: 0.8,
                    text_score: 0.5,
                })
                .collect())
        }

        async fn get_entities(&self, ids: &[String]) -> Result<Vec<Entity>> {
            Ok(self.entities.iter().filter(|e| ids.contains(&e.id)).cloned().collect())
        }

        async fn get_cluster_embeddings(&self) -> Result<Vec<Cluster>> {
            Ok(Vec::new())
        }

        async fn get_cluster_members(&self, _cluster_id: &str) -> Result<Vec<(String, f32)>> {
            Ok(Vec::new())
        }
    }

    fn entity(id: &str, domain: &str, area: &str) -> Entity {
        Entity {
            id: id.to_string(),
            domain: domain.to_string(),
            area_id: Some(area.to_string()),
            area_name: Some(area.to_string()),
            device_id: None,
            device_name: None,
            friendly_name: id.to_string(),
            device_class: None,
            state: Some("on".to_string()),
            unit: None,
            last_updated: Some(Utc::now()),
            display_text: id.to_string(),
            system_text: format!("{area} {domain} {id}"),
            embedding: EmbeddingVector(vec![0.1, 0.2, 0.3]),
            content_hash: "h".to_string(),
            attributes: HashMap::new(),
        }
    }

    fn turn(content: &str) -> ConversationTurn {
        ConversationTurn {
            role: TurnRole::User,
            content: content.to_string(),
            position: 0,
        }
    }

    fn pipeline(entities: Vec<Entity>) -> Pipeline {
        Pipeline::new(
            Settings::default(),
            AliasTables::default(),
            Arc::new(FakeEmbedder),
            Arc::new(FakeStore { entities }),
            None,
            Arc::new(crate::reranker::LexicalCrossEncoder),
        )
    }

    #[tokio::test]
    async fn end_to_end_run_produces_formatted_context() {
        let entities = vec![entity("light.kitchen", "light", "kitchen")];
        let p = pipeline(entities);
        let state = RAGState::new(vec![turn("turn on the kitchen light")], "s1");

        let out = p.run(state).await;

        assert!(out.formatted_context.is_some());
        assert!(!out.reranked.is_empty());
        assert!(out.diagnostics.stage_timings_ms.contains_key("reranker"));
    }

    #[tokio::test]
    async fn empty_store_produces_empty_candidates_without_panicking() {
        let p = pipeline(Vec::new());
        let state = RAGState::new(vec![turn("how is my house doing")], "s2");

        let out = p.run(state).await;

        assert!(out.candidates.is_empty());
        assert_eq!(out.diagnostics.scope, Some(Scope::Overview));
    }

    #[tokio::test]
    async fn end_of_request_records_conversation_memory() {
        let entities = vec![entity("light.kitchen", "light", "kitchen")];
        let p = pipeline(entities);
        let state = RAGState::new(vec![turn("turn on the kitchen light")], "s3");

        let _ = p.run(state).await;

        assert!(p.memory().get("s3").is_some());
    }

    #[tokio::test]
    async fn run_without_configured_llm_never_drops_enrichment_jobs() {
        let p = pipeline(Vec::new());
        let state = RAGState::new(vec![turn("what about the kitchen")], "s4");

        let _ = p.run(state).await;

        assert_eq!(p.enrichment_dropped_count(), 0);
    }
}
