//! RAGState — the mutable carrier threaded through the pipeline (spec §3, §9)
//!
//! Modeled as a plain record: every stage declares, in its own module doc,
//! which fields of `RAGState` it reads and which it writes. The
//! orchestrator does not enforce this at the type level (Rust has no
//! effect system for "this function only touches these struct fields"),
//! but keeps to strict append-only discipline: no stage clears a field
//! written by an earlier stage, and no stage writes a field owned by a
//! later one.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ConversationTurn, Intent, Scope};

/// Output of ConversationAnalyzer (§4.2).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationContext {
    pub areas: Vec<String>,
    pub domains: Vec<String>,
    pub intent: Option<Intent>,
    pub is_follow_up: bool,
    pub confidence: f32,
}

/// Output of ScopeDetector (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeDecision {
    pub scope: Scope,
    pub confidence: f32,
    pub optimal_k: usize,
    pub reasoning: String,
}

/// A retrieval candidate carrying the per-source scores from §4.6 and,
/// once Reranker has run, the per-factor breakdown from §4.7.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidateEntity {
    pub entity_id: String,
    pub cluster_score: Option<f32>,
    pub vector_score: Option<f32>,
    pub text_score: Option<f32>,
    /// Final weighted reranker score, present once Reranker has run.
    pub rerank_score: Option<f32>,
    /// f1..f7 breakdown, present once Reranker has run.
    pub factors: Option<RerankFactors>,
}

impl CandidateEntity {
    /// Best-of vector/text score, used as the f2 "lexical" reranker
    /// factor and as the retrieval-level fallback ranking signal.
    pub fn best_source_score(&self) -> f32 {
        self.vector_score
            .unwrap_or(0.0)
            .max(self.text_score.unwrap_or(0.0))
            .max(self.cluster_score.unwrap_or(0.0))
    }
}

/// Per-entity factor breakdown for diagnostics (§4.7).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RerankFactors {
    pub semantic: f32,
    pub lexical: f32,
    pub area_match: f32,
    pub domain_match: f32,
    pub intent_fit: f32,
    pub memory_boost: f32,
    pub recency: f32,
}

/// One fallback decision recorded by the router (§4.9, §7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackRecord {
    pub stage: String,
    pub reason: String,
}

/// Diagnostics accumulated across the request, surfaced verbatim in the
/// HTTP response (§6.1, §7).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    pub scope: Option<Scope>,
    pub optimal_k: Option<usize>,
    pub stage_timings_ms: HashMap<String, u64>,
    pub fallbacks: Vec<FallbackRecord>,
    pub cluster_skipped: bool,
    pub errors: Vec<String>,
}

impl Diagnostics {
    pub fn record_timing(&mut self, stage: &str, elapsed: Duration) {
        self.stage_timings_ms
            .insert(stage.to_string(), elapsed.as_millis() as u64);
    }

    pub fn record_fallback(&mut self, stage: &str, reason: impl Into<String>) {
        self.fallbacks.push(FallbackRecord {
            stage: stage.to_string(),
            reason: reason.into(),
        });
    }
}

/// The mutable carrier passed through the pipeline (spec §3).
///
/// Owned by the request handler and discarded at end of request, after
/// enqueuing the AsyncEnricher snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RAGState {
    pub turns: Vec<ConversationTurn>,
    pub session_id: String,

    pub rewritten_query: Option<String>,
    pub scope: Option<ScopeDecision>,
    pub query_variants: Vec<String>,
    pub context: Option<ConversationContext>,
    pub candidates: Vec<CandidateEntity>,
    pub reranked: Vec<CandidateEntity>,
    pub formatted_context: Option<String>,
    pub diagnostics: Diagnostics,

    pub request_deadline: Option<DateTime<Utc>>,
}

impl RAGState {
    pub fn new(turns: Vec<ConversationTurn>, session_id: impl Into<String>) -> Self {
        Self {
            turns,
            session_id: session_id.into(),
            rewritten_query: None,
            scope: None,
            query_variants: Vec::new(),
            context: None,
            candidates: Vec::new(),
            reranked: Vec::new(),
            formatted_context: None,
            diagnostics: Diagnostics::default(),
            request_deadline: None,
        }
    }

    /// The latest user turn, if any (ConversationAnalyzer's primary input).
    pub fn latest_user_turn(&self) -> Option<&ConversationTurn> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == crate::types::TurnRole::User)
    }

    pub fn deadline_exceeded(&self, now: DateTime<Utc>) -> bool {
        self.request_deadline.map(|d| now >= d).unwrap_or(false)
    }
}
