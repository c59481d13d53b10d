//! HTTP endpoints (spec §6.1)
//!
//! Three retrieval-facing routes plus the ambient health/metrics/admin
//! surface. `/process-response` is a deliberate stub: the spec scopes tool
//! execution against the smart-home controller out of this service, on the
//! condition that the handler never touches `AppState::pipeline`.

use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use ragbridge_core::state::{CandidateEntity, Diagnostics};
use ragbridge_core::types::{ConversationTurn, Scope, TurnRole};
use ragbridge_core::Error;

use crate::metrics::{metrics_handler, record_fallback, record_request, record_request_latency};
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    let (cors_layer, timeout_layer) = {
        let config = state.get_config();
        (
            build_cors_layer(&config.server.cors_origins, config.server.cors_enabled),
            TimeoutLayer::new(Duration::from_millis(config.server.request_timeout_ms)),
        )
    };

    Router::new()
        .route("/process-request", post(process_request))
        .route("/process-request-workflow", post(process_request_workflow))
        .route("/process-response", post(process_response))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .route("/admin/reload-config", post(reload_config))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors_layer)
        // Hard backstop on top of Pipeline::run's stage-boundary deadline
        // check (§4.1): a stage stuck inside a single await (e.g. a slow
        // document-store round trip) still gets cut off at the HTTP layer.
        .layer(timeout_layer)
        .with_state(state)
}

fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        return CorsLayer::permissive();
    }
    if origins.is_empty() {
        return CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    }
    let parsed: Vec<_> = origins
        .iter()
        .filter_map(|o| o.parse::<axum::http::HeaderValue>().ok())
        .collect();
    if parsed.is_empty() {
        return CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    }
    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods(Any)
        .allow_headers(Any)
        .allow_credentials(true)
}

/// Request-scoped deadline from `server.request_timeout_ms` (§4.1), checked
/// by `Pipeline::run` before every stage dispatch.
fn request_deadline(state: &AppState) -> chrono::DateTime<chrono::Utc> {
    let timeout_ms = state.get_config().server.request_timeout_ms;
    ragbridge_retrieval::deadline_from_now(std::time::Duration::from_millis(timeout_ms))
}

fn error_response(err: Error) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &err {
        Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        Error::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::DeadlineExceeded { .. } => StatusCode::GATEWAY_TIMEOUT,
        Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = Json(serde_json::json!({
        "error": {
            "kind": err.kind(),
            "message": err.to_string(),
            "retriable": err.retriable(),
        }
    }));
    (status, body)
}

#[derive(Debug, Deserialize)]
struct ProcessRequestBody {
    user_message: String,
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ProcessRequestWorkflowBody {
    messages: Option<Vec<ChatMessage>>,
    user_message: Option<String>,
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct RelevantEntity {
    entity_id: String,
    rerank_score: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ProcessRequestResponse {
    relevant_entities: Vec<RelevantEntity>,
    formatted_content: String,
    diagnostics: Diagnostics,
}

#[derive(Debug, Serialize)]
struct ProcessRequestWorkflowResponse {
    relevant_entities: Vec<RelevantEntity>,
    formatted_content: String,
    diagnostics: Diagnostics,
    workflow_quality: String,
    scope: Option<Scope>,
    optimal_k: Option<usize>,
    stage_timings: std::collections::HashMap<String, u64>,
}

fn relevant_entities(reranked: &[CandidateEntity]) -> Vec<RelevantEntity> {
    reranked
        .iter()
        .map(|c| RelevantEntity {
            entity_id: c.entity_id.clone(),
            rerank_score: c.rerank_score,
        })
        .collect()
}

/// Coarse quality label for the workflow hook, derived from the same
/// similarity bands the reranker fallback uses (§4.7) — not specified
/// verbatim in spec.md, resolved as an Open Question in DESIGN.md.
fn workflow_quality(reranked: &[CandidateEntity], acceptable: f32, good: f32, excellent: f32) -> String {
    let top = reranked.first().and_then(|c| c.rerank_score).unwrap_or(0.0);
    if reranked.is_empty() {
        "empty".to_string()
    } else if top >= excellent {
        "excellent".to_string()
    } else if top >= good {
        "good".to_string()
    } else if top >= acceptable {
        "acceptable".to_string()
    } else {
        "poor".to_string()
    }
}

async fn process_request(
    State(state): State<AppState>,
    Json(body): Json<ProcessRequestBody>,
) -> Result<Json<ProcessRequestResponse>, (StatusCode, Json<serde_json::Value>)> {
    let t0 = Instant::now();
    if body.user_message.trim().is_empty() {
        record_request("process_request", "error");
        return Err(error_response(Error::InvalidRequest("user_message must not be empty".to_string())));
    }

    let session_id = body.session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let turns = vec![ConversationTurn { role: TurnRole::User, content: body.user_message, position: 0 }];
    let mut rag_state = ragbridge_core::state::RAGState::new(turns, session_id);
    rag_state.request_deadline = Some(request_deadline(&state));

    let out = state.pipeline.run(rag_state).await;
    for fallback in &out.diagnostics.fallbacks {
        record_fallback(&fallback.stage);
    }
    record_request("process_request", "ok");
    record_request_latency("process_request", t0.elapsed().as_millis() as f64);

    Ok(Json(ProcessRequestResponse {
        relevant_entities: relevant_entities(&out.reranked),
        formatted_content: out.formatted_context.unwrap_or_default(),
        diagnostics: out.diagnostics,
    }))
}

async fn process_request_workflow(
    State(state): State<AppState>,
    Json(body): Json<ProcessRequestWorkflowBody>,
) -> Result<Json<ProcessRequestWorkflowResponse>, (StatusCode, Json<serde_json::Value>)> {
    let t0 = Instant::now();
    let turns: Vec<ConversationTurn> = match body.messages {
        Some(messages) if !messages.is_empty() => messages
            .into_iter()
            .enumerate()
            .map(|(position, m)| ConversationTurn {
                role: match m.role.as_str() {
                    "assistant" => TurnRole::Assistant,
                    "system" => TurnRole::System,
                    _ => TurnRole::User,
                },
                content: m.content,
                position,
            })
            .collect(),
        _ => {
            let Some(user_message) = body.user_message.filter(|m| !m.trim().is_empty()) else {
                record_request("process_request_workflow", "error");
                return Err(error_response(Error::InvalidRequest(
                    "either messages or user_message is required".to_string(),
                )));
            };
            vec![ConversationTurn { role: TurnRole::User, content: user_message, position: 0 }]
        }
    };

    let session_id = body.session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let mut rag_state = ragbridge_core::state::RAGState::new(turns, session_id);
    rag_state.request_deadline = Some(request_deadline(&state));

    let out = state.pipeline.run(rag_state).await;
    for fallback in &out.diagnostics.fallbacks {
        record_fallback(&fallback.stage);
    }

    let (acceptable, good, excellent) = {
        let config = state.get_config();
        (config.similarity.acceptable, config.similarity.good, config.similarity.excellent)
    };
    let quality = workflow_quality(&out.reranked, acceptable, good, excellent);

    record_request("process_request_workflow", "ok");
    record_request_latency("process_request_workflow", t0.elapsed().as_millis() as f64);

    Ok(Json(ProcessRequestWorkflowResponse {
        relevant_entities: relevant_entities(&out.reranked),
        formatted_content: out.formatted_context.unwrap_or_default(),
        scope: out.diagnostics.scope,
        optimal_k: out.diagnostics.optimal_k,
        stage_timings: out.diagnostics.stage_timings_ms.clone(),
        diagnostics: out.diagnostics,
        workflow_quality: quality,
    }))
}

/// Tool-call execution against the smart-home controller is out of scope
/// (spec §6.1); this handler deliberately never reads `state.pipeline`.
async fn process_response() -> impl IntoResponse {
    (
        StatusCode::NOT_IMPLEMENTED,
        Json(serde_json::json!({
            "error": {
                "kind": "NotImplemented",
                "message": "tool-call execution against the smart-home controller is out of scope",
                "retriable": false,
            }
        })),
    )
}

async fn health_check() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(serde_json::json!({ "status": "healthy", "version": env!("CARGO_PKG_VERSION") })))
}

async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let memory_len = state.pipeline.memory().len();
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ready",
            "conversation_memory_sessions": memory_len,
            "enrichment_dropped_total": state.pipeline.enrichment_dropped_count(),
        })),
    )
}

async fn reload_config(State(state): State<AppState>) -> impl IntoResponse {
    match state.reload_config() {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "status": "success" }))),
        Err(e) => {
            tracing::error!("config reload failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "status": "error", "message": e })))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ragbridge_config::Settings;
    use ragbridge_core::error::Result;
    use ragbridge_core::traits::{DocumentStore, EmbeddingBackend, EmbeddingKind, ScoredEntityId, SearchFilter};
    use ragbridge_core::types::{Cluster, Entity};
    use ragbridge_retrieval::Pipeline;
    use std::sync::Arc;

    struct EmptyEmbedder;
    #[async_trait]
    impl EmbeddingBackend for EmptyEmbedder {
        async fn embed(&self, texts: &[String], _kind: EmbeddingKind) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.0; 3]).collect())
        }
        fn dimension(&self) -> usize {
            3
        }
    }

    struct EmptyStore;
    #[async_trait]
    impl DocumentStore for EmptyStore {
        async fn vector_search(&self, _vector: &[f32], _k: usize, _filter: Option<&SearchFilter>) -> Result<Vec<ScoredEntityId>> {
            Ok(Vec::new())
        }
        async fn hybrid_search(&self, _vector: &[f32], _text: &str, _k: usize, _filter: Option<&SearchFilter>) -> Result<Vec<ScoredEntityId>> {
            Ok(Vec::new())
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

    fn test_state() -> AppState {
        let pipeline = Pipeline::new(
            Settings::default(),
            ragbridge_config::AliasTables::default(),
            Arc::new(EmptyEmbedder),
            Arc::new(EmptyStore),
            None,
            Arc::new(ragbridge_retrieval::LexicalCrossEncoder),
        );
        AppState::new(Arc::new(pipeline), crate::metrics::test_handle(), Settings::default(), None)
    }

    #[test]
    fn router_builds_with_every_route() {
        let _ = create_router(test_state());
    }

    #[tokio::test]
    async fn process_request_rejects_empty_message() {
        let state = test_state();
        let result = process_request(
            State(state),
            Json(ProcessRequestBody { user_message: "   ".to_string(), session_id: None }),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn process_request_workflow_requires_messages_or_user_message() {
        let state = test_state();
        let result = process_request_workflow(
            State(state),
            Json(ProcessRequestWorkflowBody { messages: None, user_message: None, session_id: None }),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn process_response_never_touches_pipeline_state() {
        let response = process_response().await.into_response();
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    }
}
