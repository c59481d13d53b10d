//! RAG retrieval bridge server entry point

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use ragbridge_config::{constants::endpoints, load_settings, Settings};
use ragbridge_llm::{LocalLlmClient, LocalLlmConfig};
use ragbridge_retrieval::{
    embeddings::EmbeddingConfig, LexicalCrossEncoder, Pipeline, QdrantDocumentStore, SimpleEmbeddingBackend, SparseIndex,
};
use ragbridge_server::{create_router, init_metrics, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env = std::env::var("RAGBRIDGE_ENV").ok();
    let config = match load_settings(env.as_deref()) {
        Ok(settings) => {
            eprintln!("loaded configuration (env: {})", env.as_deref().unwrap_or("default"));
            settings
        }
        Err(e) => {
            eprintln!("failed to load config: {e}. using defaults.");
            Settings::default()
        }
    };

    init_tracing(&config);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting ragbridge-server");
    tracing::info!(environment = ?config.environment, "configuration loaded");

    let metrics_handle = init_metrics();
    tracing::info!(port = config.observability.metrics_port, "initialized prometheus metrics at /metrics");
    let _ = metrics_handle.clone();

    let pipeline = build_pipeline(&config);
    let state = AppState::new(Arc::new(pipeline), metrics_handle, config.clone(), env);

    let app = create_router(state);
    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>().unwrap_or_else(|_| [0, 0, 0, 0].into()),
        config.server.port,
    ));
    tracing::info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    tracing::info!("server shutdown complete");
    Ok(())
}

/// Wires the process-scoped collaborators. The embedder and cross-encoder
/// default to dependency-free implementations (`onnx` feature builds the
/// real ones); the document store and LLM client always talk to the
/// configured Qdrant/Ollama-style endpoints.
fn build_pipeline(config: &Settings) -> Pipeline {
    let embedding_config = EmbeddingConfig {
        dimension: config.embedding.dimension,
        ..EmbeddingConfig::default()
    };
    let embedder: Arc<dyn ragbridge_core::EmbeddingBackend> = Arc::new(SimpleEmbeddingBackend::new(embedding_config));

    let sparse = SparseIndex::new(ragbridge_retrieval::sparse_search::SparseIndexConfig::default())
        .expect("failed to build in-process sparse index");
    let store: Arc<dyn ragbridge_core::DocumentStore> =
        match QdrantDocumentStore::new(&endpoints::QDRANT_DEFAULT, None, sparse) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                tracing::error!(error = %e, "failed to connect to qdrant at startup");
                panic!("qdrant connection required: {e}");
            }
        };

    let llm: Option<Arc<dyn ragbridge_core::LlmClient>> = match LocalLlmClient::new(LocalLlmConfig {
        endpoint: endpoints::LLM_DEFAULT.clone(),
        ..LocalLlmConfig::default()
    }) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            tracing::warn!(error = %e, "failed to build llm client, rewrite/scope-classification and enrichment will use rule-based fallbacks only");
            None
        }
    };

    let cross_encoder: Arc<dyn ragbridge_core::CrossEncoder> = Arc::new(LexicalCrossEncoder);

    let aliases = ragbridge_config::AliasTables::load(&config.aliases_path).unwrap_or_else(|e| {
        tracing::warn!(error = %e, path = %config.aliases_path, "failed to load alias tables, using empty tables");
        ragbridge_config::AliasTables::default()
    });

    Pipeline::new(config.clone(), aliases, embedder, store, llm, cross_encoder)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
        _ = terminate => tracing::info!("received sigterm, shutting down"),
    }
}

fn init_tracing(config: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("ragbridge={},tower_http=debug", config.observability.log_level).into());

    let subscriber = tracing_subscriber::registry().with(env_filter);
    let fmt_layer = if config.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    subscriber.with(fmt_layer).init();
}
