//! Candidate retrieval, reranking and context formatting pipeline
//!
//! Owns every stage between a rewritten query and the context string
//! handed to the downstream LLM: cluster search, hybrid vector/text
//! search, reranking, formatting, conversation memory and the
//! fire-and-forget enrichment worker. `orchestrator` wires the stages
//! together behind a single `Pipeline::run` entry point; everything else
//! in this crate is a collaborator it calls in order. Tunables for every
//! stage live in `ragbridge_config::Settings`, not in per-module structs.

pub mod async_enricher;
pub mod cluster_search;
pub mod context_formatter;
pub mod conversation_analyzer;
pub mod conversation_memory;
pub mod document_store;
pub mod embeddings;
pub mod error;
pub mod hybrid_search;
pub mod orchestrator;
pub mod query_expansion;
pub mod query_rewriter;
pub mod reranker;
pub mod retriever;
pub mod scope_detector;
pub mod sparse_search;

pub use async_enricher::AsyncEnricher;
pub use cluster_search::cluster_search;
pub use context_formatter::{format_context, FormattedContext};
pub use conversation_analyzer::analyze_conversation;
pub use conversation_memory::ConversationMemory;
pub use document_store::QdrantDocumentStore;
pub use embeddings::{EmbeddingConfig, OnnxEmbeddingBackend, SimpleEmbeddingBackend};
pub use error::{Result, RetrievalError};
pub use hybrid_search::hybrid_search;
pub use orchestrator::{deadline_from_now, Pipeline};
pub use query_expansion::{ExpandedQuery, QueryExpander};
pub use query_rewriter::{rewrite_query, RewriteCache};
pub use reranker::{rerank, LexicalCrossEncoder, OnnxCrossEncoder};
pub use retriever::retrieve_candidates;
pub use scope_detector::detect_scope;
pub use sparse_search::SparseIndex;
