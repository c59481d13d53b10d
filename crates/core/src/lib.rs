//! Core types, traits and error model for the RAG retrieval bridge
//!
//! This crate provides the foundational pieces shared by every other crate:
//! - the persisted data model (`Entity`, `Cluster`, `ClusterMembership`, ...)
//! - the per-request pipeline carrier (`RAGState`) and its sub-records
//! - the collaborator traits the pipeline is built against (embedding
//!   backend, document store, LLM client, cross-encoder)
//! - the crate-wide error type

pub mod error;
pub mod state;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use state::{
    CandidateEntity, ConversationContext, Diagnostics, FallbackRecord, RAGState, ScopeDecision,
};
pub use traits::{CrossEncoder, DocumentStore, EmbeddingBackend, EmbeddingKind, LlmClient};
pub use types::{
    Cluster, ClusterMembership, ClusterType, ConversationMemoryEntry, ConversationTurn,
    EmbeddingVector, Entity, Intent, Scope, TurnRole,
};
