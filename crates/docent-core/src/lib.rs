//! # Docent Core
//!
//! Network-free logic for Docent: the passage data model, the error
//! taxonomy, the embedding and passage-store traits, similarity scoring,
//! context assembly, and the passage chunker used by corpus builds.
//!
//! This crate contains no HTTP clients, SQLite, or filesystem I/O. The
//! `docent` app crate supplies concrete stores, embedding backends, and
//! completion providers and wires them together in its pipeline.

pub mod chunk;
pub mod context;
pub mod embedding;
pub mod error;
pub mod models;
pub mod retrieval;
pub mod store;

pub use error::{ErrorCategory, RagError};
pub use models::{
    ChatMessage, CompletionRequest, ConversationTurn, MessageRole, PassageRecord, RetrievedPassage,
    Role,
};
