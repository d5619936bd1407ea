//! # Docent
//!
//! Grounded question answering over a documentation corpus.
//!
//! Docent embeds a question, retrieves the most similar passages from a
//! pre-built SQLite passage store, and asks a hosted language model to
//! answer from those passages only. The answer streams back alongside the
//! passages it was grounded on.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌──────────┐
//! │ docs/*.md  │──▶│ chunk+embed  │──▶│  SQLite   │   docent build
//! └────────────┘   └──────────────┘   └────┬─────┘
//!                                          │ k-NN
//!   question ──▶ Pipeline ◀────────────────┘
//!                   │ context + history
//!                   ▼
//!             Groq / OpenAI / Google ──▶ answer stream
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docent build                              # embed ./data/docs into the store
//! docent search "refund a payment"          # inspect retrieval
//! GROQ_API_KEY=... docent ask "How do I process refunds via the API?"
//! docent chat                               # multi-turn session
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`pipeline`] | Retrieval-augmented answering |
//! | [`completion`] | Streaming completion providers |
//! | [`embedding`] | Embedding backends |
//! | [`sqlite_store`] | SQLite passage store |
//! | [`ingest`] | Corpus build |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod completion;
pub mod config;
pub mod db;
pub mod embedding;
pub mod ingest;
pub mod migrate;
pub mod pipeline;
pub mod sqlite_store;

pub use docent_core::{
    ConversationTurn, ErrorCategory, RagError, RetrievedPassage, Role,
};
pub use pipeline::{Pipeline, RagResponse};
