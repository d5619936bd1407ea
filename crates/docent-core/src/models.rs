//! Core data models for passages, conversation turns, and completion requests.

use serde::{Deserialize, Serialize};

/// Free-form passage metadata, as written by the corpus build.
///
/// Required keys are `source`, `title`, `category`, and `chunk_index`;
/// readers must still tolerate their absence (see [`RetrievedPassage`]).
pub type Metadata = serde_json::Map<String, serde_json::Value>;

pub const DEFAULT_SOURCE: &str = "unknown";
pub const DEFAULT_TITLE: &str = "Untitled";
pub const DEFAULT_CATEGORY: &str = "General";

/// A pre-chunked, embedded passage held by a passage store.
///
/// Every record in a store must have been embedded with the same
/// embedding function used for queries. Mixed embedding spaces are not
/// detectable from the vectors alone and silently corrupt ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassageRecord {
    pub id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: Metadata,
}

/// A passage selected for one query, with its similarity score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedPassage {
    pub id: String,
    pub content: String,
    pub source: String,
    pub title: String,
    pub category: String,
    /// Ordinal position within the source document, when recorded.
    pub chunk_index: Option<i64>,
    /// Similarity in `(0, 1]`, `1 / (1 + distance)` rounded to 3 places.
    pub score: f64,
}

/// Speaker of a prior conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One prior turn of the caller-owned conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Role of a message sent to a completion provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl From<Role> for MessageRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => MessageRole::User,
            Role::Assistant => MessageRole::Assistant,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

/// Ordered messages for one completion call.
///
/// Built only by [`crate::context::build_request`], which guarantees a
/// single leading system message carrying the retrieved context, then the
/// bounded history, then the current question as the final user message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionRequest {
    pub(crate) messages: Vec<ChatMessage>,
}

impl CompletionRequest {
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// The system message (always index 0).
    pub fn system(&self) -> &ChatMessage {
        &self.messages[0]
    }

    /// Messages after the system message, in conversation order.
    pub fn conversation(&self) -> &[ChatMessage] {
        &self.messages[1..]
    }
}
