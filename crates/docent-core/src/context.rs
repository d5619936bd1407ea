//! Context assembly: render retrieved passages and bound the history.
//!
//! Everything here is pure and deterministic. The rendered context is
//! injected into the system prompt only; no passage text is placed in any
//! other message.

use crate::error::RagError;
use crate::models::{
    ChatMessage, CompletionRequest, ConversationTurn, MessageRole, RetrievedPassage,
};

/// Separator between rendered passage blocks.
///
/// The corpus build rewrites bare `---` lines inside passages, so this
/// sequence never occurs within passage content.
pub const BLOCK_SEPARATOR: &str = "\n\n---\n\n";

/// Default number of prior turns kept (five user/assistant exchanges).
pub const DEFAULT_HISTORY_TURNS: usize = 10;

/// Placeholder substituted with the rendered context.
pub const CONTEXT_PLACEHOLDER: &str = "{context}";

/// Default system prompt. Must contain [`CONTEXT_PLACEHOLDER`].
pub const DEFAULT_SYSTEM_TEMPLATE: &str = "You are a knowledgeable documentation support specialist. You help users understand the products, APIs, and best practices described in the documentation.

INSTRUCTIONS:
- Answer questions using ONLY the provided context from the documentation.
- If the context doesn't contain enough information to fully answer the question, say so clearly. Do not fabricate information.
- When referencing specific features or API endpoints, be precise.
- Include relevant code examples when they help explain a concept.
- Format responses with clear structure: use headers, bullet points, and code blocks where appropriate.
- Keep answers concise but thorough.

CONTEXT FROM DOCUMENTATION:
{context}

If the question is outside the scope of the provided documentation, politely let the user know and suggest they consult the official documentation.";

/// Render passages as labeled blocks joined by [`BLOCK_SEPARATOR`].
///
/// Block `i` (1-based, input order) is `"[Source i: <title>]\n<content>"`.
/// An empty input renders as an empty string.
pub fn assemble(passages: &[RetrievedPassage]) -> String {
    passages
        .iter()
        .enumerate()
        .map(|(i, p)| format!("[Source {}: {}]\n{}", i + 1, p.title, p.content))
        .collect::<Vec<_>>()
        .join(BLOCK_SEPARATOR)
}

/// Keep the most recent `max_turns` turns, in original order.
///
/// Older turns are dropped silently; nothing is summarized.
pub fn assemble_history(turns: &[ConversationTurn], max_turns: usize) -> &[ConversationTurn] {
    let start = turns.len().saturating_sub(max_turns);
    &turns[start..]
}

/// Substitute the rendered context into a system template.
///
/// Only the first placeholder is replaced, so passage text that happens to
/// contain `{context}` is never expanded.
pub fn render_system_prompt(template: &str, context: &str) -> Result<String, RagError> {
    let (head, tail) = template.split_once(CONTEXT_PLACEHOLDER).ok_or_else(|| {
        RagError::InvalidRequest(format!(
            "system template must contain {}",
            CONTEXT_PLACEHOLDER
        ))
    })?;
    Ok(format!("{}{}{}", head, context, tail))
}

/// Build the message sequence for one completion call.
///
/// Layout: system prompt with `context` substituted, then `history` in
/// original order, then `question` as the final user message. Callers pass
/// an already bounded history (see [`assemble_history`]).
pub fn build_request(
    template: &str,
    context: &str,
    history: &[ConversationTurn],
    question: &str,
) -> Result<CompletionRequest, RagError> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage {
        role: MessageRole::System,
        content: render_system_prompt(template, context)?,
    });
    messages.extend(history.iter().map(|turn| ChatMessage {
        role: turn.role.into(),
        content: turn.content.clone(),
    }));
    messages.push(ChatMessage {
        role: MessageRole::User,
        content: question.to_string(),
    });
    Ok(CompletionRequest { messages })
}
