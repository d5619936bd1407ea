//! OpenAI-compatible chat completions (OpenAI and Groq).

use futures_util::future;
use futures_util::stream::{self, TryStreamExt};
use serde::Deserialize;
use serde_json::json;

use docent_core::{CompletionRequest, RagError};

use super::{send_checked, sse, AnswerStream, ClientSettings};

pub struct OpenAiCompatClient {
    settings: ClientSettings,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    #[serde(default)]
    message: String,
}

impl OpenAiCompatClient {
    pub(crate) fn new(settings: ClientSettings) -> Self {
        Self { settings }
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.settings.base_url)
    }

    fn payload(&self, request: &CompletionRequest) -> serde_json::Value {
        json!({
            "model": self.settings.model,
            "messages": request.messages(),
            "temperature": self.settings.temperature,
            "max_tokens": self.settings.max_tokens,
            "stream": true,
        })
    }

    /// Prepare a streaming completion. The request goes out on first poll.
    pub fn stream(&self, request: &CompletionRequest) -> AnswerStream {
        let provider = self.settings.kind.name();
        let pending = self
            .settings
            .client
            .post(self.endpoint())
            .bearer_auth(&self.settings.api_key)
            .json(&self.payload(request));

        let fragments = stream::once(send_checked(provider, pending))
            .map_ok(move |response| {
                sse::data_events(response.bytes_stream())
                    .map_err(move |e| RagError::provider(provider, None, e.to_string()))
                    .try_take_while(|data| future::ready(Ok(data.trim() != "[DONE]")))
                    .try_filter_map(move |data| future::ready(parse_chunk(provider, &data)))
            })
            .try_flatten();

        AnswerStream::new(fragments)
    }
}

/// Decode one streamed chunk into its text delta, if any.
fn parse_chunk(provider: &str, data: &str) -> Result<Option<String>, RagError> {
    let chunk: StreamChunk = serde_json::from_str(data).map_err(|e| {
        RagError::provider(provider, None, format!("malformed stream chunk: {}", e))
    })?;

    if let Some(err) = chunk.error {
        return Err(RagError::provider(provider, None, err.message));
    }

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::ProviderKind;
    use crate::completion::test_server::{serve, Reply};
    use docent_core::context::build_request;
    use docent_core::{ConversationTurn, ErrorCategory};
    use futures_util::StreamExt;

    fn question() -> CompletionRequest {
        build_request("Docs:\n{context}", "", &[], "How do refunds work?").unwrap()
    }

    fn client() -> OpenAiCompatClient {
        client_at("https://api.groq.com/openai/v1")
    }

    fn client_at(base_url: &str) -> OpenAiCompatClient {
        OpenAiCompatClient::new(ClientSettings {
            kind: ProviderKind::Groq,
            model: "llama-3.3-70b-versatile".into(),
            api_key: "k".into(),
            base_url: base_url.into(),
            temperature: 0.1,
            max_tokens: 1024,
            client: reqwest::Client::new(),
        })
    }

    #[test]
    fn test_payload_shape() {
        let request = build_request(
            "Docs:\n{context}",
            "[Source 1: Refunds]\nbody",
            &[ConversationTurn::user("hi"), ConversationTurn::assistant("hello")],
            "How do refunds work?",
        )
        .unwrap();
        let payload = client().payload(&request);

        assert_eq!(payload["model"], "llama-3.3-70b-versatile");
        assert_eq!(payload["stream"], true);
        assert_eq!(payload["max_tokens"], 1024);
        let messages = payload["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[2]["role"], "assistant");
        assert_eq!(messages[3]["content"], "How do refunds work?");
        assert_eq!(
            client().endpoint(),
            "https://api.groq.com/openai/v1/chat/completions"
        );
    }

    #[test]
    fn test_parse_chunk() {
        let data = r#"{"choices":[{"index":0,"delta":{"content":"Refunds"}}]}"#;
        assert_eq!(parse_chunk("groq", data).unwrap().as_deref(), Some("Refunds"));

        let role_only = r#"{"choices":[{"index":0,"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_chunk("groq", role_only).unwrap(), None);

        let err = parse_chunk("groq", r#"{"error":{"message":"Rate limit reached"}}"#).unwrap_err();
        assert_eq!(err.to_string(), "groq request failed: Rate limit reached");

        assert!(parse_chunk("groq", "not json").is_err());
    }

    #[tokio::test]
    async fn test_stream_yields_fragments_until_done() {
        let base = serve(Reply::sse(&[
            r#"{"choices":[{"delta":{"role":"assistant"}}]}"#,
            r#"{"choices":[{"delta":{"content":"Use the "}}]}"#,
            r#"{"choices":[{"delta":{"content":"Refunds API."}}]}"#,
            "[DONE]",
            r#"{"choices":[{"delta":{"content":" trailing"}}]}"#,
        ]))
        .await;

        let text = client_at(&base).stream(&question()).collect_text().await.unwrap();
        assert_eq!(text, "Use the Refunds API.");
    }

    #[tokio::test]
    async fn test_rate_limited_status_is_first_item() {
        let base = serve(Reply::json(
            429,
            r#"{"error":{"message":"Rate limit reached for model llama-3.3-70b-versatile","type":"tokens"}}"#,
        ))
        .await;

        let mut answer = client_at(&base).stream(&question());
        let err = answer.next().await.unwrap().unwrap_err();
        match &err {
            RagError::Provider { status, message, .. } => {
                assert_eq!(*status, Some(429));
                assert!(message.starts_with("Rate limit reached"));
            }
            other => panic!("expected Provider, got {:?}", other),
        }
        assert_eq!(err.category(), ErrorCategory::RateLimited);
        assert!(answer.next().await.is_none());
    }

    #[tokio::test]
    async fn test_unauthorized_is_auth_error() {
        let base = serve(Reply::json(
            401,
            r#"{"error":{"message":"Invalid token","type":"invalid_request_error"}}"#,
        ))
        .await;

        let err = client_at(&base).stream(&question()).collect_text().await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::AuthOrConfig);
        assert!(err.to_string().contains("Invalid token"));
    }

    #[tokio::test]
    async fn test_empty_error_body_falls_back_to_reason() {
        let base = serve(Reply::json(503, "")).await;

        let err = client_at(&base).stream(&question()).collect_text().await.unwrap_err();
        match err {
            RagError::Provider { status, message, .. } => {
                assert_eq!(status, Some(503));
                assert_eq!(message, "Service Unavailable");
            }
            other => panic!("expected Provider, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_in_stream_error_ends_stream() {
        let base = serve(Reply::sse(&[
            r#"{"choices":[{"delta":{"content":"Partial"}}]}"#,
            r#"{"error":{"message":"Rate limit reached"}}"#,
            r#"{"choices":[{"delta":{"content":" more"}}]}"#,
        ]))
        .await;

        let items: Vec<_> = client_at(&base).stream(&question()).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "Partial");
        assert!(matches!(items[1], Err(RagError::Provider { .. })));
    }

    #[tokio::test]
    async fn test_stream_is_lazy() {
        let base = serve(Reply {
            delay: std::time::Duration::from_secs(2),
            ..Reply::sse(&[r#"{"choices":[{"delta":{"content":"late"}}]}"#, "[DONE]"])
        })
        .await;

        let started = std::time::Instant::now();
        let answer = client_at(&base).stream(&question());
        assert!(started.elapsed() < std::time::Duration::from_millis(500));
        assert_eq!(answer.collect_text().await.unwrap(), "late");
    }
}
