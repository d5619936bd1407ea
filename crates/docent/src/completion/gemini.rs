//! Google Gemini `streamGenerateContent` client.
//!
//! Gemini has no system role in `contents`: the system message goes into
//! `systemInstruction` and assistant turns use the `model` role.

use futures_util::future;
use futures_util::stream::{self, TryStreamExt};
use serde::Deserialize;
use serde_json::json;

use docent_core::{CompletionRequest, MessageRole, RagError};

use super::{send_checked, sse, AnswerStream, ClientSettings};

pub struct GeminiClient {
    settings: ClientSettings,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<GeminiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: String,
}

impl GeminiClient {
    pub(crate) fn new(settings: ClientSettings) -> Self {
        Self { settings }
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.settings.base_url, self.settings.model
        )
    }

    fn payload(&self, request: &CompletionRequest) -> serde_json::Value {
        let contents: Vec<serde_json::Value> = request
            .conversation()
            .iter()
            .map(|m| {
                let role = match m.role {
                    MessageRole::Assistant => "model",
                    _ => "user",
                };
                json!({ "role": role, "parts": [{ "text": m.content }] })
            })
            .collect();

        json!({
            "systemInstruction": { "parts": [{ "text": request.system().content }] },
            "contents": contents,
            "generationConfig": {
                "temperature": self.settings.temperature,
                "maxOutputTokens": self.settings.max_tokens,
            },
        })
    }

    /// Prepare a streaming generation. The request goes out on first poll.
    pub fn stream(&self, request: &CompletionRequest) -> AnswerStream {
        let provider = self.settings.kind.name();
        let pending = self
            .settings
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.settings.api_key)
            .json(&self.payload(request));

        let fragments = stream::once(send_checked(provider, pending))
            .map_ok(move |response| {
                sse::data_events(response.bytes_stream())
                    .map_err(move |e| RagError::provider(provider, None, e.to_string()))
                    .try_filter_map(move |data| future::ready(parse_chunk(provider, &data)))
            })
            .try_flatten();

        AnswerStream::new(fragments)
    }
}

fn parse_chunk(provider: &str, data: &str) -> Result<Option<String>, RagError> {
    let chunk: GenerateChunk = serde_json::from_str(data).map_err(|e| {
        RagError::provider(provider, None, format!("malformed stream chunk: {}", e))
    })?;

    if let Some(err) = chunk.error {
        return Err(RagError::provider(provider, err.code, err.message));
    }

    let text: String = chunk
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    Ok((!text.is_empty()).then_some(text))
}
