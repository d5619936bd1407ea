//! Completion providers.
//!
//! A closed set of hosted chat-completion services, selected by the
//! `generation.provider` setting (or `LLM_PROVIDER`):
//!
//! | Selector | Service | Default model | Credential |
//! |----------|---------|---------------|------------|
//! | `groq` | Groq | `llama-3.3-70b-versatile` | `GROQ_API_KEY` |
//! | `openai` | OpenAI | `gpt-4o-mini` | `OPENAI_API_KEY` |
//! | `google` | Google | `gemini-2.0-flash` | `GOOGLE_API_KEY` |
//!
//! Building a provider does no network I/O, but it does check that the
//! credential is present, so a misconfigured deployment fails before any
//! retrieval work is done.
//!
//! All providers stream: [`ChatBackend::stream`] returns an
//! [`AnswerStream`] of text fragments whose concatenation is the answer.
//! Nothing is sent until the stream is first polled.

mod gemini;
mod openai_compat;
pub mod sse;
#[cfg(test)]
mod test_server;

use async_trait::async_trait;
use futures_util::stream::{Stream, StreamExt};
use serde::Serialize;
use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::task::{Context, Poll};
use std::time::Duration;

use docent_core::{CompletionRequest, RagError};

use crate::config::GenerationConfig;

pub use gemini::GeminiClient;
pub use openai_compat::OpenAiCompatClient;

/// The supported completion services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Groq,
    OpenAi,
    Google,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [ProviderKind::Groq, ProviderKind::OpenAi, ProviderKind::Google];

    /// The configuration selector (`"groq"`, `"openai"`, `"google"`).
    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::Groq => "groq",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Google => "google",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderKind::Groq => "Groq",
            ProviderKind::OpenAi => "OpenAI",
            ProviderKind::Google => "Google",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::Groq => "llama-3.3-70b-versatile",
            ProviderKind::OpenAi => "gpt-4o-mini",
            ProviderKind::Google => "gemini-2.0-flash",
        }
    }

    /// Environment variable holding the API key.
    pub fn credential_var(&self) -> &'static str {
        match self {
            ProviderKind::Groq => "GROQ_API_KEY",
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Google => "GOOGLE_API_KEY",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::Groq => "https://api.groq.com/openai/v1",
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::Google => "https://generativelanguage.googleapis.com/v1beta",
        }
    }

    fn expected() -> String {
        Self::ALL
            .iter()
            .map(|k| k.name())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProviderKind {
    type Err = RagError;

    /// Case-insensitive; surrounding whitespace is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|k| k.name() == wanted)
            .ok_or_else(|| RagError::UnknownProvider {
                name: s.to_string(),
                expected: Self::expected(),
            })
    }
}

/// Display-only description of the active provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderInfo {
    pub provider: String,
    pub model: String,
}

/// An in-progress answer: text fragments in generation order.
///
/// Empty fragments are dropped. The first error ends the stream.
/// Consumable once.
pub struct AnswerStream {
    inner: Pin<Box<dyn Stream<Item = Result<String, RagError>> + Send>>,
    failed: bool,
}

impl AnswerStream {
    pub fn new<S>(fragments: S) -> Self
    where
        S: Stream<Item = Result<String, RagError>> + Send + 'static,
    {
        let fragments = fragments.filter(|item| {
            futures_util::future::ready(!matches!(item, Ok(text) if text.is_empty()))
        });
        Self {
            inner: Box::pin(fragments),
            failed: false,
        }
    }

    /// A stream over already-known fragments.
    pub fn from_fragments<I>(fragments: I) -> Self
    where
        I: IntoIterator<Item = String>,
        I::IntoIter: Send + 'static,
    {
        Self::new(futures_util::stream::iter(fragments.into_iter().map(Ok)))
    }

    /// Drain the stream, concatenating every fragment.
    pub async fn collect_text(mut self) -> Result<String, RagError> {
        let mut answer = String::new();
        while let Some(fragment) = self.next().await {
            answer.push_str(&fragment?);
        }
        Ok(answer)
    }
}

impl Stream for AnswerStream {
    type Item = Result<String, RagError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.failed {
            return Poll::Ready(None);
        }
        let polled = this.inner.as_mut().poll_next(cx);
        if let Poll::Ready(Some(Err(_))) = &polled {
            this.failed = true;
        }
        polled
    }
}

impl fmt::Debug for AnswerStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnswerStream")
            .field("failed", &self.failed)
            .finish_non_exhaustive()
    }
}

/// A chat-completion backend the pipeline can stream answers from.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn info(&self) -> ProviderInfo;

    /// Prepare `request` and return the answer stream without waiting on
    /// the network.
    ///
    /// The request is sent when the stream is first polled. A rejection
    /// (non-2xx status) or transport failure arrives as the stream's first
    /// and only item, a [`RagError::Provider`]. An `Err` return is reserved
    /// for failures detectable before anything is sent.
    async fn stream(&self, request: &CompletionRequest) -> Result<AnswerStream, RagError>;
}

/// Connection settings shared by every provider client.
#[derive(Clone)]
pub(crate) struct ClientSettings {
    pub kind: ProviderKind,
    pub model: String,
    pub api_key: String,
    pub base_url: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub client: reqwest::Client,
}

/// The configured completion provider.
pub enum CompletionProvider {
    Groq(OpenAiCompatClient),
    OpenAi(OpenAiCompatClient),
    Google(GeminiClient),
}

impl CompletionProvider {
    /// Build the provider named in `config`, reading its credential from
    /// the process environment.
    pub fn from_config(config: &GenerationConfig) -> Result<Self, RagError> {
        Self::from_config_with(config, |key| std::env::var(key).ok())
    }

    /// Like [`from_config`](Self::from_config) with an explicit credential lookup.
    ///
    /// # Errors
    ///
    /// - [`RagError::UnknownProvider`] when the selector is not recognized.
    /// - [`RagError::MissingCredential`] when the API key is absent or blank.
    pub fn from_config_with<F>(config: &GenerationConfig, lookup: F) -> Result<Self, RagError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let kind: ProviderKind = config.provider.parse()?;

        let api_key = lookup(kind.credential_var())
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| RagError::MissingCredential {
                provider: kind.name().to_string(),
                var: kind.credential_var().to_string(),
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RagError::provider(kind.name(), None, e.to_string()))?;

        let settings = ClientSettings {
            kind,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| kind.default_model().to_string()),
            api_key,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| kind.default_base_url().to_string())
                .trim_end_matches('/')
                .to_string(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client,
        };

        Ok(match kind {
            ProviderKind::Groq => CompletionProvider::Groq(OpenAiCompatClient::new(settings)),
            ProviderKind::OpenAi => CompletionProvider::OpenAi(OpenAiCompatClient::new(settings)),
            ProviderKind::Google => CompletionProvider::Google(GeminiClient::new(settings)),
        })
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            CompletionProvider::Groq(_) => ProviderKind::Groq,
            CompletionProvider::OpenAi(_) => ProviderKind::OpenAi,
            CompletionProvider::Google(_) => ProviderKind::Google,
        }
    }

    pub fn model(&self) -> &str {
        match self {
            CompletionProvider::Groq(c) | CompletionProvider::OpenAi(c) => c.model(),
            CompletionProvider::Google(c) => c.model(),
        }
    }
}

/// Describe the provider `config` selects without building it.
///
/// Never fails: an unrecognized selector is reported with model `"unknown"`.
pub fn describe(config: &GenerationConfig) -> ProviderInfo {
    match config.provider.parse::<ProviderKind>() {
        Ok(kind) => ProviderInfo {
            provider: kind.display_name().to_string(),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| kind.default_model().to_string()),
        },
        Err(_) => ProviderInfo {
            provider: config.provider.clone(),
            model: "unknown".to_string(),
        },
    }
}

#[async_trait]
impl ChatBackend for CompletionProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            provider: self.kind().display_name().to_string(),
            model: self.model().to_string(),
        }
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<AnswerStream, RagError> {
        tracing::debug!(
            provider = self.kind().name(),
            model = self.model(),
            messages = request.messages().len(),
            "preparing completion stream"
        );
        Ok(match self {
            CompletionProvider::Groq(c) | CompletionProvider::OpenAi(c) => c.stream(request),
            CompletionProvider::Google(c) => c.stream(request),
        })
    }
}

/// Send `request`, turning a transport failure or non-2xx status into
/// [`RagError::Provider`].
pub(crate) async fn send_checked(
    provider: &'static str,
    request: reqwest::RequestBuilder,
) -> Result<reqwest::Response, RagError> {
    let response = request
        .send()
        .await
        .map_err(|e| RagError::provider(provider, e.status().map(|s| s.as_u16()), e.to_string()))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let reason = status.canonical_reason().unwrap_or("request rejected");
    let message = match response.text().await {
        Ok(body) => {
            let message = vendor_error_message(&body);
            if message.is_empty() {
                reason.to_string()
            } else {
                message
            }
        }
        Err(e) => format!("{} (error body unreadable: {})", reason, e),
    };
    Err(RagError::provider(provider, Some(status.as_u16()), message))
}

/// Pull a human-readable message out of a vendor error body.
///
/// Both OpenAI-style and Google-style bodies carry `error.message`; any
/// other body is returned unchanged.
fn vendor_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn generation(provider: &str) -> GenerationConfig {
        GenerationConfig {
            provider: provider.to_string(),
            ..Default::default()
        }
    }

    fn keys(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_parse_kind() {
        assert_eq!("groq".parse::<ProviderKind>().unwrap(), ProviderKind::Groq);
        assert_eq!(" OpenAI ".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAi);
        assert_eq!("google".parse::<ProviderKind>().unwrap(), ProviderKind::Google);

        match "bogus".parse::<ProviderKind>() {
            Err(RagError::UnknownProvider { name, expected }) => {
                assert_eq!(name, "bogus");
                assert_eq!(expected, "groq, openai, google");
            }
            other => panic!("expected UnknownProvider, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_provider_checked_before_credentials() {
        let err = CompletionProvider::from_config_with(&generation("bogus"), keys(&[])).err();
        assert!(matches!(err, Some(RagError::UnknownProvider { .. })));
    }

    #[test]
    fn test_missing_credential_names_variable() {
        let err = CompletionProvider::from_config_with(&generation("groq"), keys(&[])).err();
        match err {
            Some(RagError::MissingCredential { provider, var }) => {
                assert_eq!(provider, "groq");
                assert_eq!(var, "GROQ_API_KEY");
            }
            _ => panic!("expected MissingCredential"),
        }

        let err =
            CompletionProvider::from_config_with(&generation("google"), keys(&[("GOOGLE_API_KEY", "  ")]))
                .err();
        assert!(matches!(err, Some(RagError::MissingCredential { .. })));
    }

    #[test]
    fn test_default_models() {
        for (selector, var, display, model) in [
            ("groq", "GROQ_API_KEY", "Groq", "llama-3.3-70b-versatile"),
            ("openai", "OPENAI_API_KEY", "OpenAI", "gpt-4o-mini"),
            ("google", "GOOGLE_API_KEY", "Google", "gemini-2.0-flash"),
        ] {
            let provider =
                CompletionProvider::from_config_with(&generation(selector), keys(&[(var, "k")]))
                    .unwrap();
            assert_eq!(
                provider.info(),
                ProviderInfo {
                    provider: display.to_string(),
                    model: model.to_string()
                }
            );
        }
    }

    #[test]
    fn test_model_override() {
        let config = GenerationConfig {
            provider: "openai".into(),
            model: Some("gpt-4o".into()),
            ..Default::default()
        };
        let provider =
            CompletionProvider::from_config_with(&config, keys(&[("OPENAI_API_KEY", "k")])).unwrap();
        assert_eq!(provider.model(), "gpt-4o");
        assert_eq!(describe(&config).model, "gpt-4o");
    }

    #[test]
    fn test_describe_unknown() {
        let info = describe(&generation("bogus"));
        assert_eq!(info.provider, "bogus");
        assert_eq!(info.model, "unknown");
    }

    #[test]
    fn test_vendor_error_message() {
        assert_eq!(
            vendor_error_message(r#"{"error":{"message":"Rate limit reached","type":"x"}}"#),
            "Rate limit reached"
        );
        assert_eq!(vendor_error_message("Bad Gateway\n"), "Bad Gateway");
    }

    #[tokio::test]
    async fn test_answer_stream_skips_empty_and_stops_on_error() {
        let stream = AnswerStream::new(futures_util::stream::iter(vec![
            Ok("Hel".to_string()),
            Ok(String::new()),
            Ok("lo".to_string()),
            Err(RagError::provider("groq", None, "boom")),
            Ok("never".to_string()),
        ]));
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap(), "Hel");
        assert_eq!(items[1].as_ref().unwrap(), "lo");
        assert!(items[2].is_err());

        let text = AnswerStream::from_fragments(vec!["a".to_string(), "b".to_string()])
            .collect_text()
            .await
            .unwrap();
        assert_eq!(text, "ab");
    }
}
