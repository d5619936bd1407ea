//! Error taxonomy for the retrieval and generation pipeline.
//!
//! Every failure the pipeline can surface is a [`RagError`]. Nothing is
//! retried or recovered here; errors propagate to the caller, which may
//! use [`RagError::category`] to pick a user-facing message.

use serde::Serialize;

/// Errors raised by retrieval, provider construction, and streaming.
#[derive(Debug, thiserror::Error)]
pub enum RagError {
    /// The passage store could not be opened or queried.
    #[error("passage store unavailable: {0}")]
    StoreUnavailable(String),

    /// The query (or a corpus passage) could not be embedded.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// The configured provider selector matches no known variant.
    #[error("unknown LLM provider: {name}. Choose from: {expected}")]
    UnknownProvider { name: String, expected: String },

    /// The selected provider's credential is absent from the environment.
    #[error("missing API key. Set {var} in your environment")]
    MissingCredential { provider: String, var: String },

    /// Any failure while invoking or streaming from a completion provider.
    ///
    /// `message` carries the vendor's original text unchanged.
    #[error("{provider} request failed: {message}")]
    Provider {
        provider: String,
        status: Option<u16>,
        message: String,
    },

    /// The caller passed arguments outside the documented contract.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl RagError {
    /// Build a [`RagError::Provider`] from any displayable transport error.
    pub fn provider(provider: &str, status: Option<u16>, message: impl Into<String>) -> Self {
        RagError::Provider {
            provider: provider.to_string(),
            status,
            message: message.into(),
        }
    }

    /// Best-effort classification for user-facing messaging.
    ///
    /// Configuration errors are always [`ErrorCategory::AuthOrConfig`].
    /// Provider errors use the HTTP status when one was observed and fall
    /// back to substring matching on the message text otherwise. Store,
    /// embedding, and request errors are [`ErrorCategory::Unknown`].
    pub fn category(&self) -> ErrorCategory {
        match self {
            RagError::UnknownProvider { .. } | RagError::MissingCredential { .. } => {
                ErrorCategory::AuthOrConfig
            }
            RagError::Provider {
                status: Some(429), ..
            } => ErrorCategory::RateLimited,
            RagError::Provider {
                status: Some(401 | 403),
                ..
            } => ErrorCategory::AuthOrConfig,
            RagError::Provider { message, .. } => classify_message(message),
            _ => ErrorCategory::Unknown,
        }
    }
}

/// User-facing grouping of pipeline failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    RateLimited,
    AuthOrConfig,
    Unknown,
}

impl ErrorCategory {
    /// The message shown to an end user for this category.
    ///
    /// `detail` is the raw error text, only included for [`ErrorCategory::Unknown`].
    pub fn user_message(&self, detail: &str) -> String {
        match self {
            ErrorCategory::RateLimited => {
                "Rate limit reached. Please wait a moment and try again.".to_string()
            }
            ErrorCategory::AuthOrConfig => {
                "LLM service unavailable. Please check the API configuration.".to_string()
            }
            ErrorCategory::Unknown => format!("Something went wrong: {}", detail),
        }
    }
}

/// Substring heuristic over lowercased error text.
///
/// Vendor-specific and lossy: a change in a provider's error wording can
/// move an error into a different category.
pub fn classify_message(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();
    if lower.contains("rate") || lower.contains("limit") {
        ErrorCategory::RateLimited
    } else if lower.contains("api") || lower.contains("key") {
        ErrorCategory::AuthOrConfig
    } else {
        ErrorCategory::Unknown
    }
}
