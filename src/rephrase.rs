//! Query rephrasing adapter for the second retrieval channel.
//!
//! Rephrasing is an optional quality improvement, never a correctness
//! requirement: every failure mode (provider error, timeout, empty output)
//! degrades to [`RephraseOutcome::Identity`] and the search continues on the
//! raw channel alone. [`RephraseError`] therefore never crosses the engine
//! boundary; [`rephrase_with_budget`] is the only entry point the engine uses
//! and it is infallible by design.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

/// Inputs shorter than this (after trimming) are returned unchanged without
/// a provider round-trip; there is not enough signal to rewrite.
const MIN_REPHRASE_INPUT_CHARS: usize = 30;

/// Upper bound on the rewritten text, in characters.
const MAX_REPHRASE_OUTPUT_CHARS: usize = 600;

/// Failure internal to a rephrase provider; recovered before it reaches the
/// search engine.
#[derive(Debug, Error)]
pub enum RephraseError {
    #[error("rephrase endpoint error: {0}")]
    Endpoint(String),
    #[error("rephrase response missing content")]
    EmptyResponse,
}

/// Result of running the rephrase step for one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RephraseOutcome {
    /// The provider produced a usable rewrite that differs from the input.
    Rewritten(String),
    /// The input is used as-is; the rephrased channel is absent.
    Identity,
}

/// A text-rewriting model adapter.
#[async_trait]
pub trait RephraseProvider: Send + Sync {
    /// Rewrites an incident description for retrieval.
    ///
    /// Implementations may fail; recovery is the caller's concern and is
    /// centralized in [`rephrase_with_budget`].
    async fn rephrase(&self, text: &str) -> Result<String, RephraseError>;
}

/// Runs the rephrase provider under a deadline, absorbing every failure.
///
/// Returns [`RephraseOutcome::Rewritten`] only when the provider finishes in
/// time with non-empty output that differs (trimmed) from the raw input.
pub async fn rephrase_with_budget(
    provider: &dyn RephraseProvider,
    text: &str,
    budget: Duration,
) -> RephraseOutcome {
    let trimmed = text.trim();
    if trimmed.chars().count() < MIN_REPHRASE_INPUT_CHARS {
        return RephraseOutcome::Identity;
    }

    match tokio::time::timeout(budget, provider.rephrase(trimmed)).await {
        Ok(Ok(rewritten)) => {
            let rewritten = rewritten.trim();
            if rewritten.is_empty() || rewritten == trimmed {
                RephraseOutcome::Identity
            } else {
                RephraseOutcome::Rewritten(truncate_chars(rewritten, MAX_REPHRASE_OUTPUT_CHARS))
            }
        }
        Ok(Err(err)) => {
            tracing::warn!(error = %err, "rephrase failed; continuing with raw query only");
            RephraseOutcome::Identity
        }
        Err(_) => {
            tracing::warn!(
                budget_ms = budget.as_millis() as u64,
                "rephrase timed out; continuing with raw query only"
            );
            RephraseOutcome::Identity
        }
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Rephrase provider backed by an OpenAI-compatible chat-completions endpoint.
pub struct HttpRephraseProvider {
    client: Client,
    endpoint: Url,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

impl HttpRephraseProvider {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, RephraseError> {
        let mut base =
            Url::parse(base_url).map_err(|err| RephraseError::Endpoint(err.to_string()))?;
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        let endpoint = base
            .join("chat/completions")
            .map_err(|err| RephraseError::Endpoint(err.to_string()))?;
        let client = Client::builder()
            .build()
            .map_err(|err| RephraseError::Endpoint(err.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            model: model.into(),
            api_key,
            temperature: 0.3,
            max_tokens: 400,
        })
    }

    fn build_prompt(text: &str) -> String {
        format!(
            "You are a technical support engineer preparing incident \
             descriptions for similarity search.\n\
             \n\
             Rewrite the description so that:\n\
             - it is technically precise;\n\
             - the key symptoms are preserved;\n\
             - incidental details are removed;\n\
             - it fits in one to three paragraphs.\n\
             \n\
             Return ONLY the rewritten text.\n\
             \n\
             Original description:\n{text}\n"
        )
    }
}

#[async_trait]
impl RephraseProvider for HttpRephraseProvider {
    async fn rephrase(&self, text: &str) -> Result<String, RephraseError> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "messages": [
                {
                    "role": "system",
                    "content": "You carefully reformulate technical incident reports."
                },
                {"role": "user", "content": Self::build_prompt(text)},
            ],
        });

        let mut request = self.client.post(self.endpoint.clone()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| RephraseError::Endpoint(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(RephraseError::Endpoint(format!(
                "endpoint returned {status}"
            )));
        }

        let payload: ChatResponse = response
            .json()
            .await
            .map_err(|err| RephraseError::Endpoint(err.to_string()))?;
        let content = payload
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(RephraseError::EmptyResponse);
        }
        Ok(content)
    }
}
