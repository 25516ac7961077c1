//! LLM client seam for the relevance filter.
//!
//! The executor only needs `complete(system, user, model, max_tokens) →
//! String`; the production implementation speaks the OpenAI-compatible
//! chat-completions shape over reqwest. Transient failures surface as
//! distinguishable errors so the retry wrapper can fire.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Retry attempts for transient LLM failures (including the first call).
pub const LLM_RETRY_ATTEMPTS: u32 = 3;

/// Errors from a completion call.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Network-level failure talking to the endpoint.
    #[error("transport: {0}")]
    Transport(String),

    /// The endpoint answered with an error status.
    #[error("endpoint returned HTTP {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body excerpt.
        message: String,
    },

    /// The response did not carry a completion.
    #[error("response shape: {0}")]
    Shape(String),
}

impl LlmError {
    /// Whether a retry may help.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Api { status, .. } => {
                *status == 408 || *status == 429 || (500..600).contains(status)
            }
            Self::Shape(_) => false,
        }
    }

    /// Stable error-kind name used in `ERROR:` explanations.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "LlmTransportError",
            Self::Api { .. } => "LlmApiError",
            Self::Shape(_) => "LlmResponseError",
        }
    }
}

/// A chat-completion backend safe to call from concurrent tasks.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Produces one completion for the prompt pair.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError`]; transient variants are retried by
    /// [`complete_with_retry`].
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        model: &str,
        max_output_tokens: u32,
    ) -> Result<String, LlmError>;
}

/// Retries transient failures with a doubling delay.
///
/// # Errors
///
/// Returns the last [`LlmError`] once the budget is spent or the failure is
/// permanent.
pub async fn complete_with_retry(
    client: &dyn LlmClient,
    system_prompt: &str,
    user_prompt: &str,
    model: &str,
    max_output_tokens: u32,
) -> Result<String, LlmError> {
    let mut attempt = 1;
    loop {
        match client
            .complete(system_prompt, user_prompt, model, max_output_tokens)
            .await
        {
            Ok(content) => return Ok(content),
            Err(error) if error.is_transient() && attempt < LLM_RETRY_ATTEMPTS => {
                let delay = Duration::from_secs(2u64 << (attempt - 1));
                warn!(attempt, error = %error, delay_secs = delay.as_secs(), "LLM retry");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

// ==================== OpenAI-compatible client ====================

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// Production client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompatClient {
    /// Builds a client for the endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Transport`] when reqwest cannot build the client.
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

impl std::fmt::Debug for OpenAiCompatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatClient")
            .field("base_url", &self.base_url)
            .field("has_api_key", &self.api_key.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    #[instrument(skip_all, fields(model))]
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        model: &str,
        max_output_tokens: u32,
    ) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt}
            ],
            "max_tokens": max_output_tokens,
        });

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            let message = message.chars().take(200).collect();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Shape(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::Shape("no completion in response".to_string()))?;

        debug!(chars = content.len(), "completion received");
        Ok(content)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // ==================== Error Classification Tests ====================

    #[test]
    fn test_transient_classification() {
        assert!(LlmError::Transport("reset".to_string()).is_transient());
        assert!(LlmError::Api { status: 429, message: String::new() }.is_transient());
        assert!(LlmError::Api { status: 503, message: String::new() }.is_transient());
        assert!(!LlmError::Api { status: 400, message: String::new() }.is_transient());
        assert!(!LlmError::Shape("empty".to_string()).is_transient());
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(LlmError::Transport(String::new()).kind(), "LlmTransportError");
        assert_eq!(
            LlmError::Api { status: 429, message: String::new() }.kind(),
            "LlmApiError"
        );
        assert_eq!(LlmError::Shape(String::new()).kind(), "LlmResponseError");
    }

    // ==================== Retry Wrapper Tests ====================

    struct FlakyClient {
        failures_before_success: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl LlmClient for FlakyClient {
        async fn complete(
            &self,
            _system: &str,
            _user: &str,
            _model: &str,
            _max_tokens: u32,
        ) -> Result<String, LlmError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                Err(LlmError::Api {
                    status: 429,
                    message: "slow down".to_string(),
                })
            } else {
                Ok("{\"match\": true, \"explanation\": \"ok\"}".to_string())
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_from_transient() {
        let client = FlakyClient {
            failures_before_success: 2,
            calls: AtomicU32::new(0),
        };
        let content = complete_with_retry(&client, "s", "u", "m", 64).await.unwrap();
        assert!(content.contains("match"));
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_budget() {
        let client = FlakyClient {
            failures_before_success: 10,
            calls: AtomicU32::new(0),
        };
        let error = complete_with_retry(&client, "s", "u", "m", 64).await.unwrap_err();
        assert!(matches!(error, LlmError::Api { status: 429, .. }));
        assert_eq!(client.calls.load(Ordering::SeqCst), LLM_RETRY_ATTEMPTS);
    }

    // ==================== HTTP Client Tests ====================

    #[tokio::test]
    async fn test_openai_compat_parses_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [
                    {"message": {"role": "assistant", "content": "{\"match\": false}"}}
                ]
            })))
            .mount(&server)
            .await;

        let client = OpenAiCompatClient::new(&server.uri(), Some("key".to_string())).unwrap();
        let content = client.complete("system", "user", "test-model", 64).await.unwrap();
        assert_eq!(content, "{\"match\": false}");
    }

    #[tokio::test]
    async fn test_openai_compat_maps_429_to_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let client = OpenAiCompatClient::new(&server.uri(), None).unwrap();
        let error = client.complete("s", "u", "m", 64).await.unwrap_err();
        assert!(error.is_transient());
    }
}
