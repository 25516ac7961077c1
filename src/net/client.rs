//! Retrying HTTP GET client shared by every source adapter and the PDF
//! downloader.
//!
//! # Retry policy
//!
//! A request is retried on HTTP 408, 429, any 5xx, and on transport-level
//! failures (connect reset, timeout). Backoff is exponential with jitter,
//! bounded between 2 and 60 seconds; a `Retry-After` header on 429/503
//! overrides the computed delay (still capped). Other 4xx responses are
//! returned to the caller for inspection, never raised.

use std::time::{Duration, Instant};

use rand::Rng;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::redirect::Policy;
use reqwest::{Client, Response, StatusCode};
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Lower bound on the retry delay.
const BACKOFF_FLOOR: Duration = Duration::from_secs(2);

/// Upper bound on the retry delay.
const BACKOFF_CEILING: Duration = Duration::from_secs(60);

/// Maximum jitter added to each delay.
const MAX_JITTER: Duration = Duration::from_millis(1000);

/// Maximum redirect hops followed per request.
const REDIRECT_LIMIT: usize = 10;

/// Errors from the retrying client.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Client construction failed.
    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),

    /// Transport-level failure that survived every retry.
    #[error("request to {url} failed after {attempts} attempts: {source}")]
    Transport {
        /// The requested URL.
        url: String,
        /// Attempts made, including the first.
        attempts: u32,
        /// The final transport error.
        #[source]
        source: reqwest::Error,
    },
}

/// Pooled, redirect-following HTTP client with retry.
///
/// Create once per stage and reuse; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    max_retries: u32,
}

impl HttpClient {
    /// Creates a client with the given User-Agent, per-request timeout, and
    /// retry budget.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::Build`] when reqwest cannot construct the client.
    #[instrument(skip_all, fields(timeout_secs, max_retries))]
    pub fn new(user_agent: &str, timeout_secs: u64, max_retries: u32) -> Result<Self, HttpError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(timeout_secs))
            .redirect(Policy::limited(REDIRECT_LIMIT))
            .gzip(true)
            .build()
            .map_err(HttpError::Build)?;

        Ok(Self {
            client,
            max_retries,
        })
    }

    /// Issues a GET with the retry policy described at module level.
    ///
    /// Returns the response for the caller to inspect, including non-OK
    /// statuses: a 404 is a result, not an error. When a retryable status
    /// survives the whole retry budget, the last response is returned.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::Transport`] only when transport-level failures
    /// exhaust the retry budget.
    #[instrument(skip(self, headers), fields(url = %url))]
    pub async fn get_with_retry(
        &self,
        url: &str,
        headers: HeaderMap,
    ) -> Result<Response, HttpError> {
        let max_attempts = self.max_retries + 1;
        let mut attempt = 1;

        loop {
            let started = Instant::now();
            let outcome = self
                .client
                .get(url)
                .headers(headers.clone())
                .send()
                .await;

            match outcome {
                Ok(response) => {
                    let status = response.status();
                    let elapsed_ms = started.elapsed().as_millis();
                    debug!(url, attempt, status = status.as_u16(), elapsed_ms, "GET");

                    if !is_retryable_status(status) || attempt >= max_attempts {
                        return Ok(response);
                    }

                    let delay = retry_after_delay(response.headers())
                        .unwrap_or_else(|| backoff_delay(attempt));
                    warn!(
                        url,
                        attempt,
                        status = status.as_u16(),
                        delay_ms = delay.as_millis(),
                        "retryable status, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    let elapsed_ms = started.elapsed().as_millis();
                    debug!(url, attempt, error = %error, elapsed_ms, "GET failed");

                    if attempt >= max_attempts {
                        return Err(HttpError::Transport {
                            url: url.to_string(),
                            attempts: attempt,
                            source: error,
                        });
                    }

                    let delay = backoff_delay(attempt);
                    warn!(
                        url,
                        attempt,
                        error = %error,
                        delay_ms = delay.as_millis(),
                        "transport error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }

            attempt += 1;
        }
    }
}

/// Statuses worth retrying: request timeout, rate limiting, and 5xx.
fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

/// Exponential backoff with jitter, bounded to `[BACKOFF_FLOOR, BACKOFF_CEILING]`.
fn backoff_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(5);
    let base = BACKOFF_FLOOR * 2u32.pow(exponent);
    let jitter = rand::thread_rng().gen_range(Duration::ZERO..=MAX_JITTER);
    (base + jitter).clamp(BACKOFF_FLOOR, BACKOFF_CEILING)
}

/// Parses a Retry-After header into a bounded delay.
///
/// Supports both RFC 7231 forms: integer seconds and HTTP-date. Values are
/// clamped into the backoff bounds; unparseable values are ignored.
fn retry_after_delay(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    let duration = if let Ok(seconds) = raw.parse::<i64>() {
        (seconds >= 0).then(|| Duration::from_secs(seconds.unsigned_abs()))?
    } else {
        let date = httpdate::parse_http_date(raw).ok()?;
        date.duration_since(std::time::SystemTime::now())
            .unwrap_or(Duration::ZERO)
    };

    Some(duration.clamp(BACKOFF_FLOOR, BACKOFF_CEILING))
}
