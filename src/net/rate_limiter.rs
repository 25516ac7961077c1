//! Per-source rate limiting for outbound API and download requests.
//!
//! This module provides the [`SourceRateLimiter`] struct which enforces a
//! minimum interval between requests to the same upstream source, keeping
//! the pipeline inside each provider's published request budget.
//!
//! # Overview
//!
//! Pacing is applied per source tag, so requests to different providers
//! proceed in parallel while subsequent requests to the *same* provider wait
//! out that provider's interval. Two enrichment tasks hitting Crossref
//! concurrently still observe Crossref's rate.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use scholarpipe::net::SourceRateLimiter;
//!
//! # async fn example() {
//! let limiter = Arc::new(SourceRateLimiter::with_defaults());
//!
//! // First call proceeds immediately.
//! limiter.acquire("crossref").await;
//!
//! // Second call to the same source waits out the interval.
//! limiter.acquire("crossref").await;
//!
//! // A different source proceeds immediately.
//! limiter.acquire("openalex").await;
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument};

/// Canonical request budgets, in calls per second. Overridable per source
/// via [`SourceRateLimiter::with_rate`]; read-only after construction.
pub const DEFAULT_RATES: &[(&str, f64)] = &[
    ("arxiv", 0.1),
    ("biorxiv", 1.0),
    ("crossref", 1.0),
    ("europepmc", 2.0),
    ("openalex", 5.0),
    ("preprints", 2.0),
    ("pubmed", 3.0),
    ("semantic-scholar", 5.0),
    ("unpaywall", 5.0),
];

/// Calls per second applied to sources absent from the table.
const FALLBACK_CALLS_PER_SEC: f64 = 1.0;

/// Per-source rate limiter.
///
/// Designed to be wrapped in `Arc` and shared across Tokio tasks. Each
/// source's timing state sits behind its own `tokio::sync::Mutex`, so a task
/// waiting on one source never blocks a task pacing another. A single
/// OS-level mutex per source is sufficient under the multi-thread Tokio
/// runtime; no scheduler-identity tracking is needed.
#[derive(Debug)]
pub struct SourceRateLimiter {
    rates: Vec<(String, f64)>,
    states: DashMap<String, Arc<SourceState>>,
}

#[derive(Debug)]
struct SourceState {
    min_interval: Duration,
    /// `None` until the first acquire; the first request is never delayed.
    last_call: Mutex<Option<Instant>>,
}

impl SourceRateLimiter {
    /// Creates a limiter with the canonical per-source budgets.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            rates: DEFAULT_RATES
                .iter()
                .map(|(name, cps)| ((*name).to_string(), *cps))
                .collect(),
            states: DashMap::new(),
        }
    }

    /// Overrides one source's budget. Intended for configuration at startup,
    /// before the limiter is shared.
    #[must_use]
    pub fn with_rate(mut self, source: &str, calls_per_sec: f64) -> Self {
        if let Some(entry) = self.rates.iter_mut().find(|(name, _)| name == source) {
            entry.1 = calls_per_sec;
        } else {
            self.rates.push((source.to_string(), calls_per_sec));
        }
        self
    }

    /// Returns the configured budget for a source.
    #[must_use]
    pub fn calls_per_sec(&self, source: &str) -> f64 {
        self.rates
            .iter()
            .find(|(name, _)| name == source)
            .map_or(FALLBACK_CALLS_PER_SEC, |(_, cps)| *cps)
    }

    /// Waits until the caller may issue a request to `source`.
    ///
    /// The first request to a source proceeds immediately; afterwards
    /// successive returns are at least `1 / calls_per_sec` apart.
    #[instrument(skip(self))]
    pub async fn acquire(&self, source: &str) {
        // Clone the Arc so the DashMap shard lock is released before awaiting.
        let state = self
            .states
            .entry(source.to_string())
            .or_insert_with(|| {
                let calls_per_sec = self.calls_per_sec(source);
                Arc::new(SourceState {
                    min_interval: Duration::from_secs_f64(1.0 / calls_per_sec),
                    last_call: Mutex::new(None),
                })
            })
            .clone();

        let mut last_call = state.last_call.lock().await;
        if let Some(previous) = *last_call {
            let elapsed = previous.elapsed();
            if elapsed < state.min_interval {
                let delay = state.min_interval.saturating_sub(elapsed);
                debug!(source, delay_ms = delay.as_millis(), "rate limit delay");
                tokio::time::sleep(delay).await;
            }
        } else {
            debug!(source, "first request to source");
        }
        *last_call = Some(Instant::now());
    }
}

impl Default for SourceRateLimiter {
    fn default() -> Self {
        Self::with_defaults()
    }
}
