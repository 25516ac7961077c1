//! Source-aware request shaping for PDF retrieval.
//!
//! Each source tag maps to a request transform: extra headers, referer
//! spoofing for hosts that reject bare clients, and for arXiv a cache-busting
//! query parameter plus a randomized pre-request sleep. New sources plug in
//! by extending [`plan_request`]; the downloader is source-agnostic.

use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use reqwest::header::{ACCEPT, CACHE_CONTROL, HeaderMap, HeaderValue, PRAGMA, REFERER, USER_AGENT};

use crate::store::PdfCandidate;
use crate::user_agent::BROWSER_USER_AGENT;

/// One shaped request: possibly transformed URL, headers, and a pre-sleep.
#[derive(Debug)]
pub struct RequestPlan {
    /// URL actually fetched (cache-busting applied here; the stored `url`
    /// stays the original candidate).
    pub url: String,
    /// Headers for the attempt.
    pub headers: HeaderMap,
    /// Sleep before issuing the request, when the source wants jitter.
    pub pre_sleep: Option<Duration>,
}

/// Shapes the request for one candidate.
#[must_use]
pub fn plan_request(candidate: &PdfCandidate) -> RequestPlan {
    let mut headers = base_headers();

    match candidate.source.as_str() {
        "arxiv" => {
            browser_fingerprint(&mut headers);
            headers.insert(
                CACHE_CONTROL,
                HeaderValue::from_static("no-cache, no-store, must-revalidate"),
            );
            headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
            headers.insert(REFERER, HeaderValue::from_static("https://arxiv.org/"));

            RequestPlan {
                url: append_cache_buster(&candidate.url, Utc::now().timestamp_millis()),
                headers,
                pre_sleep: Some(Duration::from_millis(
                    rand::thread_rng().gen_range(0..=2000),
                )),
            }
        }
        "biorxiv" | "medrxiv" => {
            headers.insert(REFERER, HeaderValue::from_static("https://www.google.com/"));
            RequestPlan {
                url: candidate.url.clone(),
                headers,
                pre_sleep: None,
            }
        }
        "preprints" => {
            if let Some(referer) = preprints_landing_url(&candidate.url) {
                if let Ok(value) = HeaderValue::from_str(&referer) {
                    headers.insert(REFERER, value);
                }
            }
            RequestPlan {
                url: candidate.url.clone(),
                headers,
                pre_sleep: None,
            }
        }
        _ => RequestPlan {
            url: candidate.url.clone(),
            headers,
            pre_sleep: None,
        },
    }
}

/// Headers every source gets: browser-class UA and a PDF-preferring Accept.
fn base_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/pdf,*/*;q=0.8"),
    );
    headers
}

/// The fuller fingerprint for bot-detecting hosts: language, fetch-metadata,
/// and client-hint headers matching the Chrome-class UA.
fn browser_fingerprint(headers: &mut HeaderMap) {
    headers.insert(
        "accept-language",
        HeaderValue::from_static("en-US,en;q=0.9"),
    );
    headers.insert("sec-fetch-dest", HeaderValue::from_static("document"));
    headers.insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
    headers.insert("sec-fetch-site", HeaderValue::from_static("none"));
    headers.insert("sec-fetch-user", HeaderValue::from_static("?1"));
    headers.insert(
        "sec-ch-ua",
        HeaderValue::from_static("\"Chromium\";v=\"131\", \"Not_A Brand\";v=\"24\""),
    );
    headers.insert("sec-ch-ua-mobile", HeaderValue::from_static("?0"));
    headers.insert("sec-ch-ua-platform", HeaderValue::from_static("\"macOS\""));
}

/// Appends the `_cb` cache-busting parameter.
fn append_cache_buster(url: &str, unix_ms: i64) -> String {
    if url.contains('?') {
        format!("{url}&_cb={unix_ms}")
    } else {
        format!("{url}?_cb={unix_ms}")
    }
}

/// Preprints.org PDF URLs end in `/download`; the manuscript landing page is
/// the same URL without that segment.
fn preprints_landing_url(pdf_url: &str) -> Option<String> {
    pdf_url
        .strip_suffix("/download")
        .map(str::to_string)
        .filter(|landing| !landing.is_empty())
}
