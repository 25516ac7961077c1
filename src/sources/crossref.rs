//! Crossref adapter - bibliographic metadata, JATS abstracts, and preprint
//! relations from the Crossref REST API.
//!
//! All requests carry a `mailto` query parameter for Crossref's polite pool.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::net::{HttpClient, SourceRateLimiter};
use crate::store::ResearchArticle;

use super::{AbstractFetch, AbstractSource, AdapterError, MetadataPatch, Provenance};

const SOURCE: &str = "crossref";
const DEFAULT_BASE_URL: &str = "https://api.crossref.org";

#[allow(clippy::expect_used)]
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("static tag regex is valid"));

// ==================== Crossref API Response Types ====================

#[derive(Debug, Deserialize)]
pub(crate) struct CrossrefResponse {
    pub message: CrossrefMessage,
}

/// The `message` field from a Crossref works response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct CrossrefMessage {
    pub title: Option<Vec<String>>,
    pub author: Option<Vec<CrossrefAuthor>>,
    pub container_title: Option<Vec<String>>,
    pub issued: Option<CrossrefDate>,
    pub is_referenced_by_count: Option<i64>,
    #[serde(rename = "abstract")]
    pub abstract_jats: Option<String>,
    pub relation: Option<HashMap<String, Vec<CrossrefRelation>>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CrossrefAuthor {
    pub given: Option<String>,
    pub family: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct CrossrefDate {
    pub date_parts: Option<Vec<Vec<Option<i64>>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct CrossrefRelation {
    pub id_type: Option<String>,
    pub id: Option<String>,
}

// ==================== CrossrefAdapter ====================

/// Queries `/works/{doi}` and normalizes the message into metadata, a
/// plain-text abstract, and (for preprints) the `is-preprint-of` relation.
pub struct CrossrefAdapter {
    http: HttpClient,
    limiter: Arc<SourceRateLimiter>,
    base_url: String,
    mailto: String,
}

impl CrossrefAdapter {
    /// Creates an adapter against the production API.
    #[must_use]
    pub fn new(http: HttpClient, limiter: Arc<SourceRateLimiter>, mailto: &str) -> Self {
        Self::with_base_url(http, limiter, mailto, DEFAULT_BASE_URL)
    }

    /// Creates an adapter with a custom base URL (for testing with wiremock).
    #[must_use]
    pub fn with_base_url(
        http: HttpClient,
        limiter: Arc<SourceRateLimiter>,
        mailto: &str,
        base_url: &str,
    ) -> Self {
        Self {
            http,
            limiter,
            base_url: base_url.trim_end_matches('/').to_string(),
            mailto: mailto.to_string(),
        }
    }

    /// Fetches the works message for a DOI together with its provenance.
    pub(crate) async fn fetch_work(
        &self,
        doi: &str,
    ) -> Result<(CrossrefMessage, Provenance), AdapterError> {
        let url = format!(
            "{}/works/{}?mailto={}",
            self.base_url,
            urlencoding::encode(doi),
            urlencoding::encode(&self.mailto)
        );
        debug!(api_url = %url, "calling Crossref");

        self.limiter.acquire(SOURCE).await;
        let response = self.http.get_with_retry(&url, HeaderMap::new()).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AdapterError::Status {
                source_tag: SOURCE,
                status: status.as_u16(),
            });
        }

        let raw: serde_json::Value =
            response.json().await.map_err(|e| AdapterError::Payload {
                source_tag: SOURCE,
                message: e.to_string(),
            })?;
        let parsed: CrossrefResponse =
            serde_json::from_value(raw.clone()).map_err(|e| AdapterError::Payload {
                source_tag: SOURCE,
                message: e.to_string(),
            })?;

        Ok((parsed.message, Provenance::now(SOURCE, &url, raw)))
    }
}

impl std::fmt::Debug for CrossrefAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossrefAdapter")
            .field("base_url", &self.base_url)
            .field("mailto", &self.mailto)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AbstractSource for CrossrefAdapter {
    fn source(&self) -> &'static str {
        SOURCE
    }

    async fn fetch_abstract(&self, article: &ResearchArticle) -> AbstractFetch {
        let Some(doi) = article.doi_norm.as_deref() else {
            return AbstractFetch::miss("no doi");
        };

        match self.fetch_work(doi).await {
            Ok((message, provenance)) => {
                let abstract_text = message
                    .abstract_jats
                    .as_deref()
                    .map(strip_jats)
                    .filter(|text| !text.is_empty());
                let miss_reason = abstract_text
                    .is_none()
                    .then(|| "no abstract in response".to_string());
                AbstractFetch {
                    abstract_text,
                    miss_reason,
                    metadata: extract_metadata(&message),
                    provenance: Some(provenance),
                }
            }
            Err(AdapterError::Status { status: 404, .. }) => AbstractFetch::miss("doi not found"),
            Err(error) => {
                warn!(doi, error = %error, "Crossref abstract fetch failed");
                AbstractFetch::miss(error.to_string())
            }
        }
    }
}

// ==================== Extraction Helpers ====================

/// Strips JATS/XML markup from a Crossref abstract into plain text.
pub(crate) fn strip_jats(jats: &str) -> String {
    let stripped = TAG_RE.replace_all(jats, " ");
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .strip_prefix("Abstract ")
        .map_or(collapsed.clone(), str::to_string)
}

pub(crate) fn extract_metadata(message: &CrossrefMessage) -> MetadataPatch {
    MetadataPatch {
        title: message
            .title
            .as_ref()
            .and_then(|titles| titles.first())
            .cloned(),
        publication_date: message.issued.as_ref().and_then(format_date),
        authors: message.author.as_deref().and_then(format_authors),
        source_title: message
            .container_title
            .as_ref()
            .and_then(|titles| titles.first())
            .cloned(),
        total_citations: message.is_referenced_by_count,
    }
}

/// Scans the relation map for the DOI of the published version of a preprint.
pub(crate) fn published_doi_relation(message: &CrossrefMessage) -> Option<String> {
    message
        .relation
        .as_ref()?
        .get("is-preprint-of")?
        .iter()
        .find(|relation| {
            relation
                .id_type
                .as_deref()
                .is_some_and(|t| t.eq_ignore_ascii_case("doi"))
        })
        .and_then(|relation| relation.id.clone())
}

fn format_authors(authors: &[CrossrefAuthor]) -> Option<String> {
    let formatted: Vec<String> = authors
        .iter()
        .map(|a| match (&a.family, &a.given) {
            (Some(f), Some(g)) => format!("{f}, {g}"),
            (Some(f), None) => f.clone(),
            (None, Some(g)) => g.clone(),
            (None, None) => String::new(),
        })
        .filter(|s| !s.is_empty())
        .collect();
    (!formatted.is_empty()).then(|| formatted.join("; "))
}

fn format_date(date: &CrossrefDate) -> Option<String> {
    let parts = date.date_parts.as_ref()?.first()?;
    let year = parts.first().copied().flatten()?;
    match (
        parts.get(1).copied().flatten(),
        parts.get(2).copied().flatten(),
    ) {
        (Some(month), Some(day)) => Some(format!("{year:04}-{month:02}-{day:02}")),
        (Some(month), None) => Some(format!("{year:04}-{month:02}")),
        _ => Some(format!("{year:04}")),
    }
}
