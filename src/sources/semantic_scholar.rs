//! Semantic Scholar adapter - abstracts and metadata from the Graph API.
//!
//! An API key is optional; when present it is sent as `x-api-key` for the
//! higher request budget.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::net::{HttpClient, SourceRateLimiter};
use crate::store::ResearchArticle;

use super::{AbstractFetch, AbstractSource, AdapterError, MetadataPatch, Provenance};

const SOURCE: &str = "semantic-scholar";
const DEFAULT_BASE_URL: &str = "https://api.semanticscholar.org";
const FIELDS: &str = "title,abstract,venue,publicationDate,citationCount,authors";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct S2Paper {
    title: Option<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    venue: Option<String>,
    publication_date: Option<String>,
    citation_count: Option<i64>,
    authors: Option<Vec<S2Author>>,
}

#[derive(Debug, Deserialize)]
struct S2Author {
    name: Option<String>,
}

/// Queries `/graph/v1/paper/DOI:{doi}`.
pub struct SemanticScholarAdapter {
    http: HttpClient,
    limiter: Arc<SourceRateLimiter>,
    base_url: String,
    api_key: Option<String>,
}

impl SemanticScholarAdapter {
    /// Creates an adapter against the production API.
    #[must_use]
    pub fn new(http: HttpClient, limiter: Arc<SourceRateLimiter>, api_key: Option<String>) -> Self {
        Self::with_base_url(http, limiter, api_key, DEFAULT_BASE_URL)
    }

    /// Creates an adapter with a custom base URL (for testing with wiremock).
    #[must_use]
    pub fn with_base_url(
        http: HttpClient,
        limiter: Arc<SourceRateLimiter>,
        api_key: Option<String>,
        base_url: &str,
    ) -> Self {
        Self {
            http,
            limiter,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    async fn fetch_paper(&self, doi: &str) -> Result<(S2Paper, Provenance), AdapterError> {
        let url = format!(
            "{}/graph/v1/paper/DOI:{}?fields={FIELDS}",
            self.base_url, doi
        );
        debug!(api_url = %url, "calling Semantic Scholar");

        let mut headers = HeaderMap::new();
        if let Some(key) = &self.api_key {
            if let Ok(value) = key.parse() {
                headers.insert("x-api-key", value);
            }
        }

        self.limiter.acquire(SOURCE).await;
        let response = self.http.get_with_retry(&url, headers).await?;

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
        let paper: S2Paper =
            serde_json::from_value(raw.clone()).map_err(|e| AdapterError::Payload {
                source_tag: SOURCE,
                message: e.to_string(),
            })?;

        Ok((paper, Provenance::now(SOURCE, &url, raw)))
    }
}

impl std::fmt::Debug for SemanticScholarAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticScholarAdapter")
            .field("base_url", &self.base_url)
            .field("has_api_key", &self.api_key.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AbstractSource for SemanticScholarAdapter {
    fn source(&self) -> &'static str {
        SOURCE
    }

    async fn fetch_abstract(&self, article: &ResearchArticle) -> AbstractFetch {
        let Some(doi) = article.doi_norm.as_deref() else {
            return AbstractFetch::miss("no doi");
        };

        match self.fetch_paper(doi).await {
            Ok((paper, provenance)) => {
                let abstract_text = paper
                    .abstract_text
                    .clone()
                    .map(|text| text.trim().to_string())
                    .filter(|text| !text.is_empty());
                let miss_reason = abstract_text
                    .is_none()
                    .then(|| "no abstract in response".to_string());
                AbstractFetch {
                    abstract_text,
                    miss_reason,
                    metadata: extract_metadata(&paper),
                    provenance: Some(provenance),
                }
            }
            Err(AdapterError::Status { status: 404, .. }) => AbstractFetch::miss("doi not found"),
            Err(error) => {
                warn!(doi, error = %error, "Semantic Scholar abstract fetch failed");
                AbstractFetch::miss(error.to_string())
            }
        }
    }
}

fn extract_metadata(paper: &S2Paper) -> MetadataPatch {
    let authors: Vec<String> = paper
        .authors
        .as_deref()
        .unwrap_or(&[])
        .iter()
        .filter_map(|a| a.name.clone())
        .collect();

    MetadataPatch {
        title: paper.title.clone(),
        publication_date: paper.publication_date.clone(),
        authors: (!authors.is_empty()).then(|| authors.join("; ")),
        source_title: paper.venue.clone().filter(|venue| !venue.is_empty()),
        total_citations: paper.citation_count,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn article(doi: &str) -> ResearchArticle {
        ResearchArticle {
            id: 1,
            doi_norm: Some(doi.to_string()),
            title: "t".to_string(),
            publication_date: None,
            total_citations: None,
            citations_per_year: None,
            authors: None,
            source_title: None,
            arxiv_id: None,
            is_preprint: false,
            preprint_platform: None,
            abstract_text: None,
            abstract_source: None,
            abstract_no_retrieval_reason: None,
            oa_status: None,
            oa_license: None,
            oa_pdf_url: None,
            manual_url_publisher: None,
            manual_url_repository: None,
            provenance: None,
            import_datetime: "2026-01-01T00:00:00Z".to_string(),
            enrichment_datetime: None,
        }
    }

    #[tokio::test]
    async fn test_fetch_abstract_sends_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/graph/v1/paper/DOI:.+$"))
            .and(header("x-api-key", "secret-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "title": "S2 Paper",
                "abstract": "  An abstract.  ",
                "venue": "ICML",
                "publicationDate": "2020-07-13",
                "citationCount": 3,
                "authors": [{"name": "Grace Hopper"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let http = HttpClient::new("test-agent", 5, 0).unwrap();
        let adapter = SemanticScholarAdapter::with_base_url(
            http,
            Arc::new(SourceRateLimiter::with_defaults()),
            Some("secret-key".to_string()),
            &server.uri(),
        );

        let fetch = adapter.fetch_abstract(&article("10.1234/s2")).await;
        assert_eq!(fetch.abstract_text.as_deref(), Some("An abstract."));
        assert_eq!(fetch.metadata.source_title.as_deref(), Some("ICML"));
        assert_eq!(fetch.metadata.authors.as_deref(), Some("Grace Hopper"));
    }

    #[tokio::test]
    async fn test_fetch_abstract_null_abstract_is_miss() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "title": "S2 Paper",
                "abstract": null
            })))
            .mount(&server)
            .await;

        let http = HttpClient::new("test-agent", 5, 0).unwrap();
        let adapter = SemanticScholarAdapter::with_base_url(
            http,
            Arc::new(SourceRateLimiter::with_defaults()),
            None,
            &server.uri(),
        );

        let fetch = adapter.fetch_abstract(&article("10.1234/s2")).await;
        assert!(fetch.abstract_text.is_none());
        assert_eq!(fetch.miss_reason.as_deref(), Some("no abstract in response"));
    }
}
