//! Unpaywall adapter - Open-Access status, license, and best OA PDF URL.
//!
//! Unpaywall requires the caller's contact email as a query parameter.

use std::sync::Arc;

use reqwest::header::HeaderMap;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::net::{HttpClient, SourceRateLimiter};
use crate::store::ResearchArticle;

use super::{AdapterError, Provenance};

const SOURCE: &str = "unpaywall";
const DEFAULT_BASE_URL: &str = "https://api.unpaywall.org";

#[derive(Debug, Deserialize)]
struct UnpaywallResponse {
    is_oa: Option<bool>,
    oa_status: Option<String>,
    best_oa_location: Option<UnpaywallLocation>,
}

#[derive(Debug, Deserialize)]
struct UnpaywallLocation {
    url_for_pdf: Option<String>,
    license: Option<String>,
}

/// Normalized Open-Access facts for one record.
#[derive(Debug, Clone, Default)]
pub struct OaRecord {
    /// Whether any OA copy exists.
    pub is_oa: bool,
    /// gold / green / bronze / hybrid / closed.
    pub oa_status: Option<String>,
    /// License of the best OA location.
    pub license: Option<String>,
    /// Direct PDF URL of the best OA location.
    pub pdf_url: Option<String>,
    /// Raw-call provenance.
    pub provenance: Option<Provenance>,
}

/// Queries `/v2/{doi}?email={contact}`.
pub struct UnpaywallAdapter {
    http: HttpClient,
    limiter: Arc<SourceRateLimiter>,
    base_url: String,
    email: String,
}

impl UnpaywallAdapter {
    /// Creates an adapter against the production API.
    #[must_use]
    pub fn new(http: HttpClient, limiter: Arc<SourceRateLimiter>, email: &str) -> Self {
        Self::with_base_url(http, limiter, email, DEFAULT_BASE_URL)
    }

    /// Creates an adapter with a custom base URL (for testing with wiremock).
    #[must_use]
    pub fn with_base_url(
        http: HttpClient,
        limiter: Arc<SourceRateLimiter>,
        email: &str,
        base_url: &str,
    ) -> Self {
        Self {
            http,
            limiter,
            base_url: base_url.trim_end_matches('/').to_string(),
            email: email.to_string(),
        }
    }

    /// Fetches the OA record for a DOI.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] on transport failure, non-success status, or
    /// an unparseable payload. The enricher records failures and moves on.
    pub async fn fetch_oa(&self, article: &ResearchArticle) -> Result<OaRecord, AdapterError> {
        let doi = article
            .doi_norm
            .as_deref()
            .ok_or_else(|| AdapterError::Payload {
                source_tag: SOURCE,
                message: "record has no DOI".to_string(),
            })?;

        let url = format!(
            "{}/v2/{doi}?email={}",
            self.base_url,
            urlencoding::encode(&self.email)
        );
        debug!(api_url = %url, "calling Unpaywall");

        self.limiter.acquire(SOURCE).await;
        let response = self.http.get_with_retry(&url, HeaderMap::new()).await?;

        let status = response.status();
        if !status.is_success() {
            if status.as_u16() != 404 {
                warn!(doi, status = status.as_u16(), "Unpaywall error status");
            }
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
        let parsed: UnpaywallResponse =
            serde_json::from_value(raw.clone()).map_err(|e| AdapterError::Payload {
                source_tag: SOURCE,
                message: e.to_string(),
            })?;

        let location = parsed.best_oa_location;
        Ok(OaRecord {
            is_oa: parsed.is_oa.unwrap_or(false),
            oa_status: parsed.oa_status,
            license: location.as_ref().and_then(|l| l.license.clone()),
            pdf_url: location.and_then(|l| l.url_for_pdf),
            provenance: Some(Provenance::now(SOURCE, &url, raw)),
        })
    }
}

impl std::fmt::Debug for UnpaywallAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnpaywallAdapter")
            .field("base_url", &self.base_url)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path_regex, query_param};
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

    fn adapter(base_url: &str) -> UnpaywallAdapter {
        let http = HttpClient::new("test-agent", 5, 0).unwrap();
        UnpaywallAdapter::with_base_url(
            http,
            Arc::new(SourceRateLimiter::with_defaults()),
            "curator@example.org",
            base_url,
        )
    }

    #[tokio::test]
    async fn test_fetch_oa_gold_with_pdf() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/v2/.+$"))
            .and(query_param("email", "curator@example.org"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "is_oa": true,
                "oa_status": "gold",
                "best_oa_location": {
                    "url_for_pdf": "https://publisher.example/open.pdf",
                    "license": "cc-by"
                }
            })))
            .mount(&server)
            .await;

        let oa = adapter(&server.uri())
            .fetch_oa(&article("10.1234/oa"))
            .await
            .unwrap();
        assert!(oa.is_oa);
        assert_eq!(oa.oa_status.as_deref(), Some("gold"));
        assert_eq!(oa.license.as_deref(), Some("cc-by"));
        assert_eq!(oa.pdf_url.as_deref(), Some("https://publisher.example/open.pdf"));
    }

    #[tokio::test]
    async fn test_fetch_oa_closed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "is_oa": false,
                "oa_status": "closed",
                "best_oa_location": null
            })))
            .mount(&server)
            .await;

        let oa = adapter(&server.uri())
            .fetch_oa(&article("10.1234/closed"))
            .await
            .unwrap();
        assert!(!oa.is_oa);
        assert_eq!(oa.oa_status.as_deref(), Some("closed"));
        assert!(oa.pdf_url.is_none());
    }

    #[tokio::test]
    async fn test_fetch_oa_404_is_error_for_caller() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = adapter(&server.uri()).fetch_oa(&article("10.1234/none")).await;
        assert!(matches!(
            result,
            Err(AdapterError::Status { status: 404, .. })
        ));
    }
}
