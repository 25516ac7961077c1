//! Europe PMC adapter - abstracts via the REST search endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::net::{HttpClient, SourceRateLimiter};
use crate::store::ResearchArticle;

use super::{AbstractFetch, AbstractSource, AdapterError, MetadataPatch, Provenance};

const SOURCE: &str = "europepmc";
const DEFAULT_BASE_URL: &str = "https://www.ebi.ac.uk/europepmc";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EpmcResponse {
    result_list: Option<EpmcResultList>,
}

#[derive(Debug, Deserialize)]
struct EpmcResultList {
    result: Vec<EpmcResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EpmcResult {
    title: Option<String>,
    abstract_text: Option<String>,
    author_string: Option<String>,
    journal_title: Option<String>,
    first_publication_date: Option<String>,
    cited_by_count: Option<i64>,
}

/// Searches `DOI:"{doi}"` with `resultType=core` for the abstract.
pub struct EuropePmcAdapter {
    http: HttpClient,
    limiter: Arc<SourceRateLimiter>,
    base_url: String,
}

impl EuropePmcAdapter {
    /// Creates an adapter against the production API.
    #[must_use]
    pub fn new(http: HttpClient, limiter: Arc<SourceRateLimiter>) -> Self {
        Self::with_base_url(http, limiter, DEFAULT_BASE_URL)
    }

    /// Creates an adapter with a custom base URL (for testing with wiremock).
    #[must_use]
    pub fn with_base_url(
        http: HttpClient,
        limiter: Arc<SourceRateLimiter>,
        base_url: &str,
    ) -> Self {
        Self {
            http,
            limiter,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn search(&self, doi: &str) -> Result<(Option<EpmcResult>, Provenance), AdapterError> {
        let doi_query = format!("DOI:\"{doi}\"");
        let query = urlencoding::encode(&doi_query);
        let url = format!(
            "{}/webservices/rest/search?query={query}&resultType=core&format=json",
            self.base_url
        );
        debug!(api_url = %url, "calling Europe PMC");

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
        let parsed: EpmcResponse =
            serde_json::from_value(raw.clone()).map_err(|e| AdapterError::Payload {
                source_tag: SOURCE,
                message: e.to_string(),
            })?;

        let first = parsed
            .result_list
            .map(|list| list.result)
            .and_then(|mut results| {
                if results.is_empty() {
                    None
                } else {
                    Some(results.remove(0))
                }
            });
        Ok((first, Provenance::now(SOURCE, &url, raw)))
    }
}

impl std::fmt::Debug for EuropePmcAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EuropePmcAdapter")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AbstractSource for EuropePmcAdapter {
    fn source(&self) -> &'static str {
        SOURCE
    }

    async fn fetch_abstract(&self, article: &ResearchArticle) -> AbstractFetch {
        let Some(doi) = article.doi_norm.as_deref() else {
            return AbstractFetch::miss("no doi");
        };

        match self.search(doi).await {
            Ok((Some(result), provenance)) => {
                let abstract_text = result
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
                    metadata: MetadataPatch {
                        title: result.title.clone(),
                        publication_date: result.first_publication_date.clone(),
                        authors: result.author_string.clone(),
                        source_title: result.journal_title.clone(),
                        total_citations: result.cited_by_count,
                    },
                    provenance: Some(provenance),
                }
            }
            Ok((None, provenance)) => AbstractFetch {
                miss_reason: Some("doi not found".to_string()),
                provenance: Some(provenance),
                ..AbstractFetch::default()
            },
            Err(error) => {
                warn!(doi, error = %error, "Europe PMC abstract fetch failed");
                AbstractFetch::miss(error.to_string())
            }
        }
    }
}
