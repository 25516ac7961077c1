//! bioRxiv/medRxiv adapter - the Cold Spring Harbor details API.
//!
//! Both servers share the `10.1101` DOI prefix, so the adapter asks bioRxiv
//! first and falls back to medRxiv when the DOI is unknown there. The
//! `published` field of a hit carries the published-version DOI (or `"NA"`).

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::doi::PreprintPlatform;
use crate::net::{HttpClient, SourceRateLimiter};
use crate::store::ResearchArticle;

use super::{AdapterError, MetadataPatch, PreprintFetch, PreprintSource, Provenance};

const SOURCE: &str = "biorxiv";
const DEFAULT_BASE_URL: &str = "https://api.biorxiv.org";
const SERVERS: [&str; 2] = ["biorxiv", "medrxiv"];

#[derive(Debug, Deserialize)]
struct DetailsResponse {
    collection: Option<Vec<DetailsRecord>>,
}

#[derive(Debug, Deserialize)]
struct DetailsRecord {
    title: Option<String>,
    authors: Option<String>,
    date: Option<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    published: Option<String>,
}

/// Queries `/details/{server}/{doi}` across both servers.
pub struct BiorxivAdapter {
    http: HttpClient,
    limiter: Arc<SourceRateLimiter>,
    base_url: String,
}

impl BiorxivAdapter {
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

    async fn details(
        &self,
        server: &str,
        doi: &str,
    ) -> Result<(Option<DetailsRecord>, Provenance), AdapterError> {
        let url = format!("{}/details/{server}/{doi}", self.base_url);
        debug!(api_url = %url, "calling bioRxiv details");

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
        let parsed: DetailsResponse =
            serde_json::from_value(raw.clone()).map_err(|e| AdapterError::Payload {
                source_tag: SOURCE,
                message: e.to_string(),
            })?;

        // The API returns the newest version last.
        let latest = parsed.collection.and_then(|mut records| records.pop());
        Ok((latest, Provenance::now(SOURCE, &url, raw)))
    }
}

impl std::fmt::Debug for BiorxivAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BiorxivAdapter")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl PreprintSource for BiorxivAdapter {
    fn platform(&self) -> PreprintPlatform {
        PreprintPlatform::Biorxiv
    }

    async fn fetch_preprint(
        &self,
        article: &ResearchArticle,
    ) -> Result<PreprintFetch, AdapterError> {
        let doi = article
            .doi_norm
            .as_deref()
            .ok_or_else(|| AdapterError::Payload {
                source_tag: SOURCE,
                message: "record has no DOI".to_string(),
            })?;

        let mut last_error = None;
        for server in SERVERS {
            match self.details(server, doi).await {
                Ok((Some(record), provenance)) => {
                    let published_doi = record
                        .published
                        .clone()
                        .filter(|value| !value.is_empty() && !value.eq_ignore_ascii_case("na"));
                    return Ok(PreprintFetch {
                        abstract_text: record
                            .abstract_text
                            .clone()
                            .map(|text| text.trim().to_string())
                            .filter(|text| !text.is_empty()),
                        published_doi,
                        metadata: MetadataPatch {
                            title: record.title.clone(),
                            publication_date: record.date.clone(),
                            authors: record.authors.clone(),
                            source_title: None,
                            total_citations: None,
                        },
                        provenance: Some(provenance),
                    });
                }
                Ok((None, _)) => {
                    debug!(doi, server, "not found on server, trying next");
                }
                Err(error) => {
                    warn!(doi, server, error = %error, "details call failed");
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AdapterError::Payload {
            source_tag: SOURCE,
            message: format!("{doi} not found on bioRxiv or medRxiv"),
        }))
    }
}
