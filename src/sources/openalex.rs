//! OpenAlex adapter - metadata and abstracts via `/works/doi:{doi}`.
//!
//! OpenAlex ships abstracts as an inverted index (word → positions); the
//! adapter reconstructs plain text before handing it to the pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::net::{HttpClient, SourceRateLimiter};
use crate::store::ResearchArticle;

use super::{AbstractFetch, AbstractSource, AdapterError, MetadataPatch, Provenance};

const SOURCE: &str = "openalex";
const DEFAULT_BASE_URL: &str = "https://api.openalex.org";

// ==================== OpenAlex API Response Types ====================

#[derive(Debug, Deserialize)]
struct OpenAlexWork {
    display_name: Option<String>,
    publication_date: Option<String>,
    cited_by_count: Option<i64>,
    abstract_inverted_index: Option<HashMap<String, Vec<i64>>>,
    authorships: Option<Vec<OpenAlexAuthorship>>,
    primary_location: Option<OpenAlexLocation>,
}

#[derive(Debug, Deserialize)]
struct OpenAlexAuthorship {
    author: Option<OpenAlexAuthor>,
}

#[derive(Debug, Deserialize)]
struct OpenAlexAuthor {
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAlexLocation {
    source: Option<OpenAlexSource>,
}

#[derive(Debug, Deserialize)]
struct OpenAlexSource {
    display_name: Option<String>,
}

// ==================== OpenAlexAdapter ====================

/// Queries one work by DOI, with the polite-pool `mailto` parameter.
pub struct OpenAlexAdapter {
    http: HttpClient,
    limiter: Arc<SourceRateLimiter>,
    base_url: String,
    mailto: String,
}

impl OpenAlexAdapter {
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

    async fn fetch_work(&self, doi: &str) -> Result<(OpenAlexWork, Provenance), AdapterError> {
        let url = format!(
            "{}/works/doi:{}?mailto={}",
            self.base_url,
            doi,
            urlencoding::encode(&self.mailto)
        );
        debug!(api_url = %url, "calling OpenAlex");

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
        let work: OpenAlexWork =
            serde_json::from_value(raw.clone()).map_err(|e| AdapterError::Payload {
                source_tag: SOURCE,
                message: e.to_string(),
            })?;

        Ok((work, Provenance::now(SOURCE, &url, raw)))
    }
}

impl std::fmt::Debug for OpenAlexAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAlexAdapter")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AbstractSource for OpenAlexAdapter {
    fn source(&self) -> &'static str {
        SOURCE
    }

    async fn fetch_abstract(&self, article: &ResearchArticle) -> AbstractFetch {
        let Some(doi) = article.doi_norm.as_deref() else {
            return AbstractFetch::miss("no doi");
        };

        match self.fetch_work(doi).await {
            Ok((work, provenance)) => {
                let abstract_text = work
                    .abstract_inverted_index
                    .as_ref()
                    .map(reconstruct_abstract)
                    .filter(|text| !text.is_empty());
                let miss_reason = abstract_text
                    .is_none()
                    .then(|| "no abstract in response".to_string());
                AbstractFetch {
                    abstract_text,
                    miss_reason,
                    metadata: extract_metadata(&work),
                    provenance: Some(provenance),
                }
            }
            Err(AdapterError::Status { status: 404, .. }) => AbstractFetch::miss("doi not found"),
            Err(error) => {
                warn!(doi, error = %error, "OpenAlex abstract fetch failed");
                AbstractFetch::miss(error.to_string())
            }
        }
    }
}

// ==================== Extraction Helpers ====================

/// Rebuilds plain text from OpenAlex's word → positions inverted index.
fn reconstruct_abstract(index: &HashMap<String, Vec<i64>>) -> String {
    let mut positioned: Vec<(i64, &str)> = index
        .iter()
        .flat_map(|(word, positions)| positions.iter().map(move |pos| (*pos, word.as_str())))
        .collect();
    positioned.sort_unstable_by_key(|(pos, _)| *pos);
    positioned
        .into_iter()
        .map(|(_, word)| word)
        .collect::<Vec<_>>()
        .join(" ")
}

fn extract_metadata(work: &OpenAlexWork) -> MetadataPatch {
    let authors: Vec<String> = work
        .authorships
        .as_deref()
        .unwrap_or(&[])
        .iter()
        .filter_map(|a| a.author.as_ref()?.display_name.clone())
        .collect();

    MetadataPatch {
        title: work.display_name.clone(),
        publication_date: work.publication_date.clone(),
        authors: (!authors.is_empty()).then(|| authors.join("; ")),
        source_title: work
            .primary_location
            .as_ref()
            .and_then(|location| location.source.as_ref())
            .and_then(|source| source.display_name.clone()),
        total_citations: work.cited_by_count,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(base_url: &str) -> OpenAlexAdapter {
        let http = HttpClient::new("test-agent", 5, 0).unwrap();
        OpenAlexAdapter::with_base_url(
            http,
            Arc::new(SourceRateLimiter::with_defaults()),
            "curator@example.org",
            base_url,
        )
    }

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

    // ==================== Reconstruction Tests ====================

    #[test]
    fn test_reconstruct_abstract_orders_by_position() {
        let mut index = HashMap::new();
        index.insert("networks".to_string(), vec![3]);
        index.insert("study".to_string(), vec![1]);
        index.insert("We".to_string(), vec![0]);
        index.insert("neural".to_string(), vec![2]);
        assert_eq!(reconstruct_abstract(&index), "We study neural networks");
    }

    #[test]
    fn test_reconstruct_abstract_repeated_words() {
        let mut index = HashMap::new();
        index.insert("the".to_string(), vec![0, 2]);
        index.insert("more".to_string(), vec![1]);
        index.insert("merrier".to_string(), vec![3]);
        assert_eq!(reconstruct_abstract(&index), "the more the merrier");
    }

    #[test]
    fn test_reconstruct_abstract_empty() {
        assert_eq!(reconstruct_abstract(&HashMap::new()), "");
    }

    // ==================== Wiremock Tests ====================

    #[tokio::test]
    async fn test_fetch_abstract_reconstructs_text() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/works/doi:.+$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "display_name": "Indexed Paper",
                "publication_date": "2022-06-01",
                "cited_by_count": 9,
                "abstract_inverted_index": {
                    "Deep": [0], "learning": [1], "works.": [2]
                },
                "authorships": [
                    {"author": {"display_name": "Ada Lovelace"}}
                ],
                "primary_location": {"source": {"display_name": "NeurIPS"}}
            })))
            .mount(&server)
            .await;

        let fetch = adapter(&server.uri())
            .fetch_abstract(&article("10.1234/dl"))
            .await;

        assert_eq!(fetch.abstract_text.as_deref(), Some("Deep learning works."));
        assert_eq!(fetch.metadata.title.as_deref(), Some("Indexed Paper"));
        assert_eq!(fetch.metadata.authors.as_deref(), Some("Ada Lovelace"));
        assert_eq!(fetch.metadata.source_title.as_deref(), Some("NeurIPS"));
        assert_eq!(fetch.metadata.total_citations, Some(9));
    }

    #[tokio::test]
    async fn test_fetch_abstract_missing_index_is_miss() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "display_name": "No abstract"
            })))
            .mount(&server)
            .await;

        let fetch = adapter(&server.uri())
            .fetch_abstract(&article("10.1234/na"))
            .await;
        assert!(fetch.abstract_text.is_none());
        assert_eq!(fetch.miss_reason.as_deref(), Some("no abstract in response"));
    }
}
