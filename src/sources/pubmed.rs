//! PubMed adapter - two-step ESearch (JSON) + EFetch (XML) abstract lookup.
//!
//! ESearch maps the DOI to a PMID; EFetch returns the article XML from which
//! the `<AbstractText>` sections are extracted.

use std::sync::Arc;

use async_trait::async_trait;
use quick_xml::Reader;
use quick_xml::events::Event;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::net::{HttpClient, SourceRateLimiter};
use crate::store::ResearchArticle;

use super::{AbstractFetch, AbstractSource, AdapterError, MetadataPatch, Provenance};

const SOURCE: &str = "pubmed";
const DEFAULT_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov";

#[derive(Debug, Deserialize)]
struct ESearchResponse {
    esearchresult: Option<ESearchResult>,
}

#[derive(Debug, Deserialize)]
struct ESearchResult {
    idlist: Option<Vec<String>>,
}

/// Resolves a DOI to a PMID, then pulls the abstract from the EFetch XML.
pub struct PubmedAdapter {
    http: HttpClient,
    limiter: Arc<SourceRateLimiter>,
    base_url: String,
}

impl PubmedAdapter {
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

    async fn esearch_pmid(&self, doi: &str) -> Result<Option<String>, AdapterError> {
        let url = format!(
            "{}/entrez/eutils/esearch.fcgi?db=pubmed&term={}[doi]&retmode=json",
            self.base_url,
            urlencoding::encode(doi)
        );
        debug!(api_url = %url, "calling PubMed ESearch");

        self.limiter.acquire(SOURCE).await;
        let response = self.http.get_with_retry(&url, HeaderMap::new()).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AdapterError::Status {
                source_tag: SOURCE,
                status: status.as_u16(),
            });
        }

        let parsed: ESearchResponse =
            response.json().await.map_err(|e| AdapterError::Payload {
                source_tag: SOURCE,
                message: e.to_string(),
            })?;

        Ok(parsed
            .esearchresult
            .and_then(|result| result.idlist)
            .and_then(|ids| ids.into_iter().next()))
    }

    async fn efetch_xml(&self, pmid: &str) -> Result<(String, String), AdapterError> {
        let url = format!(
            "{}/entrez/eutils/efetch.fcgi?db=pubmed&id={pmid}&rettype=abstract&retmode=xml",
            self.base_url
        );
        debug!(api_url = %url, "calling PubMed EFetch");

        self.limiter.acquire(SOURCE).await;
        let response = self.http.get_with_retry(&url, HeaderMap::new()).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AdapterError::Status {
                source_tag: SOURCE,
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| AdapterError::Payload {
            source_tag: SOURCE,
            message: e.to_string(),
        })?;
        Ok((body, url))
    }
}

impl std::fmt::Debug for PubmedAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubmedAdapter")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AbstractSource for PubmedAdapter {
    fn source(&self) -> &'static str {
        SOURCE
    }

    async fn fetch_abstract(&self, article: &ResearchArticle) -> AbstractFetch {
        let Some(doi) = article.doi_norm.as_deref() else {
            return AbstractFetch::miss("no doi");
        };

        let pmid = match self.esearch_pmid(doi).await {
            Ok(Some(pmid)) => pmid,
            Ok(None) => return AbstractFetch::miss("doi not found"),
            Err(error) => {
                warn!(doi, error = %error, "PubMed ESearch failed");
                return AbstractFetch::miss(error.to_string());
            }
        };

        match self.efetch_xml(&pmid).await {
            Ok((xml, url)) => {
                let abstract_text = extract_abstract_text(&xml).filter(|text| !text.is_empty());
                let miss_reason = abstract_text
                    .is_none()
                    .then(|| "no abstract in response".to_string());
                AbstractFetch {
                    abstract_text,
                    miss_reason,
                    metadata: MetadataPatch::default(),
                    provenance: Some(Provenance::now(
                        SOURCE,
                        &url,
                        serde_json::Value::String(xml),
                    )),
                }
            }
            Err(error) => {
                warn!(doi, pmid, error = %error, "PubMed EFetch failed");
                AbstractFetch::miss(error.to_string())
            }
        }
    }
}

/// Collects the text of every `<AbstractText>` element, joined with spaces.
/// Structured abstracts carry a `Label` attribute that is prepended when
/// present.
fn extract_abstract_text(xml: &str) -> Option<String> {
    let mut reader = Reader::from_reader(xml.as_bytes());
    reader.config_mut().trim_text(true);

    let mut sections: Vec<String> = Vec::new();
    let mut depth_in_abstract = 0usize;
    let mut current = String::new();
    let mut buffer = Vec::new();

    loop {
        match reader.read_event_into(&mut buffer) {
            Ok(Event::Start(element)) if element.local_name().as_ref() == b"AbstractText" => {
                depth_in_abstract = 1;
                current.clear();
                let label = element.attributes().flatten().find_map(|attribute| {
                    (attribute.key.local_name().as_ref() == b"Label")
                        .then(|| String::from_utf8_lossy(&attribute.value).into_owned())
                });
                if let Some(label) = label {
                    current.push_str(&label);
                    current.push_str(": ");
                }
            }
            Ok(Event::Start(_)) if depth_in_abstract > 0 => depth_in_abstract += 1,
            Ok(Event::End(element)) if depth_in_abstract > 0 => {
                depth_in_abstract -= 1;
                if depth_in_abstract == 0 && element.local_name().as_ref() == b"AbstractText" {
                    let section = current.split_whitespace().collect::<Vec<_>>().join(" ");
                    if !section.is_empty() {
                        sections.push(section);
                    }
                }
            }
            Ok(Event::Text(text)) if depth_in_abstract > 0 => {
                if let Ok(value) = text.unescape() {
                    current.push_str(&value);
                    current.push(' ');
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => return None,
            _ => {}
        }
        buffer.clear();
    }

    (!sections.is_empty()).then(|| sections.join(" "))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
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

    fn adapter(base_url: &str) -> PubmedAdapter {
        let http = HttpClient::new("test-agent", 5, 0).unwrap();
        PubmedAdapter::with_base_url(
            http,
            Arc::new(SourceRateLimiter::with_defaults()),
            base_url,
        )
    }

    // ==================== XML Extraction Tests ====================

    #[test]
    fn test_extract_abstract_simple() {
        let xml = "<PubmedArticleSet><Abstract>\
            <AbstractText>A plain abstract.</AbstractText>\
            </Abstract></PubmedArticleSet>";
        assert_eq!(
            extract_abstract_text(xml).unwrap(),
            "A plain abstract."
        );
    }

    #[test]
    fn test_extract_abstract_structured_labels() {
        let xml = "<Abstract>\
            <AbstractText Label=\"BACKGROUND\">Context here.</AbstractText>\
            <AbstractText Label=\"RESULTS\">Findings here.</AbstractText>\
            </Abstract>";
        assert_eq!(
            extract_abstract_text(xml).unwrap(),
            "BACKGROUND: Context here. RESULTS: Findings here."
        );
    }

    #[test]
    fn test_extract_abstract_nested_markup() {
        let xml = "<Abstract><AbstractText>Uses <i>italics</i> inline.</AbstractText></Abstract>";
        assert_eq!(
            extract_abstract_text(xml).unwrap(),
            "Uses italics inline."
        );
    }

    #[test]
    fn test_extract_abstract_absent() {
        assert!(extract_abstract_text("<PubmedArticleSet/>").is_none());
    }

    // ==================== Wiremock Tests ====================

    #[tokio::test]
    async fn test_two_step_lookup() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/entrez/eutils/esearch.fcgi"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "esearchresult": {"idlist": ["12345678"]}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/entrez/eutils/efetch.fcgi"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<PubmedArticleSet><Abstract>\
                 <AbstractText>Fetched from PubMed.</AbstractText>\
                 </Abstract></PubmedArticleSet>",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let fetch = adapter(&server.uri())
            .fetch_abstract(&article("10.1234/pm"))
            .await;
        assert_eq!(fetch.abstract_text.as_deref(), Some("Fetched from PubMed."));
        assert!(fetch.provenance.is_some());
    }

    #[tokio::test]
    async fn test_empty_idlist_is_miss_without_efetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/entrez/eutils/esearch.fcgi"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "esearchresult": {"idlist": []}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/entrez/eutils/efetch.fcgi"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let fetch = adapter(&server.uri())
            .fetch_abstract(&article("10.1234/none"))
            .await;
        assert_eq!(fetch.miss_reason.as_deref(), Some("doi not found"));
    }
}
