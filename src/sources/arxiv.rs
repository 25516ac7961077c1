//! arXiv adapter - Atom feed lookup by identifier, with published-DOI
//! discovery from the `arxiv:doi` element.

use std::sync::Arc;

use async_trait::async_trait;
use quick_xml::Reader;
use quick_xml::events::Event;
use reqwest::header::HeaderMap;
use tracing::debug;

use crate::doi::{PreprintPlatform, arxiv_id_from_doi, is_arxiv_id};
use crate::net::{HttpClient, SourceRateLimiter};
use crate::store::ResearchArticle;

use super::{AdapterError, MetadataPatch, PreprintFetch, PreprintSource, Provenance};

const SOURCE: &str = "arxiv";
const DEFAULT_BASE_URL: &str = "https://export.arxiv.org";

/// One parsed Atom entry.
#[derive(Debug, Default)]
struct ArxivEntry {
    title: Option<String>,
    summary: Option<String>,
    published: Option<String>,
    authors: Vec<String>,
    doi: Option<String>,
}

/// Queries `/api/query?id_list={id}` for a single identifier.
pub struct ArxivAdapter {
    http: HttpClient,
    limiter: Arc<SourceRateLimiter>,
    base_url: String,
}

impl ArxivAdapter {
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
}

impl std::fmt::Debug for ArxivAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArxivAdapter")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl PreprintSource for ArxivAdapter {
    fn platform(&self) -> PreprintPlatform {
        PreprintPlatform::Arxiv
    }

    async fn fetch_preprint(
        &self,
        article: &ResearchArticle,
    ) -> Result<PreprintFetch, AdapterError> {
        let arxiv_id = article
            .arxiv_id
            .as_deref()
            .filter(|id| is_arxiv_id(id))
            .map(str::to_string)
            .or_else(|| article.doi_norm.as_deref().and_then(arxiv_id_from_doi))
            .ok_or_else(|| AdapterError::Payload {
                source_tag: SOURCE,
                message: "record has no arXiv identifier".to_string(),
            })?;

        let url = format!(
            "{}/api/query?id_list={}&max_results=1",
            self.base_url,
            urlencoding::encode(&arxiv_id)
        );
        debug!(api_url = %url, "calling arXiv");

        self.limiter.acquire(SOURCE).await;
        let response = self.http.get_with_retry(&url, HeaderMap::new()).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AdapterError::Status {
                source_tag: SOURCE,
                status: status.as_u16(),
            });
        }

        let xml = response.text().await.map_err(|e| AdapterError::Payload {
            source_tag: SOURCE,
            message: e.to_string(),
        })?;
        let entry = parse_first_entry(&xml).ok_or_else(|| AdapterError::Payload {
            source_tag: SOURCE,
            message: format!("no entry for {arxiv_id} in feed"),
        })?;

        if entry.doi.is_some() {
            debug!(arxiv_id, doi = ?entry.doi, "arXiv reports a published DOI");
        }

        Ok(PreprintFetch {
            abstract_text: entry.summary.clone().filter(|text| !text.is_empty()),
            published_doi: entry.doi.clone(),
            metadata: MetadataPatch {
                title: entry.title.clone(),
                publication_date: entry
                    .published
                    .as_deref()
                    .map(|date| date.chars().take(10).collect()),
                authors: (!entry.authors.is_empty()).then(|| entry.authors.join("; ")),
                source_title: None,
                total_citations: None,
            },
            provenance: Some(Provenance::now(SOURCE, &url, serde_json::Value::String(xml))),
        })
    }
}

/// Pulls the first `<entry>` out of an arXiv Atom feed.
///
/// The feed itself carries a `<title>` before any entry, so capture only
/// starts once inside an entry element.
fn parse_first_entry(xml: &str) -> Option<ArxivEntry> {
    let mut reader = Reader::from_reader(xml.as_bytes());
    reader.config_mut().trim_text(true);

    let mut entry: Option<ArxivEntry> = None;
    let mut capture: Option<&'static str> = None;
    let mut buffer = Vec::new();

    loop {
        match reader.read_event_into(&mut buffer) {
            Ok(Event::Start(element)) => match element.local_name().as_ref() {
                b"entry" if entry.is_none() => entry = Some(ArxivEntry::default()),
                b"title" if entry.is_some() => capture = Some("title"),
                b"summary" if entry.is_some() => capture = Some("summary"),
                b"published" if entry.is_some() => capture = Some("published"),
                b"name" if entry.is_some() => capture = Some("name"),
                b"doi" if entry.is_some() => capture = Some("doi"),
                _ => {}
            },
            Ok(Event::Text(text)) => {
                if let (Some(field), Some(current)) = (capture, entry.as_mut()) {
                    if let Ok(value) = text.unescape() {
                        let value = value.split_whitespace().collect::<Vec<_>>().join(" ");
                        match field {
                            "title" => current.title = Some(value),
                            "summary" => current.summary = Some(value),
                            "published" => current.published = Some(value),
                            "name" => current.authors.push(value),
                            "doi" => current.doi = Some(value),
                            _ => {}
                        }
                    }
                }
            }
            Ok(Event::End(element)) => {
                capture = None;
                if element.local_name().as_ref() == b"entry" {
                    break;
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => return None,
            _ => {}
        }
        buffer.clear();
    }

    entry
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <title>ArXiv Query: search_query=&amp;id_list=2103.12345</title>
  <entry>
    <id>http://arxiv.org/abs/2103.12345v2</id>
    <title>Attention Is Not All You Need</title>
    <summary>
      We revisit attention mechanisms
      across several benchmarks.
    </summary>
    <published>2021-03-22T17:59:59Z</published>
    <author><name>A. Researcher</name></author>
    <author><name>B. Scientist</name></author>
    <arxiv:doi>10.1038/xxxxx</arxiv:doi>
  </entry>
</feed>"#;

    fn article(arxiv_id: Option<&str>, doi: Option<&str>) -> ResearchArticle {
        ResearchArticle {
            id: 1,
            doi_norm: doi.map(str::to_string),
            title: "t".to_string(),
            publication_date: None,
            total_citations: None,
            citations_per_year: None,
            authors: None,
            source_title: None,
            arxiv_id: arxiv_id.map(str::to_string),
            is_preprint: true,
            preprint_platform: Some("arxiv".to_string()),
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

    fn adapter(base_url: &str) -> ArxivAdapter {
        let http = HttpClient::new("test-agent", 5, 0).unwrap();
        ArxivAdapter::with_base_url(
            http,
            Arc::new(SourceRateLimiter::with_defaults()),
            base_url,
        )
    }

    // ==================== Feed Parsing Tests ====================

    #[test]
    fn test_parse_first_entry_fields() {
        let entry = parse_first_entry(FEED).unwrap();
        assert_eq!(entry.title.as_deref(), Some("Attention Is Not All You Need"));
        assert_eq!(
            entry.summary.as_deref(),
            Some("We revisit attention mechanisms across several benchmarks.")
        );
        assert_eq!(entry.published.as_deref(), Some("2021-03-22T17:59:59Z"));
        assert_eq!(entry.authors, vec!["A. Researcher", "B. Scientist"]);
        assert_eq!(entry.doi.as_deref(), Some("10.1038/xxxxx"));
    }

    #[test]
    fn test_parse_feed_without_entries() {
        let empty = r#"<feed xmlns="http://www.w3.org/2005/Atom"><title>empty</title></feed>"#;
        assert!(parse_first_entry(empty).is_none());
    }

    // ==================== Wiremock Tests ====================

    #[tokio::test]
    async fn test_fetch_preprint_discovers_published_doi() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/query"))
            .and(query_param("id_list", "2103.12345"))
            .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
            .mount(&server)
            .await;

        let fetch = adapter(&server.uri())
            .fetch_preprint(&article(Some("2103.12345"), None))
            .await
            .unwrap();

        assert_eq!(fetch.published_doi.as_deref(), Some("10.1038/xxxxx"));
        assert!(fetch.abstract_text.unwrap().starts_with("We revisit"));
        assert_eq!(
            fetch.metadata.publication_date.as_deref(),
            Some("2021-03-22")
        );
    }

    #[tokio::test]
    async fn test_fetch_preprint_accepts_arxiv_doi() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("id_list", "2103.12345"))
            .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
            .expect(1)
            .mount(&server)
            .await;

        let fetch = adapter(&server.uri())
            .fetch_preprint(&article(None, Some("10.48550/arxiv.2103.12345")))
            .await
            .unwrap();
        assert!(fetch.abstract_text.is_some());
    }

    #[tokio::test]
    async fn test_fetch_preprint_without_identifier_errors() {
        let result = adapter("http://127.0.0.1:9")
            .fetch_preprint(&article(None, Some("10.1101/2021.01.01")))
            .await;
        assert!(matches!(result, Err(AdapterError::Payload { .. })));
    }
}
