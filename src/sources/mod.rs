//! Source adapters for the external scholarly APIs.
//!
//! Each adapter shapes requests for one provider and normalizes its response
//! into the shared [`MetadataPatch`] / abstract / provenance forms. Adapters
//! never raise past their caller: abstract fetches fold failures into a miss
//! reason, preprint fetches surface an [`AdapterError`] that the enricher
//! records and moves on from.
//!
//! # Adapters
//!
//! - [`SemanticScholarAdapter`], [`CrossrefAdapter`], [`OpenAlexAdapter`],
//!   [`EuropePmcAdapter`], [`PubmedAdapter`] - abstract pipeline members
//! - [`ArxivAdapter`], [`BiorxivAdapter`], [`PreprintsOrgAdapter`] - preprint
//!   platforms (abstract + published-DOI discovery)
//! - [`UnpaywallAdapter`] - Open-Access status

mod arxiv;
mod biorxiv;
mod crossref;
mod europepmc;
mod openalex;
mod preprints_org;
mod pubmed;
mod semantic_scholar;
mod unpaywall;

pub use arxiv::ArxivAdapter;
pub use biorxiv::BiorxivAdapter;
pub use crossref::CrossrefAdapter;
pub use europepmc::EuropePmcAdapter;
pub use openalex::OpenAlexAdapter;
pub use preprints_org::PreprintsOrgAdapter;
pub use pubmed::PubmedAdapter;
pub use semantic_scholar::SemanticScholarAdapter;
pub use unpaywall::{OaRecord, UnpaywallAdapter};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::doi::PreprintPlatform;
use crate::net::HttpError;
use crate::store::ResearchArticle;

/// Errors from a single adapter call.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Transport failure that survived the HTTP retry budget.
    #[error("http: {0}")]
    Http(#[from] HttpError),

    /// The provider answered with a non-success status.
    #[error("{source_tag} returned HTTP {status}")]
    Status {
        /// Source tag.
        source_tag: &'static str,
        /// HTTP status code.
        status: u16,
    },

    /// The provider's payload did not parse as expected.
    #[error("{source_tag} payload: {message}")]
    Payload {
        /// Source tag.
        source_tag: &'static str,
        /// Parse failure detail.
        message: String,
    },
}

/// Per-source record of where a piece of metadata came from, including the
/// raw payload. Serialized under the source tag into the article's
/// provenance map; readers tolerate unknown fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    /// Source tag.
    pub source: String,
    /// Request URL (without secrets).
    pub url: String,
    /// When the call happened.
    pub timestamp: String,
    /// Raw response payload (JSON as-is; XML wrapped as a string).
    pub raw: serde_json::Value,
}

impl Provenance {
    /// Builds a provenance blob stamped with the current time.
    #[must_use]
    pub fn now(source: &str, url: &str, raw: serde_json::Value) -> Self {
        Self {
            source: source.to_string(),
            url: url.to_string(),
            timestamp: crate::store::now_rfc3339(),
            raw,
        }
    }
}

/// Bibliographic fields an adapter can contribute. Applied only where the
/// record has gaps, so earlier sources win.
#[derive(Debug, Clone, Default)]
pub struct MetadataPatch {
    /// Title.
    pub title: Option<String>,
    /// Publication date text.
    pub publication_date: Option<String>,
    /// Authors, formatted `Family, Given; ...`.
    pub authors: Option<String>,
    /// Journal or venue title.
    pub source_title: Option<String>,
    /// Total citation count.
    pub total_citations: Option<i64>,
}

impl MetadataPatch {
    /// Fills the record's missing fields from this patch. The title is only
    /// replaced while it still holds the DOI placeholder from discovery.
    pub fn apply_missing(&self, article: &mut ResearchArticle) {
        let title_is_placeholder =
            article.title.is_empty() || Some(article.title.as_str()) == article.doi_norm.as_deref();
        if title_is_placeholder {
            if let Some(title) = &self.title {
                article.title.clone_from(title);
            }
        }
        if article.publication_date.is_none() {
            article.publication_date.clone_from(&self.publication_date);
        }
        if article.authors.is_none() {
            article.authors.clone_from(&self.authors);
        }
        if article.source_title.is_none() {
            article.source_title.clone_from(&self.source_title);
        }
        if article.total_citations.is_none() {
            article.total_citations = self.total_citations;
        }
    }
}

/// Outcome of one abstract fetch. `miss_reason` is set exactly when
/// `abstract_text` is absent.
#[derive(Debug, Clone, Default)]
pub struct AbstractFetch {
    /// The abstract, when the source had one.
    pub abstract_text: Option<String>,
    /// Why the source did not supply an abstract.
    pub miss_reason: Option<String>,
    /// Bibliographic fields fetched alongside.
    pub metadata: MetadataPatch,
    /// Raw-call provenance, when a call was made.
    pub provenance: Option<Provenance>,
}

impl AbstractFetch {
    /// A miss without provenance (e.g. precondition failed before any call).
    #[must_use]
    pub fn miss(reason: impl Into<String>) -> Self {
        Self {
            miss_reason: Some(reason.into()),
            ..Self::default()
        }
    }
}

/// An API that can supply abstracts (and usually metadata) for the pipeline.
#[async_trait]
pub trait AbstractSource: Send + Sync {
    /// Source tag used for rate limiting, provenance, and miss reasons.
    fn source(&self) -> &'static str;

    /// Fetches the abstract for a record. Never fails: errors fold into the
    /// miss reason.
    async fn fetch_abstract(&self, article: &ResearchArticle) -> AbstractFetch;
}

/// Outcome of one preprint-platform fetch.
#[derive(Debug, Clone, Default)]
pub struct PreprintFetch {
    /// Abstract from the platform.
    pub abstract_text: Option<String>,
    /// DOI of the published version, when the platform knows one.
    pub published_doi: Option<String>,
    /// Bibliographic fields from the platform.
    pub metadata: MetadataPatch,
    /// Raw-call provenance.
    pub provenance: Option<Provenance>,
}

/// A preprint platform adapter: abstract plus published-version discovery.
#[async_trait]
pub trait PreprintSource: Send + Sync {
    /// The platform this adapter serves.
    fn platform(&self) -> PreprintPlatform;

    /// Fetches the platform record for a detected preprint.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] when the platform cannot be queried; the
    /// enricher records the failure and continues.
    async fn fetch_preprint(&self, article: &ResearchArticle)
    -> Result<PreprintFetch, AdapterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article_with(title: &str, doi: Option<&str>) -> ResearchArticle {
        ResearchArticle {
            id: 1,
            doi_norm: doi.map(str::to_string),
            title: title.to_string(),
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

    #[test]
    fn test_patch_fills_missing_only() {
        let mut article = article_with("Kept title", Some("10.1/x"));
        article.authors = Some("Existing, Author".to_string());

        let patch = MetadataPatch {
            title: Some("New title".to_string()),
            authors: Some("Other, Author".to_string()),
            source_title: Some("Nature".to_string()),
            total_citations: Some(12),
            ..MetadataPatch::default()
        };
        patch.apply_missing(&mut article);

        assert_eq!(article.title, "Kept title");
        assert_eq!(article.authors.as_deref(), Some("Existing, Author"));
        assert_eq!(article.source_title.as_deref(), Some("Nature"));
        assert_eq!(article.total_citations, Some(12));
    }

    #[test]
    fn test_patch_replaces_doi_placeholder_title() {
        let mut article = article_with("10.1/x", Some("10.1/x"));
        let patch = MetadataPatch {
            title: Some("Real title".to_string()),
            ..MetadataPatch::default()
        };
        patch.apply_missing(&mut article);
        assert_eq!(article.title, "Real title");
    }

    #[test]
    fn test_abstract_miss_shape() {
        let fetch = AbstractFetch::miss("no doi");
        assert!(fetch.abstract_text.is_none());
        assert_eq!(fetch.miss_reason.as_deref(), Some("no doi"));
        assert!(fetch.provenance.is_none());
    }
}
