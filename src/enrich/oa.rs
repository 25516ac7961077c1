//! Open-Access enrichment via Unpaywall.

use tracing::{instrument, warn};

use crate::sources::{Provenance, UnpaywallAdapter};
use crate::store::ResearchArticle;

/// Stores OA status, license, and the best OA PDF URL on the record.
pub struct OaEnricher {
    adapter: UnpaywallAdapter,
}

impl OaEnricher {
    /// Builds an enricher over the Unpaywall adapter.
    #[must_use]
    pub fn new(adapter: UnpaywallAdapter) -> Self {
        Self { adapter }
    }

    /// Enriches the record in place; returns the call's provenance.
    ///
    /// Records without a DOI are skipped. Lookup failures (including 404 for
    /// DOIs Unpaywall does not know) are logged and leave the record as-is.
    #[instrument(skip_all, fields(article_id = article.id))]
    pub async fn enrich(&self, article: &mut ResearchArticle) -> Option<Provenance> {
        article.doi_norm.as_deref()?;

        match self.adapter.fetch_oa(article).await {
            Ok(oa) => {
                article.oa_status = oa.oa_status;
                article.oa_license = oa.license;
                article.oa_pdf_url = oa.pdf_url;
                oa.provenance
            }
            Err(error) => {
                warn!(doi = article.doi_norm.as_deref(), error = %error, "OA lookup failed");
                None
            }
        }
    }
}
