//! Preprint detection, platform enrichment, and published-version discovery.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::doi::{self, PreprintPlatform};
use crate::sources::{PreprintSource, Provenance};
use crate::store::{ResearchArticle, Store, StoreError};

/// Outcome of preprint enrichment for one record.
#[derive(Debug, Default)]
pub struct PreprintOutcome {
    /// Number of new published-version records created (0 or 1).
    pub created_published: usize,
    /// Provenance of the platform call, when one was made.
    pub provenance: Option<Provenance>,
}

/// Detects preprints by identifier namespace, queries the platform adapter,
/// and materializes the preprint↔published link.
pub struct PreprintEnricher {
    store: Store,
    arxiv: Arc<dyn PreprintSource>,
    biorxiv: Arc<dyn PreprintSource>,
    preprints_org: Arc<dyn PreprintSource>,
}

impl PreprintEnricher {
    /// Builds an enricher over the three platform adapters.
    #[must_use]
    pub fn new(
        store: Store,
        arxiv: Arc<dyn PreprintSource>,
        biorxiv: Arc<dyn PreprintSource>,
        preprints_org: Arc<dyn PreprintSource>,
    ) -> Self {
        Self {
            store,
            arxiv,
            biorxiv,
            preprints_org,
        }
    }

    /// Returns the platform when the record's identifiers fall in a known
    /// preprint namespace.
    #[must_use]
    pub fn detect(article: &ResearchArticle) -> Option<PreprintPlatform> {
        doi::detect_platform(article.doi_norm.as_deref(), article.arxiv_id.as_deref())
    }

    /// Enriches a detected preprint in place.
    ///
    /// Sets the preprint flag and platform tag, takes the abstract and
    /// metadata from the platform, and when a published DOI is discovered:
    /// links to the existing record for that DOI, or creates a new
    /// enrichment-eligible record and links to it. Re-runs are no-ops for
    /// the link and leave already-enriched targets untouched.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] only for persistence failures; adapter
    /// failures are folded into the record's miss reasons.
    #[instrument(skip_all, fields(article_id = article.id))]
    pub async fn enrich(
        &self,
        article: &mut ResearchArticle,
    ) -> Result<PreprintOutcome, StoreError> {
        let Some(platform) = Self::detect(article) else {
            return Ok(PreprintOutcome::default());
        };

        article.is_preprint = true;
        article.preprint_platform = Some(platform.as_str().to_string());
        if platform == PreprintPlatform::Arxiv && article.arxiv_id.is_none() {
            article.arxiv_id = article.doi_norm.as_deref().and_then(doi::arxiv_id_from_doi);
        }

        let adapter = match platform {
            PreprintPlatform::Arxiv => &self.arxiv,
            PreprintPlatform::Biorxiv => &self.biorxiv,
            PreprintPlatform::PreprintsOrg => &self.preprints_org,
        };

        let fetch = match adapter.fetch_preprint(article).await {
            Ok(fetch) => fetch,
            Err(error) => {
                warn!(platform = %platform, error = %error, "platform fetch failed");
                append_reason(article, &format!("{platform}: {error}"));
                return Ok(PreprintOutcome::default());
            }
        };

        if article.abstract_text.is_none() {
            if let Some(abstract_text) = fetch.abstract_text {
                article.abstract_text = Some(abstract_text);
                article.abstract_source = Some(platform.as_str().to_string());
            } else {
                append_reason(article, &format!("{platform}: no abstract in response"));
            }
        }
        fetch.metadata.apply_missing(article);

        let mut outcome = PreprintOutcome {
            created_published: 0,
            provenance: fetch.provenance,
        };

        let published = fetch
            .published_doi
            .as_deref()
            .and_then(doi::normalize_doi)
            .filter(|published| Some(published.as_str()) != article.doi_norm.as_deref());
        if let Some(published_doi) = published {
            let published_id = match self.store.find_by_doi(&published_doi).await? {
                Some(existing) => {
                    debug!(%published_doi, existing_id = existing.id, "published version already known");
                    existing.id
                }
                None => {
                    let id = self
                        .store
                        .create_discovered_article(&published_doi, None)
                        .await?;
                    info!(%published_doi, new_id = id, "created published-version record");
                    outcome.created_published = 1;
                    id
                }
            };

            self.store
                .insert_article_version_link(article.id, published_id, platform.as_str())
                .await?;
        }

        Ok(outcome)
    }
}

fn append_reason(article: &mut ResearchArticle, token: &str) {
    article.abstract_no_retrieval_reason = Some(
        match article.abstract_no_retrieval_reason.take() {
            Some(existing) => format!("{existing}; {token}"),
            None => token.to_string(),
        },
    );
}
