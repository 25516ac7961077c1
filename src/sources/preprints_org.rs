//! Preprints.org adapter.
//!
//! Preprints.org has no public details API of its own; its `10.20944` DOIs
//! are registered with Crossref, which carries both the JATS abstract and the
//! `is-preprint-of` relation to the published version. This adapter is a
//! platform-flavored view over the Crossref works endpoint.

use async_trait::async_trait;
use tracing::debug;

use crate::doi::PreprintPlatform;
use crate::store::ResearchArticle;

use super::crossref::{CrossrefAdapter, extract_metadata, published_doi_relation, strip_jats};
use super::{AdapterError, PreprintFetch, PreprintSource};

/// Resolves Preprints.org records through Crossref works metadata.
#[derive(Debug)]
pub struct PreprintsOrgAdapter {
    crossref: CrossrefAdapter,
}

impl PreprintsOrgAdapter {
    /// Creates an adapter over an existing Crossref adapter (shared client
    /// pool and polite-pool mailto).
    #[must_use]
    pub fn new(crossref: CrossrefAdapter) -> Self {
        Self { crossref }
    }
}

#[async_trait]
impl PreprintSource for PreprintsOrgAdapter {
    fn platform(&self) -> PreprintPlatform {
        PreprintPlatform::PreprintsOrg
    }

    async fn fetch_preprint(
        &self,
        article: &ResearchArticle,
    ) -> Result<PreprintFetch, AdapterError> {
        let doi = article
            .doi_norm
            .as_deref()
            .ok_or_else(|| AdapterError::Payload {
                source_tag: "preprints",
                message: "record has no DOI".to_string(),
            })?;

        let (message, provenance) = self.crossref.fetch_work(doi).await?;
        let published_doi = published_doi_relation(&message);
        if published_doi.is_some() {
            debug!(doi, ?published_doi, "Crossref relation names a published version");
        }

        Ok(PreprintFetch {
            abstract_text: message
                .abstract_jats
                .as_deref()
                .map(strip_jats)
                .filter(|text| !text.is_empty()),
            published_doi,
            metadata: extract_metadata(&message),
            provenance: Some(provenance),
        })
    }
}
