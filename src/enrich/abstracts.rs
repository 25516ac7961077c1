//! Ordered abstract fallback across the scholarly APIs.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::sources::{AbstractSource, Provenance};
use crate::store::ResearchArticle;

/// Runs the abstract sources in a fixed order until one supplies a
/// non-empty abstract.
///
/// The canonical order is Semantic Scholar → Crossref → OpenAlex →
/// Europe PMC → PubMed. Every attempted source that missed contributes a
/// `source: reason` token; the tokens are joined with `"; "` in attempt
/// order into `abstract_no_retrieval_reason`, whether or not a later source
/// eventually won.
pub struct AbstractPipeline {
    adapters: Vec<Arc<dyn AbstractSource>>,
}

impl AbstractPipeline {
    /// Builds a pipeline over the given adapters, tried in order.
    #[must_use]
    pub fn new(adapters: Vec<Arc<dyn AbstractSource>>) -> Self {
        Self { adapters }
    }

    /// Enriches the record in place and returns the provenance blobs of
    /// every call made.
    ///
    /// Metadata patches from each attempted source fill remaining gaps even
    /// when that source had no abstract.
    #[instrument(skip_all, fields(article_id = article.id))]
    pub async fn run(&self, article: &mut ResearchArticle) -> Vec<Provenance> {
        let mut provenances = Vec::new();
        let mut reasons: Vec<String> = Vec::new();

        for adapter in &self.adapters {
            let source = adapter.source();
            let fetch = adapter.fetch_abstract(article).await;

            if let Some(provenance) = fetch.provenance {
                provenances.push(provenance);
            }
            fetch.metadata.apply_missing(article);

            if let Some(abstract_text) = fetch.abstract_text {
                debug!(source, "abstract found, short-circuiting");
                article.abstract_text = Some(abstract_text);
                article.abstract_source = Some(source.to_string());
                break;
            }

            let reason = fetch
                .miss_reason
                .unwrap_or_else(|| "no abstract".to_string());
            reasons.push(format!("{source}: {reason}"));
        }

        if !reasons.is_empty() {
            article.abstract_no_retrieval_reason = Some(reasons.join("; "));
        }

        provenances
    }
}
