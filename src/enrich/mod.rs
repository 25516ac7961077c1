//! Enrichment orchestration: per-record source composition and the
//! multi-pass discovery loop.
//!
//! # The multi-pass loop
//!
//! Pass 1 enriches everything the ingest left eligible. Preprint enrichment
//! may create published-version records whose `enrichment_datetime` is NULL,
//! so a second query of the same predicate picks them up on pass 2. The
//! database is the authoritative work list; nothing is queued in memory, and
//! a crash between passes loses no work.
//!
//! # Per-record ordering
//!
//! preprint → abstract → OA → provenance merge → timestamp. The timestamp
//! is written last so a crash mid-record leaves it eligible for retry.
//! Across records, a semaphore caps concurrency; within a record the steps
//! are strictly serial, which keeps provenance ordering deterministic.

mod abstracts;
mod oa;
mod preprint;

pub use abstracts::AbstractPipeline;
pub use oa::OaEnricher;
pub use preprint::{PreprintEnricher, PreprintOutcome};

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

use crate::sources::Provenance;
use crate::store::{ResearchArticle, Store, StoreError, now_rfc3339};

/// Default number of passes: the initial sweep plus one for records
/// discovered during it.
pub const DEFAULT_MAX_PASSES: u32 = 2;

/// Summary of one enrichment run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EnrichmentReport {
    /// Passes actually executed.
    pub passes: u32,
    /// Records processed across all passes.
    pub total: usize,
    /// Records persisted successfully.
    pub succeeded: usize,
    /// Records whose persistence failed.
    pub failed: usize,
    /// Published-version records created by discovery.
    pub created: usize,
}

/// Drives enrichment for every eligible record.
pub struct EnrichmentOrchestrator {
    store: Store,
    abstracts: Arc<AbstractPipeline>,
    preprints: Arc<PreprintEnricher>,
    oa: Arc<OaEnricher>,
    max_concurrent: usize,
    max_passes: u32,
    retry_empty: bool,
}

impl EnrichmentOrchestrator {
    /// Builds an orchestrator.
    ///
    /// `retry_empty` leaves records that yielded zero useful data eligible
    /// for a future run instead of stamping them.
    #[must_use]
    pub fn new(
        store: Store,
        abstracts: AbstractPipeline,
        preprints: PreprintEnricher,
        oa: OaEnricher,
        max_concurrent: usize,
        max_passes: u32,
        retry_empty: bool,
    ) -> Self {
        Self {
            store,
            abstracts: Arc::new(abstracts),
            preprints: Arc::new(preprints),
            oa: Arc::new(oa),
            max_concurrent: max_concurrent.max(1),
            max_passes: max_passes.max(1),
            retry_empty,
        }
    }

    /// Runs the multi-pass loop until the work list drains, a pass beyond
    /// the first discovers nothing new, or `max_passes` is reached.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] only when the work-list query itself fails;
    /// per-record failures are counted in the report.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<EnrichmentReport, StoreError> {
        let mut report = EnrichmentReport::default();
        let mut pass = 1;

        while pass <= self.max_passes {
            let batch = self.store.get_records_needing_enrichment().await?;
            if batch.is_empty() {
                break;
            }

            info!(pass, batch = batch.len(), "starting enrichment pass");
            report.passes = pass;
            report.total += batch.len();

            let (created, succeeded, failed) = self.enrich_batch(batch).await;
            report.created += created;
            report.succeeded += succeeded;
            report.failed += failed;

            if pass > 1 && created == 0 {
                break;
            }
            pass += 1;
        }

        info!(
            passes = report.passes,
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            created = report.created,
            "enrichment finished"
        );
        Ok(report)
    }

    async fn enrich_batch(&self, batch: Vec<ResearchArticle>) -> (usize, usize, usize) {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();

        for article in batch {
            let permit_source = Arc::clone(&semaphore);
            let store = self.store.clone();
            let abstracts = Arc::clone(&self.abstracts);
            let preprints = Arc::clone(&self.preprints);
            let oa = Arc::clone(&self.oa);
            let retry_empty = self.retry_empty;

            tasks.spawn(async move {
                let Ok(_permit) = permit_source.acquire().await else {
                    return Err(article.id);
                };
                enrich_record(&store, &abstracts, &preprints, &oa, article, retry_empty).await
            });
        }

        let mut created = 0;
        let mut succeeded = 0;
        let mut failed = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(record_created)) => {
                    created += record_created;
                    succeeded += 1;
                }
                Ok(Err(article_id)) => {
                    warn!(article_id, "record enrichment failed");
                    failed += 1;
                }
                Err(join_error) => {
                    warn!(error = %join_error, "enrichment task panicked");
                    failed += 1;
                }
            }
        }
        (created, succeeded, failed)
    }
}

/// Enriches one record through the fixed step order and persists it.
/// Returns the number of records created by discovery, or the record id on
/// failure.
async fn enrich_record(
    store: &Store,
    abstracts: &AbstractPipeline,
    preprints: &PreprintEnricher,
    oa: &OaEnricher,
    mut article: ResearchArticle,
    retry_empty: bool,
) -> Result<usize, i64> {
    let article_id = article.id;
    let mut provenances: Vec<Provenance> = Vec::new();

    // 1. Preprint platform (may create the published-version record).
    let preprint_outcome = match preprints.enrich(&mut article).await {
        Ok(outcome) => outcome,
        Err(error) => {
            warn!(article_id, error = %error, "preprint enrichment store failure");
            return Err(article_id);
        }
    };
    provenances.extend(preprint_outcome.provenance);

    // 2. Abstract fallback chain. Preprints take their abstract from the
    //    platform and bypass the chain entirely.
    if !article.is_preprint && article.abstract_text.is_none() {
        provenances.extend(abstracts.run(&mut article).await);
    }

    // 3. Open Access.
    provenances.extend(oa.enrich(&mut article).await);

    // 4. Provenance composition.
    let enriched_any = article.abstract_text.is_some()
        || article.oa_status.is_some()
        || preprint_outcome.created_published > 0
        || article.is_preprint;
    if !provenances.is_empty() {
        article.provenance = Some(merge_provenance(article.provenance.as_deref(), provenances));
    }

    // 5. Timestamp last, so a crash above leaves the record eligible.
    if enriched_any || !retry_empty {
        article.enrichment_datetime = Some(now_rfc3339());
    }

    match store.update_article_enrichment(&article).await {
        Ok(()) => Ok(preprint_outcome.created_published),
        Err(error) => {
            warn!(article_id, error = %error, "failed to persist enrichment");
            Err(article_id)
        }
    }
}

/// Folds new provenance blobs into the record's source-keyed JSON map.
/// Unknown keys from older writers are preserved as-is.
fn merge_provenance(existing: Option<&str>, new: Vec<Provenance>) -> String {
    let mut map: BTreeMap<String, serde_json::Value> = existing
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default();

    for provenance in new {
        let key = provenance.source.clone();
        if let Ok(value) = serde_json::to_value(&provenance) {
            map.insert(key, value);
        }
    }

    serde_json::to_string(&map).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_provenance_keys_by_source() {
        let blobs = vec![
            Provenance::now("crossref", "http://a.example/", serde_json::json!({"ok": true})),
            Provenance::now("unpaywall", "http://b.example/", serde_json::json!({"is_oa": false})),
        ];
        let merged = merge_provenance(None, blobs);
        let map: BTreeMap<String, serde_json::Value> = serde_json::from_str(&merged).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["crossref"]["url"], "http://a.example/");
        assert_eq!(map["unpaywall"]["raw"]["is_oa"], false);
    }

    #[test]
    fn test_merge_provenance_preserves_unknown_sources() {
        let existing = r#"{"legacy-source": {"kept": 1}}"#;
        let merged = merge_provenance(
            Some(existing),
            vec![Provenance::now("arxiv", "http://c.example/", serde_json::Value::Null)],
        );
        let map: BTreeMap<String, serde_json::Value> = serde_json::from_str(&merged).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["legacy-source"]["kept"], 1);
    }

    #[test]
    fn test_merge_provenance_replaces_same_source() {
        let first = merge_provenance(
            None,
            vec![Provenance::now("crossref", "http://old.example/", serde_json::Value::Null)],
        );
        let merged = merge_provenance(
            Some(&first),
            vec![Provenance::now("crossref", "http://new.example/", serde_json::Value::Null)],
        );
        let map: BTreeMap<String, serde_json::Value> = serde_json::from_str(&merged).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map["crossref"]["url"], "http://new.example/");
    }
}
