//! Filtering-query and per-record decision persistence.

use sqlx::FromRow;
use tracing::{instrument, warn};

use super::article::{ARTICLE_COLUMNS, ResearchArticle};
use super::{Result, Store, now_rfc3339};

/// Reserved explanation prefix for decisions that failed outright.
pub const ERROR_PREFIX: &str = "ERROR:";

/// Reserved explanation prefix for degraded decisions.
pub const WARNING_PREFIX: &str = "WARNING:";

/// One filter execution, as stored in `filtering_queries`.
#[derive(Debug, Clone, FromRow)]
pub struct FilteringQuery {
    /// Surrogate id.
    pub id: i64,
    /// Inclusion criteria, natural language.
    pub query: String,
    /// Exclusion criteria, natural language.
    pub exclude_query: Option<String>,
    /// LLM model identifier.
    pub model: String,
    /// Concurrency bound used for the run.
    pub max_concurrent: i64,
    /// Run start time.
    pub timestamp: String,
    /// Records considered (written once at run end).
    pub total_records: Option<i64>,
    /// Records matched (including flagged warnings).
    pub matched_records: Option<i64>,
    /// Records whose decision failed (`ERROR:` rows).
    pub failed_records: Option<i64>,
    /// Records with degraded decisions (`WARNING:` rows).
    pub warning_records: Option<i64>,
}

/// One decision awaiting batch insert.
#[derive(Debug, Clone)]
pub struct NewFilteringResult {
    /// Record the decision is about.
    pub article_id: i64,
    /// Whether the model matched the record.
    pub match_result: bool,
    /// Free-text explanation; `ERROR:`/`WARNING:` prefixes are reserved.
    pub explanation: String,
}

/// A stored decision row.
#[derive(Debug, Clone, FromRow)]
pub struct FilteringResult {
    /// Surrogate id.
    pub id: i64,
    /// Record the decision is about.
    pub article_id: i64,
    /// Owning filter run.
    pub filtering_query_id: i64,
    /// 0/1 decision.
    pub match_result: i64,
    /// Explanation text.
    pub explanation: Option<String>,
    /// When the decision was persisted.
    pub decision_datetime: String,
}

/// Final statistics for a filter run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilteringStats {
    /// Records considered.
    pub total: i64,
    /// Matched (including flagged warnings that matched).
    pub matched: i64,
    /// `ERROR:` decisions.
    pub failed: i64,
    /// `WARNING:` decisions.
    pub warnings: i64,
}

impl Store {
    /// Creates the run row for one filter execution and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] on persistence failure.
    #[instrument(skip(self, query, exclude_query))]
    pub async fn create_filtering_query(
        &self,
        query: &str,
        exclude_query: Option<&str>,
        model: &str,
        max_concurrent: usize,
    ) -> Result<i64> {
        let _guard = self.write_guard().await;
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO filtering_queries (query, exclude_query, model, max_concurrent, timestamp)
             VALUES (?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(query)
        .bind(exclude_query)
        .bind(model)
        .bind(i64::try_from(max_concurrent).unwrap_or(i64::MAX))
        .bind(now_rfc3339())
        .fetch_one(self.pool())
        .await?;
        Ok(row.0)
    }

    /// Inserts the full decision batch for a run in one transaction.
    ///
    /// Each (record, run) pair is write-once: a conflicting row is left
    /// untouched and logged, without aborting the rest of the batch.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] on persistence failure.
    #[instrument(skip(self, results), fields(count = results.len()))]
    pub async fn batch_insert_filtering_results(
        &self,
        filtering_query_id: i64,
        results: &[NewFilteringResult],
    ) -> Result<()> {
        let _guard = self.write_guard().await;
        let mut tx = self.pool().begin().await?;
        let decided_at = now_rfc3339();

        for result in results {
            let outcome = sqlx::query(
                "INSERT OR IGNORE INTO records_filterings
                    (article_id, filtering_query_id, match_result, explanation, decision_datetime)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(result.article_id)
            .bind(filtering_query_id)
            .bind(i64::from(result.match_result))
            .bind(&result.explanation)
            .bind(&decided_at)
            .execute(&mut *tx)
            .await?;

            if outcome.rows_affected() == 0 {
                warn!(
                    article_id = result.article_id,
                    filtering_query_id, "decision already recorded for pair, keeping first"
                );
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Writes the final run statistics back onto the query row.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] on persistence failure.
    #[instrument(skip(self))]
    pub async fn update_filtering_query_stats(
        &self,
        filtering_query_id: i64,
        stats: FilteringStats,
    ) -> Result<()> {
        let _guard = self.write_guard().await;
        sqlx::query(
            "UPDATE filtering_queries
             SET total_records = ?, matched_records = ?, failed_records = ?, warning_records = ?
             WHERE id = ?",
        )
        .bind(stats.total)
        .bind(stats.matched)
        .bind(stats.failed)
        .bind(stats.warnings)
        .bind(filtering_query_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Fetches a filter run row.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::NotFound`] when the id does not exist.
    pub async fn get_filtering_query(&self, id: i64) -> Result<FilteringQuery> {
        sqlx::query_as(
            "SELECT id, query, exclude_query, model, max_concurrent, timestamp,
                    total_records, matched_records, failed_records, warning_records
             FROM filtering_queries WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?
        .ok_or(super::StoreError::NotFound {
            table: "filtering_queries",
            id,
        })
    }

    /// Returns all decisions for a run, by article id.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] on persistence failure.
    pub async fn get_filtering_results(&self, filtering_query_id: i64) -> Result<Vec<FilteringResult>> {
        Ok(sqlx::query_as(
            "SELECT id, article_id, filtering_query_id, match_result, explanation, decision_datetime
             FROM records_filterings WHERE filtering_query_id = ? ORDER BY article_id",
        )
        .bind(filtering_query_id)
        .fetch_all(self.pool())
        .await?)
    }

    /// Returns the matched records of a run, excluding decisions whose
    /// explanation carries a reserved `ERROR:` or `WARNING:` prefix. This is
    /// the corpus that exports and the PDF stage operate on.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] on persistence failure.
    pub async fn get_matched_records_by_filtering_query(
        &self,
        filtering_query_id: i64,
    ) -> Result<Vec<ResearchArticle>> {
        let query = format!(
            "SELECT {ARTICLE_COLUMNS} FROM research_articles
             WHERE id IN (
                 SELECT article_id FROM records_filterings
                 WHERE filtering_query_id = ?
                   AND match_result = 1
                   AND (explanation IS NULL
                        OR (explanation NOT LIKE '{ERROR_PREFIX}%'
                            AND explanation NOT LIKE '{WARNING_PREFIX}%'))
             )
             ORDER BY id"
        );
        Ok(sqlx::query_as(&query)
            .bind(filtering_query_id)
            .fetch_all(self.pool())
            .await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::store::{ImportOutcome, NewArticle};

    async fn store_with_articles(count: usize) -> (Store, Vec<i64>) {
        let store = Store::new(Database::new_in_memory().await.unwrap());
        let mut ids = Vec::new();
        for index in 0..count {
            let outcome = store
                .import_article(&NewArticle {
                    doi_norm: Some(format!("10.1234/art{index}")),
                    title: format!("article {index}"),
                    ..NewArticle::default()
                })
                .await
                .unwrap();
            let ImportOutcome::Inserted(id) = outcome else {
                panic!("expected insert");
            };
            ids.push(id);
        }
        (store, ids)
    }

    #[tokio::test]
    async fn test_batch_insert_and_stats_roundtrip() {
        let (store, ids) = store_with_articles(3).await;
        let qid = store
            .create_filtering_query("genomics", Some("reviews"), "test-model", 5)
            .await
            .unwrap();

        let results = vec![
            NewFilteringResult {
                article_id: ids[0],
                match_result: true,
                explanation: "matches because of genomics focus".to_string(),
            },
            NewFilteringResult {
                article_id: ids[1],
                match_result: true,
                explanation: "WARNING: LLM returned match=true without explanation".to_string(),
            },
            NewFilteringResult {
                article_id: ids[2],
                match_result: false,
                explanation: "ERROR: LlmError: rate limited".to_string(),
            },
        ];
        store
            .batch_insert_filtering_results(qid, &results)
            .await
            .unwrap();

        let rows = store.get_filtering_results(qid).await.unwrap();
        assert_eq!(rows.len(), 3);

        store
            .update_filtering_query_stats(
                qid,
                FilteringStats {
                    total: 3,
                    matched: 2,
                    failed: 1,
                    warnings: 1,
                },
            )
            .await
            .unwrap();

        let run = store.get_filtering_query(qid).await.unwrap();
        assert_eq!(run.total_records, Some(3));
        assert_eq!(run.matched_records, Some(2));
        assert_eq!(run.failed_records, Some(1));
        assert_eq!(run.warning_records, Some(1));
    }

    #[tokio::test]
    async fn test_pair_is_write_once() {
        let (store, ids) = store_with_articles(1).await;
        let qid = store
            .create_filtering_query("q", None, "m", 1)
            .await
            .unwrap();

        let first = vec![NewFilteringResult {
            article_id: ids[0],
            match_result: true,
            explanation: "first decision".to_string(),
        }];
        let second = vec![NewFilteringResult {
            article_id: ids[0],
            match_result: false,
            explanation: "second decision".to_string(),
        }];
        store.batch_insert_filtering_results(qid, &first).await.unwrap();
        store.batch_insert_filtering_results(qid, &second).await.unwrap();

        let rows = store.get_filtering_results(qid).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].explanation.as_deref(), Some("first decision"));
    }

    #[tokio::test]
    async fn test_matched_records_exclude_flagged_rows() {
        let (store, ids) = store_with_articles(4).await;
        let qid = store
            .create_filtering_query("q", None, "m", 2)
            .await
            .unwrap();

        let results = vec![
            NewFilteringResult {
                article_id: ids[0],
                match_result: true,
                explanation: "clean match".to_string(),
            },
            NewFilteringResult {
                article_id: ids[1],
                match_result: true,
                explanation: "WARNING: LLM returned match=true without explanation".to_string(),
            },
            NewFilteringResult {
                article_id: ids[2],
                match_result: false,
                explanation: "not relevant".to_string(),
            },
            NewFilteringResult {
                article_id: ids[3],
                match_result: false,
                explanation: "ERROR: LlmError: boom".to_string(),
            },
        ];
        store
            .batch_insert_filtering_results(qid, &results)
            .await
            .unwrap();

        let matched = store
            .get_matched_records_by_filtering_query(qid)
            .await
            .unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id, ids[0]);
    }

    #[tokio::test]
    async fn test_query_cascade_deletes_results() {
        let (store, ids) = store_with_articles(1).await;
        let qid = store
            .create_filtering_query("q", None, "m", 1)
            .await
            .unwrap();
        store
            .batch_insert_filtering_results(
                qid,
                &[NewFilteringResult {
                    article_id: ids[0],
                    match_result: true,
                    explanation: "x".to_string(),
                }],
            )
            .await
            .unwrap();

        sqlx::query("DELETE FROM filtering_queries WHERE id = ?")
            .bind(qid)
            .execute(store.pool())
            .await
            .unwrap();

        let rows = store.get_filtering_results(qid).await.unwrap();
        assert!(rows.is_empty(), "results should cascade with the query");
    }
}
