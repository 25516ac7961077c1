//! Research-article rows and their lifecycle operations.

use sqlx::FromRow;
use tracing::{debug, instrument};

use super::{Result, Store, StoreError, now_rfc3339};

/// Column list shared by every article SELECT so `FromRow` stays aligned
/// with one definition.
pub(crate) const ARTICLE_COLUMNS: &str = "id, doi_norm, title, publication_date, \
    total_citations, citations_per_year, authors, source_title, arxiv_id, \
    is_preprint, preprint_platform, abstract_text, abstract_source, \
    abstract_no_retrieval_reason, oa_status, oa_license, oa_pdf_url, \
    manual_url_publisher, manual_url_repository, provenance, \
    import_datetime, enrichment_datetime";

/// A canonical work as stored in `research_articles`.
#[derive(Debug, Clone, FromRow)]
pub struct ResearchArticle {
    /// Surrogate id.
    pub id: i64,
    /// Normalized DOI; unique when present.
    pub doi_norm: Option<String>,
    /// Title (required at ingest).
    pub title: String,
    /// Publication date as free-form ISO-ish text from the source.
    pub publication_date: Option<String>,
    /// Total citation count.
    pub total_citations: Option<i64>,
    /// Citations per year.
    pub citations_per_year: Option<f64>,
    /// Authors, free text.
    pub authors: Option<String>,
    /// Journal or venue title.
    pub source_title: Option<String>,
    /// Bare arXiv identifier when known.
    pub arxiv_id: Option<String>,
    /// Whether this record is a preprint.
    pub is_preprint: bool,
    /// Platform tag; non-empty whenever `is_preprint` is set.
    pub preprint_platform: Option<String>,
    /// Abstract text once retrieved.
    pub abstract_text: Option<String>,
    /// Which source supplied the abstract.
    pub abstract_source: Option<String>,
    /// `"; "`-joined miss reasons from every attempted abstract source.
    pub abstract_no_retrieval_reason: Option<String>,
    /// Unpaywall OA status (gold/green/bronze/hybrid/closed).
    pub oa_status: Option<String>,
    /// License reported for the best OA location.
    pub oa_license: Option<String>,
    /// Direct OA PDF URL reported by Unpaywall.
    pub oa_pdf_url: Option<String>,
    /// Operator-supplied publisher landing URL.
    pub manual_url_publisher: Option<String>,
    /// Operator-supplied repository URL.
    pub manual_url_repository: Option<String>,
    /// JSON object keyed by source tag; one blob per enrichment call.
    pub provenance: Option<String>,
    /// Set at ingest; never updated afterwards.
    pub import_datetime: String,
    /// NULL until the first enrichment completes; NULL-ness gates
    /// re-enrichment.
    pub enrichment_datetime: Option<String>,
}

impl ResearchArticle {
    /// Returns true while the record is eligible for enrichment.
    #[must_use]
    pub fn needs_enrichment(&self) -> bool {
        self.enrichment_datetime.is_none()
    }
}

/// Fields accepted when creating a record.
#[derive(Debug, Clone, Default)]
pub struct NewArticle {
    /// Normalized DOI.
    pub doi_norm: Option<String>,
    /// Title (required).
    pub title: String,
    /// Publication date text.
    pub publication_date: Option<String>,
    /// Total citation count.
    pub total_citations: Option<i64>,
    /// Citations per year.
    pub citations_per_year: Option<f64>,
    /// Authors, free text.
    pub authors: Option<String>,
    /// Journal or venue title.
    pub source_title: Option<String>,
    /// Bare arXiv identifier.
    pub arxiv_id: Option<String>,
    /// Operator-supplied publisher landing URL.
    pub manual_url_publisher: Option<String>,
    /// Operator-supplied repository URL.
    pub manual_url_repository: Option<String>,
}

/// Outcome of importing one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    /// A new record was created.
    Inserted(i64),
    /// A record with the same normalized DOI already exists.
    SkippedDuplicate {
        /// Id of the existing record.
        id: i64,
        /// The colliding DOI.
        doi: String,
    },
}

impl Store {
    /// Imports one record. Duplicate DOIs are reported as
    /// [`ImportOutcome::SkippedDuplicate`], never as an error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on persistence failure.
    #[instrument(skip(self, article), fields(doi = article.doi_norm.as_deref()))]
    pub async fn import_article(&self, article: &NewArticle) -> Result<ImportOutcome> {
        let _guard = self.write_guard().await;

        if let Some(doi) = article.doi_norm.as_deref() {
            if let Some(existing) = self.find_by_doi_inner(doi).await? {
                debug!(doi, existing_id = existing, "duplicate DOI, skipping");
                return Ok(ImportOutcome::SkippedDuplicate {
                    id: existing,
                    doi: doi.to_string(),
                });
            }
        }

        let id = self.insert_article_inner(article, false, None).await?;
        Ok(ImportOutcome::Inserted(id))
    }

    /// Inserts or updates a record keyed by normalized DOI.
    ///
    /// On conflict the bibliographic fields are refreshed; `import_datetime`
    /// and enrichment state are never clobbered. Records without a DOI are
    /// always inserted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on persistence failure.
    #[instrument(skip(self, article), fields(doi = article.doi_norm.as_deref()))]
    pub async fn upsert_record(&self, article: &NewArticle) -> Result<i64> {
        let _guard = self.write_guard().await;

        if article.doi_norm.is_none() {
            return self.insert_article_inner(article, false, None).await;
        }

        let row: (i64,) = sqlx::query_as(
            "INSERT INTO research_articles (
                doi_norm, title, publication_date, total_citations,
                citations_per_year, authors, source_title, arxiv_id,
                manual_url_publisher, manual_url_repository, import_datetime
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(doi_norm) DO UPDATE SET
                title = excluded.title,
                publication_date = excluded.publication_date,
                total_citations = excluded.total_citations,
                citations_per_year = excluded.citations_per_year,
                authors = excluded.authors,
                source_title = excluded.source_title,
                arxiv_id = excluded.arxiv_id
            RETURNING id",
        )
        .bind(&article.doi_norm)
        .bind(&article.title)
        .bind(&article.publication_date)
        .bind(article.total_citations)
        .bind(article.citations_per_year)
        .bind(&article.authors)
        .bind(&article.source_title)
        .bind(&article.arxiv_id)
        .bind(&article.manual_url_publisher)
        .bind(&article.manual_url_repository)
        .bind(now_rfc3339())
        .fetch_one(self.pool())
        .await?;

        Ok(row.0)
    }

    /// Creates a skeleton record for a published version discovered from a
    /// preprint. The record is born with `enrichment_datetime` NULL so the
    /// next enrichment pass picks it up.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on persistence failure.
    #[instrument(skip(self, title))]
    pub async fn create_discovered_article(
        &self,
        doi_norm: &str,
        title: Option<&str>,
    ) -> Result<i64> {
        let _guard = self.write_guard().await;

        let article = NewArticle {
            doi_norm: Some(doi_norm.to_string()),
            // The discovered version's own title arrives with its
            // enrichment; until then the DOI stands in.
            title: title.unwrap_or(doi_norm).to_string(),
            ..NewArticle::default()
        };
        self.insert_article_inner(&article, false, None).await
    }

    async fn insert_article_inner(
        &self,
        article: &NewArticle,
        is_preprint: bool,
        preprint_platform: Option<&str>,
    ) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO research_articles (
                doi_norm, title, publication_date, total_citations,
                citations_per_year, authors, source_title, arxiv_id,
                is_preprint, preprint_platform,
                manual_url_publisher, manual_url_repository, import_datetime
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id",
        )
        .bind(&article.doi_norm)
        .bind(&article.title)
        .bind(&article.publication_date)
        .bind(article.total_citations)
        .bind(article.citations_per_year)
        .bind(&article.authors)
        .bind(&article.source_title)
        .bind(&article.arxiv_id)
        .bind(is_preprint)
        .bind(preprint_platform)
        .bind(&article.manual_url_publisher)
        .bind(&article.manual_url_repository)
        .bind(now_rfc3339())
        .fetch_one(self.pool())
        .await?;

        Ok(row.0)
    }

    /// Looks a record up by normalized DOI.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on persistence failure.
    pub async fn find_by_doi(&self, doi_norm: &str) -> Result<Option<ResearchArticle>> {
        let query = format!(
            "SELECT {ARTICLE_COLUMNS} FROM research_articles WHERE doi_norm = ?"
        );
        Ok(sqlx::query_as(&query)
            .bind(doi_norm)
            .fetch_optional(self.pool())
            .await?)
    }

    async fn find_by_doi_inner(&self, doi_norm: &str) -> Result<Option<i64>> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM research_articles WHERE doi_norm = ?")
                .bind(doi_norm)
                .fetch_optional(self.pool())
                .await?;
        Ok(row.map(|r| r.0))
    }

    /// Fetches one record by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the id does not exist.
    pub async fn get_article(&self, id: i64) -> Result<ResearchArticle> {
        let query = format!("SELECT {ARTICLE_COLUMNS} FROM research_articles WHERE id = ?");
        sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or(StoreError::NotFound {
                table: "research_articles",
                id,
            })
    }

    /// Returns every record still eligible for enrichment
    /// (`enrichment_datetime IS NULL`). This query, not any in-memory queue,
    /// is the orchestrator's work list.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on persistence failure.
    pub async fn get_records_needing_enrichment(&self) -> Result<Vec<ResearchArticle>> {
        let query = format!(
            "SELECT {ARTICLE_COLUMNS} FROM research_articles \
             WHERE enrichment_datetime IS NULL ORDER BY id"
        );
        Ok(sqlx::query_as(&query).fetch_all(self.pool()).await?)
    }

    /// Returns all records, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on persistence failure.
    pub async fn get_all_articles(&self) -> Result<Vec<ResearchArticle>> {
        let query = format!("SELECT {ARTICLE_COLUMNS} FROM research_articles ORDER BY id");
        Ok(sqlx::query_as(&query).fetch_all(self.pool()).await?)
    }

    /// Persists the enrichable fields of a record in one transaction.
    ///
    /// `import_datetime` is deliberately not part of the statement; it is
    /// written exactly once at insert.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Integrity`] when the record claims to be a
    /// preprint without a platform tag, [`StoreError::Database`] otherwise.
    #[instrument(skip(self, article), fields(id = article.id))]
    pub async fn update_article_enrichment(&self, article: &ResearchArticle) -> Result<()> {
        if article.is_preprint
            && article
                .preprint_platform
                .as_deref()
                .is_none_or(|platform| platform.is_empty())
        {
            return Err(StoreError::Integrity(
                "is_preprint set without a platform tag".to_string(),
            ));
        }

        let _guard = self.write_guard().await;
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            "UPDATE research_articles SET
                title = ?,
                publication_date = ?,
                total_citations = ?,
                citations_per_year = ?,
                authors = ?,
                source_title = ?,
                arxiv_id = ?,
                is_preprint = ?,
                preprint_platform = ?,
                abstract_text = ?,
                abstract_source = ?,
                abstract_no_retrieval_reason = ?,
                oa_status = ?,
                oa_license = ?,
                oa_pdf_url = ?,
                provenance = ?,
                enrichment_datetime = ?
             WHERE id = ?",
        )
        .bind(&article.title)
        .bind(&article.publication_date)
        .bind(article.total_citations)
        .bind(article.citations_per_year)
        .bind(&article.authors)
        .bind(&article.source_title)
        .bind(&article.arxiv_id)
        .bind(article.is_preprint)
        .bind(&article.preprint_platform)
        .bind(&article.abstract_text)
        .bind(&article.abstract_source)
        .bind(&article.abstract_no_retrieval_reason)
        .bind(&article.oa_status)
        .bind(&article.oa_license)
        .bind(&article.oa_pdf_url)
        .bind(&article.provenance)
        .bind(&article.enrichment_datetime)
        .bind(article.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Records a preprint↔published link. Idempotent: an existing link for
    /// the same ordered pair leaves the table untouched.
    ///
    /// Returns true when a new link row was created.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Integrity`] for a self-link,
    /// [`StoreError::Database`] otherwise.
    #[instrument(skip(self))]
    pub async fn insert_article_version_link(
        &self,
        preprint_id: i64,
        published_id: i64,
        discovery_source: &str,
    ) -> Result<bool> {
        if preprint_id == published_id {
            return Err(StoreError::Integrity(format!(
                "article {preprint_id} cannot be its own published version"
            )));
        }

        let _guard = self.write_guard().await;
        let result = sqlx::query(
            "INSERT OR IGNORE INTO article_versions
                (preprint_article_id, published_article_id, discovery_source, link_datetime)
             VALUES (?, ?, ?, ?)",
        )
        .bind(preprint_id)
        .bind(published_id)
        .bind(discovery_source)
        .bind(now_rfc3339())
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Counts article rows (test and summary helper).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on persistence failure.
    pub async fn count_articles(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM research_articles")
            .fetch_one(self.pool())
            .await?;
        Ok(row.0)
    }
}
