//! File-artifact tables: PDF resolutions and downloads, DOCX and Markdown
//! versions.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::instrument;

use super::{Result, Store, StoreError, now_rfc3339};

/// One (url, source) pair the resolver believes may yield a PDF.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdfCandidate {
    /// Candidate URL.
    pub url: String,
    /// Source tag (`arxiv`, `biorxiv`, `unpaywall`, `publisher`, ...).
    pub source: String,
    /// License advertised for this location, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
}

/// Terminal status of one download attempt. The literal strings are part of
/// the external contract and feed aggregation queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PdfDownloadStatus {
    /// Bytes validated and persisted.
    Downloaded,
    /// Candidate did not yield a PDF (bad status, wrong content type, gone).
    Unavailable,
    /// Declared or actual size exceeded the cap.
    TooLarge,
    /// The resolver produced no candidates at all.
    NoCandidates,
    /// Unexpected failure; details in `error_message`.
    Error,
}

impl PdfDownloadStatus {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Downloaded => "downloaded",
            Self::Unavailable => "unavailable",
            Self::TooLarge => "too_large",
            Self::NoCandidates => "no_candidates",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for PdfDownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PdfDownloadStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "downloaded" => Ok(Self::Downloaded),
            "unavailable" => Ok(Self::Unavailable),
            "too_large" => Ok(Self::TooLarge),
            "no_candidates" => Ok(Self::NoCandidates),
            "error" => Ok(Self::Error),
            _ => Err(format!("invalid pdf download status: {s}")),
        }
    }
}

/// One download attempt awaiting persistence.
#[derive(Debug, Clone, Default)]
pub struct NewPdfDownload {
    /// Record the attempt belongs to.
    pub article_id: i64,
    /// Filter run driving the stage, when any.
    pub filtering_query_id: Option<i64>,
    /// Original candidate URL (cache-busting shows up in `final_url` only).
    pub url: Option<String>,
    /// Candidate source tag.
    pub source: Option<String>,
    /// Terminal status.
    pub status: Option<PdfDownloadStatus>,
    /// Path of the written file.
    pub pdf_local_path: Option<String>,
    /// SHA-1 of the file contents.
    pub sha1: Option<String>,
    /// URL after redirects and request transforms.
    pub final_url: Option<String>,
    /// Failure detail for `error` rows.
    pub error_message: Option<String>,
    /// Size of the written file.
    pub file_size_bytes: Option<i64>,
}

/// A stored download attempt.
#[derive(Debug, Clone, FromRow)]
pub struct PdfDownload {
    /// Surrogate id.
    pub id: i64,
    /// Record the attempt belongs to.
    pub article_id: i64,
    /// Filter run, when any.
    pub filtering_query_id: Option<i64>,
    /// When the attempt was recorded.
    pub timestamp: String,
    /// Original candidate URL.
    pub url: Option<String>,
    /// Candidate source tag.
    pub source: Option<String>,
    /// Terminal status string.
    pub status: String,
    /// Path of the written file.
    pub pdf_local_path: Option<String>,
    /// SHA-1 of the file contents.
    pub sha1: Option<String>,
    /// URL after redirects.
    pub final_url: Option<String>,
    /// Failure detail.
    pub error_message: Option<String>,
    /// Size of the written file.
    pub file_size_bytes: Option<i64>,
}

/// A located DOCX rendition.
#[derive(Debug, Clone, FromRow)]
pub struct DocxVersion {
    /// Surrogate id.
    pub id: i64,
    /// Record the file belongs to.
    pub article_id: i64,
    /// Path of the located file.
    pub docx_local_path: Option<String>,
    /// When the lookup ran.
    pub retrieved_datetime: String,
    /// Size of the located file.
    pub file_size_bytes: Option<i64>,
    /// Lookup failure detail.
    pub error_message: Option<String>,
}

/// Markdown conversion flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkdownVariant {
    /// Image extraction disabled.
    NoImages,
    /// Image extraction enabled.
    WithImages,
}

impl MarkdownVariant {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoImages => "no_images",
            Self::WithImages => "with_images",
        }
    }
}

/// Which artifact kind a Markdown rendition was converted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkdownSource {
    /// Converted from a DOCX rendition.
    Docx,
    /// Converted from captured HTML.
    Html,
}

impl MarkdownSource {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Docx => "docx",
            Self::Html => "html",
        }
    }
}

/// One Markdown conversion awaiting persistence.
#[derive(Debug, Clone)]
pub struct NewMarkdownVersion {
    /// Record the rendition belongs to.
    pub article_id: i64,
    /// Owning DOCX version (exactly one of the two refs).
    pub docx_version_id: Option<i64>,
    /// Owning HTML version (exactly one of the two refs).
    pub html_version_id: Option<i64>,
    /// Source artifact kind; must match the set reference.
    pub source_type: MarkdownSource,
    /// Conversion flavor.
    pub variant: MarkdownVariant,
    /// Output path on success.
    pub md_local_path: Option<String>,
    /// Output size on success.
    pub file_size_bytes: Option<i64>,
    /// Converter failure detail.
    pub error_message: Option<String>,
}

/// A stored Markdown rendition.
#[derive(Debug, Clone, FromRow)]
pub struct MarkdownVersion {
    /// Surrogate id.
    pub id: i64,
    /// Record the rendition belongs to.
    pub article_id: i64,
    /// Owning DOCX version.
    pub docx_version_id: Option<i64>,
    /// Owning HTML version.
    pub html_version_id: Option<i64>,
    /// Source artifact kind.
    pub source_type: String,
    /// Conversion flavor string.
    pub variant: String,
    /// Output path.
    pub md_local_path: Option<String>,
    /// When the conversion ran.
    pub created_datetime: String,
    /// Output size.
    pub file_size_bytes: Option<i64>,
    /// Converter failure detail.
    pub error_message: Option<String>,
}

impl Store {
    /// Snapshots the ordered candidate list considered for a record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on persistence failure.
    #[instrument(skip(self, candidates), fields(count = candidates.len()))]
    pub async fn insert_pdf_resolution(
        &self,
        article_id: i64,
        filtering_query_id: Option<i64>,
        candidates: &[PdfCandidate],
    ) -> Result<i64> {
        let payload = serde_json::to_string(candidates)
            .map_err(|e| StoreError::Integrity(format!("unserializable candidates: {e}")))?;

        let _guard = self.write_guard().await;
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO pdf_resolutions (article_id, filtering_query_id, timestamp, candidates)
             VALUES (?, ?, ?, ?)
             RETURNING id",
        )
        .bind(article_id)
        .bind(filtering_query_id)
        .bind(now_rfc3339())
        .bind(payload)
        .fetch_one(self.pool())
        .await?;
        Ok(row.0)
    }

    /// Records one download attempt.
    ///
    /// A `downloaded` row must carry path, sha1, and size; the schema CHECK
    /// cannot express that on migrated tables, so it is enforced here.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Integrity`] for an incomplete `downloaded` row,
    /// [`StoreError::Database`] otherwise.
    #[instrument(skip(self, attempt), fields(article_id = attempt.article_id))]
    pub async fn record_pdf_download_attempt(&self, attempt: &NewPdfDownload) -> Result<i64> {
        let status = attempt.status.unwrap_or(PdfDownloadStatus::Error);
        if status == PdfDownloadStatus::Downloaded
            && (attempt.pdf_local_path.is_none()
                || attempt.sha1.is_none()
                || attempt.file_size_bytes.is_none())
        {
            return Err(StoreError::Integrity(
                "downloaded attempt without path, sha1, or size".to_string(),
            ));
        }

        let _guard = self.write_guard().await;
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO pdf_downloads (
                article_id, filtering_query_id, timestamp, url, source, status,
                pdf_local_path, sha1, final_url, error_message, file_size_bytes
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(attempt.article_id)
        .bind(attempt.filtering_query_id)
        .bind(now_rfc3339())
        .bind(&attempt.url)
        .bind(&attempt.source)
        .bind(status.as_str())
        .bind(&attempt.pdf_local_path)
        .bind(&attempt.sha1)
        .bind(&attempt.final_url)
        .bind(&attempt.error_message)
        .bind(attempt.file_size_bytes)
        .fetch_one(self.pool())
        .await?;
        Ok(row.0)
    }

    /// Returns the most recent successful download for a record, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on persistence failure.
    pub async fn latest_successful_download(&self, article_id: i64) -> Result<Option<PdfDownload>> {
        Ok(sqlx::query_as(
            "SELECT id, article_id, filtering_query_id, timestamp, url, source, status,
                    pdf_local_path, sha1, final_url, error_message, file_size_bytes
             FROM pdf_downloads
             WHERE article_id = ? AND status = 'downloaded'
             ORDER BY id DESC LIMIT 1",
        )
        .bind(article_id)
        .fetch_optional(self.pool())
        .await?)
    }

    /// Aggregates download attempts by status, optionally scoped to one
    /// filter run.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on persistence failure.
    pub async fn get_pdf_download_stats(
        &self,
        filtering_query_id: Option<i64>,
    ) -> Result<BTreeMap<String, i64>> {
        let rows: Vec<(String, i64)> = if let Some(qid) = filtering_query_id {
            sqlx::query_as(
                "SELECT status, COUNT(*) FROM pdf_downloads
                 WHERE filtering_query_id = ? GROUP BY status",
            )
            .bind(qid)
            .fetch_all(self.pool())
            .await?
        } else {
            sqlx::query_as("SELECT status, COUNT(*) FROM pdf_downloads GROUP BY status")
                .fetch_all(self.pool())
                .await?
        };

        Ok(rows.into_iter().collect())
    }

    /// Records a located DOCX rendition.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on persistence failure.
    #[instrument(skip(self))]
    pub async fn insert_docx_version(
        &self,
        article_id: i64,
        docx_local_path: Option<&str>,
        file_size_bytes: Option<i64>,
        error_message: Option<&str>,
    ) -> Result<i64> {
        let _guard = self.write_guard().await;
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO docx_versions
                (article_id, docx_local_path, retrieved_datetime, file_size_bytes, error_message)
             VALUES (?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(article_id)
        .bind(docx_local_path)
        .bind(now_rfc3339())
        .bind(file_size_bytes)
        .bind(error_message)
        .fetch_one(self.pool())
        .await?;
        Ok(row.0)
    }

    /// Records one Markdown conversion outcome.
    ///
    /// Exactly one of the version references must be set and must agree with
    /// `source_type`; the invariant is enforced here for databases whose
    /// table predates the CHECK constraint.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Integrity`] on reference mismatch,
    /// [`StoreError::Database`] otherwise.
    #[instrument(skip(self, version), fields(article_id = version.article_id))]
    pub async fn insert_markdown_version(&self, version: &NewMarkdownVersion) -> Result<i64> {
        let refs_valid = match version.source_type {
            MarkdownSource::Docx => {
                version.docx_version_id.is_some() && version.html_version_id.is_none()
            }
            MarkdownSource::Html => {
                version.html_version_id.is_some() && version.docx_version_id.is_none()
            }
        };
        if !refs_valid {
            return Err(StoreError::Integrity(format!(
                "markdown version must reference exactly its {} source",
                version.source_type.as_str()
            )));
        }

        let _guard = self.write_guard().await;
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO markdown_versions (
                article_id, docx_version_id, html_version_id, source_type, variant,
                md_local_path, created_datetime, file_size_bytes, error_message
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(version.article_id)
        .bind(version.docx_version_id)
        .bind(version.html_version_id)
        .bind(version.source_type.as_str())
        .bind(version.variant.as_str())
        .bind(&version.md_local_path)
        .bind(now_rfc3339())
        .bind(version.file_size_bytes)
        .bind(&version.error_message)
        .fetch_one(self.pool())
        .await?;
        Ok(row.0)
    }

    /// Returns Markdown renditions for a record, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on persistence failure.
    pub async fn get_markdown_versions(&self, article_id: i64) -> Result<Vec<MarkdownVersion>> {
        Ok(sqlx::query_as(
            "SELECT id, article_id, docx_version_id, html_version_id, source_type, variant,
                    md_local_path, created_datetime, file_size_bytes, error_message
             FROM markdown_versions WHERE article_id = ? ORDER BY id",
        )
        .bind(article_id)
        .fetch_all(self.pool())
        .await?)
    }
}
