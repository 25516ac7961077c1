//! Spreadsheet ingest: row validation, DOI normalization, duplicate skip.
//!
//! Recognized columns: `Title` (required), `Publication Date`, `DOI`,
//! `Total Citations`, `Average per Year`, `Authors`, `Source Title`.
//! Unknown columns are ignored; empty strings map to NULL.

use std::path::Path;

use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::doi::normalize_doi;
use crate::store::{ImportOutcome, NewArticle, Store, StoreError};

/// Ingest-level failures (the file itself, not individual rows).
#[derive(Debug, Error)]
pub enum IngestError {
    /// The input file could not be read or parsed.
    #[error("failed to read input: {0}")]
    Input(#[from] csv::Error),

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One raw input row, as handed over by the spreadsheet loader.
#[derive(Debug, Clone, Default)]
pub struct ImportRow {
    /// Article title (required).
    pub title: Option<String>,
    /// Publication date text.
    pub publication_date: Option<String>,
    /// DOI in any accepted form.
    pub doi: Option<String>,
    /// Total citation count.
    pub total_citations: Option<i64>,
    /// Citations per year.
    pub citations_per_year: Option<f64>,
    /// Authors, free text.
    pub authors: Option<String>,
    /// Journal or venue title.
    pub source_title: Option<String>,
}

/// Summary of one import run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportReport {
    /// Rows read from the input.
    pub total: usize,
    /// New records created.
    pub imported: usize,
    /// Rows skipped because their DOI already exists.
    pub skipped_duplicates: usize,
    /// Rows rejected at validation (missing title).
    pub rejected: usize,
}

/// Imports rows into the store. Duplicate DOIs are skipped with a
/// notification; rows without a title are rejected; everything else becomes
/// a new record awaiting enrichment.
///
/// # Errors
///
/// Returns [`IngestError`] only for persistence failures; row-level issues
/// are counted in the report.
#[instrument(skip_all, fields(rows = rows.len()))]
pub async fn import_rows(store: &Store, rows: &[ImportRow]) -> Result<ImportReport, IngestError> {
    let mut report = ImportReport {
        total: rows.len(),
        ..ImportReport::default()
    };

    for (index, row) in rows.iter().enumerate() {
        let Some(title) = row.title.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
            warn!(row = index + 1, "rejected: title is required");
            report.rejected += 1;
            continue;
        };

        let doi_norm = row.doi.as_deref().and_then(normalize_doi);
        if row.doi.is_some() && doi_norm.is_none() {
            warn!(row = index + 1, doi = row.doi.as_deref(), "unparseable DOI, importing without");
        }

        let article = NewArticle {
            doi_norm,
            title: title.to_string(),
            publication_date: row.publication_date.clone(),
            total_citations: row.total_citations,
            citations_per_year: row.citations_per_year,
            authors: row.authors.clone(),
            source_title: row.source_title.clone(),
            ..NewArticle::default()
        };

        match store.import_article(&article).await? {
            ImportOutcome::Inserted(_) => report.imported += 1,
            ImportOutcome::SkippedDuplicate { doi, .. } => {
                info!(row = index + 1, doi, "skipped (duplicate DOI)");
                report.skipped_duplicates += 1;
            }
        }
    }

    info!(
        total = report.total,
        imported = report.imported,
        skipped = report.skipped_duplicates,
        rejected = report.rejected,
        "import finished"
    );
    Ok(report)
}

/// Reads the recognized columns out of a CSV file.
///
/// # Errors
///
/// Returns [`IngestError::Input`] when the file cannot be read or a record
/// is malformed.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn read_csv(path: &Path) -> Result<Vec<ImportRow>, IngestError> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();

    let column = |name: &str| -> Option<usize> {
        headers
            .iter()
            .position(|header| header.trim().eq_ignore_ascii_case(name))
    };
    let title_col = column("Title");
    let date_col = column("Publication Date");
    let doi_col = column("DOI");
    let citations_col = column("Total Citations");
    let per_year_col = column("Average per Year");
    let authors_col = column("Authors");
    let source_col = column("Source Title");

    let cell = |record: &csv::StringRecord, index: Option<usize>| -> Option<String> {
        index
            .and_then(|i| record.get(i))
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(ImportRow {
            title: cell(&record, title_col),
            publication_date: cell(&record, date_col),
            doi: cell(&record, doi_col),
            total_citations: cell(&record, citations_col).and_then(|v| v.parse().ok()),
            citations_per_year: cell(&record, per_year_col).and_then(|v| v.parse().ok()),
            authors: cell(&record, authors_col),
            source_title: cell(&record, source_col),
        });
    }
    Ok(rows)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;

    use crate::db::Database;

    async fn store() -> Store {
        Store::new(Database::new_in_memory().await.unwrap())
    }

    fn row(title: Option<&str>, doi: Option<&str>) -> ImportRow {
        ImportRow {
            title: title.map(str::to_string),
            doi: doi.map(str::to_string),
            ..ImportRow::default()
        }
    }

    // ==================== import_rows Tests ====================

    #[tokio::test]
    async fn test_duplicate_doi_within_batch_skipped() {
        let store = store().await;
        let rows = vec![
            row(Some("A study"), Some("10.1234/abc")),
            row(Some("A study"), Some("10.1234/ABC")),
        ];

        let report = import_rows(&store, &rows).await.unwrap();
        assert_eq!(report.total, 2);
        assert_eq!(report.imported, 1);
        assert_eq!(report.skipped_duplicates, 1);
        assert_eq!(store.count_articles().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_double_import_all_skipped() {
        let store = store().await;
        let rows = vec![
            row(Some("one"), Some("10.1/a")),
            row(Some("two"), Some("10.1/b")),
        ];

        let first = import_rows(&store, &rows).await.unwrap();
        assert_eq!(first.imported, 2);

        let second = import_rows(&store, &rows).await.unwrap();
        assert_eq!(second.imported, 0);
        assert_eq!(second.skipped_duplicates, rows.len());
        assert_eq!(store.count_articles().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_missing_title_rejected() {
        let store = store().await;
        let rows = vec![row(None, Some("10.1/x")), row(Some("  "), None)];

        let report = import_rows(&store, &rows).await.unwrap();
        assert_eq!(report.rejected, 2);
        assert_eq!(store.count_articles().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unparseable_doi_imports_without_doi() {
        let store = store().await;
        let report = import_rows(&store, &[row(Some("t"), Some("not-a-doi"))])
            .await
            .unwrap();
        assert_eq!(report.imported, 1);

        let articles = store.get_all_articles().await.unwrap();
        assert!(articles[0].doi_norm.is_none());
    }

    // ==================== read_csv Tests ====================

    #[test]
    fn test_read_csv_recognized_columns() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "Title,Publication Date,DOI,Total Citations,Average per Year,Authors,Source Title,Mystery"
        )
        .unwrap();
        writeln!(
            file,
            "A study,2021-03-01,10.1234/abc,42,8.4,\"Doe, J.\",Nature,ignored"
        )
        .unwrap();
        writeln!(file, "Bare minimum,,,,,,,").unwrap();

        let rows = read_csv(file.path()).unwrap();
        assert_eq!(rows.len(), 2);

        assert_eq!(rows[0].title.as_deref(), Some("A study"));
        assert_eq!(rows[0].doi.as_deref(), Some("10.1234/abc"));
        assert_eq!(rows[0].total_citations, Some(42));
        assert!((rows[0].citations_per_year.unwrap() - 8.4).abs() < f64::EPSILON);
        assert_eq!(rows[0].authors.as_deref(), Some("Doe, J."));
        assert_eq!(rows[0].source_title.as_deref(), Some("Nature"));

        // Empty strings map to NULL.
        assert_eq!(rows[1].title.as_deref(), Some("Bare minimum"));
        assert!(rows[1].doi.is_none());
        assert!(rows[1].publication_date.is_none());
        assert!(rows[1].total_citations.is_none());
    }
}
