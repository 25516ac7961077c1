//! Artifact conversion: DOCX lookup and DOCX→Markdown orchestration.
//!
//! Each record with a located DOCX gets two conversion runs - image
//! extraction off and on - and two `markdown_versions` rows. A converter
//! failure still yields its row, with the error message persisted and
//! `file_size_bytes` NULL.

mod docx;

pub use docx::{CommandDocxConverter, ConvertError, DocxConverter};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::doi::doi_path_safe;
use crate::store::{
    DocxVersion, MarkdownSource, MarkdownVariant, NewMarkdownVersion, ResearchArticle, Store,
    StoreError,
};

/// Summary of one convert stage run.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConvertReport {
    /// Records considered.
    pub total: usize,
    /// Records with a located DOCX.
    pub found: usize,
    /// Successful Markdown renditions written.
    pub converted: usize,
    /// Conversion runs that failed (rows with error_message).
    pub failed: usize,
    /// Records without a DOCX (skipped).
    pub skipped: usize,
}

/// Looks up DOCX renditions and drives the external converter.
pub struct ArtifactConverter {
    store: Store,
    converter: Arc<dyn DocxConverter>,
    docx_dir: PathBuf,
    markdown_dir: PathBuf,
}

impl ArtifactConverter {
    /// Builds a converter stage over the configured directories.
    #[must_use]
    pub fn new(
        store: Store,
        converter: Arc<dyn DocxConverter>,
        docx_dir: impl Into<PathBuf>,
        markdown_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            converter,
            docx_dir: docx_dir.into(),
            markdown_dir: markdown_dir.into(),
        }
    }

    /// Processes the matched records of a filter run, or the whole corpus.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] for persistence failures only.
    #[instrument(skip(self))]
    pub async fn run(&self, filtering_query_id: Option<i64>) -> Result<ConvertReport, StoreError> {
        let articles = match filtering_query_id {
            Some(qid) => self.store.get_matched_records_by_filtering_query(qid).await?,
            None => self.store.get_all_articles().await?,
        };

        let mut report = ConvertReport {
            total: articles.len(),
            ..ConvertReport::default()
        };

        for article in &articles {
            match self.lookup_docx(article).await? {
                Some(docx_version) => {
                    report.found += 1;
                    let (converted, failed) = self.convert_docx(article, &docx_version).await?;
                    report.converted += converted;
                    report.failed += failed;
                }
                None => report.skipped += 1,
            }
        }

        info!(
            total = report.total,
            found = report.found,
            converted = report.converted,
            failed = report.failed,
            skipped = report.skipped,
            "convert stage finished"
        );
        Ok(report)
    }

    /// Searches the DOCX directory for a file whose stem encodes the
    /// record's normalized DOI (path-safe form) or the SHA-1 of its
    /// downloaded PDF. On hit, records a `docx_versions` row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] for persistence failures only.
    #[instrument(skip_all, fields(article_id = article.id))]
    pub async fn lookup_docx(
        &self,
        article: &ResearchArticle,
    ) -> Result<Option<DocxVersion>, StoreError> {
        let mut stems: Vec<String> = Vec::new();
        if let Some(doi) = article.doi_norm.as_deref() {
            stems.push(doi_path_safe(doi));
        }
        if let Some(download) = self.store.latest_successful_download(article.id).await? {
            if let Some(sha1) = download.sha1 {
                stems.push(sha1);
            }
        }

        for stem in stems {
            let candidate = self.docx_dir.join(format!("{stem}.docx"));
            if let Ok(metadata) = tokio::fs::metadata(&candidate).await {
                debug!(path = %candidate.display(), "DOCX located");
                let id = self
                    .store
                    .insert_docx_version(
                        article.id,
                        Some(&candidate.to_string_lossy()),
                        Some(i64::try_from(metadata.len()).unwrap_or(i64::MAX)),
                        None,
                    )
                    .await?;
                return Ok(Some(DocxVersion {
                    id,
                    article_id: article.id,
                    docx_local_path: Some(candidate.to_string_lossy().into_owned()),
                    retrieved_datetime: crate::store::now_rfc3339(),
                    file_size_bytes: Some(i64::try_from(metadata.len()).unwrap_or(i64::MAX)),
                    error_message: None,
                }));
            }
        }

        Ok(None)
    }

    /// Runs both conversion variants for a located DOCX. Returns
    /// `(succeeded, failed)` run counts; every run yields a row either way.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] for persistence failures only.
    #[instrument(skip_all, fields(docx_version_id = docx_version.id))]
    pub async fn convert_docx(
        &self,
        article: &ResearchArticle,
        docx_version: &DocxVersion,
    ) -> Result<(usize, usize), StoreError> {
        let Some(docx_path) = docx_version.docx_local_path.as_deref() else {
            return Ok((0, 0));
        };
        let docx_path = Path::new(docx_path);

        let mut succeeded = 0;
        let mut failed = 0;
        for variant in [MarkdownVariant::NoImages, MarkdownVariant::WithImages] {
            let extract_images = variant == MarkdownVariant::WithImages;
            let outcome = self
                .converter
                .convert(docx_path, &self.markdown_dir, extract_images)
                .await;

            let row = match outcome {
                Ok(md_path) => {
                    let size = tokio::fs::metadata(&md_path)
                        .await
                        .map(|metadata| i64::try_from(metadata.len()).unwrap_or(i64::MAX))
                        .ok();
                    succeeded += 1;
                    NewMarkdownVersion {
                        article_id: article.id,
                        docx_version_id: Some(docx_version.id),
                        html_version_id: None,
                        source_type: MarkdownSource::Docx,
                        variant,
                        md_local_path: Some(md_path.to_string_lossy().into_owned()),
                        file_size_bytes: size,
                        error_message: None,
                    }
                }
                Err(error) => {
                    warn!(variant = variant.as_str(), error = %error, "conversion failed");
                    failed += 1;
                    NewMarkdownVersion {
                        article_id: article.id,
                        docx_version_id: Some(docx_version.id),
                        html_version_id: None,
                        source_type: MarkdownSource::Docx,
                        variant,
                        md_local_path: None,
                        file_size_bytes: None,
                        error_message: Some(error.to_string()),
                    }
                }
            };
            self.store.insert_markdown_version(&row).await?;
        }

        Ok((succeeded, failed))
    }
}
