//! Streaming PDF retrieval with validation, content addressing, and a full
//! per-attempt audit trail.
//!
//! Every attempt - the winning one and each preceding failure - lands in
//! `pdf_downloads`. The downloader never raises to its caller: exceptions
//! map to `error` rows, validation failures to `unavailable`/`too_large`,
//! and an empty candidate list to one synthetic `no_candidates` row.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::StreamExt;
use sha1::{Digest, Sha1};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::net::{HttpClient, SourceRateLimiter};
use crate::store::{
    NewPdfDownload, PdfCandidate, PdfDownloadStatus, ResearchArticle, Store, StoreError,
};

use super::policy::plan_request;
use super::resolve::resolve_candidates;

/// Size cap for persisted PDFs (50 MiB), applied to both the declared
/// Content-Length and the actual body.
pub const MAX_PDF_SIZE: u64 = 50 * 1024 * 1024;

/// Summary of one PDF stage run.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfStageReport {
    /// Records processed.
    pub total: usize,
    /// Records that ended with a stored PDF.
    pub downloaded: usize,
    /// Records whose every candidate failed.
    pub failed: usize,
    /// Records with no candidates at all.
    pub no_candidates: usize,
}

/// Terminal result of one candidate attempt, before persistence.
#[derive(Debug)]
struct AttemptResult {
    status: PdfDownloadStatus,
    pdf_local_path: Option<String>,
    sha1: Option<String>,
    final_url: Option<String>,
    error_message: Option<String>,
    file_size_bytes: Option<i64>,
}

impl AttemptResult {
    fn failure(status: PdfDownloadStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            pdf_local_path: None,
            sha1: None,
            final_url: None,
            error_message: Some(message.into()),
            file_size_bytes: None,
        }
    }
}

/// Downloads the best available PDF per record.
pub struct PdfDownloader {
    store: Store,
    client: HttpClient,
    limiter: Arc<SourceRateLimiter>,
    dest_dir: PathBuf,
    max_concurrent: usize,
    max_size: u64,
    /// Shard payload files into `aa/bb/<sha1>.pdf` subdirectories.
    shard_dirs: bool,
}

impl PdfDownloader {
    /// Builds a downloader writing under `dest_dir`.
    #[must_use]
    pub fn new(
        store: Store,
        client: HttpClient,
        limiter: Arc<SourceRateLimiter>,
        dest_dir: impl Into<PathBuf>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            store,
            client,
            limiter,
            dest_dir: dest_dir.into(),
            max_concurrent: max_concurrent.max(1),
            max_size: MAX_PDF_SIZE,
            shard_dirs: false,
        }
    }

    /// Enables sharded payload directories.
    #[must_use]
    pub fn with_sharding(mut self) -> Self {
        self.shard_dirs = true;
        self
    }

    /// Overrides the size cap (tests and constrained deployments).
    #[must_use]
    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.max_size = bytes;
        self
    }

    /// Processes every matched record of a filter run (or the whole corpus
    /// when `filtering_query_id` is None) with bounded concurrency.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] only when reading the work list fails;
    /// per-record failures are recorded and counted.
    #[instrument(skip(self))]
    pub async fn run(
        self: Arc<Self>,
        filtering_query_id: Option<i64>,
    ) -> Result<PdfStageReport, StoreError> {
        let articles = match filtering_query_id {
            Some(qid) => self.store.get_matched_records_by_filtering_query(qid).await?,
            None => self.store.get_all_articles().await?,
        };

        let mut report = PdfStageReport {
            total: articles.len(),
            ..PdfStageReport::default()
        };

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();
        for article in articles {
            let downloader = Arc::clone(&self);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return None;
                };
                downloader
                    .download_for_article(&article, filtering_query_id)
                    .await
                    .ok()
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined.ok().flatten() {
                Some(PdfDownloadStatus::Downloaded) => report.downloaded += 1,
                Some(PdfDownloadStatus::NoCandidates) => report.no_candidates += 1,
                Some(_) => report.failed += 1,
                None => report.failed += 1,
            }
        }

        info!(
            total = report.total,
            downloaded = report.downloaded,
            failed = report.failed,
            no_candidates = report.no_candidates,
            "pdf stage finished"
        );
        Ok(report)
    }

    /// Resolves candidates for one record, attempts them in rank order, and
    /// records every attempt. Returns the record-level outcome.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] for persistence failures only.
    #[instrument(skip(self, article), fields(article_id = article.id))]
    pub async fn download_for_article(
        &self,
        article: &ResearchArticle,
        filtering_query_id: Option<i64>,
    ) -> Result<PdfDownloadStatus, StoreError> {
        let candidates = resolve_candidates(article);
        self.store
            .insert_pdf_resolution(article.id, filtering_query_id, &candidates)
            .await?;

        if candidates.is_empty() {
            self.store
                .record_pdf_download_attempt(&NewPdfDownload {
                    article_id: article.id,
                    filtering_query_id,
                    status: Some(PdfDownloadStatus::NoCandidates),
                    ..NewPdfDownload::default()
                })
                .await?;
            return Ok(PdfDownloadStatus::NoCandidates);
        }

        let mut last_status = PdfDownloadStatus::Unavailable;
        for candidate in candidates {
            let attempt = self.attempt(&candidate).await;
            let status = attempt.status;

            self.store
                .record_pdf_download_attempt(&NewPdfDownload {
                    article_id: article.id,
                    filtering_query_id,
                    url: Some(candidate.url.clone()),
                    source: Some(candidate.source.clone()),
                    status: Some(status),
                    pdf_local_path: attempt.pdf_local_path,
                    sha1: attempt.sha1,
                    final_url: attempt.final_url,
                    error_message: attempt.error_message,
                    file_size_bytes: attempt.file_size_bytes,
                })
                .await?;

            last_status = status;
            if status == PdfDownloadStatus::Downloaded {
                break;
            }
        }

        Ok(last_status)
    }

    /// One GET against one candidate. Infallible by design: every failure
    /// mode maps to a terminal status.
    async fn attempt(&self, candidate: &PdfCandidate) -> AttemptResult {
        if !has_http_scheme(&candidate.url) {
            return AttemptResult::failure(
                PdfDownloadStatus::Unavailable,
                "candidate URL empty or missing scheme",
            );
        }

        let plan = plan_request(candidate);
        if let Some(delay) = plan.pre_sleep {
            tokio::time::sleep(delay).await;
        }
        self.limiter.acquire(&candidate.source).await;

        let response = match self.client.get_with_retry(&plan.url, plan.headers).await {
            Ok(response) => response,
            Err(error) => {
                return AttemptResult::failure(PdfDownloadStatus::Error, error.to_string());
            }
        };

        let status = response.status();
        if status.as_u16() != 200 {
            return AttemptResult::failure(
                PdfDownloadStatus::Unavailable,
                format!("HTTP {}", status.as_u16()),
            );
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.trim_start().starts_with("application/pdf") {
            return AttemptResult::failure(
                PdfDownloadStatus::Unavailable,
                format!("wrong content type: {content_type}"),
            );
        }

        if let Some(declared) = response.content_length() {
            if declared > self.max_size {
                return AttemptResult::failure(
                    PdfDownloadStatus::TooLarge,
                    format!("declared size {declared} exceeds cap {}", self.max_size),
                );
            }
        }

        let final_url = response.url().to_string();
        let bytes = match read_body_capped(response, self.max_size).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                return AttemptResult::failure(
                    PdfDownloadStatus::TooLarge,
                    format!("body exceeds cap {}", self.max_size),
                );
            }
            Err(message) => {
                return AttemptResult::failure(PdfDownloadStatus::Error, message);
            }
        };

        let sha1_hex = sha1_hex(&bytes);
        let path = self.payload_path(&sha1_hex);
        if let Err(message) = write_if_changed(&path, &bytes, &sha1_hex).await {
            return AttemptResult::failure(PdfDownloadStatus::Error, message);
        }

        let written_size = match tokio::fs::metadata(&path).await {
            Ok(metadata) => i64::try_from(metadata.len()).unwrap_or(i64::MAX),
            Err(error) => {
                return AttemptResult::failure(
                    PdfDownloadStatus::Error,
                    format!("stat {} failed: {error}", path.display()),
                );
            }
        };

        debug!(sha1 = %sha1_hex, size = written_size, path = %path.display(), "pdf stored");
        AttemptResult {
            status: PdfDownloadStatus::Downloaded,
            pdf_local_path: Some(path.to_string_lossy().into_owned()),
            sha1: Some(sha1_hex),
            final_url: Some(final_url),
            error_message: None,
            file_size_bytes: Some(written_size),
        }
    }

    /// Content-addressed payload path: flat `<sha1>.pdf`, or sharded
    /// `aa/bb/<sha1>.pdf` when enabled.
    fn payload_path(&self, sha1_hex: &str) -> PathBuf {
        if self.shard_dirs && sha1_hex.len() >= 4 {
            self.dest_dir
                .join(&sha1_hex[0..2])
                .join(&sha1_hex[2..4])
                .join(format!("{sha1_hex}.pdf"))
        } else {
            self.dest_dir.join(format!("{sha1_hex}.pdf"))
        }
    }
}

fn has_http_scheme(raw: &str) -> bool {
    !raw.trim().is_empty()
        && Url::parse(raw.trim())
            .map(|url| matches!(url.scheme(), "http" | "https"))
            .unwrap_or(false)
}

/// Streams the body up to `cap` bytes. `Ok(None)` means the cap was hit.
async fn read_body_capped(
    response: reqwest::Response,
    cap: u64,
) -> Result<Option<Vec<u8>>, String> {
    let mut bytes: Vec<u8> = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|error| format!("body read failed: {error}"))?;
        if (bytes.len() as u64).saturating_add(chunk.len() as u64) > cap {
            return Ok(None);
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(Some(bytes))
}

fn sha1_hex(bytes: &[u8]) -> String {
    let digest = Sha1::digest(bytes);
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// Writes the payload unless an identical file is already in place; the
/// identical-content overwrite is a no-op by hash comparison.
async fn write_if_changed(path: &Path, bytes: &[u8], expected_sha1: &str) -> Result<(), String> {
    if let Ok(existing) = tokio::fs::read(path).await {
        if sha1_hex(&existing) == expected_sha1 {
            debug!(path = %path.display(), "identical payload already on disk");
            return Ok(());
        }
        warn!(path = %path.display(), "hash-addressed file with differing content, rewriting");
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|error| format!("create {} failed: {error}", parent.display()))?;
    }
    tokio::fs::write(path, bytes)
        .await
        .map_err(|error| format!("write {} failed: {error}", path.display()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::store::{ImportOutcome, NewArticle};

    use wiremock::matchers::{method, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PDF_BYTES: &[u8] = b"%PDF-1.5 fake pdf body";

    async fn store_with_article(oa_pdf_url: Option<String>) -> (Store, ResearchArticle) {
        let store = Store::new(Database::new_in_memory().await.unwrap());
        let ImportOutcome::Inserted(id) = store
            .import_article(&NewArticle {
                doi_norm: Some("10.1234/pdf".to_string()),
                title: "pdf target".to_string(),
                ..NewArticle::default()
            })
            .await
            .unwrap()
        else {
            panic!("expected insert");
        };
        let mut article = store.get_article(id).await.unwrap();
        if oa_pdf_url.is_some() {
            article.oa_status = Some("gold".to_string());
            article.oa_pdf_url = oa_pdf_url;
            article.enrichment_datetime = Some(crate::store::now_rfc3339());
            store.update_article_enrichment(&article).await.unwrap();
        }
        (store, article)
    }

    fn downloader(store: Store, dest: &Path) -> Arc<PdfDownloader> {
        let client = HttpClient::new("test-agent", 5, 0).unwrap();
        Arc::new(PdfDownloader::new(
            store,
            client,
            Arc::new(SourceRateLimiter::with_defaults()),
            dest,
            2,
        ))
    }

    // ==================== Helper Tests ====================

    #[test]
    fn test_sha1_hex_known_vector() {
        // SHA-1 of the empty string.
        assert_eq!(sha1_hex(b""), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }

    #[test]
    fn test_scheme_preflight() {
        assert!(has_http_scheme("https://example.com/a.pdf"));
        assert!(has_http_scheme("http://example.com/a.pdf"));
        assert!(!has_http_scheme(""));
        assert!(!has_http_scheme("example.com/a.pdf"));
        assert!(!has_http_scheme("ftp://example.com/a.pdf"));
    }

    #[tokio::test]
    async fn test_payload_path_sharding() {
        let store = Store::new(Database::new_in_memory().await.unwrap());
        let client = HttpClient::new("test-agent", 5, 0).unwrap();
        let flat = PdfDownloader::new(
            store.clone(),
            client.clone(),
            Arc::new(SourceRateLimiter::with_defaults()),
            "/pdfs",
            1,
        );
        assert_eq!(
            flat.payload_path("da39a3ee5e6b4b0d3255bfef95601890afd80709"),
            PathBuf::from("/pdfs/da39a3ee5e6b4b0d3255bfef95601890afd80709.pdf")
        );

        let sharded = PdfDownloader::new(
            store,
            client,
            Arc::new(SourceRateLimiter::with_defaults()),
            "/pdfs",
            1,
        )
        .with_sharding();
        assert_eq!(
            sharded.payload_path("da39a3ee5e6b4b0d3255bfef95601890afd80709"),
            PathBuf::from("/pdfs/da/39/da39a3ee5e6b4b0d3255bfef95601890afd80709.pdf")
        );
    }

    // ==================== Attempt Tests ====================

    #[tokio::test]
    async fn test_download_success_records_row_and_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "application/pdf")
                    .set_body_bytes(PDF_BYTES),
            )
            .mount(&server)
            .await;

        let dest = tempfile::tempdir().unwrap();
        let (store, article) =
            store_with_article(Some(format!("{}/paper.pdf", server.uri()))).await;
        let downloader = downloader(store.clone(), dest.path());

        let status = downloader
            .download_for_article(&article, None)
            .await
            .unwrap();
        assert_eq!(status, PdfDownloadStatus::Downloaded);

        let row = store
            .latest_successful_download(article.id)
            .await
            .unwrap()
            .unwrap();
        let expected_sha1 = sha1_hex(PDF_BYTES);
        assert_eq!(row.sha1.as_deref(), Some(expected_sha1.as_str()));
        assert_eq!(row.url.as_deref(), Some(format!("{}/paper.pdf", server.uri()).as_str()));

        let path = PathBuf::from(row.pdf_local_path.unwrap());
        let on_disk = std::fs::read(&path).unwrap();
        assert_eq!(on_disk, PDF_BYTES);
        assert_eq!(row.file_size_bytes.unwrap(), PDF_BYTES.len() as i64);
    }

    #[tokio::test]
    async fn test_html_response_is_unavailable_wrong_content_type() {
        let server = MockServer::start().await;
        let html = "x".repeat(1853);
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "text/html; charset=utf-8")
                    .set_body_string(html),
            )
            .mount(&server)
            .await;

        let dest = tempfile::tempdir().unwrap();
        let (store, article) =
            store_with_article(Some(format!("{}/landing", server.uri()))).await;
        let downloader = downloader(store.clone(), dest.path());

        let status = downloader
            .download_for_article(&article, None)
            .await
            .unwrap();
        assert_eq!(status, PdfDownloadStatus::Unavailable);

        let stats = store.get_pdf_download_stats(None).await.unwrap();
        assert_eq!(stats.get("unavailable"), Some(&1));
        let rows: Vec<(String, Option<String>)> =
            sqlx::query_as("SELECT status, error_message FROM pdf_downloads")
                .fetch_all(store.database().pool())
                .await
                .unwrap();
        assert!(rows[0].1.as_deref().unwrap().contains("wrong content type"));
    }

    #[tokio::test]
    async fn test_oversize_body_is_too_large_without_persisting() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "application/pdf")
                    .set_body_bytes(vec![0u8; 64]),
            )
            .mount(&server)
            .await;

        let dest = tempfile::tempdir().unwrap();
        let (store, article) =
            store_with_article(Some(format!("{}/huge.pdf", server.uri()))).await;
        let client = HttpClient::new("test-agent", 5, 0).unwrap();
        let downloader = Arc::new(
            PdfDownloader::new(
                store.clone(),
                client,
                Arc::new(SourceRateLimiter::with_defaults()),
                dest.path(),
                2,
            )
            .with_max_size(16),
        );

        let status = downloader
            .download_for_article(&article, None)
            .await
            .unwrap();
        assert_eq!(status, PdfDownloadStatus::TooLarge);
        assert_eq!(
            std::fs::read_dir(dest.path()).unwrap().count(),
            0,
            "no bytes persisted"
        );

        let stats = store.get_pdf_download_stats(None).await.unwrap();
        assert_eq!(stats.get("too_large"), Some(&1));
    }

    #[tokio::test]
    async fn test_no_candidates_synthetic_row() {
        let dest = tempfile::tempdir().unwrap();
        let (store, article) = store_with_article(None).await;
        let downloader = downloader(store.clone(), dest.path());

        let status = downloader
            .download_for_article(&article, None)
            .await
            .unwrap();
        assert_eq!(status, PdfDownloadStatus::NoCandidates);

        let stats = store.get_pdf_download_stats(None).await.unwrap();
        assert_eq!(stats.get("no_candidates"), Some(&1));
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent_on_disk_new_row_in_db() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "application/pdf")
                    .set_body_bytes(PDF_BYTES),
            )
            .mount(&server)
            .await;

        let dest = tempfile::tempdir().unwrap();
        let (store, article) =
            store_with_article(Some(format!("{}/paper.pdf", server.uri()))).await;
        let downloader = downloader(store.clone(), dest.path());

        downloader.download_for_article(&article, None).await.unwrap();
        let first = store
            .latest_successful_download(article.id)
            .await
            .unwrap()
            .unwrap();
        let mtime_before = std::fs::metadata(first.pdf_local_path.as_deref().unwrap())
            .unwrap()
            .modified()
            .unwrap();

        downloader.download_for_article(&article, None).await.unwrap();
        let second = store
            .latest_successful_download(article.id)
            .await
            .unwrap()
            .unwrap();

        assert!(second.id > first.id, "re-attempt recorded as a new row");
        assert_eq!(second.sha1, first.sha1);
        assert_eq!(second.pdf_local_path, first.pdf_local_path);
        let mtime_after = std::fs::metadata(second.pdf_local_path.as_deref().unwrap())
            .unwrap()
            .modified()
            .unwrap();
        assert_eq!(mtime_before, mtime_after, "identical overwrite is a no-op");

        let stats = store.get_pdf_download_stats(None).await.unwrap();
        assert_eq!(stats.get("downloaded"), Some(&2));
    }

    #[tokio::test]
    async fn test_arxiv_candidate_gets_cache_busted_url_but_stores_original() {
        let server = MockServer::start().await;
        // The live request must carry _cb; the stored url must not.
        Mock::given(method("GET"))
            .and(query_param_is_missing("_cb"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "application/pdf")
                    .set_body_bytes(PDF_BYTES),
            )
            .mount(&server)
            .await;

        let dest = tempfile::tempdir().unwrap();
        let store = Store::new(Database::new_in_memory().await.unwrap());
        let ImportOutcome::Inserted(id) = store
            .import_article(&NewArticle {
                title: "arxiv record".to_string(),
                arxiv_id: Some("0705.2011".to_string()),
                ..NewArticle::default()
            })
            .await
            .unwrap()
        else {
            panic!("expected insert");
        };
        let article = store.get_article(id).await.unwrap();

        // Point the candidate at the mock server by rewriting through the
        // downloader's attempt path directly.
        let downloader = downloader(store.clone(), dest.path());
        let candidate = PdfCandidate {
            url: format!("{}/pdf/0705.2011.pdf", server.uri()),
            source: "arxiv".to_string(),
            license: None,
        };
        let attempt = downloader.attempt(&candidate).await;

        assert_eq!(attempt.status, PdfDownloadStatus::Downloaded);
        let final_url = attempt.final_url.unwrap();
        assert!(final_url.contains("_cb="), "transformed URL visible in final_url");
        assert_eq!(article.id, id);
    }
}
