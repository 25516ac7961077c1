//! CLI entry point for the curation pipeline.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use scholarpipe::config::{AppConfig, DataMode};
use scholarpipe::convert::{ArtifactConverter, CommandDocxConverter};
use scholarpipe::db::Database;
use scholarpipe::enrich::{
    AbstractPipeline, EnrichmentOrchestrator, OaEnricher, PreprintEnricher,
};
use scholarpipe::filter::{FilterExecutor, FilterParams, OpenAiCompatClient};
use scholarpipe::net::{HttpClient, SourceRateLimiter};
use scholarpipe::pdf::PdfDownloader;
use scholarpipe::sources::{
    AbstractSource, ArxivAdapter, BiorxivAdapter, CrossrefAdapter, EuropePmcAdapter,
    OpenAlexAdapter, PreprintsOrgAdapter, PubmedAdapter, SemanticScholarAdapter, UnpaywallAdapter,
};
use scholarpipe::store::Store;
use scholarpipe::user_agent::{BROWSER_USER_AGENT, api_user_agent};
use scholarpipe::{ingest, store};

mod cli;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // The data mode is frozen here for the whole process.
    let mode = if args.test_mode {
        DataMode::Test
    } else {
        DataMode::Production
    };
    let config = AppConfig::from_env(mode);
    debug!(?mode, root = %config.data_root().display(), "configuration loaded");

    prepare_data_root(&config)?;
    let db = Database::new(&config.db_path()).await?;
    let store = Store::new(db);

    match args.command {
        Command::Import { file } => {
            let rows = ingest::read_csv(&file)?;
            let report = ingest::import_rows(&store, &rows).await?;
            info!(
                total = report.total,
                imported = report.imported,
                skipped = report.skipped_duplicates,
                rejected = report.rejected,
                "import: done"
            );
        }

        Command::Enrich {
            max_passes,
            retry_empty,
            max_concurrent,
        } => {
            let orchestrator =
                build_orchestrator(&config, &store, max_passes, retry_empty, max_concurrent.into())?;
            let spinner = stage_spinner("enriching records");
            let report = orchestrator.run().await?;
            spinner.finish_and_clear();
            info!(
                passes = report.passes,
                total = report.total,
                succeeded = report.succeeded,
                failed = report.failed,
                created = report.created,
                "enrich: done"
            );
        }

        Command::Filter {
            query,
            exclude,
            model,
            max_concurrent,
        } => {
            let llm_settings = config.require_llm()?;
            let llm = OpenAiCompatClient::new(
                &llm_settings.base_url,
                llm_settings.api_key.clone(),
            )?;
            let executor = FilterExecutor::new(store.clone(), Arc::new(llm));

            let spinner = stage_spinner("filtering corpus");
            let report = executor
                .run(&FilterParams {
                    query,
                    exclude,
                    model,
                    max_concurrent: max_concurrent.into(),
                    max_output_tokens: llm_settings.max_output_tokens,
                })
                .await?;
            spinner.finish_and_clear();
            info!(
                filtering_query_id = report.filtering_query_id,
                total = report.stats.total,
                matched = report.stats.matched,
                failed = report.stats.failed,
                warnings = report.stats.warnings,
                "filter: done"
            );
        }

        Command::Pdfs {
            query_id,
            shard,
            max_concurrent,
        } => {
            let client = HttpClient::new(
                BROWSER_USER_AGENT,
                config.http_timeout_secs,
                config.http_max_retries,
            )?;
            let limiter = Arc::new(SourceRateLimiter::with_defaults());
            let mut downloader = PdfDownloader::new(
                store.clone(),
                client,
                limiter,
                config.pdfs_dir(),
                max_concurrent.into(),
            );
            if shard {
                downloader = downloader.with_sharding();
            }
            let downloader = Arc::new(downloader);

            let spinner = stage_spinner("downloading PDFs");
            let report = downloader.run(Some(query_id)).await?;
            spinner.finish_and_clear();
            info!(
                total = report.total,
                downloaded = report.downloaded,
                failed = report.failed,
                no_candidates = report.no_candidates,
                "pdfs: done"
            );
        }

        Command::Convert { query_id } => {
            let program = config.require_docx_converter()?;
            let converter = ArtifactConverter::new(
                store.clone(),
                Arc::new(CommandDocxConverter::new(program)),
                config.docx_dir(),
                config.markdown_dir(),
            );
            let report = converter.run(query_id).await?;
            info!(
                total = report.total,
                found = report.found,
                converted = report.converted,
                failed = report.failed,
                skipped = report.skipped,
                "convert: done"
            );
        }

        Command::Export { query_id, output } => {
            let matched = store.get_matched_records_by_filtering_query(query_id).await?;
            write_export_csv(&output, &matched)?;
            info!(
                query_id,
                records = matched.len(),
                output = %output.display(),
                "export: done"
            );
        }

        Command::Stats { query_id } => {
            let stats = store.get_pdf_download_stats(query_id).await?;
            if stats.is_empty() {
                info!("no download attempts recorded");
            }
            for (status, count) in stats {
                info!(status = %status, count, "pdf downloads");
            }
        }
    }

    Ok(())
}

/// Creates the data-root directory tree if missing.
fn prepare_data_root(config: &AppConfig) -> Result<()> {
    if let Some(cache_dir) = config.db_path().parent() {
        std::fs::create_dir_all(cache_dir)?;
    }
    std::fs::create_dir_all(config.pdfs_dir())?;
    std::fs::create_dir_all(config.docx_dir())?;
    std::fs::create_dir_all(config.markdown_dir())?;
    Ok(())
}

/// Wires adapters, pipeline, and enrichers for the enrich stage.
fn build_orchestrator(
    config: &AppConfig,
    store: &Store,
    max_passes: u32,
    retry_empty: bool,
    max_concurrent: usize,
) -> Result<EnrichmentOrchestrator> {
    let contact_email = config.require_contact_email()?;
    let http = HttpClient::new(
        &api_user_agent(contact_email),
        config.http_timeout_secs,
        config.http_max_retries,
    )?;
    let limiter = Arc::new(SourceRateLimiter::with_defaults());

    let abstracts = AbstractPipeline::new(vec![
        Arc::new(SemanticScholarAdapter::new(
            http.clone(),
            Arc::clone(&limiter),
            config.semantic_scholar_api_key.clone(),
        )) as Arc<dyn AbstractSource>,
        Arc::new(CrossrefAdapter::new(
            http.clone(),
            Arc::clone(&limiter),
            contact_email,
        )),
        Arc::new(OpenAlexAdapter::new(
            http.clone(),
            Arc::clone(&limiter),
            contact_email,
        )),
        Arc::new(EuropePmcAdapter::new(http.clone(), Arc::clone(&limiter))),
        Arc::new(PubmedAdapter::new(http.clone(), Arc::clone(&limiter))),
    ]);

    let preprints = PreprintEnricher::new(
        store.clone(),
        Arc::new(ArxivAdapter::new(http.clone(), Arc::clone(&limiter))),
        Arc::new(BiorxivAdapter::new(http.clone(), Arc::clone(&limiter))),
        Arc::new(PreprintsOrgAdapter::new(CrossrefAdapter::new(
            http.clone(),
            Arc::clone(&limiter),
            contact_email,
        ))),
    );

    let oa = OaEnricher::new(UnpaywallAdapter::new(
        http,
        Arc::clone(&limiter),
        contact_email,
    ));

    Ok(EnrichmentOrchestrator::new(
        store.clone(),
        abstracts,
        preprints,
        oa,
        max_concurrent,
        max_passes,
        retry_empty,
    ))
}

fn stage_spinner(message: &'static str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner().with_message(message);
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg} [{elapsed}]") {
        spinner.set_style(style);
    }
    spinner.enable_steady_tick(std::time::Duration::from_millis(120));
    spinner
}

/// Writes the matched corpus as a CSV for downstream tooling.
fn write_export_csv(
    output: &std::path::Path,
    records: &[store::ResearchArticle],
) -> Result<()> {
    let mut writer = csv::Writer::from_path(output)?;
    writer.write_record([
        "Title",
        "DOI",
        "Publication Date",
        "Authors",
        "Source Title",
        "Total Citations",
        "Abstract Source",
        "OA Status",
    ])?;
    for record in records {
        let citations = record
            .total_citations
            .map(|count| count.to_string())
            .unwrap_or_default();
        writer.write_record([
            record.title.as_str(),
            record.doi_norm.as_deref().unwrap_or(""),
            record.publication_date.as_deref().unwrap_or(""),
            record.authors.as_deref().unwrap_or(""),
            record.source_title.as_deref().unwrap_or(""),
            citations.as_str(),
            record.abstract_source.as_deref().unwrap_or(""),
            record.oa_status.as_deref().unwrap_or(""),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
