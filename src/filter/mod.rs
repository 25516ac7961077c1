//! LLM relevance filtering with bounded concurrency and a full audit trail.
//!
//! One run = one `filtering_queries` row plus exactly one decision row per
//! record. Decisions are collected in memory and inserted in a single batch
//! at the end of the run; a failure mid-run loses only in-flight decisions,
//! and the query row without results is detectable.

mod decision;
mod llm;

pub use decision::{
    Decision, decision_from_error, is_error_explanation, is_warning_explanation, parse_decision,
};
pub use llm::{LLM_RETRY_ATTEMPTS, LlmClient, LlmError, OpenAiCompatClient, complete_with_retry};

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

use crate::store::{FilteringStats, NewFilteringResult, ResearchArticle, Store, StoreError};

/// Parameters of one filter run.
#[derive(Debug, Clone)]
pub struct FilterParams {
    /// Inclusion criteria, natural language.
    pub query: String,
    /// Exclusion criteria, natural language.
    pub exclude: Option<String>,
    /// Model identifier passed to the LLM backend.
    pub model: String,
    /// Concurrent in-flight LLM calls.
    pub max_concurrent: usize,
    /// Output token cap per decision.
    pub max_output_tokens: u32,
}

/// Summary of one filter run.
#[derive(Debug, Clone, Copy)]
pub struct FilterReport {
    /// Id of the created `filtering_queries` row.
    pub filtering_query_id: i64,
    /// Final statistics, as written back to the row.
    pub stats: FilteringStats,
}

/// Runs LLM relevance decisions over the whole corpus.
pub struct FilterExecutor {
    store: Store,
    llm: Arc<dyn LlmClient>,
}

impl FilterExecutor {
    /// Builds an executor over a store and an LLM backend.
    #[must_use]
    pub fn new(store: Store, llm: Arc<dyn LlmClient>) -> Self {
        Self { store, llm }
    }

    /// Executes one filter run: creates the query row, decides every record
    /// with up to `max_concurrent` calls in flight, batch-inserts the
    /// decisions, and writes the final statistics.
    ///
    /// No record is ever dropped: a call that fails after retries yields an
    /// `ERROR:` decision, and a vanished task yields one too.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] for persistence failures only.
    #[instrument(skip_all, fields(model = %params.model))]
    pub async fn run(&self, params: &FilterParams) -> Result<FilterReport, StoreError> {
        let articles = self.store.get_all_articles().await?;
        let filtering_query_id = self
            .store
            .create_filtering_query(
                &params.query,
                params.exclude.as_deref(),
                &params.model,
                params.max_concurrent,
            )
            .await?;

        info!(
            filtering_query_id,
            records = articles.len(),
            max_concurrent = params.max_concurrent,
            "filter run started"
        );

        let system_prompt = Arc::new(build_system_prompt());
        let semaphore = Arc::new(Semaphore::new(params.max_concurrent.max(1)));
        let mut pending: BTreeMap<i64, ()> = articles.iter().map(|a| (a.id, ())).collect();
        let mut tasks = JoinSet::new();

        for article in articles {
            let semaphore = Arc::clone(&semaphore);
            let llm = Arc::clone(&self.llm);
            let system_prompt = Arc::clone(&system_prompt);
            let user_prompt = build_user_prompt(params, &article);
            let model = params.model.clone();
            let max_output_tokens = params.max_output_tokens;
            let article_id = article.id;

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return (
                        article_id,
                        Decision {
                            match_result: false,
                            explanation: "ERROR: LlmTransportError: executor shut down"
                                .to_string(),
                        },
                    );
                };
                let decision = match complete_with_retry(
                    llm.as_ref(),
                    &system_prompt,
                    &user_prompt,
                    &model,
                    max_output_tokens,
                )
                .await
                {
                    Ok(content) => parse_decision(&content),
                    Err(error) => decision_from_error(&error),
                };
                (article_id, decision)
            });
        }

        let mut results: Vec<NewFilteringResult> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((article_id, decision)) => {
                    pending.remove(&article_id);
                    results.push(NewFilteringResult {
                        article_id,
                        match_result: decision.match_result,
                        explanation: decision.explanation,
                    });
                }
                Err(join_error) => {
                    warn!(error = %join_error, "decision task vanished");
                }
            }
        }

        // Tasks that panicked still owe a row.
        for (article_id, ()) in pending {
            results.push(NewFilteringResult {
                article_id,
                match_result: false,
                explanation: "ERROR: TaskError: decision task did not complete".to_string(),
            });
        }

        results.sort_by_key(|result| result.article_id);
        let stats = compute_stats(&results);

        self.store
            .batch_insert_filtering_results(filtering_query_id, &results)
            .await?;
        self.store
            .update_filtering_query_stats(filtering_query_id, stats)
            .await?;

        info!(
            filtering_query_id,
            total = stats.total,
            matched = stats.matched,
            failed = stats.failed,
            warnings = stats.warnings,
            "filter run finished"
        );
        Ok(FilterReport {
            filtering_query_id,
            stats,
        })
    }
}

fn build_system_prompt() -> String {
    "You are screening scholarly articles for a literature curation pipeline. \
     Judge whether the article satisfies the inclusion criteria and does not \
     fall under the exclusion criteria, using only the title and abstract. \
     Respond with a single JSON object of the form \
     {\"match\": true|false, \"explanation\": \"one or two sentences\"} \
     and nothing else."
        .to_string()
}

fn build_user_prompt(params: &FilterParams, article: &ResearchArticle) -> String {
    format!(
        "Inclusion criteria:\n{}\n\nExclusion criteria:\n{}\n\nTitle: {}\n\nAbstract: {}",
        params.query,
        params.exclude.as_deref().unwrap_or("(none)"),
        article.title,
        article
            .abstract_text
            .as_deref()
            .unwrap_or("(no abstract available)"),
    )
}

fn compute_stats(results: &[NewFilteringResult]) -> FilteringStats {
    let mut stats = FilteringStats {
        total: results.len() as i64,
        ..FilteringStats::default()
    };
    for result in results {
        if is_error_explanation(&result.explanation) {
            stats.failed += 1;
            continue;
        }
        if is_warning_explanation(&result.explanation) {
            stats.warnings += 1;
        }
        if result.match_result {
            stats.matched += 1;
        }
    }
    stats
}
