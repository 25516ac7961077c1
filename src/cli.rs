//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use scholarpipe::enrich::DEFAULT_MAX_PASSES;

/// Curate a scholarly-literature corpus: import, enrich, filter, fetch, convert.
#[derive(Parser, Debug)]
#[command(name = "scholarpipe")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Operate on the test data root (test_data/ instead of data/)
    #[arg(long, global = true)]
    pub test_mode: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Pipeline stages.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Import a spreadsheet of references (CSV)
    Import {
        /// Path to the CSV file
        file: PathBuf,
    },

    /// Enrich eligible records from the scholarly APIs
    Enrich {
        /// Maximum discovery passes (1-10)
        #[arg(long, default_value_t = DEFAULT_MAX_PASSES, value_parser = clap::value_parser!(u32).range(1..=10))]
        max_passes: u32,

        /// Leave zero-data records eligible for a future run
        #[arg(long)]
        retry_empty: bool,

        /// Concurrent records in flight (1-50)
        #[arg(short = 'c', long, default_value_t = 5, value_parser = clap::value_parser!(u8).range(1..=50))]
        max_concurrent: u8,
    },

    /// Filter the corpus against a relevance query with an LLM
    Filter {
        /// Inclusion criteria, natural language
        #[arg(long)]
        query: String,

        /// Exclusion criteria, natural language
        #[arg(long)]
        exclude: Option<String>,

        /// Model identifier passed to the LLM endpoint
        #[arg(long)]
        model: String,

        /// Concurrent LLM calls in flight (1-50)
        #[arg(short = 'c', long, default_value_t = 5, value_parser = clap::value_parser!(u8).range(1..=50))]
        max_concurrent: u8,
    },

    /// Download Open-Access PDFs for matched records
    Pdfs {
        /// Filter run whose matches to fetch
        #[arg(long)]
        query_id: i64,

        /// Shard payload files into aa/bb/ subdirectories
        #[arg(long)]
        shard: bool,

        /// Concurrent records in flight (1-20)
        #[arg(short = 'c', long, default_value_t = 5, value_parser = clap::value_parser!(u8).range(1..=20))]
        max_concurrent: u8,
    },

    /// Locate DOCX renditions and convert them to Markdown
    Convert {
        /// Restrict to a filter run's matched records
        #[arg(long)]
        query_id: Option<i64>,
    },

    /// Export matched records to CSV
    Export {
        /// Filter run whose matches to export
        #[arg(long)]
        query_id: i64,

        /// Output CSV path
        #[arg(long)]
        output: PathBuf,
    },

    /// Show PDF download statistics
    Stats {
        /// Restrict to a filter run
        #[arg(long)]
        query_id: Option<i64>,
    },
}
