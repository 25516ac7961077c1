//! Scholarpipe Core Library
//!
//! Batch pipeline for scholarly-literature curation: ingest a spreadsheet of
//! references, enrich records with metadata and abstracts from the public
//! scholarly APIs, discover preprint/published relationships, filter the
//! corpus against a natural-language query with an LLM, resolve and download
//! Open-Access PDFs, and convert artifacts to Markdown. All state lives in
//! one embedded SQLite store, so every stage is idempotent, resumable, and
//! auditable.
//!
//! # Architecture
//!
//! - [`db`] - Database connection and schema management
//! - [`store`] - Typed persistence API over all pipeline tables
//! - [`net`] - Per-source rate limiting and the retrying HTTP client
//! - [`sources`] - One adapter per external scholarly API
//! - [`enrich`] - Abstract pipeline, preprint discovery, OA, orchestration
//! - [`filter`] - LLM relevance filtering with audit trail
//! - [`pdf`] - Candidate resolution and validated PDF download
//! - [`convert`] - DOCX lookup and DOCX→Markdown conversion
//! - [`ingest`] - Row import with deduplication

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod convert;
pub mod db;
pub mod doi;
pub mod enrich;
pub mod filter;
pub mod ingest;
pub mod net;
pub mod pdf;
pub mod sources;
pub mod store;
pub mod user_agent;

// Re-export commonly used types
pub use config::{AppConfig, ConfigError, DataMode};
pub use db::Database;
pub use enrich::{AbstractPipeline, EnrichmentOrchestrator, OaEnricher, PreprintEnricher};
pub use filter::{FilterExecutor, FilterParams, LlmClient, OpenAiCompatClient};
pub use ingest::{ImportReport, ImportRow, import_rows, read_csv};
pub use net::{HttpClient, SourceRateLimiter};
pub use pdf::{PdfDownloader, resolve_candidates};
pub use store::{ResearchArticle, Store, StoreError};
