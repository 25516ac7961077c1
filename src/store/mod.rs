//! Typed persistence API over the embedded database.
//!
//! The store is the only component that touches persistent state. Every other
//! part of the pipeline holds transient copies keyed by surrogate id and
//! hands ownership back through store writes.
//!
//! # Concurrency
//!
//! SQLite under WAL supports concurrent readers but a single writer. All
//! mutating operations take a process-wide async mutex before opening their
//! transaction, so concurrent enrichment tasks serialize on writes while
//! reads proceed in parallel.

mod article;
mod error;
mod files;
mod filtering;

pub use article::{ImportOutcome, NewArticle, ResearchArticle};
pub use error::StoreError;
pub use files::{
    DocxVersion, MarkdownSource, MarkdownVariant, MarkdownVersion, NewMarkdownVersion,
    NewPdfDownload, PdfCandidate, PdfDownload, PdfDownloadStatus,
};
pub use filtering::{
    ERROR_PREFIX, FilteringQuery, FilteringResult, FilteringStats, NewFilteringResult,
    WARNING_PREFIX,
};

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use tokio::sync::Mutex;

use crate::db::Database;

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Handle to the persistence layer. Cheap to clone; clones share the pool and
/// the writer mutex.
#[derive(Debug, Clone)]
pub struct Store {
    db: Database,
    write_lock: Arc<Mutex<()>>,
}

impl Store {
    /// Creates a store over an opened database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self {
            db,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Returns the wrapped database handle.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    pub(crate) fn pool(&self) -> &sqlx::SqlitePool {
        self.db.pool()
    }

    pub(crate) async fn write_guard(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }
}

/// Current UTC time in the RFC 3339 form stored in every timestamp column.
#[must_use]
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_now_rfc3339_shape() {
        let now = now_rfc3339();
        assert!(now.ends_with('Z'), "timestamps are UTC: {now}");
        assert!(now.contains('T'));
    }

    #[tokio::test]
    async fn test_store_clones_share_writer_lock() {
        let db = Database::new_in_memory().await.unwrap();
        let store = Store::new(db);
        let clone = store.clone();
        assert!(Arc::ptr_eq(&store.write_lock, &clone.write_lock));
    }
}
