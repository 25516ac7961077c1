//! Error types for store operations.

use thiserror::Error;

/// Errors surfaced by the typed persistence API.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A record with this normalized DOI already exists. Ingest reports this
    /// as a skipped row, not a failure.
    #[error("duplicate DOI: {doi}")]
    DuplicateDoi {
        /// The normalized DOI that collided.
        doi: String,
    },

    /// A write would violate a row-level invariant the schema cannot express
    /// on migrated tables (enforced here instead).
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// No row with the requested id.
    #[error("no such row: {table} id {id}")]
    NotFound {
        /// Table queried.
        table: &'static str,
        /// Missing id.
        id: i64,
    },
}

impl StoreError {
    /// Returns true when the error is the ingest-visible duplicate-DOI skip.
    #[must_use]
    pub fn is_duplicate_doi(&self) -> bool {
        matches!(self, Self::DuplicateDoi { .. })
    }
}
