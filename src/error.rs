//! Error types for oakdb.
//!
//! Two error surfaces exist in this crate:
//!
//! - `OakError` is returned for misuse that invalidates an operation:
//!   schema and index lifecycle failures, querying a disabled index,
//!   malformed filter conditions and order literals.
//! - Recoverable per-call problems (missing key, empty batch, duplicate
//!   key, ...) are reported through the `error` field of the response
//!   structs in [`crate::output`] and never raise.

use thiserror::Error;

/// Main error type for oakdb operations.
#[derive(Error, Debug)]
pub enum OakError {
    /// Base name contains characters that cannot be composed into SQL.
    #[error("Invalid base name '{name}': use letters, digits and underscores only")]
    InvalidBaseName { name: String },

    /// The confirmation name passed to a drop did not match the base.
    #[error("Confirm the drop by passing the name of the base ('{expected}')")]
    BaseNameMismatch { expected: String },

    /// Unknown filter operator in a field spec.
    #[error("'{operator}' is not a valid operator")]
    InvalidOperator { operator: String },

    /// Order literal is not in the allow-list for this query kind.
    #[error("Invalid order: {order}")]
    InvalidOrder { order: String },

    /// Filter condition is structurally malformed.
    #[error("Invalid filter: {reason}")]
    InvalidFilter { reason: String },

    /// Full-text search query was empty.
    #[error("Search query cannot be empty")]
    EmptySearchQuery,

    /// Full-text search used on a base where it is not enabled.
    #[error("Search is not enabled")]
    SearchNotEnabled,

    /// Vector search used on a base where it is not enabled.
    #[error("Vector search is not enabled")]
    VectorNotEnabled,

    /// Vector operations need an embedder configured on the backend.
    #[error("No embedder configured")]
    EmbedderMissing,

    /// Enabling a search/vector index failed mid-migration.
    #[error("Failed to enable {feature}: {reason}")]
    EnableFailed { feature: &'static str, reason: String },

    /// Dropping tables or triggers failed.
    #[error("Failed to drop table: {reason}")]
    DropFailed { reason: String },

    /// Stored timestamp did not parse back.
    #[error("Unable to parse timestamp '{value}'")]
    Timestamp { value: String },

    /// SQLite error occurred.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization/deserialization error occurred.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OakError {
    /// Whether the underlying SQLite error is a uniqueness/constraint
    /// violation (duplicate primary key on insert).
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            OakError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => {
                err.code == rusqlite::ErrorCode::ConstraintViolation
            }
            _ => false,
        }
    }
}
