//! Response types for oakdb operations.
//!
//! Every public operation on a base returns one of these structs. They carry
//! an `error` string instead of raising for recoverable per-call problems,
//! so callers can branch on `is_ok()` the same way for every operation.

use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::Value;

/// A stored document as returned by fetch/search/similar.
#[derive(Serialize, Clone, Debug)]
pub struct Item {
    /// Primary key of the document.
    pub key: String,
    /// Parsed document body.
    pub data: Value,
    /// Creation timestamp (engine-local, second resolution).
    pub created: NaiveDateTime,
    /// Last-update timestamp.
    pub updated: NaiveDateTime,
    /// Full-text relevance score; present on search results only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<f64>,
    /// Vector distance to the query; present on similarity results only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
}

/// Result of a single insert.
#[derive(Serialize, Clone, Debug, Default)]
pub struct AddResponse {
    /// Key under which the document was stored (supplied or generated).
    pub key: String,
    /// The stored body, after any `"key"` entry was extracted.
    pub data: Value,
    pub error: String,
}

/// Result of a batch insert.
#[derive(Serialize, Clone, Debug, Default)]
pub struct AddsResponse {
    /// Keys in input order (supplied, extracted or generated).
    pub keys: Vec<String>,
    /// Whether the whole batch was written. Batches are atomic: a single
    /// constraint violation rejects every row.
    pub success: bool,
    pub error: String,
}

/// Result of a point lookup.
#[derive(Serialize, Clone, Debug, Default)]
pub struct GetResponse {
    pub key: String,
    pub data: Value,
    pub created: Option<NaiveDateTime>,
    pub updated: Option<NaiveDateTime>,
    pub error: String,
}

/// Result of a single delete.
#[derive(Serialize, Clone, Debug, Default)]
pub struct DeleteResponse {
    pub key: String,
    /// True when a row was actually removed.
    pub deleted: bool,
    pub error: String,
}

/// Result of a batch delete.
#[derive(Serialize, Clone, Debug, Default)]
pub struct DeletesResponse {
    /// Number of rows removed.
    pub deleted: usize,
    pub error: String,
}

/// Paginated result of fetch/search/similar.
#[derive(Serialize, Clone, Debug, Default)]
pub struct ItemsResponse {
    /// Requested page (1-based).
    pub page: i64,
    /// Total number of pages for this query.
    pub pages: i64,
    /// Total matching rows across all pages.
    pub total: i64,
    /// Effective page size after clamping.
    pub limit: i64,
    pub items: Vec<Item>,
    pub error: String,
}

impl AddResponse {
    pub fn is_ok(&self) -> bool {
        self.error.is_empty()
    }

    pub(crate) fn failed(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            ..Default::default()
        }
    }
}

impl AddsResponse {
    pub fn is_ok(&self) -> bool {
        self.success && self.error.is_empty()
    }

    pub(crate) fn failed(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            ..Default::default()
        }
    }
}

impl GetResponse {
    pub fn is_ok(&self) -> bool {
        self.error.is_empty()
    }

    pub(crate) fn failed(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            ..Default::default()
        }
    }
}

impl DeleteResponse {
    pub fn is_ok(&self) -> bool {
        self.error.is_empty()
    }

    pub(crate) fn failed(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            ..Default::default()
        }
    }
}

impl DeletesResponse {
    pub fn is_ok(&self) -> bool {
        self.error.is_empty()
    }

    pub(crate) fn failed(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            ..Default::default()
        }
    }
}

impl ItemsResponse {
    pub fn is_ok(&self) -> bool {
        self.error.is_empty()
    }

    pub(crate) fn failed(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            ..Default::default()
        }
    }
}
