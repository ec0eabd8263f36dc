//! oakdb - an embedded JSON document store over SQLite.
//!
//! Documents are arbitrary JSON values addressed by string keys and grouped
//! into named collections ("bases") inside one database file. Three query
//! modalities share the same storage:
//!
//! - **Fetch**: structured filters over document fields and physical columns
//! - **Search**: lexical full-text search through an FTS5 mirror table
//! - **Similar**: vector similarity through a sqlite-vec mirror table
//!
//! The mirrors stay in sync with the primary table through triggers, so
//! application writes never touch them directly. Enabling either index is a
//! per-base, persisted schema migration.
//!
//! # Quick start
//!
//! ```no_run
//! use oakdb::Oak;
//! use serde_json::json;
//!
//! # fn main() -> Result<(), oakdb::OakError> {
//! let mut oak = Oak::open("./oak.db");
//! let users = oak.base("users")?;
//!
//! let added = users.add(json!({"name": "John", "age": 30}), None, false);
//! assert!(added.is_ok());
//!
//! let fetched = users.fetch(Some(&json!({"age__gt": 25})), &Default::default());
//! assert!(fetched.is_ok());
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`backend`] - SQLite storage backend (connections, schema, index lifecycle)
//! - [`base`] - per-collection facade and query options
//! - [`embed`] - embedding model seam and the deterministic [`HashEmbedder`]
//! - [`error`] - error types
//! - [`output`] - response structs
//! - [`query`] - filter DSL compilation and SQL builders

pub mod backend;
pub mod base;
pub mod embed;
pub mod error;
pub mod output;
pub mod query;

pub use backend::SqliteBackend;
pub use base::{Base, FetchOptions, SearchOptions, SimilarOptions};
pub use embed::{Embedder, HashEmbedder};
pub use error::OakError;
pub use output::{
    AddResponse, AddsResponse, DeleteResponse, DeletesResponse, GetResponse, Item, ItemsResponse,
};
pub use query::DistanceFn;

use std::collections::HashMap;
use std::sync::Arc;

/// Root handle over one store.
///
/// Owns the backend and vends [`Base`] instances, memoized by name so
/// repeated calls return the same collection object. The memo table is not
/// synchronized; callers sharing an `Oak` across threads should guard it or
/// rely on Base construction being idempotent.
pub struct Oak {
    backend: Arc<SqliteBackend>,
    bases: HashMap<String, Arc<Base>>,
}

impl Oak {
    /// Open a store at the given path (`":memory:"` for an in-memory one).
    pub fn open(path: impl Into<String>) -> Self {
        Self::with_backend(SqliteBackend::open(path))
    }

    /// Wrap an already-configured backend.
    pub fn with_backend(backend: SqliteBackend) -> Self {
        Self {
            backend: Arc::new(backend),
            bases: HashMap::new(),
        }
    }

    /// Install the embedding model used for vector search.
    pub fn set_embedder(&self, embedder: Arc<dyn Embedder>) {
        self.backend.set_embedder(embedder);
    }

    /// Create or retrieve the base with the given name.
    pub fn base(&mut self, name: &str) -> Result<Arc<Base>, OakError> {
        if let Some(base) = self.bases.get(name) {
            return Ok(base.clone());
        }
        let base = Arc::new(Base::new(name, self.backend.clone())?);
        self.bases.insert(name.to_string(), base.clone());
        Ok(base)
    }
}
