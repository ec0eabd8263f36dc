//! Per-collection facade.
//!
//! A [`Base`] is one named collection inside the store. It validates inputs,
//! serializes and parses document bodies, generates keys, and resolves the
//! per-base index configuration (search/vector enabled flags) persisted in
//! `oak_conf`. Recoverable problems come back in the response structs;
//! misuse (querying a disabled index, dropping under the wrong name,
//! enabling vector search without an embedder) raises [`OakError`].

use crate::backend::{DropKind, RawRecord, SqliteBackend};
use crate::error::OakError;
use crate::output::{
    AddResponse, AddsResponse, DeleteResponse, DeletesResponse, GetResponse, Item, ItemsResponse,
};
use crate::query::DistanceFn;
use chrono::NaiveDateTime;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Options for [`Base::fetch`].
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Page size, clamped to at least 1.
    pub limit: i64,
    /// Order literal, `{key,data,created,updated}__{asc,desc}`.
    pub order: String,
    /// 1-based page number, clamped to at least 1.
    pub page: i64,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            limit: 1000,
            order: "created__desc".to_string(),
            page: 1,
        }
    }
}

/// Options for [`Base::search`].
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: i64,
    pub page: i64,
    /// Order literal; the fetch set plus `rank__{asc,desc}`.
    pub order: String,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            page: 1,
            order: "rank__desc".to_string(),
        }
    }
}

/// Options for [`Base::similar`].
#[derive(Debug, Clone)]
pub struct SimilarOptions {
    /// Number of nearest neighbours to return.
    pub limit: i64,
    /// Distance function literal: `"L1"`, `"L2"` or `"cosine"`.
    pub distance: String,
    /// Order literal; the fetch set plus `distance__{asc,desc}`.
    pub order: String,
}

impl Default for SimilarOptions {
    fn default() -> Self {
        Self {
            limit: 3,
            distance: "cosine".to_string(),
            order: "distance__desc".to_string(),
        }
    }
}

/// Which score column a raw row carries.
#[derive(Clone, Copy)]
enum ScoreKind {
    None,
    Rank,
    Distance,
}

/// A named collection of documents.
pub struct Base {
    name: String,
    backend: Arc<SqliteBackend>,
    search_enabled: AtomicBool,
    vector_enabled: AtomicBool,
}

impl Base {
    /// Bind a collection name to a backend, creating the primary schema if
    /// absent and loading the persisted index flags.
    pub(crate) fn new(name: &str, backend: Arc<SqliteBackend>) -> Result<Self, OakError> {
        validate_name(name)?;
        backend.initialize(name)?;

        let confs = backend.get_configs()?;
        let search_enabled = confs
            .get(&format!("{name}_search"))
            .map(|v| v == "1")
            .unwrap_or(false);
        // The vector flag only counts when the extension answers.
        let vector_enabled = backend.vector_available()
            && confs
                .get(&format!("{name}_vector"))
                .map(|v| v == "1")
                .unwrap_or(false);

        Ok(Self {
            name: name.to_string(),
            backend,
            search_enabled: AtomicBool::new(search_enabled),
            vector_enabled: AtomicBool::new(vector_enabled),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether full-text search is enabled for this base.
    pub fn search_enabled(&self) -> bool {
        self.search_enabled.load(Ordering::Relaxed)
    }

    /// Whether vector similarity search is enabled for this base.
    pub fn vector_enabled(&self) -> bool {
        self.vector_enabled.load(Ordering::Relaxed)
    }

    /// Enable full-text search: create the FTS mirror and triggers, persist
    /// the flag. Idempotent.
    pub fn enable_search(&self) -> Result<&'static str, OakError> {
        if self.search_enabled() {
            return Ok("already enabled");
        }
        self.backend
            .create_fts_table(&self.name)
            .map_err(|e| OakError::EnableFailed {
                feature: "search",
                reason: e.to_string(),
            })?;
        self.backend.set_config(&format!("{}_search", self.name), "1")?;
        self.search_enabled.store(true, Ordering::Relaxed);
        Ok("enabled")
    }

    /// Disable full-text search: drop the mirror and its triggers, clear the
    /// flag. The primary table is untouched.
    pub fn disable_search(&self) -> Result<bool, OakError> {
        self.backend
            .drop_tables(&self.name, DropKind::Search)
            .map_err(|e| OakError::DropFailed {
                reason: e.to_string(),
            })?;
        self.backend.set_config(&format!("{}_search", self.name), "0")?;
        self.search_enabled.store(false, Ordering::Relaxed);
        Ok(true)
    }

    /// Enable vector search: probe the embedder's dimension, create the
    /// vector mirror and triggers, persist the flag. Idempotent. Requires an
    /// embedder on the backend.
    pub fn enable_vector(&self) -> Result<&'static str, OakError> {
        if self.vector_enabled() {
            return Ok("already enabled");
        }
        if !self.backend.has_embedder() {
            return Err(OakError::EmbedderMissing);
        }
        self.backend
            .init_vector_search(&self.name)
            .map_err(|e| match e {
                e @ OakError::EnableFailed { .. } => e,
                other => OakError::EnableFailed {
                    feature: "vector",
                    reason: other.to_string(),
                },
            })?;
        self.backend.set_config(&format!("{}_vector", self.name), "1")?;
        self.vector_enabled.store(true, Ordering::Relaxed);
        Ok("enabled")
    }

    /// Disable vector search: drop the mirror and its triggers, clear the
    /// flag. The primary table keeps its `embedding` column as-is.
    pub fn disable_vector(&self) -> Result<bool, OakError> {
        self.backend
            .drop_tables(&self.name, DropKind::Vector)
            .map_err(|e| OakError::DropFailed {
                reason: e.to_string(),
            })?;
        self.backend.set_config(&format!("{}_vector", self.name), "0")?;
        self.vector_enabled.store(false, Ordering::Relaxed);
        Ok(true)
    }

    /// Drop this base. The passed name must match the base's name; this
    /// guards against dropping the wrong collection by accident. With
    /// `main_only` the mirrors and triggers are left in place.
    pub fn drop(&self, name: &str, main_only: bool) -> Result<bool, OakError> {
        if name != self.name {
            return Err(OakError::BaseNameMismatch {
                expected: self.name.clone(),
            });
        }
        let kind = if main_only { DropKind::Main } else { DropKind::All };
        self.backend
            .drop_tables(&self.name, kind)
            .map_err(|e| OakError::DropFailed {
                reason: e.to_string(),
            })?;
        self.search_enabled.store(false, Ordering::Relaxed);
        self.vector_enabled.store(false, Ordering::Relaxed);
        Ok(true)
    }

    /// Insert one document. The key is, in order of precedence: the explicit
    /// `key` argument, a `"key"` entry extracted from a mapping body (and
    /// removed from what is stored), or a freshly generated random key.
    pub fn add(&self, data: Value, key: Option<Value>, override_: bool) -> AddResponse {
        let explicit = match &key {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.is_empty() => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(_) => return AddResponse::failed("Invalid `key` type"),
        };

        let mut data = data;
        let extracted = data
            .as_object_mut()
            .and_then(|map| map.remove("key"))
            .and_then(|entry| match entry {
                Value::String(s) if !s.is_empty() => Some(s),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });

        let key = explicit
            .or(extracted)
            .unwrap_or_else(|| self.backend.genkey());

        let body = match serde_json::to_string(&data) {
            Ok(body) => body,
            Err(e) => return AddResponse::failed(e.to_string()),
        };

        if let Err(e) = self.backend.add(&self.name, &key, &body, override_) {
            if e.is_constraint_violation() {
                return AddResponse::failed(format!("Item with key '{key}' already exists"));
            }
            return AddResponse::failed(e.to_string());
        }

        if self.vector_enabled() {
            if let Err(e) = self.backend.add_embedding(&self.name, &key, &body) {
                return AddResponse {
                    key,
                    data,
                    error: e.to_string(),
                };
            }
        }

        AddResponse {
            key,
            data,
            error: String::new(),
        }
    }

    /// Insert a batch of documents atomically. Mapping bodies have their
    /// `"key"` entry extracted like [`Base::add`]; every other item gets a
    /// generated key. A single failure rejects the whole batch.
    pub fn adds(&self, items: Vec<Value>, override_: bool) -> AddsResponse {
        if items.is_empty() {
            return AddsResponse::failed("No items");
        }

        let mut rows = Vec::with_capacity(items.len());
        let mut keys = Vec::with_capacity(items.len());
        for item in items {
            let mut data = item;
            let mut key = self.backend.genkey();
            if let Some(map) = data.as_object_mut() {
                match map.remove("key") {
                    Some(Value::String(s)) if !s.is_empty() => key = s,
                    Some(Value::Number(n)) => key = n.to_string(),
                    _ => {}
                }
            }
            let body = match serde_json::to_string(&data) {
                Ok(body) => body,
                Err(e) => return AddsResponse::failed(e.to_string()),
            };
            rows.push((key.clone(), body));
            keys.push(key);
        }

        let result = self.backend.adds(&self.name, &rows, override_);
        if result.success && self.vector_enabled() {
            if let Err(e) = self.backend.adds_embedding(&self.name, &rows) {
                return AddsResponse {
                    keys,
                    success: true,
                    error: e.to_string(),
                };
            }
        }

        AddsResponse {
            keys,
            success: result.success,
            error: result.error,
        }
    }

    /// Look up one document by key.
    pub fn get(&self, key: &Value) -> GetResponse {
        let key = match key_arg(key) {
            Ok(key) => key,
            Err(e) => return GetResponse::failed(e),
        };
        match self.backend.get(&self.name, &key) {
            Ok(Some(record)) => match record_to_item(record, ScoreKind::None) {
                Ok(item) => GetResponse {
                    key: item.key,
                    data: item.data,
                    created: Some(item.created),
                    updated: Some(item.updated),
                    error: String::new(),
                },
                Err(e) => GetResponse {
                    key,
                    error: e.to_string(),
                    ..Default::default()
                },
            },
            Ok(None) => GetResponse {
                key,
                error: "Key not found".to_string(),
                ..Default::default()
            },
            Err(e) => GetResponse {
                key,
                error: e.to_string(),
                ..Default::default()
            },
        }
    }

    /// Delete one document by key.
    pub fn delete(&self, key: &Value) -> DeleteResponse {
        let key = match key_arg(key) {
            Ok(key) => key,
            Err(e) => return DeleteResponse::failed(e),
        };
        match self.backend.delete(&self.name, &key) {
            Ok(deleted) => DeleteResponse {
                key,
                deleted,
                error: String::new(),
            },
            Err(e) => DeleteResponse {
                key,
                deleted: false,
                error: e.to_string(),
            },
        }
    }

    /// Delete a batch of keys; reports the number of rows removed.
    pub fn deletes(&self, keys: &[Value]) -> DeletesResponse {
        if keys.is_empty() {
            return DeletesResponse::failed("No keys provided");
        }
        let mut resolved = Vec::with_capacity(keys.len());
        for key in keys {
            match key_arg(key) {
                Ok(key) => resolved.push(key),
                Err(e) => return DeletesResponse::failed(e),
            }
        }
        match self.backend.deletes(&self.name, &resolved) {
            Ok(deleted) => DeletesResponse {
                deleted,
                error: String::new(),
            },
            Err(e) => DeletesResponse::failed(e.to_string()),
        }
    }

    /// Fetch documents matching a filter tree, paginated.
    ///
    /// A count query runs first; a page past the end returns an empty item
    /// list but still reports `page`, `pages` and `total`.
    pub fn fetch(&self, filters: Option<&Value>, options: &FetchOptions) -> ItemsResponse {
        let limit = options.limit.max(1);
        let page = options.page.max(1);
        let offset = (page - 1) * limit;

        if let Err(e) = check_filters(filters) {
            return ItemsResponse::failed(e);
        }

        let total = match self.backend.fetch_count(&self.name, filters) {
            Ok(total) => total,
            Err(e) => return ItemsResponse::failed(e.to_string()),
        };
        let pages = (total + limit - 1) / limit;
        if page > pages {
            return ItemsResponse {
                page,
                pages,
                total,
                limit,
                items: Vec::new(),
                error: String::new(),
            };
        }

        let records = match self
            .backend
            .fetch_rows(&self.name, filters, limit, offset, &options.order)
        {
            Ok(records) => records,
            Err(e) => return ItemsResponse::failed(e.to_string()),
        };
        match collect_items(records, ScoreKind::None) {
            Ok(items) => ItemsResponse {
                page,
                pages,
                total,
                limit,
                items,
                error: String::new(),
            },
            Err(e) => ItemsResponse::failed(e.to_string()),
        }
    }

    /// Full-text search over the lexical mirror. Items carry the engine's
    /// `rank` score. Raises when search is not enabled for this base.
    pub fn search(
        &self,
        query: &str,
        filters: Option<&Value>,
        options: &SearchOptions,
    ) -> Result<ItemsResponse, OakError> {
        if !self.search_enabled() {
            return Err(OakError::SearchNotEnabled);
        }
        if query.is_empty() {
            return Ok(ItemsResponse::failed("Provide a search query"));
        }
        if let Err(e) = check_filters(filters) {
            return Ok(ItemsResponse::failed(e));
        }

        let limit = options.limit.max(1);
        let page = options.page.max(1);
        let offset = (page - 1) * limit;

        let total = match self.backend.search_count(&self.name, query, filters) {
            Ok(total) => total,
            Err(e) => return Ok(ItemsResponse::failed(e.to_string())),
        };
        let pages = (total + limit - 1) / limit;
        if page > pages {
            return Ok(ItemsResponse {
                page,
                pages,
                total,
                limit,
                items: Vec::new(),
                error: String::new(),
            });
        }

        let records = match self.backend.search_rows(
            &self.name,
            query,
            filters,
            limit,
            offset,
            &options.order,
        ) {
            Ok(records) => records,
            Err(e) => return Ok(ItemsResponse::failed(e.to_string())),
        };
        Ok(match collect_items(records, ScoreKind::Rank) {
            Ok(items) => ItemsResponse {
                page,
                pages,
                total,
                limit,
                items,
                error: String::new(),
            },
            Err(e) => ItemsResponse::failed(e.to_string()),
        })
    }

    /// Vector similarity search. The query is embedded once, then matched
    /// against the vector mirror; items carry the `distance` column and are
    /// shaped like every other query result. Raises when vector search is
    /// not enabled for this base.
    pub fn similar(
        &self,
        query: &str,
        filters: Option<&Value>,
        options: &SimilarOptions,
    ) -> Result<ItemsResponse, OakError> {
        if !self.vector_enabled() {
            return Err(OakError::VectorNotEnabled);
        }
        if query.is_empty() {
            return Ok(ItemsResponse::failed("Provide a search query"));
        }
        let Some(distance) = DistanceFn::parse(&options.distance) else {
            return Ok(ItemsResponse::failed("Unsupported distance function."));
        };
        if let Err(e) = check_filters(filters) {
            return Ok(ItemsResponse::failed(e));
        }

        let embedded = match self.backend.embed_one(query) {
            Ok(embedded) => embedded,
            Err(e) => return Ok(ItemsResponse::failed(e.to_string())),
        };

        let limit = options.limit.max(1);
        let records = match self.backend.vector_rows(
            &self.name,
            &embedded,
            filters,
            limit,
            &options.order,
            distance,
        ) {
            Ok(records) => records,
            Err(e) => return Ok(ItemsResponse::failed(e.to_string())),
        };
        Ok(match collect_items(records, ScoreKind::Distance) {
            Ok(items) => {
                let total = items.len() as i64;
                ItemsResponse {
                    page: 1,
                    pages: if total > 0 { 1 } else { 0 },
                    total,
                    limit,
                    items,
                    error: String::new(),
                }
            }
            Err(e) => ItemsResponse::failed(e.to_string()),
        })
    }
}

/// Base names land in SQL as schema, so they are restricted to identifier
/// characters up front.
fn validate_name(name: &str) -> Result<(), OakError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(OakError::InvalidBaseName {
            name: name.to_string(),
        })
    }
}

/// Normalize a key argument: strings pass through non-empty, numbers take
/// their decimal form, anything else is rejected.
fn key_arg(key: &Value) -> Result<String, &'static str> {
    match key {
        Value::String(s) if s.is_empty() => Err("Key is empty"),
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err("Invalid `key` type"),
    }
}

fn check_filters(filters: Option<&Value>) -> Result<(), String> {
    match filters {
        None => Ok(()),
        Some(f) if f.is_object() || f.is_array() => Ok(()),
        Some(f) => Err(format!("Not supported query type: {}", json_type_name(f))),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn parse_timestamp(s: &str) -> Result<NaiveDateTime, OakError> {
    // CURRENT_TIMESTAMP writes "YYYY-MM-DD HH:MM:SS"; tolerate ISO-8601 for
    // rows written by other tools.
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .map_err(|_| OakError::Timestamp {
            value: s.to_string(),
        })
}

fn record_to_item(record: RawRecord, score: ScoreKind) -> Result<Item, OakError> {
    let data = serde_json::from_str(&record.data)?;
    let created = parse_timestamp(&record.created)?;
    let updated = parse_timestamp(&record.updated)?;
    let (rank, distance) = match score {
        ScoreKind::None => (None, None),
        ScoreKind::Rank => (record.score, None),
        ScoreKind::Distance => (None, record.score),
    };
    Ok(Item {
        key: record.key,
        data,
        created,
        updated,
        rank,
        distance,
    })
}

fn collect_items(records: Vec<RawRecord>, score: ScoreKind) -> Result<Vec<Item>, OakError> {
    records
        .into_iter()
        .map(|record| record_to_item(record, score))
        .collect()
}
