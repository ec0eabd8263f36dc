//! SQLite storage backend.
//!
//! [`SqliteBackend`] owns the store path and hands every operation a
//! connection that is private to the calling thread, opened lazily on that
//! thread's first use. All mutations run inside a transaction that commits
//! on success and rolls back when dropped on error. The sqlite-vec extension
//! is registered process-wide before the first connection opens, so every
//! connection sees the `vec0` module and the `vec_distance_*` functions.
//!
//! Base names are interpolated into SQL as schema (validated at the facade);
//! all user data goes through bound parameters.

use crate::embed::{vector_to_bytes, Embedder};
use crate::error::OakError;
use crate::query::{build_fetch, build_search, build_similar, DistanceFn};
use rand::Rng;
use rusqlite::{params, params_from_iter, Connection};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once, RwLock};
use tracing::{debug, info};

/// Key alphabet without look-alike characters (no g/j/p/q/y).
const KEY_CHARS: &[u8] = b"abcdefhiklmnorstuvwxz1234567890";

/// Default generated key length.
const KEY_LEN: usize = 12;

/// Fixed probe text used to learn an embedder's output dimension.
const EMBED_PROBE: &str = "oaks are nice";

thread_local! {
    // One connection per (thread, backend instance). A thread reuses its own
    // connection for every call on the same backend, so it always observes
    // its own writes; distinct backends never share a connection even when
    // they point at the same path (":memory:" stores must stay separate).
    static CONNECTIONS: RefCell<HashMap<u64, Connection>> = RefCell::new(HashMap::new());
}

static NEXT_BACKEND_ID: AtomicU64 = AtomicU64::new(0);

static VEC_EXTENSION: Once = Once::new();

fn register_vector_extension() {
    VEC_EXTENSION.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite_vec::sqlite3_vec_init as *const (),
        )));
    });
}

/// Raw row as stored: JSON text body, engine-formatted timestamps, and the
/// optional score column (`rank` for search, `distance` for similarity).
#[derive(Debug, Clone)]
pub(crate) struct RawRecord {
    pub key: String,
    pub data: String,
    pub created: String,
    pub updated: String,
    pub score: Option<f64>,
}

/// Outcome of a batch write. Batches are atomic: on any failure nothing is
/// written and `rows_affected` is zero.
#[derive(Debug, Clone)]
pub(crate) struct BatchResult {
    pub success: bool,
    pub rows_affected: usize,
    pub error: String,
}

/// Which per-base tables a drop targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DropKind {
    /// Primary table, config table, both mirrors and all triggers.
    All,
    /// Primary table and the config table.
    Main,
    /// Lexical mirror and its triggers.
    Search,
    /// Vector mirror and its triggers.
    Vector,
}

/// Storage backend over a single SQLite file (or `:memory:`).
pub struct SqliteBackend {
    id: u64,
    path: String,
    embedder: RwLock<Option<Arc<dyn Embedder>>>,
}

impl SqliteBackend {
    /// Open a backend for the given path. No connection is made until the
    /// first operation on the calling thread.
    pub fn open(path: impl Into<String>) -> Self {
        register_vector_extension();
        Self {
            id: NEXT_BACKEND_ID.fetch_add(1, Ordering::Relaxed),
            path: path.into(),
            embedder: RwLock::new(None),
        }
    }

    /// Open a backend with an embedding model already attached.
    pub fn with_embedder(path: impl Into<String>, embedder: Arc<dyn Embedder>) -> Self {
        let backend = Self::open(path);
        backend.set_embedder(embedder);
        backend
    }

    /// Install or replace the embedding model.
    pub fn set_embedder(&self, embedder: Arc<dyn Embedder>) {
        *self.embedder.write().expect("embedder lock") = Some(embedder);
    }

    pub(crate) fn has_embedder(&self) -> bool {
        self.embedder.read().expect("embedder lock").is_some()
    }

    fn embedder(&self) -> Result<Arc<dyn Embedder>, OakError> {
        self.embedder
            .read()
            .expect("embedder lock")
            .clone()
            .ok_or(OakError::EmbedderMissing)
    }

    /// Run `f` with this thread's connection, opening it if needed.
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T, OakError>) -> Result<T, OakError> {
        CONNECTIONS.with(|cell| {
            let mut map = cell.borrow_mut();
            if !map.contains_key(&self.id) {
                debug!(path = %self.path, "opening connection");
                let conn = Connection::open(&self.path)?;
                map.insert(self.id, conn);
            }
            let conn = map.get(&self.id).expect("connection just inserted");
            f(conn)
        })
    }

    /// Whether the vector extension answers on this thread's connection.
    pub(crate) fn vector_available(&self) -> bool {
        self.with_conn(|conn| {
            conn.query_row("SELECT vec_version()", [], |row| row.get::<_, String>(0))
                .map_err(OakError::from)
        })
        .is_ok()
    }

    /// Generate a random key over the reduced alphabet.
    pub(crate) fn genkey(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..KEY_LEN)
            .map(|_| KEY_CHARS[rng.gen_range(0..KEY_CHARS.len())] as char)
            .collect()
    }

    /// Create the primary table and the config table if absent.
    pub(crate) fn initialize(&self, base: &str) -> Result<(), OakError> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {base} (
                    key TEXT PRIMARY KEY,
                    data TEXT,
                    embedding BLOB,
                    created TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                    updated TIMESTAMP DEFAULT CURRENT_TIMESTAMP
                );
                CREATE TABLE IF NOT EXISTS oak_conf (key TEXT PRIMARY KEY, value TEXT);"
            ))?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Insert one row. With `override_` the write is an upsert that keeps
    /// the original `created` timestamp and refreshes `updated`.
    pub(crate) fn add(
        &self,
        base: &str,
        key: &str,
        data: &str,
        override_: bool,
    ) -> Result<(), OakError> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            if override_ {
                tx.execute(
                    &format!(
                        "INSERT OR REPLACE INTO {base} (key, data, created, updated)
                         VALUES (?, ?, COALESCE(
                             (SELECT created FROM {base} WHERE key = ?),
                             CURRENT_TIMESTAMP
                         ), CURRENT_TIMESTAMP)"
                    ),
                    params![key, data, key],
                )?;
            } else {
                tx.execute(
                    &format!(
                        "INSERT INTO {base} (key, data, created, updated)
                         VALUES (?, ?, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)"
                    ),
                    params![key, data],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Insert a batch of `(key, json)` rows atomically.
    pub(crate) fn adds(&self, base: &str, rows: &[(String, String)], override_: bool) -> BatchResult {
        let written = self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let sql = if override_ {
                format!(
                    "INSERT OR REPLACE INTO {base} (key, data, created, updated)
                     VALUES (?, ?, COALESCE(
                         (SELECT created FROM {base} WHERE key = ?),
                         CURRENT_TIMESTAMP
                     ), CURRENT_TIMESTAMP)"
                )
            } else {
                format!(
                    "INSERT INTO {base} (key, data, created, updated)
                     VALUES (?, ?, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)"
                )
            };
            let mut affected = 0;
            {
                let mut stmt = tx.prepare(&sql)?;
                for (key, data) in rows {
                    affected += if override_ {
                        stmt.execute(params![key, data, key])?
                    } else {
                        stmt.execute(params![key, data])?
                    };
                }
            }
            tx.commit()?;
            Ok(affected)
        });
        match written {
            Ok(rows_affected) => BatchResult {
                success: true,
                rows_affected,
                error: String::new(),
            },
            Err(e) => BatchResult {
                success: false,
                rows_affected: 0,
                error: e.to_string(),
            },
        }
    }

    /// Point lookup by key.
    pub(crate) fn get(&self, base: &str, key: &str) -> Result<Option<RawRecord>, OakError> {
        self.with_conn(|conn| {
            let sql = format!("SELECT key, data, created, updated FROM {base} WHERE key = ?");
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query_map([key], |row| {
                Ok(RawRecord {
                    key: row.get(0)?,
                    data: row.get(1)?,
                    created: row.get(2)?,
                    updated: row.get(3)?,
                    score: None,
                })
            })?;
            match rows.next() {
                Some(row) => Ok(Some(row?)),
                None => Ok(None),
            }
        })
    }

    /// Delete one row; true when something was removed.
    pub(crate) fn delete(&self, base: &str, key: &str) -> Result<bool, OakError> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let removed = tx.execute(&format!("DELETE FROM {base} WHERE key = ?"), [key])?;
            tx.commit()?;
            Ok(removed > 0)
        })
    }

    /// Delete a set of keys in one statement; returns the removed count.
    pub(crate) fn deletes(&self, base: &str, keys: &[String]) -> Result<usize, OakError> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let marks = vec!["?"; keys.len()].join(",");
            let removed = tx.execute(
                &format!("DELETE FROM {base} WHERE key IN ({marks})"),
                params_from_iter(keys.iter()),
            )?;
            tx.commit()?;
            Ok(removed)
        })
    }

    /// Count rows matching a filter tree.
    pub(crate) fn fetch_count(&self, base: &str, filters: Option<&Value>) -> Result<i64, OakError> {
        let (sql, bindings) = build_fetch(base, filters, 0, 0, "created__desc", true)?;
        debug!(%sql, "fetch count");
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            Ok(stmt.query_row(params_from_iter(bindings), |row| row.get(0))?)
        })
    }

    /// Fetch a page of rows from the primary table.
    pub(crate) fn fetch_rows(
        &self,
        base: &str,
        filters: Option<&Value>,
        limit: i64,
        offset: i64,
        order: &str,
    ) -> Result<Vec<RawRecord>, OakError> {
        let (sql, bindings) = build_fetch(base, filters, limit, offset, order, false)?;
        debug!(%sql, "fetch");
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(bindings), |row| {
                Ok(RawRecord {
                    key: row.get(0)?,
                    data: row.get(1)?,
                    created: row.get(2)?,
                    updated: row.get(3)?,
                    score: None,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Count full-text matches.
    pub(crate) fn search_count(
        &self,
        base: &str,
        query: &str,
        filters: Option<&Value>,
    ) -> Result<i64, OakError> {
        let (sql, bindings) = build_search(base, query, filters, 0, 0, "rank__desc", true)?;
        debug!(%sql, "search count");
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            Ok(stmt.query_row(params_from_iter(bindings), |row| row.get(0))?)
        })
    }

    /// Fetch a page of full-text matches with their rank.
    pub(crate) fn search_rows(
        &self,
        base: &str,
        query: &str,
        filters: Option<&Value>,
        limit: i64,
        offset: i64,
        order: &str,
    ) -> Result<Vec<RawRecord>, OakError> {
        let (sql, bindings) = build_search(base, query, filters, limit, offset, order, false)?;
        debug!(%sql, "search");
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(bindings), |row| {
                Ok(RawRecord {
                    key: row.get(0)?,
                    data: row.get(1)?,
                    created: row.get(2)?,
                    updated: row.get(3)?,
                    score: row.get(4)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Run a top-k similarity query with an already-embedded query vector.
    pub(crate) fn vector_rows(
        &self,
        base: &str,
        query: &[u8],
        filters: Option<&Value>,
        limit: i64,
        order: &str,
        distance: DistanceFn,
    ) -> Result<Vec<RawRecord>, OakError> {
        let (sql, bindings) = build_similar(base, query, filters, limit, order, distance)?;
        debug!(%sql, "similar");
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(bindings), |row| {
                Ok(RawRecord {
                    key: row.get(0)?,
                    data: row.get(1)?,
                    created: row.get(2)?,
                    updated: row.get(3)?,
                    score: row.get(4)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Create the FTS5 mirror, backfill it from the primary table and
    /// install the sync triggers. Triggers are dropped and recreated so a
    /// partially-applied prior attempt heals.
    pub(crate) fn create_fts_table(&self, base: &str) -> Result<(), OakError> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute_batch(&format!(
                "CREATE VIRTUAL TABLE IF NOT EXISTS {base}_fts
                 USING fts5(key, data, created, updated);

                 INSERT INTO {base}_fts(key, data, created, updated)
                 SELECT key, data, created, updated FROM {base};

                 DROP TRIGGER IF EXISTS {base}_ai;
                 CREATE TRIGGER {base}_ai AFTER INSERT ON {base}
                 BEGIN
                     INSERT INTO {base}_fts(key, data, created, updated)
                     VALUES (new.key, new.data, new.created, new.updated);
                 END;

                 DROP TRIGGER IF EXISTS {base}_ad;
                 CREATE TRIGGER {base}_ad AFTER DELETE ON {base}
                 BEGIN
                     DELETE FROM {base}_fts WHERE key = old.key;
                 END;

                 DROP TRIGGER IF EXISTS {base}_au;
                 CREATE TRIGGER {base}_au AFTER UPDATE ON {base}
                 BEGIN
                     DELETE FROM {base}_fts WHERE key = old.key;
                     INSERT INTO {base}_fts(key, data, created, updated)
                     VALUES (new.key, new.data, new.created, new.updated);
                 END;"
            ))?;
            tx.commit()?;
            info!(base, "full-text index created");
            Ok(())
        })
    }

    /// Create the vector mirror sized to the embedder's output dimension and
    /// install the sync triggers. The dimension is learned by embedding a
    /// fixed probe string.
    pub(crate) fn init_vector_search(&self, base: &str) -> Result<(), OakError> {
        let embedder = self.embedder()?;
        let dimensions = embedder.embed_query(EMBED_PROBE).len();

        self.with_conn(|conn| {
            conn.query_row("SELECT vec_version()", [], |row| row.get::<_, String>(0))
                .map_err(|e| OakError::EnableFailed {
                    feature: "vector",
                    reason: format!("vector extension did not load: {e}"),
                })?;

            let tx = conn.unchecked_transaction()?;
            tx.execute_batch(&format!(
                "CREATE VIRTUAL TABLE IF NOT EXISTS {base}_vec USING vec0(
                    key TEXT PRIMARY KEY,
                    embedding float[{dimensions}]
                );

                 DROP TRIGGER IF EXISTS {base}_embc;
                 CREATE TRIGGER {base}_embc AFTER INSERT ON {base}
                 BEGIN
                     INSERT INTO {base}_vec(key, embedding)
                     SELECT new.key, new.embedding
                     WHERE new.embedding IS NOT NULL;
                 END;

                 DROP TRIGGER IF EXISTS {base}_embd;
                 CREATE TRIGGER {base}_embd AFTER DELETE ON {base}
                 BEGIN
                     DELETE FROM {base}_vec WHERE key = old.key;
                 END;

                 DROP TRIGGER IF EXISTS {base}_embu;
                 CREATE TRIGGER {base}_embu AFTER UPDATE ON {base}
                 BEGIN
                     DELETE FROM {base}_vec WHERE key = old.key;
                     INSERT INTO {base}_vec(key, embedding)
                     SELECT new.key, new.embedding
                     WHERE new.embedding IS NOT NULL;
                 END;"
            ))?;
            tx.commit()?;
            info!(base, dimensions, "vector index created");
            Ok(())
        })
    }

    /// Drop per-base tables and triggers. Every statement is `IF EXISTS`,
    /// so drops are idempotent; mirrors drop by the same trigger names their
    /// creation installs.
    pub(crate) fn drop_tables(&self, base: &str, kind: DropKind) -> Result<(), OakError> {
        let mut droplist: Vec<String> = Vec::new();
        if matches!(kind, DropKind::All | DropKind::Main) {
            droplist.push(format!("DROP TABLE IF EXISTS {base}"));
            droplist.push("DROP TABLE IF EXISTS oak_conf".to_string());
        }
        if matches!(kind, DropKind::All | DropKind::Search) {
            droplist.push(format!("DROP TABLE IF EXISTS {base}_fts"));
            droplist.push(format!("DROP TRIGGER IF EXISTS {base}_ai"));
            droplist.push(format!("DROP TRIGGER IF EXISTS {base}_au"));
            droplist.push(format!("DROP TRIGGER IF EXISTS {base}_ad"));
        }
        if matches!(kind, DropKind::All | DropKind::Vector) {
            droplist.push(format!("DROP TABLE IF EXISTS {base}_vec"));
            droplist.push(format!("DROP TRIGGER IF EXISTS {base}_embc"));
            droplist.push(format!("DROP TRIGGER IF EXISTS {base}_embu"));
            droplist.push(format!("DROP TRIGGER IF EXISTS {base}_embd"));
        }

        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            for sql in &droplist {
                tx.execute_batch(sql)?;
            }
            tx.commit()?;
            info!(base, ?kind, "dropped tables");
            Ok(())
        })
    }

    /// Upsert one config flag.
    pub(crate) fn set_config(&self, key: &str, value: &str) -> Result<(), OakError> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT OR REPLACE INTO oak_conf(key, value) VALUES (?, ?)",
                params![key, value],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Read the whole config table into a map.
    pub(crate) fn get_configs(&self) -> Result<HashMap<String, String>, OakError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT key, value FROM oak_conf")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            Ok(rows.collect::<Result<HashMap<_, _>, _>>()?)
        })
    }

    /// Embed a query string into the stored byte layout.
    pub(crate) fn embed_one(&self, text: &str) -> Result<Vec<u8>, OakError> {
        let embedder = self.embedder()?;
        Ok(vector_to_bytes(&embedder.embed_query(text)))
    }

    /// Embed `(key, text)` pairs into `(bytes, key)` update bindings.
    pub(crate) fn embed_batch(
        &self,
        texts: &[(String, String)],
    ) -> Result<Vec<(Vec<u8>, String)>, OakError> {
        let embedder = self.embedder()?;
        let bodies: Vec<String> = texts.iter().map(|(_, body)| body.clone()).collect();
        let vectors = embedder.embed_documents(&bodies);
        Ok(vectors
            .iter()
            .zip(texts)
            .map(|(vector, (key, _))| (vector_to_bytes(vector), key.clone()))
            .collect())
    }

    /// Embed one document body and attach it to its row. The update trigger
    /// carries the vector into the mirror.
    pub(crate) fn add_embedding(&self, base: &str, key: &str, text: &str) -> Result<(), OakError> {
        let embedding = self
            .embed_batch(&[(key.to_string(), text.to_string())])?
            .into_iter()
            .next()
            .map(|(bytes, _)| bytes)
            .unwrap_or_default();
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                &format!("UPDATE {base} SET embedding = ? WHERE key = ?"),
                params![embedding, key],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Batch form of [`Self::add_embedding`].
    pub(crate) fn adds_embedding(
        &self,
        base: &str,
        texts: &[(String, String)],
    ) -> Result<(), OakError> {
        let rows = self.embed_batch(texts)?;
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            {
                let mut stmt = tx.prepare(&format!("UPDATE {base} SET embedding = ? WHERE key = ?"))?;
                for (embedding, key) in &rows {
                    stmt.execute(params![embedding, key])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }
}

impl Drop for SqliteBackend {
    fn drop(&mut self) {
        // Other threads clean up when they exit; only this thread's cached
        // connection is reachable here.
        let _ = CONNECTIONS.try_with(|cell| {
            cell.borrow_mut().remove(&self.id);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genkey_length_and_alphabet() {
        let backend = SqliteBackend::open(":memory:");
        for _ in 0..50 {
            let key = backend.genkey();
            assert_eq!(key.len(), KEY_LEN);
            assert!(key.bytes().all(|b| KEY_CHARS.contains(&b)));
        }
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let backend = SqliteBackend::open(":memory:");
        backend.initialize("things").unwrap();
        backend.initialize("things").unwrap();
        backend.add("things", "a", "{}", false).unwrap();
        assert!(backend.get("things", "a").unwrap().is_some());
    }

    #[test]
    fn test_adds_rolls_back_on_duplicate() {
        let backend = SqliteBackend::open(":memory:");
        backend.initialize("things").unwrap();
        backend.add("things", "dup", "{}", false).unwrap();

        let rows = vec![
            ("fresh".to_string(), "{}".to_string()),
            ("dup".to_string(), "{}".to_string()),
        ];
        let result = backend.adds("things", &rows, false);
        assert!(!result.success);
        assert_eq!(result.rows_affected, 0);
        // The non-conflicting row must not have survived the rollback.
        assert!(backend.get("things", "fresh").unwrap().is_none());
    }

    #[test]
    fn test_vector_extension_responds() {
        let backend = SqliteBackend::open(":memory:");
        assert!(backend.vector_available());
    }
}
