//! Full-text search: index lifecycle, trigger sync and match queries.

use oakdb::{Base, FetchOptions, Oak, OakError, SearchOptions};
use serde_json::json;
use std::sync::Arc;

fn new_base(name: &str) -> (Oak, Arc<Base>) {
    let mut oak = Oak::open(":memory:");
    let base = oak.base(name).expect("create base");
    (oak, base)
}

/// Search-enabled base seeded with the five standard people.
fn seeded() -> (Oak, Arc<Base>) {
    let (oak, db) = new_base("test_db");
    db.enable_search().expect("enable search");
    let items = vec![
        json!({"name": "John Joe", "age": 30, "height": 1.8}),
        json!({"name": "Jane Lo", "age": 25, "height": 1.7}),
        json!({"name": "Bob Lee", "age": 40, "height": 1.9}),
        json!({"name": "Alice Jolo", "age": 35, "height": 1.65}),
        json!({"name": "Charlie Leemon", "age": 45, "height": 1.75}),
    ];
    assert!(db.adds(items, false).is_ok());
    (oak, db)
}

#[test]
fn test_search_with_filters_and_order() {
    let (_oak, db) = seeded();
    let resp = db
        .search(
            "lee*",
            Some(&json!({"age__gt": 42})),
            &SearchOptions {
                order: "rank__asc".to_string(),
                ..Default::default()
            },
        )
        .expect("search runs");
    assert!(resp.is_ok(), "unexpected error: {}", resp.error);
    assert_eq!(resp.items.len(), 1);
    assert_eq!(resp.items[0].data["name"], json!("Charlie Leemon"));
    assert!(resp.items[0].rank.is_some());
    assert!(resp.items[0].distance.is_none());
}

#[test]
fn test_search_prefix_matches_multiple() {
    let (_oak, db) = seeded();
    let resp = db.search("lee*", None, &SearchOptions::default()).unwrap();
    assert!(resp.is_ok());
    // Bob Lee and Charlie Leemon.
    assert_eq!(resp.items.len(), 2);
    assert_eq!(resp.total, 2);
}

#[test]
fn test_search_requires_enablement() {
    let (_oak, db) = new_base("test_db");
    let err = db.search("query", None, &SearchOptions::default());
    assert!(matches!(err, Err(OakError::SearchNotEnabled)));
}

#[test]
fn test_search_empty_query() {
    let (_oak, db) = seeded();
    let resp = db.search("", None, &SearchOptions::default()).unwrap();
    assert!(!resp.is_ok());
    assert_eq!(resp.error, "Provide a search query");
}

#[test]
fn test_enable_search_is_idempotent() {
    let (_oak, db) = new_base("test_db");
    assert_eq!(db.enable_search().unwrap(), "enabled");
    assert!(db.search_enabled());
    assert_eq!(db.enable_search().unwrap(), "already enabled");
}

#[test]
fn test_search_flag_persists_across_handles() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let path = dir.path().join("store.db").to_string_lossy().to_string();

    {
        let mut oak = Oak::open(path.clone());
        let db = oak.base("notes")?;
        db.enable_search()?;
        db.add(json!({"text": "remember the milk"}), None, false);
    }

    let mut oak = Oak::open(path);
    let db = oak.base("notes")?;
    assert!(db.search_enabled(), "flag reloads from oak_conf");
    let resp = db.search("milk", None, &SearchOptions::default())?;
    assert_eq!(resp.items.len(), 1);
    Ok(())
}

#[test]
fn test_disable_search_keeps_primary_rows() {
    let (_oak, db) = seeded();
    let before = db.fetch(None, &FetchOptions::default());
    assert_eq!(before.total, 5);

    assert!(db.disable_search().unwrap());
    assert!(!db.search_enabled());
    assert!(matches!(
        db.search("lee*", None, &SearchOptions::default()),
        Err(OakError::SearchNotEnabled)
    ));

    let after = db.fetch(None, &FetchOptions::default());
    assert_eq!(after.total, 5);
    // Writes keep working once the triggers are gone.
    assert!(db.add(json!({"name": "after disable"}), None, false).is_ok());
}

#[test]
fn test_disable_then_enable_search_again() {
    let (_oak, db) = seeded();
    db.disable_search().unwrap();
    assert_eq!(db.enable_search().unwrap(), "enabled");
    // Backfill picks the existing rows up again.
    let resp = db.search("Jolo", None, &SearchOptions::default()).unwrap();
    assert_eq!(resp.items.len(), 1);
}

#[test]
fn test_triggers_sync_insert_update_delete() {
    let (_oak, db) = new_base("test_db");
    db.enable_search().unwrap();

    let key = db.add(json!({"text": "original phrase"}), None, false).key;
    let found = db.search("original", None, &SearchOptions::default()).unwrap();
    assert_eq!(found.items.len(), 1);

    // Override rewrites the mirror row.
    db.add(json!({"text": "replacement phrase"}), Some(json!(key.clone())), true);
    let stale = db.search("original", None, &SearchOptions::default()).unwrap();
    assert_eq!(stale.items.len(), 0);
    let fresh = db.search("replacement", None, &SearchOptions::default()).unwrap();
    assert_eq!(fresh.items.len(), 1);

    // Delete removes it.
    assert!(db.delete(&json!(key)).deleted);
    let gone = db.search("replacement", None, &SearchOptions::default()).unwrap();
    assert_eq!(gone.items.len(), 0);
}

#[test]
fn test_search_pagination() {
    let (_oak, db) = new_base("test_db");
    db.enable_search().unwrap();
    let items: Vec<_> = (0..7).map(|i| json!({"text": format!("pagedoc number {i}")})).collect();
    assert!(db.adds(items, false).is_ok());

    let opts = |page| SearchOptions {
        limit: 3,
        page,
        order: "key__asc".to_string(),
    };
    let first = db.search("pagedoc", None, &opts(1)).unwrap();
    assert_eq!(first.total, 7);
    assert_eq!(first.pages, 3);
    assert_eq!(first.items.len(), 3);

    let last = db.search("pagedoc", None, &opts(3)).unwrap();
    assert_eq!(last.items.len(), 1);

    let past = db.search("pagedoc", None, &opts(4)).unwrap();
    assert!(past.is_ok());
    assert!(past.items.is_empty());
    assert_eq!(past.total, 7);
}
