//! Batch-insert behavior: key handling per item, atomicity and overrides.

use oakdb::{Base, Oak};
use serde_json::json;
use std::sync::Arc;

fn new_base(name: &str) -> (Oak, Arc<Base>) {
    let mut oak = Oak::open(":memory:");
    let base = oak.base(name).expect("create base");
    (oak, base)
}

#[test]
fn test_adds_basic_numbers() {
    let (_oak, db) = new_base("test_db");
    let resp = db.adds(vec![json!(1), json!(2)], false);
    assert!(resp.is_ok(), "unexpected error: {}", resp.error);
    assert_eq!(resp.keys.len(), 2);

    for key in &resp.keys {
        let item = db.get(&json!(key));
        assert!(item.data == json!(1) || item.data == json!(2));
    }
}

#[test]
fn test_adds_strings_and_mixed_types() {
    let (_oak, db) = new_base("test_db");
    assert!(db.adds(vec![json!(""), json!("valid")], false).is_ok());
    assert!(db.adds(vec![json!(1), json!("hello")], false).is_ok());
    assert!(db.adds(vec![json!(true), json!(false)], false).is_ok());

    let resp = db.adds(vec![json!(42)], false);
    assert!(resp.is_ok());
    assert_eq!(resp.keys.len(), 1);
}

#[test]
fn test_adds_dicts_auto_keys() {
    let (_oak, db) = new_base("test_db");
    let resp = db.adds(vec![json!({"Name": "Moe"}), json!({"Name": "Joe"})], false);
    assert!(resp.is_ok());
    assert_eq!(resp.keys.len(), 2);

    for key in &resp.keys {
        let item = db.get(&json!(key));
        let name = item.data["Name"].as_str().unwrap();
        assert!(name == "Moe" || name == "Joe");
    }
}

#[test]
fn test_adds_dicts_with_keys() {
    let (_oak, db) = new_base("test_db");
    let resp = db.adds(
        vec![
            json!({"Name": "Moe", "key": "one"}),
            json!({"Name": "Joe", "key": "two"}),
        ],
        false,
    );
    assert!(resp.is_ok());
    assert!(resp.keys.contains(&"one".to_string()));
    assert!(resp.keys.contains(&"two".to_string()));
    // The key entry does not leak into the stored body.
    assert_eq!(db.get(&json!("one")).data, json!({"Name": "Moe"}));
}

#[test]
fn test_adds_dicts_empty_keys_regenerate() {
    let (_oak, db) = new_base("test_db");
    let resp = db.adds(
        vec![
            json!({"Name": "Moe", "key": ""}),
            json!({"Name": "Joe", "key": ""}),
        ],
        false,
    );
    assert!(resp.is_ok());
    assert_eq!(resp.keys.len(), 2);
    assert_ne!(resp.keys[0], resp.keys[1]);
    assert!(!resp.keys[0].is_empty());
}

#[test]
fn test_adds_all_fresh_keys_are_unique() {
    let (_oak, db) = new_base("test_db");
    let items: Vec<_> = (0..20).map(|i| json!({"index": i})).collect();
    let resp = db.adds(items, false);
    assert!(resp.is_ok());
    let unique: std::collections::HashSet<_> = resp.keys.iter().collect();
    assert_eq!(unique.len(), 20);
}

#[test]
fn test_adds_existing_key_rejects_whole_batch() {
    let (_oak, db) = new_base("test_db");
    assert!(db
        .adds(vec![json!({"Name": "Initial", "key": "exists"})], false)
        .is_ok());

    let resp = db.adds(
        vec![
            json!({"Name": "Moe", "key": "exists"}),
            json!({"Name": "Joe", "key": "two"}),
        ],
        false,
    );
    assert!(!resp.success);
    assert!(!resp.error.is_empty());

    // Atomic: the non-conflicting row was rolled back too.
    assert_eq!(db.get(&json!("two")).error, "Key not found");
    assert_eq!(db.get(&json!("exists")).data["Name"], json!("Initial"));
}

#[test]
fn test_adds_override_existing() {
    let (_oak, db) = new_base("test_db");
    assert!(db
        .adds(vec![json!({"Name": "Initial", "key": "exists"})], false)
        .is_ok());
    let created = db.get(&json!("exists")).created.unwrap();

    std::thread::sleep(std::time::Duration::from_millis(1100));
    let resp = db.adds(
        vec![
            json!({"Name": "Moe", "key": "exists"}),
            json!({"Name": "Joe", "key": "two"}),
        ],
        true,
    );
    assert!(resp.is_ok());

    let item = db.get(&json!("exists"));
    assert_eq!(item.data["Name"], json!("Moe"));
    // Replacing keeps the original creation time and refreshes updated.
    assert_eq!(item.created.unwrap(), created);
    assert!(item.updated.unwrap() > created);
}

#[test]
fn test_adds_empty_input() {
    let (_oak, db) = new_base("test_db");
    let resp = db.adds(vec![], false);
    assert!(!resp.is_ok());
    assert_eq!(resp.error, "No items");
}
