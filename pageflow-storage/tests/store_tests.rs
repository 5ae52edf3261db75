use pageflow_storage::{FileStore, KvStore, MemoryStore, StorageError, StoreStats, seed};
use pretty_assertions::assert_eq;
use serde_json::{Map, Value, json};

fn map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(m) => m,
        _ => panic!("expected object"),
    }
}

// ── MemoryStore ──────────────────────────────────────────────────

#[tokio::test]
async fn memory_get_set_delete() {
    let store = MemoryStore::new();
    assert_eq!(store.get("todos").await.unwrap(), None);

    store.set("todos", json!([{ "id": 1 }])).await.unwrap();
    assert_eq!(store.get("todos").await.unwrap(), Some(json!([{ "id": 1 }])));

    assert!(store.delete("todos").await.unwrap());
    assert!(!store.delete("todos").await.unwrap());
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn memory_keys_are_sorted() {
    let store = MemoryStore::new();
    for key in ["b", "c", "a"] {
        store.set(key, json!(key)).await.unwrap();
    }
    assert_eq!(store.keys().await.unwrap(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn memory_export_import_clear() {
    let store = MemoryStore::with_entries(map(json!({ "x": 1 })));
    let imported = store.import(map(json!({ "y": 2, "x": 3 }))).await.unwrap();
    assert_eq!(imported, 2);
    assert_eq!(store.export().await.unwrap(), map(json!({ "x": 3, "y": 2 })));

    store.clear().await.unwrap();
    assert_eq!(store.len().await, 0);
}

#[tokio::test]
async fn stats_count_serialized_bytes() {
    let store = MemoryStore::with_entries(map(json!({ "a": "hi", "b": [1, 2] })));
    let stats = store.stats().await.unwrap();
    // "\"hi\"" is 4 bytes, "[1,2]" is 5
    assert_eq!(
        stats,
        StoreStats {
            total_keys: 2,
            total_size_bytes: 9
        }
    );
}

// ── FileStore ────────────────────────────────────────────────────

#[tokio::test]
async fn file_store_missing_file_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::open(dir.path().join("store.json")).await.unwrap();
    assert!(store.keys().await.unwrap().is_empty());
    assert!(!store.path().exists());
}

#[tokio::test]
async fn file_store_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("store.json");

    {
        let store = FileStore::open(&path).await.unwrap();
        store.set("user", json!({ "name": "Ada" })).await.unwrap();
        store.set("count", json!(3)).await.unwrap();
        store.delete("count").await.unwrap();
    }

    let reopened = FileStore::open(&path).await.unwrap();
    assert_eq!(reopened.get("user").await.unwrap(), Some(json!({ "name": "Ada" })));
    assert_eq!(reopened.get("count").await.unwrap(), None);

    let on_disk: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(on_disk, json!({ "user": { "name": "Ada" } }));
}

#[tokio::test]
async fn file_store_rejects_non_object_document() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    std::fs::write(&path, "[1, 2, 3]").unwrap();

    let err = FileStore::open(&path).await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidData(_)));
}

#[tokio::test]
async fn file_store_rejects_malformed_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    std::fs::write(&path, "{ not json").unwrap();

    let err = FileStore::open(&path).await.unwrap_err();
    assert!(matches!(err, StorageError::Serialization(_)));
}

#[tokio::test]
async fn file_store_import_and_clear() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    let store = FileStore::open(&path).await.unwrap();

    store.import(map(json!({ "a": 1, "b": 2 }))).await.unwrap();
    assert_eq!(FileStore::open(&path).await.unwrap().keys().await.unwrap(), vec!["a", "b"]);

    store.clear().await.unwrap();
    assert!(FileStore::open(&path).await.unwrap().keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn file_store_failed_write_leaves_entries_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let parent = dir.path().join("sub");
    let store = FileStore::open(parent.join("store.json")).await.unwrap();
    store.set("kept", json!(1)).await.unwrap();

    // A regular file where the directory should be makes every write fail.
    std::fs::remove_dir_all(&parent).unwrap();
    std::fs::write(&parent, "not a directory").unwrap();

    assert!(matches!(store.set("k", json!(1)).await, Err(StorageError::Io(_))));
    assert_eq!(store.get("k").await.unwrap(), None);

    assert!(store.delete("kept").await.is_err());
    assert!(store.import(map(json!({ "x": 2 }))).await.is_err());
    assert!(store.clear().await.is_err());
    assert_eq!(store.keys().await.unwrap(), vec!["kept".to_string()]);
    assert_eq!(store.get("kept").await.unwrap(), Some(json!(1)));
}

// ── seed ─────────────────────────────────────────────────────────

#[tokio::test]
async fn seed_writes_only_absent_keys() {
    let store = MemoryStore::with_entries(map(json!({ "todos": ["kept"] })));
    let seed_data = map(json!({ "todos": ["seeded"], "settings": { "theme": "dark" } }));

    let written = seed(&store, &seed_data).await.unwrap();

    assert_eq!(written, 1);
    assert_eq!(store.get("todos").await.unwrap(), Some(json!(["kept"])));
    assert_eq!(store.get("settings").await.unwrap(), Some(json!({ "theme": "dark" })));
}

#[tokio::test]
async fn seed_is_idempotent() {
    let store = MemoryStore::new();
    let seed_data = map(json!({ "a": 1 }));
    assert_eq!(seed(&store, &seed_data).await.unwrap(), 1);
    assert_eq!(seed(&store, &seed_data).await.unwrap(), 0);
}
