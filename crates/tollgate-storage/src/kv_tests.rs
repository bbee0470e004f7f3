use super::*;
use serde::{Deserialize, Serialize};

#[tokio::test]
async fn test_memory_set_get_delete() {
    let store = MemoryKvStore::new();
    store.set("ns", "k", b"v".to_vec()).await.unwrap();
    assert_eq!(store.get("ns", "k").await.unwrap(), Some(b"v".to_vec()));
    assert!(store.exists("ns", "k").await.unwrap());
    assert!(store.delete("ns", "k").await.unwrap());
    assert!(!store.delete("ns", "k").await.unwrap());
    assert_eq!(store.get("ns", "k").await.unwrap(), None);
}

#[tokio::test]
async fn test_memory_namespaces_are_isolated() {
    let store = MemoryKvStore::new();
    store.set("a", "k", b"1".to_vec()).await.unwrap();
    store.set("b", "k", b"2".to_vec()).await.unwrap();
    assert_eq!(store.get("a", "k").await.unwrap(), Some(b"1".to_vec()));
    assert_eq!(store.clear_namespace("a").await.unwrap(), 1);
    assert_eq!(store.get("a", "k").await.unwrap(), None);
    assert_eq!(store.get("b", "k").await.unwrap(), Some(b"2".to_vec()));
}

#[tokio::test]
async fn test_memory_last_write_wins() {
    let store = MemoryKvStore::new();
    store.set("ns", "k", b"old".to_vec()).await.unwrap();
    store.set("ns", "k", b"new".to_vec()).await.unwrap();
    assert_eq!(store.get("ns", "k").await.unwrap(), Some(b"new".to_vec()));
}

#[tokio::test]
async fn test_memory_ttl_expiry_hides_key() {
    let store = MemoryKvStore::new();
    store
        .set_with_ttl("ns", "gone", b"v".to_vec(), Duration::ZERO)
        .await
        .unwrap();
    store
        .set_with_ttl("ns", "kept", b"v".to_vec(), Duration::from_secs(3600))
        .await
        .unwrap();

    assert_eq!(store.get("ns", "gone").await.unwrap(), None);
    assert!(!store.exists("ns", "gone").await.unwrap());
    assert_eq!(store.list_keys("ns").await.unwrap(), vec!["kept".to_string()]);
    assert!(!store.delete("ns", "gone").await.unwrap());
}

#[tokio::test]
async fn test_memory_ttl_elapses() {
    let store = MemoryKvStore::new();
    store
        .set_with_ttl("ns", "k", b"v".to_vec(), Duration::from_millis(20))
        .await
        .unwrap();
    assert!(store.exists("ns", "k").await.unwrap());
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(!store.exists("ns", "k").await.unwrap());
}

#[tokio::test]
async fn test_invalid_keys_rejected() {
    let store = MemoryKvStore::new();
    assert!(matches!(
        store.set("", "k", vec![]).await,
        Err(StorageError::InvalidKey(_))
    ));
    assert!(matches!(
        store.set("ns", "a\0b", vec![]).await,
        Err(StorageError::InvalidKey(_))
    ));
    assert!(ScopedKvStore::new(Arc::new(MemoryKvStore::new()), "").is_err());
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Record {
    approved: bool,
    note: String,
}

#[tokio::test]
async fn test_scoped_json_round_trip() {
    let scoped = ScopedKvStore::new(Arc::new(MemoryKvStore::new()), "records").unwrap();
    let record = Record {
        approved: true,
        note: "ok".into(),
    };
    scoped.set_json("r1", &record).await.unwrap();
    assert_eq!(scoped.get_json::<Record>("r1").await.unwrap(), Some(record));
    assert_eq!(scoped.get_json::<Record>("missing").await.unwrap(), None);
    assert_eq!(scoped.list_keys().await.unwrap(), vec!["r1".to_string()]);
    assert_eq!(scoped.clear().await.unwrap(), 1);
}

#[tokio::test]
async fn test_scoped_get_json_corrupted() {
    let scoped = ScopedKvStore::new(Arc::new(MemoryKvStore::new()), "records").unwrap();
    scoped.set("bad", b"{not json".to_vec()).await.unwrap();
    let err = scoped.get_json::<Record>("bad").await.unwrap_err();
    assert!(matches!(err, StorageError::Serialization(_)));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_scoped_json_with_ttl() {
    let scoped = ScopedKvStore::new(Arc::new(MemoryKvStore::new()), "records").unwrap();
    let record = Record {
        approved: false,
        note: String::new(),
    };
    scoped
        .set_json_with_ttl("r", &record, Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(scoped.get_json::<Record>("r").await.unwrap(), None);
}
