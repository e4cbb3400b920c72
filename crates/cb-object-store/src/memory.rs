//! An in-memory `ObjectStore`, real (not a mock) implementation of the
//! trait used by every test in the workspace that would otherwise need a
//! live bucket.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{DeleteOutcome, ListedKey, ObjectStore, ObjectStoreError, PutOptions, Result};

#[derive(Debug, Clone)]
struct Entry {
    bytes: Vec<u8>,
    etag: String,
}

/// In-memory object store, keyed identically to the real bucket layout.
/// Every `put` generates a fresh ETag so conditional-put semantics are
/// exercised exactly as they would be against S3.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<BTreeMap<String, Entry>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn fresh_etag() -> String {
        Uuid::new_v4().to_string()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, opts: PutOptions) -> Result<String> {
        let mut objects = self.objects.write().await;
        if let Some(expected) = &opts.if_match {
            match objects.get(key) {
                Some(existing) if &existing.etag == expected => {}
                _ => {
                    return Err(ObjectStoreError::PreconditionFailed { key: key.to_string() });
                }
            }
        }
        let etag = Self::fresh_etag();
        objects.insert(
            key.to_string(),
            Entry {
                bytes,
                etag: etag.clone(),
            },
        );
        Ok(etag)
    }

    async fn get(&self, key: &str) -> Result<(Vec<u8>, String)> {
        let objects = self.objects.read().await;
        objects
            .get(key)
            .map(|e| (e.bytes.clone(), e.etag.clone()))
            .ok_or_else(|| ObjectStoreError::NotFound(key.to_string()))
    }

    async fn head(&self, key: &str) -> Result<Option<String>> {
        let objects = self.objects.read().await;
        Ok(objects.get(key).map(|e| e.etag.clone()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ListedKey>> {
        let objects = self.objects.read().await;
        Ok(objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .map(|k| ListedKey { key: k.clone() })
            .collect())
    }

    async fn delete(&self, keys: &[String]) -> Result<DeleteOutcome> {
        let mut objects = self.objects.write().await;
        let mut outcome = DeleteOutcome::default();
        for key in keys {
            objects.remove(key);
            outcome.deleted.push(key.clone());
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconditional_put_always_succeeds() {
        let store = InMemoryObjectStore::new();
        let etag = store.put("k", b"v1".to_vec(), PutOptions::default()).await.unwrap();
        assert!(!etag.is_empty());
        let etag2 = store.put("k", b"v2".to_vec(), PutOptions::default()).await.unwrap();
        assert_ne!(etag, etag2);
        let (bytes, _) = store.get("k").await.unwrap();
        assert_eq!(bytes, b"v2");
    }

    #[tokio::test]
    async fn conditional_put_rejects_stale_etag() {
        let store = InMemoryObjectStore::new();
        let etag = store.put("k", b"v1".to_vec(), PutOptions::default()).await.unwrap();
        // Someone else writes concurrently, invalidating our etag.
        store.put("k", b"v2".to_vec(), PutOptions::default()).await.unwrap();

        let err = store
            .put("k", b"v3".to_vec(), PutOptions::if_match(etag))
            .await
            .unwrap_err();
        assert!(matches!(err, ObjectStoreError::PreconditionFailed { .. }));

        let (bytes, _) = store.get("k").await.unwrap();
        assert_eq!(bytes, b"v2", "rejected write must not land");
    }

    #[tokio::test]
    async fn conditional_put_against_missing_key_requires_absence() {
        let store = InMemoryObjectStore::new();
        let err = store
            .put("k", b"v".to_vec(), PutOptions::if_match("nonexistent-etag"))
            .await
            .unwrap_err();
        assert!(matches!(err, ObjectStoreError::PreconditionFailed { .. }));
    }

    #[tokio::test]
    async fn list_filters_by_prefix() {
        let store = InMemoryObjectStore::new();
        store.put("tasks/a", vec![], PutOptions::default()).await.unwrap();
        store.put("tasks/b", vec![], PutOptions::default()).await.unwrap();
        store.put("results/a", vec![], PutOptions::default()).await.unwrap();

        let listed = store.list("tasks/").await.unwrap();
        assert_eq!(listed.len(), 2);
    }

    #[tokio::test]
    async fn only_one_of_two_concurrent_conditional_puts_wins() {
        let store = Arc::new(InMemoryObjectStore::new());
        let etag = store.put("k", b"v0".to_vec(), PutOptions::default()).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..10u8 {
            let store = store.clone();
            let etag = etag.clone();
            handles.push(tokio::spawn(async move {
                store
                    .put(&format!("k"), vec![i], PutOptions::if_match(etag))
                    .await
                    .is_ok()
            }));
        }
        let mut wins = 0;
        for h in handles {
            if h.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1, "exactly one conditional put should win the race (P1)");
    }
}
