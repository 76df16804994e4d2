// src/storage/memory.rs

//! In-memory KV backend for tests and dry runs.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::Result;
use crate::storage::{KvStore, ListOptions};

/// BTreeMap-backed store; key order falls out of the map.
#[derive(Default)]
pub struct MemoryStore {
    stores: Mutex<BTreeMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently in a store (test helper).
    pub fn len(&self, store: &str) -> usize {
        self.stores
            .lock()
            .expect("memory store lock")
            .get(store)
            .map(|m| m.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, store: &str) -> bool {
        self.len(store) == 0
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, store: &str, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .stores
            .lock()
            .expect("memory store lock")
            .get(store)
            .and_then(|m| m.get(key))
            .cloned())
    }

    async fn put(&self, store: &str, key: &str, value: Vec<u8>, _content_type: &str) -> Result<()> {
        self.stores
            .lock()
            .expect("memory store lock")
            .entry(store.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, store: &str, key: &str) -> Result<()> {
        if let Some(m) = self
            .stores
            .lock()
            .expect("memory store lock")
            .get_mut(store)
        {
            m.remove(key);
        }
        Ok(())
    }

    async fn list(&self, store: &str, options: ListOptions) -> Result<Vec<String>> {
        let stores = self.stores.lock().expect("memory store lock");
        let keys: Vec<String> = match stores.get(store) {
            Some(m) => {
                if options.desc {
                    m.keys().rev().cloned().collect()
                } else {
                    m.keys().cloned().collect()
                }
            }
            None => Vec::new(),
        };

        let keys = keys.into_iter().skip(options.offset);
        Ok(match options.limit {
            Some(limit) => keys.take(limit).collect(),
            None => keys.collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_roundtrip_and_isolation_between_stores() {
        let store = MemoryStore::new();
        store
            .put("state", "k", b"1".to_vec(), "application/json")
            .await
            .unwrap();
        store
            .put("history", "k", b"2".to_vec(), "application/json")
            .await
            .unwrap();

        assert_eq!(store.get("state", "k").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get("history", "k").await.unwrap(), Some(b"2".to_vec()));
        assert!(store.get("artifacts", "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_desc_with_limit() {
        let store = MemoryStore::new();
        for key in ["001", "002", "003"] {
            store
                .put("dead-letter", key, b"{}".to_vec(), "application/json")
                .await
                .unwrap();
        }
        let page = store
            .list(
                "dead-letter",
                ListOptions {
                    limit: Some(2),
                    offset: 0,
                    desc: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(page, vec!["003", "002"]);
    }
}
