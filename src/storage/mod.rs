// src/storage/mod.rs

//! Persistence behind a semantic KV abstraction.
//!
//! Four named stores: *state* (baselines, meta, per-key history), *artifacts*
//! (screenshot-subsystem outputs), *dead-letter* and *history* (append-only
//! record logs). Backends implement `KvStore`; the `StateStore` wrapper adds
//! the typed operations the pipeline uses.

pub mod codec;
pub mod local;
pub mod memory;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AppError, Result};
use crate::models::{DeadLetterRecord, Event, Snapshot, TargetMeta};

pub use local::LocalStore;
pub use memory::MemoryStore;

/// Store names, shared by all backends.
pub const STATE: &str = "state";
pub const ARTIFACTS: &str = "artifacts";
pub const DEAD_LETTER: &str = "dead-letter";
pub const HISTORY: &str = "history";

/// Paging options for `list`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListOptions {
    pub limit: Option<usize>,
    pub offset: usize,
    pub desc: bool,
}

/// Minimal KV interface every backend implements.
///
/// Keys are listed in lexicographic order (descending when `desc` is set),
/// which the append-only stores exploit via zero-padded timestamp keys.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, store: &str, key: &str) -> Result<Option<Vec<u8>>>;
    async fn put(&self, store: &str, key: &str, value: Vec<u8>, content_type: &str) -> Result<()>;
    async fn delete(&self, store: &str, key: &str) -> Result<()>;
    async fn list(&self, store: &str, options: ListOptions) -> Result<Vec<String>>;
}

/// Logical key-space shared by all backends.
pub mod paths {
    pub fn snapshot_key(state_key: &str) -> String {
        format!("snapshot-{state_key}")
    }

    pub fn meta_key(state_key: &str) -> String {
        format!("meta-{state_key}")
    }

    pub fn history_key(state_key: &str) -> String {
        format!("history-{state_key}")
    }

    pub fn baseline_screenshot_key(state_key: &str) -> String {
        format!("baseline-screenshot-{state_key}.png")
    }

    pub fn artifact_key(state_key: &str, event_id: &str, name: &str) -> String {
        format!("artifact-{state_key}-{event_id}-{name}")
    }
}

/// One entry of the bounded per-state-key history: snapshot metadata, never
/// the text itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub content_hash: String,
    pub fetched_at: chrono::DateTime<Utc>,
    pub status: u16,
    pub bytes: u64,
}

impl HistoryEntry {
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            content_hash: snapshot.content_hash.clone(),
            fetched_at: snapshot.fetched_at,
            status: snapshot.status,
            bytes: snapshot.metrics.bytes,
        }
    }
}

static APPEND_SEQ: AtomicU64 = AtomicU64::new(0);

/// Monotonic key for append-only stores: zero-padded millis plus a
/// process-local sequence so same-millisecond appends stay ordered.
fn append_key(prefix: &str) -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let seq = APPEND_SEQ.fetch_add(1, Ordering::SeqCst);
    format!("{prefix}-{millis:015}-{seq:06}")
}

/// Typed store operations used by the pipeline.
pub struct StateStore {
    kv: Arc<dyn KvStore>,
    history_limit: usize,
}

impl StateStore {
    pub fn new(kv: Arc<dyn KvStore>, history_limit: usize) -> Self {
        Self { kv, history_limit }
    }

    pub fn kv(&self) -> Arc<dyn KvStore> {
        Arc::clone(&self.kv)
    }

    // --- Baselines ---

    pub async fn load_snapshot(&self, state_key: &str) -> Result<Option<Snapshot>> {
        match self.kv.get(STATE, &paths::snapshot_key(state_key)).await? {
            Some(bytes) => Ok(Some(codec::decode_snapshot(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn save_snapshot(&self, state_key: &str, snapshot: &Snapshot) -> Result<()> {
        let bytes = codec::encode_snapshot(snapshot)?;
        self.kv
            .put(STATE, &paths::snapshot_key(state_key), bytes, "application/json")
            .await
    }

    pub async fn delete_snapshot(&self, state_key: &str) -> Result<()> {
        self.kv.delete(STATE, &paths::snapshot_key(state_key)).await
    }

    // --- Meta ---

    pub async fn load_meta(&self, state_key: &str) -> Result<TargetMeta> {
        match self.kv.get(STATE, &paths::meta_key(state_key)).await? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(AppError::Json),
            None => Ok(TargetMeta::default()),
        }
    }

    pub async fn save_meta(&self, state_key: &str, meta: &TargetMeta) -> Result<()> {
        let bytes = serde_json::to_vec(meta)?;
        self.kv
            .put(STATE, &paths::meta_key(state_key), bytes, "application/json")
            .await
    }

    // --- Bounded per-key history ---

    pub async fn append_history(&self, state_key: &str, entry: HistoryEntry) -> Result<()> {
        if self.history_limit == 0 {
            return Ok(());
        }
        let key = paths::history_key(state_key);
        let mut entries: Vec<HistoryEntry> = match self.kv.get(STATE, &key).await? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => Vec::new(),
        };
        entries.push(entry);
        if entries.len() > self.history_limit {
            let excess = entries.len() - self.history_limit;
            entries.drain(..excess);
        }
        let bytes = serde_json::to_vec(&entries)?;
        self.kv.put(STATE, &key, bytes, "application/json").await
    }

    pub async fn load_history(&self, state_key: &str) -> Result<Vec<HistoryEntry>> {
        match self.kv.get(STATE, &paths::history_key(state_key)).await? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(AppError::Json),
            None => Ok(Vec::new()),
        }
    }

    // --- Result dataset ---

    pub async fn append_event(&self, event: &Event) -> Result<()> {
        let bytes = serde_json::to_vec(event)?;
        self.kv
            .put(HISTORY, &append_key("event"), bytes, "application/json")
            .await
    }

    // --- Dead letters ---

    pub async fn push_dead_letter(&self, record: &DeadLetterRecord) -> Result<()> {
        debug!(target_url = %record.target_url, webhook_url = %record.webhook_url, "dead-lettering payload");
        let bytes = serde_json::to_vec(record)?;
        self.kv
            .put(DEAD_LETTER, &append_key("dl"), bytes, "application/json")
            .await
    }

    /// Newest-first page of dead-letter records. Records that fail to parse
    /// are returned as `Err` entries so replay can report them.
    pub async fn list_dead_letters(
        &self,
        limit: usize,
    ) -> Result<Vec<(String, Result<DeadLetterRecord>)>> {
        let keys = self
            .kv
            .list(
                DEAD_LETTER,
                ListOptions {
                    limit: Some(limit),
                    offset: 0,
                    desc: true,
                },
            )
            .await?;

        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            let parsed = match self.kv.get(DEAD_LETTER, &key).await? {
                Some(bytes) => serde_json::from_slice(&bytes).map_err(AppError::Json),
                None => Err(AppError::store(format!("dead-letter record {key} vanished"))),
            };
            records.push((key, parsed));
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FetchMetrics, SnapshotMode};
    use crate::models::snapshot::sha256_hex;

    fn snapshot(text: &str) -> Snapshot {
        Snapshot {
            url: "https://example.com/".into(),
            final_url: "https://example.com/".into(),
            fetched_at: Utc::now(),
            status: 200,
            mode: SnapshotMode::Text,
            text: text.into(),
            html: None,
            content_hash: sha256_hex(text),
            etag: None,
            last_modified: None,
            metrics: FetchMetrics::default(),
        }
    }

    fn store() -> StateStore {
        StateStore::new(Arc::new(MemoryStore::new()), 3)
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip() {
        let s = store();
        assert!(s.load_snapshot("k1").await.unwrap().is_none());
        s.save_snapshot("k1", &snapshot("body")).await.unwrap();
        let loaded = s.load_snapshot("k1").await.unwrap().unwrap();
        assert_eq!(loaded.text, "body");
        assert!(loaded.hash_is_consistent());
    }

    #[tokio::test]
    async fn test_meta_defaults_when_missing() {
        let s = store();
        let meta = s.load_meta("nope").await.unwrap();
        assert_eq!(meta.webhook_failure_count, 0);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let s = store();
        for i in 0..5 {
            s.append_history("k", HistoryEntry::from_snapshot(&snapshot(&format!("v{i}"))))
                .await
                .unwrap();
        }
        let history = s.load_history("k").await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].content_hash, sha256_hex("v4"));
    }

    #[tokio::test]
    async fn test_dead_letters_newest_first() {
        let s = store();
        for i in 0..3 {
            s.push_dead_letter(&DeadLetterRecord {
                webhook_url: format!("https://hooks.example.com/{i}"),
                target_url: "https://example.com/".into(),
                state_key: "k".into(),
                error: "boom".into(),
                payload_preview: "{}".into(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        }
        let records = s.list_dead_letters(2).await.unwrap();
        assert_eq!(records.len(), 2);
        let first = records[0].1.as_ref().unwrap();
        assert_eq!(first.webhook_url, "https://hooks.example.com/2");
    }
}
