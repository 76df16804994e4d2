// src/models/snapshot.rs

//! Snapshot: the normalized artifact a target is compared against.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Which normalization path produced the canonical text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotMode {
    Text,
    Fields,
    Json,
}

/// Per-fetch observability numbers, carried on snapshots and failure events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchMetrics {
    pub bytes: u64,
    pub duration_ms: u64,
    pub attempts: u32,
    pub redirects: u32,
    #[serde(default)]
    pub not_modified: bool,
}

/// The normalized artifact used for comparison.
///
/// `content_hash` is always the SHA-256 hex of `text`, and `text` is a pure
/// function of (raw body, mode, normalization rules): identical inputs
/// produce byte-identical text across runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// The monitored URL as configured.
    pub url: String,
    /// Final URL after redirects.
    pub final_url: String,
    pub fetched_at: DateTime<Utc>,
    pub status: u16,
    pub mode: SnapshotMode,
    /// Canonical UTF-8 text the diff runs on.
    pub text: String,
    /// Source HTML fragment, when text mode selected one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    /// SHA-256 hex of `text`.
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    pub metrics: FetchMetrics,
}

/// SHA-256 hex digest of a string.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

impl Snapshot {
    /// Recompute the content hash from the current text.
    pub fn hash_of(text: &str) -> String {
        sha256_hex(text)
    }

    /// Check the `content_hash == SHA-256(text)` invariant.
    pub fn hash_is_consistent(&self) -> bool {
        self.content_hash == sha256_hex(&self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot(text: &str) -> Snapshot {
        Snapshot {
            url: "https://example.com/".into(),
            final_url: "https://example.com/".into(),
            fetched_at: Utc::now(),
            status: 200,
            mode: SnapshotMode::Text,
            text: text.to_string(),
            html: None,
            content_hash: sha256_hex(text),
            etag: None,
            last_modified: None,
            metrics: FetchMetrics::default(),
        }
    }

    #[test]
    fn test_hash_is_stable() {
        let first = sha256_hex("hello world");
        let second = sha256_hex("hello world");
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn test_hash_consistency_invariant() {
        let snapshot = sample_snapshot("hello");
        assert!(snapshot.hash_is_consistent());

        let mut tampered = sample_snapshot("hello");
        tampered.text.push_str(" world");
        assert!(!tampered.hash_is_consistent());
    }

    #[test]
    fn test_snapshot_roundtrips_through_json() {
        let snapshot = sample_snapshot("body text");
        let json = serde_json::to_string(&snapshot).unwrap();
        let decoded: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.text, snapshot.text);
        assert_eq!(decoded.content_hash, snapshot.content_hash);
        assert_eq!(decoded.mode, SnapshotMode::Text);
    }
}
