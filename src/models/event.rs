// src/models/event.rs

//! Event payloads pushed to the result dataset and webhook endpoints.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current payload schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Every outcome the pipeline can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "BASELINE_STORED")]
    BaselineStored,
    #[serde(rename = "CHANGE_DETECTED")]
    ChangeDetected,
    #[serde(rename = "NO_CHANGE")]
    NoChange,
    #[serde(rename = "FETCH_FAILED")]
    FetchFailed,
    #[serde(rename = "CHANGE_SUPPRESSED")]
    ChangeSuppressed,
    #[serde(rename = "EMPTY_SNAPSHOT_IGNORED")]
    EmptySnapshotIgnored,
    #[serde(rename = "WEBHOOK_FAILED")]
    WebhookFailed,
    #[serde(rename = "WEBHOOK_CIRCUIT_OPEN")]
    WebhookCircuitOpen,
    #[serde(rename = "BASELINE_MIGRATED")]
    BaselineMigrated,
    #[serde(rename = "RUN_SUMMARY")]
    RunSummary,
}

impl EventKind {
    /// Wire name of the event kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BaselineStored => "BASELINE_STORED",
            Self::ChangeDetected => "CHANGE_DETECTED",
            Self::NoChange => "NO_CHANGE",
            Self::FetchFailed => "FETCH_FAILED",
            Self::ChangeSuppressed => "CHANGE_SUPPRESSED",
            Self::EmptySnapshotIgnored => "EMPTY_SNAPSHOT_IGNORED",
            Self::WebhookFailed => "WEBHOOK_FAILED",
            Self::WebhookCircuitOpen => "WEBHOOK_CIRCUIT_OPEN",
            Self::BaselineMigrated => "BASELINE_MIGRATED",
            Self::RunSummary => "RUN_SUMMARY",
        }
    }
}

/// Content identity at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub hash: String,
    #[serde(rename = "fetchedAt")]
    pub fetched_at: DateTime<Utc>,
}

/// Old/new text pair with an optional numeric delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChange {
    pub old: String,
    pub new: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<f64>,
}

/// Old/new value pair for one extracted field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub old: String,
    pub new: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<f64>,
}

/// Structural JSON diff operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonOp {
    Add,
    Remove,
    Replace,
}

/// One entry of a structural JSON diff; `path` is an RFC 6901 pointer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonChange {
    pub path: String,
    pub op: JsonOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<serde_json::Value>,
}

/// The `changes` block of a CHANGE_DETECTED event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Changes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<TextChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, FieldChange>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<Vec<JsonChange>>,
    /// Unified diff patch, dropped silently when it would overrun the limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
}

/// Redacted error details on failure events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub name: String,
    pub message: String,
    #[serde(
        rename = "statusCode",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(
        rename = "durationMs",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub duration_ms: Option<u64>,
}

/// A structured event record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub schema_version: u32,
    pub event_id: String,
    pub event: EventKind,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<Fingerprint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<Fingerprint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<Changes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub payload_truncated: bool,
}

impl Event {
    /// Start a new event record; the id is filled in by the caller.
    pub fn new(kind: EventKind, url: impl Into<String>, selector: Option<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            event_id: String::new(),
            event: kind,
            url: url.into(),
            selector,
            timestamp: Utc::now(),
            previous: None,
            current: None,
            changes: None,
            summary: None,
            artifacts: None,
            error: None,
            payload_truncated: false,
        }
    }
}
