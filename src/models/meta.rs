// src/models/meta.rs

//! Per-target bookkeeping and run-level reporting records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal outcome of one target in one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetOutcome {
    BaselineStored,
    NoChange,
    ChangeDelivered,
    ChangeSuppressed,
    FetchFailed,
    EmptyIgnored,
    CircuitOpen,
    WebhookFailed,
}

impl TargetOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BaselineStored => "baseline_stored",
            Self::NoChange => "no_change",
            Self::ChangeDelivered => "change_delivered",
            Self::ChangeSuppressed => "change_suppressed",
            Self::FetchFailed => "fetch_failed",
            Self::EmptyIgnored => "empty_ignored",
            Self::CircuitOpen => "circuit_open",
            Self::WebhookFailed => "webhook_failed",
        }
    }

    /// Whether this outcome counts as a failing target in the run summary.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::FetchFailed | Self::WebhookFailed | Self::CircuitOpen
        )
    }
}

/// Per-state-key bookkeeping, owned by the state store and mutated only by
/// the pipeline that just ran the target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_outcome: Option<TargetOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success_at: Option<DateTime<Utc>>,
    /// Consecutive webhook delivery failures; reset on success.
    #[serde(default)]
    pub webhook_failure_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_open_until: Option<DateTime<Utc>>,
    /// Debounce markers for failure/heartbeat notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_failure_signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_failure_notified_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_change_notified_at: Option<DateTime<Utc>>,
}

/// Durable record of a payload whose delivery failed terminally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub webhook_url: String,
    pub target_url: String,
    pub state_key: String,
    pub error: String,
    /// Truncated copy of the payload JSON. Replay validates it parses before
    /// re-delivering; records clipped mid-document are reported as invalid.
    pub payload_preview: String,
    pub created_at: DateTime<Utc>,
}

/// Aggregate fetch numbers across a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchAggregate {
    pub requests: u64,
    pub bytes: u64,
    pub duration_ms: u64,
    pub attempts: u64,
}

/// Aggregate webhook numbers across a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookAggregate {
    pub deliveries: u64,
    pub failures: u64,
    pub attempts: u64,
    pub duration_ms: u64,
}

/// Run-level summary emitted as the RUN_SUMMARY event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub targets: usize,
    pub outcomes: BTreeMap<String, u32>,
    pub fetch: FetchAggregate,
    pub webhooks: WebhookAggregate,
    /// URLs of failing targets, redacted when `redact_logs` is set.
    pub failing_targets: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_meta_is_clean() {
        let meta = TargetMeta::default();
        assert_eq!(meta.webhook_failure_count, 0);
        assert!(meta.circuit_open_until.is_none());
        assert!(meta.last_outcome.is_none());
    }

    #[test]
    fn test_meta_roundtrip() {
        let meta = TargetMeta {
            last_run_at: Some(Utc::now()),
            last_outcome: Some(TargetOutcome::NoChange),
            webhook_failure_count: 2,
            ..Default::default()
        };
        let json = serde_json::to_string(&meta).unwrap();
        let decoded: TargetMeta = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.webhook_failure_count, 2);
        assert_eq!(decoded.last_outcome, Some(TargetOutcome::NoChange));
    }

    #[test]
    fn test_failure_outcomes() {
        assert!(TargetOutcome::FetchFailed.is_failure());
        assert!(TargetOutcome::WebhookFailed.is_failure());
        assert!(!TargetOutcome::NoChange.is_failure());
        assert!(!TargetOutcome::ChangeSuppressed.is_failure());
    }
}
