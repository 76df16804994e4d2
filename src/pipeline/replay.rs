// src/pipeline/replay.rs

//! Dead-letter replay: re-deliver payloads whose original delivery failed.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::Result;
use crate::models::RunConfig;
use crate::services::webhook::WebhookDeliverer;
use crate::storage::StateStore;
use crate::utils::redact::redact_url;

/// Per-record replay outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayOutcome {
    Delivered,
    Failed,
    SkippedDryRun,
    InvalidPayload,
}

impl ReplayOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::SkippedDryRun => "skipped_dry_run",
            Self::InvalidPayload => "invalid_payload",
        }
    }
}

/// One replayed record.
#[derive(Debug, Clone)]
pub struct ReplayItem {
    pub record_key: String,
    pub webhook_url: String,
    pub target_url: String,
    pub outcome: ReplayOutcome,
    pub error: Option<String>,
}

/// Replay run report.
#[derive(Debug, Default)]
pub struct ReplayReport {
    pub scanned: usize,
    pub delivered: usize,
    pub failed: usize,
    pub skipped: usize,
    pub invalid: usize,
    pub items: Vec<ReplayItem>,
}

/// Re-deliver the newest `replay_limit` dead-letter records under the same
/// webhook policy and worker pool as a monitor run.
pub async fn run_replay(
    config: &RunConfig,
    store: Arc<StateStore>,
    deliverer: Arc<WebhookDeliverer>,
) -> Result<ReplayReport> {
    let records = store.list_dead_letters(config.replay_limit).await?;
    let scanned = records.len();
    info!(records = scanned, dry_run = config.dry_run, "dead-letter replay starting");

    let items = Arc::new(Mutex::new(Vec::with_capacity(scanned)));
    let concurrency = config.max_concurrency.max(1);

    stream::iter(records)
        .for_each_concurrent(concurrency, |(key, parsed)| {
            let items = Arc::clone(&items);
            let deliverer = Arc::clone(&deliverer);
            async move {
                let item = replay_one(config, &deliverer, key, parsed).await;
                items.lock().await.push(item);
            }
        })
        .await;

    let items = match Arc::try_unwrap(items) {
        Ok(items) => items.into_inner(),
        Err(_) => Vec::new(),
    };

    let mut report = ReplayReport {
        scanned,
        items,
        ..Default::default()
    };
    for item in &report.items {
        match item.outcome {
            ReplayOutcome::Delivered => report.delivered += 1,
            ReplayOutcome::Failed => report.failed += 1,
            ReplayOutcome::SkippedDryRun => report.skipped += 1,
            ReplayOutcome::InvalidPayload => report.invalid += 1,
        }
    }

    info!(
        delivered = report.delivered,
        failed = report.failed,
        skipped = report.skipped,
        invalid = report.invalid,
        "dead-letter replay complete"
    );

    Ok(report)
}

async fn replay_one(
    config: &RunConfig,
    deliverer: &WebhookDeliverer,
    record_key: String,
    parsed: Result<crate::models::DeadLetterRecord>,
) -> ReplayItem {
    let record = match parsed {
        Ok(record) => record,
        Err(e) => {
            warn!(record = %record_key, error = %e, "dead-letter record unreadable");
            return ReplayItem {
                record_key,
                webhook_url: String::new(),
                target_url: String::new(),
                outcome: ReplayOutcome::InvalidPayload,
                error: Some(e.to_string()),
            };
        }
    };

    // The preview must still be a well-formed payload to be replayable.
    let payload: Value = match serde_json::from_str(&record.payload_preview) {
        Ok(payload) => payload,
        Err(e) => {
            return ReplayItem {
                record_key,
                webhook_url: record.webhook_url,
                target_url: record.target_url,
                outcome: ReplayOutcome::InvalidPayload,
                error: Some(format!("stored payload does not parse: {e}")),
            };
        }
    };

    let urls: Vec<String> = if config.use_stored_webhook_url {
        vec![record.webhook_url.clone()]
    } else {
        config.webhook_urls.clone()
    };

    if urls.is_empty() {
        return ReplayItem {
            record_key,
            webhook_url: record.webhook_url,
            target_url: record.target_url,
            outcome: ReplayOutcome::InvalidPayload,
            error: Some("no webhook URL available for replay".into()),
        };
    }

    if config.dry_run {
        info!(
            target = %redact_url(&record.target_url),
            webhook = %redact_url(&urls[0]),
            "dry run: would re-deliver"
        );
        return ReplayItem {
            record_key,
            webhook_url: record.webhook_url,
            target_url: record.target_url,
            outcome: ReplayOutcome::SkippedDryRun,
            error: None,
        };
    }

    let event_id = payload
        .get("event_id")
        .and_then(|v| v.as_str())
        .unwrap_or(&record_key)
        .to_string();

    let report = deliverer.deliver(&event_id, &payload, &urls).await;
    if report.ok {
        ReplayItem {
            record_key,
            webhook_url: record.webhook_url,
            target_url: record.target_url,
            outcome: ReplayOutcome::Delivered,
            error: None,
        }
    } else {
        ReplayItem {
            record_key,
            webhook_url: record.webhook_url,
            target_url: record.target_url,
            outcome: ReplayOutcome::Failed,
            error: report.first_error(),
        }
    }
}
