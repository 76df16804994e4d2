// src/pipeline/target.rs

//! The per-target state machine.
//!
//! IDLE -> FETCHING -> {FAILED_FETCH | EMPTY | EVAL};
//! EVAL -> {NO_CHANGE | SUPPRESSED | CHANGE};
//! CHANGE -> {DELIVERING | CIRCUIT_OPEN};
//! DELIVERING -> {DELIVERED | DEAD_LETTERED}.
//!
//! Baseline advancement rule: the baseline advances iff the outcome is a
//! no-change refresh, a suppressed change, or a successfully delivered
//! change. Fetch failures, empty snapshots, circuit-open skips, and webhook
//! failures never advance it, so the next run retries with the same diff.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::models::snapshot::sha256_hex;
use crate::models::{
    BaselineMode, Changes, DeadLetterRecord, EmptySnapshotPolicy, ErrorInfo, Event, EventKind,
    FetchMetrics, Fingerprint, Snapshot, SnapshotMode, TargetMeta, TargetOutcome, TargetSpec,
};
use crate::pipeline::circuit_breaker::CircuitBreaker;
use crate::pipeline::diff::{
    approx_change_ratio, compute_fields_change, compute_text_change, diff_json, summarize,
    unified_patch,
};
use crate::pipeline::event_id::{change_event_id, run_scoped_event_id};
use crate::pipeline::payload::limit_payload_bytes;
use crate::pipeline::state_key::{current_state_key, legacy_state_key};
use crate::services::fetcher::{FetchContext, FetchOutcome, Fetcher};
use crate::services::normalizer::normalize;
use crate::services::webhook::WebhookDeliverer;
use crate::storage::{HistoryEntry, StateStore};
use crate::utils::redact::redact_url;
use crate::utils::retry::{with_retries, RetryPolicy};

/// Cap on the dead-letter payload preview.
const DEAD_LETTER_PREVIEW_BYTES: usize = 64 * 1024;

/// Everything a target pipeline needs, shared across workers.
pub struct PipelineDeps {
    pub fetcher: Arc<dyn Fetcher>,
    pub store: Arc<StateStore>,
    pub deliverer: Arc<WebhookDeliverer>,
    pub fetch_ctx: Arc<FetchContext>,
    pub breaker: CircuitBreaker,
    pub fetch_retry: RetryPolicy,
    pub run_id: String,
    pub reset_baseline: bool,
    pub notify_on_no_change: bool,
    pub notify_on_fetch_failure: bool,
    pub notify_debounce_secs: u64,
    pub max_payload_bytes: usize,
    pub redact_logs: bool,
}

/// Terminal report for one target in one run.
pub struct TargetResult {
    pub url: String,
    pub outcome: TargetOutcome,
    pub events: Vec<Event>,
    pub fetch_metrics: Option<FetchMetrics>,
    pub webhook_attempts: u64,
    pub webhook_duration_ms: u64,
    pub webhook_delivered: bool,
    pub webhook_failed: bool,
}

impl TargetResult {
    fn new(url: &str, outcome: TargetOutcome) -> Self {
        Self {
            url: url.to_string(),
            outcome,
            events: Vec::new(),
            fetch_metrics: None,
            webhook_attempts: 0,
            webhook_duration_ms: 0,
            webhook_delivered: false,
            webhook_failed: false,
        }
    }
}

fn fingerprint(snapshot: &Snapshot) -> Fingerprint {
    Fingerprint {
        hash: snapshot.content_hash.clone(),
        fetched_at: snapshot.fetched_at,
    }
}

/// Run the full pipeline for one target. Never panics the run: every error
/// becomes an event record.
pub async fn process_target(deps: &PipelineDeps, spec: &TargetSpec) -> TargetResult {
    match run_pipeline(deps, spec).await {
        Ok(result) => result,
        Err(e) => {
            // Store-level failures surface as a fetch failure for this target
            // rather than killing the whole run.
            warn!(url = %redact_url(&spec.url), error = %e, "target pipeline error");
            let mut result = TargetResult::new(&spec.url, TargetOutcome::FetchFailed);
            let mut event = Event::new(EventKind::FetchFailed, &spec.url, spec.selector.clone());
            event.event_id = run_scoped_event_id(
                EventKind::FetchFailed.as_str(),
                &deps.run_id,
                &spec.url,
                spec.selector.as_deref(),
                None,
                None,
            );
            event.error = Some(error_info(&e, None, None, deps, spec));
            result.events.push(event);
            result
        }
    }
}

fn error_info(
    error: &AppError,
    attempts: Option<u32>,
    duration_ms: Option<u64>,
    deps: &PipelineDeps,
    spec: &TargetSpec,
) -> ErrorInfo {
    let mut message = error.to_string();
    if deps.redact_logs {
        message = message.replace(&spec.url, &redact_url(&spec.url));
    }
    ErrorInfo {
        name: error.name().to_string(),
        message,
        status_code: error.status_code(),
        attempts,
        duration_ms,
    }
}

/// Stable signature of a failure, used for debouncing repeat notifications.
fn failure_signature(error: &ErrorInfo) -> String {
    let mut signature = sha256_hex(&format!(
        "{}|{}|{}",
        error.name,
        error.status_code.map(|s| s.to_string()).unwrap_or_default(),
        error.message
    ));
    signature.truncate(32);
    signature
}

async fn run_pipeline(deps: &PipelineDeps, spec: &TargetSpec) -> Result<TargetResult> {
    // 1. State keys for both generations.
    let state_key = current_state_key(spec);
    let legacy_key = legacy_state_key(&spec.url, spec.selector.as_deref());

    if deps.reset_baseline {
        deps.store.delete_snapshot(&state_key).await?;
    }

    let mut meta = deps.store.load_meta(&state_key).await?;
    let mut events: Vec<Event> = Vec::new();

    // 2. Baseline: current key first, then the legacy slot for migration.
    let mut migrated = false;
    let baseline = match deps.store.load_snapshot(&state_key).await? {
        Some(snapshot) => Some(snapshot),
        None if !deps.reset_baseline => match deps.store.load_snapshot(&legacy_key).await? {
            Some(snapshot) => {
                migrated = true;
                Some(snapshot)
            }
            None => None,
        },
        None => None,
    };

    if migrated {
        let mut event = Event::new(EventKind::BaselineMigrated, &spec.url, spec.selector.clone());
        event.event_id = run_scoped_event_id(
            EventKind::BaselineMigrated.as_str(),
            &deps.run_id,
            &spec.url,
            spec.selector.as_deref(),
            baseline.as_ref().map(|b| b.content_hash.as_str()),
            None,
        );
        event.current = baseline.as_ref().map(fingerprint);
        events.push(event);
    }

    // 3. Circuit breaker: with the circuit open, a change could not be
    // delivered anyway, so the fetch-for-delivery is skipped entirely.
    let now = Utc::now();
    if !spec.webhook_urls.is_empty() && deps.breaker.is_open(&meta, now) {
        let mut event =
            Event::new(EventKind::WebhookCircuitOpen, &spec.url, spec.selector.clone());
        event.event_id = run_scoped_event_id(
            EventKind::WebhookCircuitOpen.as_str(),
            &deps.run_id,
            &spec.url,
            spec.selector.as_deref(),
            None,
            None,
        );
        event.summary = meta
            .circuit_open_until
            .map(|until| format!("webhook circuit open until {until}"));
        events.push(event);

        meta.last_run_at = Some(now);
        meta.last_outcome = Some(TargetOutcome::CircuitOpen);
        deps.store.save_meta(&state_key, &meta).await?;

        let mut result = TargetResult::new(&spec.url, TargetOutcome::CircuitOpen);
        result.events = events;
        return Ok(result);
    }

    // 4. Fetch with retries.
    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_in = Arc::clone(&attempts);
    let baseline_ref = baseline.as_ref();
    let fetch_result = with_retries(
        &deps.fetch_retry,
        |e| e.is_retryable(),
        |attempt| {
            let attempts = Arc::clone(&attempts_in);
            let previous = baseline_ref;
            async move {
                attempts.store(attempt + 1, Ordering::SeqCst);
                deps.fetcher.fetch(spec, previous, &deps.fetch_ctx).await
            }
        },
    )
    .await;
    let attempts = attempts.load(Ordering::SeqCst);

    let outcome = match fetch_result {
        Ok(outcome) => outcome,
        Err(e) => {
            return fail_fetch(deps, spec, &state_key, &mut meta, events, e, attempts).await;
        }
    };

    let metrics = FetchMetrics {
        bytes: outcome.body.len() as u64,
        duration_ms: outcome.duration_ms,
        attempts,
        redirects: outcome.redirects,
        not_modified: outcome.not_modified,
    };

    // 304: the stored text is still authoritative; refresh validators only.
    if outcome.not_modified {
        let previous = baseline.expect("fetcher guarantees a baseline on 304");
        let refreshed = refresh_snapshot(&previous, &outcome, &metrics);
        return finish_no_change(deps, spec, &state_key, &mut meta, events, refreshed, metrics)
            .await;
    }

    // Normalize; every failure mode lands on the fetch-failure path.
    let normalized = match normalize(&outcome.body, outcome.content_type.as_deref(), spec) {
        Ok(normalized) => normalized,
        Err(e) => {
            return fail_fetch(deps, spec, &state_key, &mut meta, events, e, attempts).await;
        }
    };

    // Empty-snapshot policy.
    let text_length = normalized.text.chars().count();
    if text_length == 0 || text_length < spec.min_text_length {
        match spec.on_empty_snapshot {
            EmptySnapshotPolicy::Error => {
                let error = AppError::EmptySnapshot {
                    text_length,
                    min_text_length: spec.min_text_length,
                };
                return fail_fetch(deps, spec, &state_key, &mut meta, events, error, attempts)
                    .await;
            }
            EmptySnapshotPolicy::Ignore => {
                let mut event =
                    Event::new(EventKind::EmptySnapshotIgnored, &spec.url, spec.selector.clone());
                event.event_id = run_scoped_event_id(
                    EventKind::EmptySnapshotIgnored.as_str(),
                    &deps.run_id,
                    &spec.url,
                    spec.selector.as_deref(),
                    None,
                    None,
                );
                event.summary = Some(format!(
                    "empty snapshot ignored ({text_length} chars, minimum {})",
                    spec.min_text_length
                ));
                events.push(event);

                meta.last_run_at = Some(Utc::now());
                meta.last_outcome = Some(TargetOutcome::EmptyIgnored);
                deps.store.save_meta(&state_key, &meta).await?;

                let mut result = TargetResult::new(&spec.url, TargetOutcome::EmptyIgnored);
                result.events = events;
                result.fetch_metrics = Some(metrics);
                return Ok(result);
            }
            EmptySnapshotPolicy::TreatAsChange => {}
        }
    }

    let snapshot = Snapshot {
        url: spec.url.clone(),
        final_url: outcome.final_url.clone(),
        fetched_at: Utc::now(),
        status: outcome.status,
        mode: normalized.mode,
        content_hash: sha256_hex(&normalized.text),
        text: normalized.text,
        html: normalized.html,
        etag: outcome.etag.clone(),
        last_modified: outcome.last_modified.clone(),
        metrics: metrics.clone(),
    };

    // 5. First observation: persist the baseline.
    let Some(baseline) = baseline else {
        return store_first_baseline(deps, spec, &state_key, &mut meta, events, snapshot, metrics)
            .await;
    };

    // 6. Evaluate the change.
    let Some(change) = compute_text_change(&baseline, &snapshot) else {
        return finish_no_change(deps, spec, &state_key, &mut meta, events, snapshot, metrics)
            .await;
    };

    // 7. Noise suppression. Evaluated on the change texts exactly as diffed;
    // advancing the baseline here prevents a noisy page from oscillating
    // between "suppressed" and "changed" forever.
    let ratio = approx_change_ratio(&change.old, &change.new);
    if spec.min_change_ratio > 0.0 && ratio < spec.min_change_ratio {
        let mut event =
            Event::new(EventKind::ChangeSuppressed, &spec.url, spec.selector.clone());
        event.event_id = run_scoped_event_id(
            EventKind::ChangeSuppressed.as_str(),
            &deps.run_id,
            &spec.url,
            spec.selector.as_deref(),
            Some(&snapshot.content_hash),
            None,
        );
        event.previous = Some(fingerprint(&baseline));
        event.current = Some(fingerprint(&snapshot));
        event.summary = Some(format!(
            "change ratio {ratio:.4} below threshold {:.4}",
            spec.min_change_ratio
        ));
        events.push(event);

        deps.store.save_snapshot(&state_key, &snapshot).await?;
        deps.store
            .append_history(&state_key, HistoryEntry::from_snapshot(&snapshot))
            .await?;
        meta.last_run_at = Some(Utc::now());
        meta.last_outcome = Some(TargetOutcome::ChangeSuppressed);
        meta.last_success_hash = Some(snapshot.content_hash.clone());
        meta.last_success_at = Some(snapshot.fetched_at);
        deps.store.save_meta(&state_key, &meta).await?;

        let mut result = TargetResult::new(&spec.url, TargetOutcome::ChangeSuppressed);
        result.events = events;
        result.fetch_metrics = Some(metrics);
        return Ok(result);
    }

    // 8. Compose CHANGE_DETECTED.
    let mut event = Event::new(EventKind::ChangeDetected, &spec.url, spec.selector.clone());
    event.event_id = change_event_id(
        EventKind::ChangeDetected.as_str(),
        &spec.url,
        spec.selector.as_deref(),
        Some(&baseline.content_hash),
        &snapshot.content_hash,
    );
    event.previous = Some(fingerprint(&baseline));
    event.current = Some(fingerprint(&snapshot));

    let mut changes = Changes {
        text: Some(change.clone()),
        ..Default::default()
    };
    if snapshot.mode == SnapshotMode::Fields {
        if let Ok(fields) = compute_fields_change(&baseline.text, &snapshot.text) {
            if !fields.is_empty() {
                changes.fields = Some(fields);
            }
        }
    }
    if snapshot.mode == SnapshotMode::Json {
        if let (Ok(prev), Ok(curr)) = (
            serde_json::from_str(&baseline.text),
            serde_json::from_str(&snapshot.text),
        ) {
            let json_changes = diff_json(&prev, &curr, &spec.ignore_json_paths);
            if !json_changes.is_empty() {
                changes.json = Some(json_changes);
            }
        }
    }
    event.summary = Some(summarize(
        &change,
        changes.fields.as_ref(),
        changes.json.as_deref(),
    ));

    // Attach the patch only when it does not overrun the limit on its own.
    changes.patch = Some(unified_patch(&change.old, &change.new));
    event.changes = Some(changes);
    if serde_json::to_vec(&event)?.len() > deps.max_payload_bytes {
        if let Some(changes) = event.changes.as_mut() {
            changes.patch = None;
        }
    }

    let event = match limit_payload_bytes(&event, deps.max_payload_bytes) {
        Ok(event) => event,
        Err(e) => {
            // Undeliverable payload: treated like a failed delivery so the
            // baseline is retried next run.
            return fail_delivery(deps, spec, &state_key, &mut meta, events, None, e).await;
        }
    };

    // 9. Deliver, then advance the baseline only on success.
    if spec.webhook_urls.is_empty() {
        // Nothing to deliver; the event lands in the dataset and the
        // baseline advances.
        events.push(event);
        deps.store.save_snapshot(&state_key, &snapshot).await?;
        deps.store
            .append_history(&state_key, HistoryEntry::from_snapshot(&snapshot))
            .await?;
        meta.last_run_at = Some(Utc::now());
        meta.last_outcome = Some(TargetOutcome::ChangeDelivered);
        meta.last_success_hash = Some(snapshot.content_hash.clone());
        meta.last_success_at = Some(snapshot.fetched_at);
        deps.store.save_meta(&state_key, &meta).await?;

        let mut result = TargetResult::new(&spec.url, TargetOutcome::ChangeDelivered);
        result.events = events;
        result.fetch_metrics = Some(metrics);
        result.webhook_delivered = true;
        return Ok(result);
    }

    let payload = serde_json::to_value(&event)?;
    let report = deps
        .deliverer
        .deliver(&event.event_id, &payload, &spec.webhook_urls)
        .await;

    let webhook_attempts: u64 = report.results.iter().map(|r| r.attempts as u64).sum();
    let webhook_duration_ms: u64 = report.results.iter().map(|r| r.duration_ms).sum();

    if report.ok {
        info!(
            url = %redact_url(&spec.url),
            event_id = %event.event_id,
            "change delivered"
        );
        events.push(event);
        deps.store.save_snapshot(&state_key, &snapshot).await?;
        deps.store
            .append_history(&state_key, HistoryEntry::from_snapshot(&snapshot))
            .await?;
        deps.breaker.record_success(&mut meta);
        meta.last_run_at = Some(Utc::now());
        meta.last_outcome = Some(TargetOutcome::ChangeDelivered);
        meta.last_success_hash = Some(snapshot.content_hash.clone());
        meta.last_success_at = Some(snapshot.fetched_at);
        deps.store.save_meta(&state_key, &meta).await?;

        let mut result = TargetResult::new(&spec.url, TargetOutcome::ChangeDelivered);
        result.events = events;
        result.fetch_metrics = Some(metrics);
        result.webhook_attempts = webhook_attempts;
        result.webhook_duration_ms = webhook_duration_ms;
        result.webhook_delivered = true;
        Ok(result)
    } else {
        // Dead-letter every failed endpoint; the baseline stays put so the
        // next run recomputes the same diff and retries under the same id.
        for delivery in report.results.iter().filter(|r| !r.ok) {
            let preview = serde_json::to_string(&payload).unwrap_or_default();
            let record = DeadLetterRecord {
                webhook_url: delivery.url.clone(),
                target_url: spec.url.clone(),
                state_key: state_key.clone(),
                error: delivery.error.clone().unwrap_or_else(|| "delivery failed".into()),
                payload_preview: truncate_preview(preview),
                created_at: Utc::now(),
            };
            deps.store.push_dead_letter(&record).await?;
        }

        let error = AppError::WebhookDelivery {
            status: report.results.iter().find_map(|r| r.status),
            attempts: webhook_attempts as u32,
            duration_ms: webhook_duration_ms,
            message: report.first_error().unwrap_or_else(|| "delivery failed".into()),
        };
        let mut result =
            fail_delivery(deps, spec, &state_key, &mut meta, events, Some(&metrics), error)
                .await?;
        result.webhook_attempts = webhook_attempts;
        result.webhook_duration_ms = webhook_duration_ms;
        Ok(result)
    }
}

fn truncate_preview(mut preview: String) -> String {
    if preview.len() > DEAD_LETTER_PREVIEW_BYTES {
        let mut end = DEAD_LETTER_PREVIEW_BYTES;
        while end > 0 && !preview.is_char_boundary(end) {
            end -= 1;
        }
        preview.truncate(end);
    }
    preview
}

/// New snapshot carrying the previous content with refreshed validators.
fn refresh_snapshot(previous: &Snapshot, outcome: &FetchOutcome, metrics: &FetchMetrics) -> Snapshot {
    let mut refreshed = previous.clone();
    refreshed.fetched_at = Utc::now();
    if let Some(etag) = &outcome.etag {
        refreshed.etag = Some(etag.clone());
    }
    if let Some(last_modified) = &outcome.last_modified {
        refreshed.last_modified = Some(last_modified.clone());
    }
    refreshed.metrics = metrics.clone();
    refreshed
}

async fn store_first_baseline(
    deps: &PipelineDeps,
    spec: &TargetSpec,
    state_key: &str,
    meta: &mut TargetMeta,
    mut events: Vec<Event>,
    snapshot: Snapshot,
    metrics: FetchMetrics,
) -> Result<TargetResult> {
    deps.store.save_snapshot(state_key, &snapshot).await?;
    deps.store
        .append_history(state_key, HistoryEntry::from_snapshot(&snapshot))
        .await?;

    let mut event = Event::new(EventKind::BaselineStored, &spec.url, spec.selector.clone());
    event.event_id = change_event_id(
        EventKind::BaselineStored.as_str(),
        &spec.url,
        spec.selector.as_deref(),
        None,
        &snapshot.content_hash,
    );
    event.current = Some(fingerprint(&snapshot));
    event.summary = Some(format!("baseline stored ({} chars)", snapshot.text.chars().count()));

    let mut result = TargetResult::new(&spec.url, TargetOutcome::BaselineStored);

    if spec.baseline_mode == BaselineMode::Notify && !spec.webhook_urls.is_empty() {
        let payload = serde_json::to_value(&event)?;
        let report = deps
            .deliverer
            .deliver(&event.event_id, &payload, &spec.webhook_urls)
            .await;
        result.webhook_attempts = report.results.iter().map(|r| r.attempts as u64).sum();
        result.webhook_duration_ms = report.results.iter().map(|r| r.duration_ms).sum();
        if report.ok {
            deps.breaker.record_success(meta);
            result.webhook_delivered = true;
        } else {
            deps.breaker.record_failure(meta, Utc::now());
            result.webhook_failed = true;
            push_webhook_failed_event(deps, spec, &mut events, &report.first_error());
        }
    }

    events.push(event);

    meta.last_run_at = Some(Utc::now());
    meta.last_outcome = Some(TargetOutcome::BaselineStored);
    meta.last_success_hash = Some(snapshot.content_hash.clone());
    meta.last_success_at = Some(snapshot.fetched_at);
    deps.store.save_meta(state_key, meta).await?;

    result.events = events;
    result.fetch_metrics = Some(metrics);
    Ok(result)
}

async fn finish_no_change(
    deps: &PipelineDeps,
    spec: &TargetSpec,
    state_key: &str,
    meta: &mut TargetMeta,
    mut events: Vec<Event>,
    snapshot: Snapshot,
    metrics: FetchMetrics,
) -> Result<TargetResult> {
    // Refresh the stored snapshot (new validators, new fetched_at); the
    // content hash is unchanged by construction.
    deps.store.save_snapshot(state_key, &snapshot).await?;

    let mut event = Event::new(EventKind::NoChange, &spec.url, spec.selector.clone());
    event.event_id = run_scoped_event_id(
        EventKind::NoChange.as_str(),
        &deps.run_id,
        &spec.url,
        spec.selector.as_deref(),
        Some(&snapshot.content_hash),
        None,
    );
    event.current = Some(fingerprint(&snapshot));

    let mut result = TargetResult::new(&spec.url, TargetOutcome::NoChange);

    // Optional heartbeat, debounced so a frequent schedule does not spam.
    if deps.notify_on_no_change && !spec.webhook_urls.is_empty() {
        let now = Utc::now();
        let debounced = meta
            .no_change_notified_at
            .map(|at| now - at < ChronoDuration::seconds(deps.notify_debounce_secs as i64))
            .unwrap_or(false);
        if !debounced && !deps.breaker.is_open(meta, now) {
            let payload = serde_json::to_value(&event)?;
            let report = deps
                .deliverer
                .deliver(&event.event_id, &payload, &spec.webhook_urls)
                .await;
            result.webhook_attempts = report.results.iter().map(|r| r.attempts as u64).sum();
            result.webhook_duration_ms = report.results.iter().map(|r| r.duration_ms).sum();
            if report.ok {
                deps.breaker.record_success(meta);
                meta.no_change_notified_at = Some(now);
                result.webhook_delivered = true;
            } else {
                deps.breaker.record_failure(meta, now);
                result.webhook_failed = true;
                push_webhook_failed_event(deps, spec, &mut events, &report.first_error());
            }
        }
    }

    events.push(event);

    meta.last_run_at = Some(Utc::now());
    meta.last_outcome = Some(TargetOutcome::NoChange);
    meta.last_success_hash = Some(snapshot.content_hash.clone());
    meta.last_success_at = Some(snapshot.fetched_at);
    deps.store.save_meta(state_key, meta).await?;

    result.events = events;
    result.fetch_metrics = Some(metrics);
    Ok(result)
}

fn push_webhook_failed_event(
    deps: &PipelineDeps,
    spec: &TargetSpec,
    events: &mut Vec<Event>,
    first_error: &Option<String>,
) {
    let mut event = Event::new(EventKind::WebhookFailed, &spec.url, spec.selector.clone());
    event.event_id = run_scoped_event_id(
        EventKind::WebhookFailed.as_str(),
        &deps.run_id,
        &spec.url,
        spec.selector.as_deref(),
        None,
        first_error.as_deref(),
    );
    event.error = Some(ErrorInfo {
        name: "WebhookDeliveryError".into(),
        message: first_error.clone().unwrap_or_else(|| "delivery failed".into()),
        status_code: None,
        attempts: None,
        duration_ms: None,
    });
    events.push(event);
}

/// Fetch/normalize failure: emit FETCH_FAILED, optionally notify (debounced),
/// never touch the baseline.
async fn fail_fetch(
    deps: &PipelineDeps,
    spec: &TargetSpec,
    state_key: &str,
    meta: &mut TargetMeta,
    mut events: Vec<Event>,
    error: AppError,
    attempts: u32,
) -> Result<TargetResult> {
    let info = error_info(&error, Some(attempts), None, deps, spec);
    let signature = failure_signature(&info);

    let mut event = Event::new(EventKind::FetchFailed, &spec.url, spec.selector.clone());
    event.event_id = run_scoped_event_id(
        EventKind::FetchFailed.as_str(),
        &deps.run_id,
        &spec.url,
        spec.selector.as_deref(),
        None,
        Some(&signature),
    );
    event.error = Some(info);

    let mut result = TargetResult::new(&spec.url, TargetOutcome::FetchFailed);

    if deps.notify_on_fetch_failure && !spec.webhook_urls.is_empty() {
        let now = Utc::now();
        let same_failure = meta.fetch_failure_signature.as_deref() == Some(signature.as_str());
        let recently = meta
            .fetch_failure_notified_at
            .map(|at| now - at < ChronoDuration::seconds(deps.notify_debounce_secs as i64))
            .unwrap_or(false);
        let debounced = same_failure && recently;

        if !debounced && !deps.breaker.is_open(meta, now) {
            let payload = serde_json::to_value(&event)?;
            let report = deps
                .deliverer
                .deliver(&event.event_id, &payload, &spec.webhook_urls)
                .await;
            result.webhook_attempts = report.results.iter().map(|r| r.attempts as u64).sum();
            result.webhook_duration_ms = report.results.iter().map(|r| r.duration_ms).sum();
            if report.ok {
                deps.breaker.record_success(meta);
                meta.fetch_failure_signature = Some(signature);
                meta.fetch_failure_notified_at = Some(now);
                result.webhook_delivered = true;
            } else {
                deps.breaker.record_failure(meta, now);
                result.webhook_failed = true;
                push_webhook_failed_event(deps, spec, &mut events, &report.first_error());
            }
        }
    }

    events.push(event);

    meta.last_run_at = Some(Utc::now());
    meta.last_outcome = Some(TargetOutcome::FetchFailed);
    deps.store.save_meta(state_key, meta).await?;

    result.events = events;
    Ok(result)
}

/// Delivery failure for a detected change: record meta, trip the breaker,
/// emit WEBHOOK_FAILED; the baseline stays put.
async fn fail_delivery(
    deps: &PipelineDeps,
    spec: &TargetSpec,
    state_key: &str,
    meta: &mut TargetMeta,
    mut events: Vec<Event>,
    metrics: Option<&FetchMetrics>,
    error: AppError,
) -> Result<TargetResult> {
    deps.breaker.record_failure(meta, Utc::now());

    let info = error_info(&error, None, None, deps, spec);
    let mut event = Event::new(EventKind::WebhookFailed, &spec.url, spec.selector.clone());
    event.event_id = run_scoped_event_id(
        EventKind::WebhookFailed.as_str(),
        &deps.run_id,
        &spec.url,
        spec.selector.as_deref(),
        None,
        Some(&info.message),
    );
    event.error = Some(info);
    events.push(event);

    meta.last_run_at = Some(Utc::now());
    meta.last_outcome = Some(TargetOutcome::WebhookFailed);
    deps.store.save_meta(state_key, meta).await?;

    let mut result = TargetResult::new(&spec.url, TargetOutcome::WebhookFailed);
    result.events = events;
    result.fetch_metrics = metrics.cloned();
    result.webhook_failed = true;
    Ok(result)
}
