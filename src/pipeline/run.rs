// src/pipeline/run.rs

//! The run orchestrator: fans targets through a bounded worker pool and
//! emits the RUN_SUMMARY.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use rand::Rng;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::{AppError, Result};
use crate::models::meta::{FetchAggregate, WebhookAggregate};
use crate::models::{Event, EventKind, RunConfig, RunSummary, TargetSpec};
use crate::pipeline::event_id::run_scoped_event_id;
use crate::pipeline::target::{process_target, PipelineDeps, TargetResult};
use crate::storage::StateStore;
use crate::utils::redact::redact_url;

/// Outcome of a monitor run.
pub struct RunReport {
    pub summary: RunSummary,
    pub results: Vec<TargetResult>,
}

/// Resolve the target list out of the configuration.
pub fn resolve_targets(config: &RunConfig) -> Result<Vec<TargetSpec>> {
    let mut overrides = config.targets.clone();
    if let Some(url) = &config.target_url {
        overrides.insert(
            0,
            crate::models::TargetOverride {
                url: url.clone(),
                ..Default::default()
            },
        );
    }

    if overrides.is_empty() {
        return Err(AppError::config("no targets configured"));
    }

    Ok(overrides
        .iter()
        .map(|t| TargetSpec::resolve(config, t))
        .collect())
}

/// Run one monitoring tick over every target.
pub async fn run_monitor(
    config: &RunConfig,
    deps: Arc<PipelineDeps>,
    store: Arc<StateStore>,
) -> Result<RunReport> {
    let targets = resolve_targets(config)?;

    if config.schedule_jitter_ms > 0 {
        let jitter = rand::rng().random_range(0..=config.schedule_jitter_ms);
        tokio::time::sleep(Duration::from_millis(jitter)).await;
    }

    info!(targets = targets.len(), run_id = %deps.run_id, "monitor run starting");

    let results = Arc::new(Mutex::new(Vec::with_capacity(targets.len())));
    let concurrency = config.max_concurrency.max(1);

    stream::iter(targets)
        .for_each_concurrent(concurrency, |spec| {
            let results = Arc::clone(&results);
            let deps = Arc::clone(&deps);
            async move {
                let result = process_target(&deps, &spec).await;
                results.lock().await.push(result);
            }
        })
        .await;

    let results = Arc::try_unwrap(results)
        .map_err(|_| AppError::store("run results still shared"))?
        .into_inner();

    // Persist every per-target event into the result dataset.
    for result in &results {
        for event in &result.events {
            store.append_event(event).await?;
        }
    }

    let summary = build_summary(config, &deps.run_id, &results);
    let mut summary_event = Event::new(EventKind::RunSummary, String::new(), None);
    summary_event.event_id = run_scoped_event_id(
        EventKind::RunSummary.as_str(),
        &deps.run_id,
        "",
        None,
        None,
        None,
    );
    summary_event.artifacts = Some(serde_json::to_value(&summary)?);
    summary_event.summary = Some(format!(
        "{} target(s): {}",
        summary.targets,
        summary
            .outcomes
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ")
    ));
    store.append_event(&summary_event).await?;

    info!(
        run_id = %deps.run_id,
        targets = summary.targets,
        failing = summary.failing_targets.len(),
        "monitor run complete"
    );

    Ok(RunReport { summary, results })
}

fn build_summary(config: &RunConfig, run_id: &str, results: &[TargetResult]) -> RunSummary {
    let mut outcomes: BTreeMap<String, u32> = BTreeMap::new();
    let mut fetch = FetchAggregate::default();
    let mut webhooks = WebhookAggregate::default();
    let mut failing_targets = Vec::new();

    for result in results {
        *outcomes.entry(result.outcome.as_str().to_string()).or_insert(0) += 1;

        if let Some(metrics) = &result.fetch_metrics {
            fetch.requests += 1;
            fetch.bytes += metrics.bytes;
            fetch.duration_ms += metrics.duration_ms;
            fetch.attempts += metrics.attempts as u64;
        }

        webhooks.attempts += result.webhook_attempts;
        webhooks.duration_ms += result.webhook_duration_ms;
        if result.webhook_delivered {
            webhooks.deliveries += 1;
        }
        if result.webhook_failed {
            webhooks.failures += 1;
        }

        if result.outcome.is_failure() {
            failing_targets.push(if config.redact_logs {
                redact_url(&result.url)
            } else {
                result.url.clone()
            });
        }
    }

    RunSummary {
        run_id: run_id.to_string(),
        targets: results.len(),
        outcomes,
        fetch,
        webhooks,
        failing_targets,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_single_target_url() {
        let config: RunConfig =
            serde_json::from_str(r#"{"mode":"monitor","target_url":"https://example.com/"}"#)
                .unwrap();
        let targets = resolve_targets(&config).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].url, "https://example.com/");
    }

    #[test]
    fn test_resolve_multi_targets() {
        let config: RunConfig = serde_json::from_str(
            r##"{"mode":"monitor","targets":[
                {"url":"https://a.example.com/"},
                {"url":"https://b.example.com/","selector":"#b"}
            ]}"##,
        )
        .unwrap();
        let targets = resolve_targets(&config).unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[1].selector.as_deref(), Some("#b"));
    }

    #[test]
    fn test_no_targets_is_fatal() {
        let config: RunConfig = serde_json::from_str(r#"{"mode":"monitor"}"#).unwrap();
        assert!(resolve_targets(&config).is_err());
    }
}


