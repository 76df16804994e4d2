// src/main.rs

//! Sentinel CLI entry point.
//!
//! One invocation processes one tick: every configured target is fetched,
//! diffed against its baseline, and any change is delivered. Scheduling is
//! external; re-invoke from cron.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use rand::Rng;
use tracing::{info, warn};

use sentinel::config::{load_config, validate_config};
use sentinel::error::Result;
use sentinel::models::{Mode, RenderingMode, RunConfig};
use sentinel::pipeline::{
    run_monitor, run_replay, CircuitBreaker, CircuitBreakerConfig, PipelineDeps,
};
use sentinel::services::fetcher::FetchContext;
use sentinel::services::webhook::{DeliveryOptions, HttpTransport, WebhookDeliverer};
use sentinel::services::{Fetcher, RenderedFetcher, RobotsCache, StaticFetcher};
use sentinel::storage::{LocalStore, StateStore};
use sentinel::utils::retry::RetryPolicy;
use sentinel::utils::safety::is_hosted_runtime;
use sentinel::utils::{DomainPolicy, PolitenessGate, UrlSafetyGuard};

#[derive(Parser, Debug)]
#[command(name = "sentinel", version, about = "URL change monitor with webhook delivery")]
struct Cli {
    /// Path to the JSON configuration document ("-" for stdin)
    #[arg(short, long, default_value = "sentinel.json")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute one tick in the mode the config selects
    Run,
    /// Check the configuration document and exit
    Validate,
}

fn init_tracing(config: &RunConfig) {
    let filter = if config.debug { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    if config.structured_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .init();
    }
}

fn new_run_id() -> String {
    format!(
        "run-{}-{:08x}",
        chrono::Utc::now().timestamp(),
        rand::rng().random::<u32>()
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    init_tracing(&config);
    validate_config(&config)?;

    match cli.command {
        Command::Validate => {
            info!("configuration is valid");
            return Ok(());
        }
        Command::Run => {}
    }

    if config.allow_localhost && is_hosted_runtime() {
        warn!("allow_localhost requested but disabled on the hosted runtime");
    }

    let run_id = new_run_id();
    let store = Arc::new(StateStore::new(
        Arc::new(LocalStore::new(&config.store_dir)),
        config.history_limit,
    ));

    let safety = Arc::new(UrlSafetyGuard::new(config.allow_localhost));
    let webhook_domains = Arc::new(DomainPolicy::new(
        config.webhook_domain_allowlist.clone(),
        config.webhook_domain_denylist.clone(),
    ));
    let transport = Arc::new(HttpTransport::new(&config.user_agent)?);
    let deliverer = Arc::new(WebhookDeliverer::new(
        transport,
        Arc::clone(&safety),
        webhook_domains,
        DeliveryOptions::from_config(&config),
    ));

    match config.mode {
        Mode::ReplayDeadLetter => {
            let report = run_replay(&config, store, deliverer).await?;
            info!(
                scanned = report.scanned,
                delivered = report.delivered,
                failed = report.failed,
                skipped = report.skipped,
                invalid = report.invalid,
                "replay finished"
            );
            Ok(())
        }
        Mode::Monitor => {
            let fetcher: Arc<dyn Fetcher> = match config.rendering_mode {
                RenderingMode::Static => Arc::new(StaticFetcher::new(&config)?),
                RenderingMode::Playwright => Arc::new(RenderedFetcher::new(&config)?),
            };

            let fetch_ctx = Arc::new(FetchContext {
                safety: Arc::clone(&safety),
                domains: Arc::new(DomainPolicy::new(
                    config.target_domain_allowlist.clone(),
                    config.target_domain_denylist.clone(),
                )),
                politeness: Arc::new(PolitenessGate::new()),
                robots: Arc::new(RobotsCache::new(&config.user_agent)?),
                politeness_delay: Duration::from_millis(config.politeness_delay_ms),
                politeness_jitter: Duration::from_millis(config.politeness_jitter_ms),
            });

            let deps = Arc::new(PipelineDeps {
                fetcher,
                store: Arc::clone(&store),
                deliverer,
                fetch_ctx,
                breaker: CircuitBreaker::with_config(CircuitBreakerConfig {
                    enabled: config.webhook_circuit_breaker_enabled,
                    failure_threshold: config.webhook_circuit_failure_threshold,
                    cooldown_secs: config.webhook_circuit_cooldown_secs,
                }),
                fetch_retry: RetryPolicy::new(
                    config.fetch_max_retries,
                    Duration::from_millis(config.fetch_retry_backoff_ms),
                ),
                run_id: run_id.clone(),
                reset_baseline: config.reset_baseline,
                notify_on_no_change: config.notify_on_no_change,
                notify_on_fetch_failure: config.notify_on_fetch_failure,
                notify_debounce_secs: config.fetch_failure_debounce_secs,
                max_payload_bytes: config.max_payload_bytes,
                redact_logs: config.redact_logs,
            });

            let report = run_monitor(&config, deps, store).await?;
            for (outcome, count) in &report.summary.outcomes {
                info!(outcome = %outcome, count = *count, "run outcome");
            }
            // Per-target failures are reported through the dataset; only
            // fatal orchestrator errors change the exit code.
            Ok(())
        }
    }
}
