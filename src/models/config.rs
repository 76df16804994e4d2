// src/models/config.rs

//! The run configuration document.
//!
//! A JSON-shaped document with enumerated options; unknown top-level keys are
//! rejected. Every option except `mode` has a default.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Execution mode for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Monitor,
    ReplayDeadLetter,
}

/// Fetch backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RenderingMode {
    #[default]
    Static,
    Playwright,
}

/// How multiple selector matches are folded into one text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMode {
    #[default]
    All,
    First,
}

/// Whitespace handling after extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WhitespaceMode {
    #[default]
    Collapse,
    PreserveLines,
}

/// robots.txt handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RobotsMode {
    #[default]
    Ignore,
    Respect,
}

/// What to do when the normalized text is empty or too short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmptySnapshotPolicy {
    #[default]
    Error,
    Ignore,
    TreatAsChange,
}

/// Whether storing the first baseline also notifies webhooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BaselineMode {
    #[default]
    Silent,
    Notify,
}

/// Webhook fan-out success criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    #[default]
    All,
    Any,
}

/// One field-extraction rule: a named selector plus optional attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attr: Option<String>,
}

/// A cookie applied to rendered-mode fetches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieSpec {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
}

fn default_cookie_path() -> String {
    "/".to_string()
}

/// Per-target overrides layered on top of the run-level options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetOverride {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_json_paths: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_selectors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_attributes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_regexes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_change_ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_urls: Option<Vec<String>>,
}

/// Root configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub mode: Mode,

    // --- Targets ---
    #[serde(default)]
    pub target_url: Option<String>,
    #[serde(default)]
    pub targets: Vec<TargetOverride>,

    // --- Fetching ---
    #[serde(default)]
    pub rendering_mode: RenderingMode,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_method")]
    pub request_method: String,
    #[serde(default)]
    pub request_body: Option<String>,
    #[serde(default)]
    pub request_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub cookies: Vec<CookieSpec>,
    #[serde(default)]
    pub proxy_url: Option<String>,
    #[serde(default)]
    pub robots_mode: RobotsMode,

    // --- Rendered mode ---
    #[serde(default)]
    pub browserless_url: Option<String>,
    #[serde(default)]
    pub browserless_token: Option<String>,
    #[serde(default)]
    pub wait_for_selector: Option<String>,
    #[serde(default)]
    pub wait_ms: Option<u64>,
    #[serde(default)]
    pub block_resource_types: Vec<String>,

    // --- Extraction ---
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub ignore_json_paths: Vec<String>,

    // --- Noise filters ---
    #[serde(default)]
    pub ignore_selectors: Vec<String>,
    #[serde(default)]
    pub ignore_attributes: Vec<String>,
    #[serde(default)]
    pub ignore_regexes: Vec<String>,
    #[serde(default)]
    pub ignore_regex_presets: Vec<String>,
    #[serde(default)]
    pub block_page_regexes: Vec<String>,

    // --- Text normalization ---
    #[serde(default)]
    pub selector_aggregation_mode: AggregationMode,
    #[serde(default)]
    pub whitespace_mode: WhitespaceMode,
    #[serde(default)]
    pub unicode_normalization: bool,

    // --- Hard limits ---
    #[serde(default = "default_max_content_bytes")]
    pub max_content_bytes: u64,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: u32,
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,

    // --- Fetch timing ---
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_fetch_connect_timeout_secs")]
    pub fetch_connect_timeout_secs: u64,
    #[serde(default = "default_fetch_max_retries")]
    pub fetch_max_retries: u32,
    #[serde(default = "default_fetch_retry_backoff_ms")]
    pub fetch_retry_backoff_ms: u64,

    // --- Webhook delivery ---
    #[serde(default)]
    pub webhook_urls: Vec<String>,
    #[serde(default)]
    pub webhook_delivery_mode: DeliveryMode,
    #[serde(default = "default_webhook_method")]
    pub webhook_method: String,
    #[serde(default = "default_webhook_content_type")]
    pub webhook_content_type: String,
    #[serde(default)]
    pub webhook_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default = "default_webhook_timeout_secs")]
    pub webhook_timeout_secs: u64,

    // --- Webhook retries ---
    #[serde(default = "default_webhook_retry_max_retries")]
    pub webhook_retry_max_retries: u32,
    #[serde(default = "default_webhook_retry_backoff_ms")]
    pub webhook_retry_backoff_ms: u64,
    #[serde(default)]
    pub webhook_retry_max_total_time_ms: Option<u64>,
    #[serde(default)]
    pub webhook_retry_status_codes: Vec<u16>,

    // --- Circuit breaker ---
    #[serde(default = "default_true")]
    pub webhook_circuit_breaker_enabled: bool,
    #[serde(default = "default_webhook_circuit_failure_threshold")]
    pub webhook_circuit_failure_threshold: u32,
    #[serde(default = "default_webhook_circuit_cooldown_secs")]
    pub webhook_circuit_cooldown_secs: u64,

    // --- Pacing ---
    #[serde(default)]
    pub politeness_delay_ms: u64,
    #[serde(default)]
    pub politeness_jitter_ms: u64,
    #[serde(default)]
    pub schedule_jitter_ms: u64,

    // --- Worker pool ---
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    // --- Diff semantics ---
    #[serde(default)]
    pub baseline_mode: BaselineMode,
    #[serde(default)]
    pub reset_baseline: bool,
    #[serde(default)]
    pub min_text_length: usize,
    #[serde(default)]
    pub on_empty_snapshot: EmptySnapshotPolicy,
    #[serde(default)]
    pub min_change_ratio: f64,

    // --- Access control ---
    #[serde(default)]
    pub target_domain_allowlist: Vec<String>,
    #[serde(default)]
    pub target_domain_denylist: Vec<String>,
    #[serde(default)]
    pub webhook_domain_allowlist: Vec<String>,
    #[serde(default)]
    pub webhook_domain_denylist: Vec<String>,
    #[serde(default)]
    pub allow_localhost: bool,

    // --- Diagnostics ---
    #[serde(default)]
    pub redact_logs: bool,
    #[serde(default)]
    pub structured_logs: bool,
    #[serde(default)]
    pub debug: bool,

    // --- Heartbeats ---
    #[serde(default)]
    pub notify_on_no_change: bool,
    #[serde(default)]
    pub notify_on_fetch_failure: bool,
    #[serde(default = "default_fetch_failure_debounce_secs")]
    pub fetch_failure_debounce_secs: u64,

    // --- Storage ---
    #[serde(default = "default_store_dir")]
    pub store_dir: String,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    // --- Dead-letter replay ---
    #[serde(default = "default_replay_limit")]
    pub replay_limit: usize,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_true")]
    pub use_stored_webhook_url: bool,
}

fn default_true() -> bool {
    true
}

fn default_user_agent() -> String {
    concat!("sentinel/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_webhook_method() -> String {
    "POST".to_string()
}

fn default_max_content_bytes() -> u64 {
    5 * 1024 * 1024
}

fn default_max_redirects() -> u32 {
    5
}

fn default_max_payload_bytes() -> usize {
    256 * 1024
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_fetch_connect_timeout_secs() -> u64 {
    10
}

fn default_fetch_max_retries() -> u32 {
    2
}

fn default_fetch_retry_backoff_ms() -> u64 {
    500
}

fn default_webhook_content_type() -> String {
    "application/json".to_string()
}

fn default_webhook_timeout_secs() -> u64 {
    15
}

fn default_webhook_retry_max_retries() -> u32 {
    3
}

fn default_webhook_retry_backoff_ms() -> u64 {
    500
}

fn default_webhook_circuit_failure_threshold() -> u32 {
    3
}

fn default_webhook_circuit_cooldown_secs() -> u64 {
    300
}

fn default_max_concurrency() -> usize {
    4
}

fn default_fetch_failure_debounce_secs() -> u64 {
    3600
}

fn default_store_dir() -> String {
    "./data".to_string()
}

fn default_history_limit() -> usize {
    50
}

fn default_replay_limit() -> usize {
    100
}

impl RunConfig {
    /// Webhook method defaults to POST regardless of the fetch method.
    pub fn webhook_method_or_post(&self) -> String {
        if self.webhook_method.trim().is_empty() {
            "POST".to_string()
        } else {
            self.webhook_method.to_uppercase()
        }
    }

    /// Status codes that make a webhook attempt retryable.
    ///
    /// An empty configured list means the default policy: 429 plus all 5xx.
    pub fn webhook_retryable_status(&self, status: u16) -> bool {
        if self.webhook_retry_status_codes.is_empty() {
            status == 429 || (500..=599).contains(&status)
        } else {
            self.webhook_retry_status_codes.contains(&status)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_document_parses_with_defaults() {
        let config: RunConfig =
            serde_json::from_str(r#"{"mode":"monitor","target_url":"https://example.com/"}"#)
                .unwrap();
        assert_eq!(config.mode, Mode::Monitor);
        assert_eq!(config.rendering_mode, RenderingMode::Static);
        assert_eq!(config.max_redirects, 5);
        assert_eq!(config.max_concurrency, 4);
        assert!(config.webhook_circuit_breaker_enabled);
    }

    #[test]
    fn test_unknown_top_level_key_rejected() {
        let result: std::result::Result<RunConfig, _> =
            serde_json::from_str(r#"{"mode":"monitor","no_such_option":true}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_mode_is_required() {
        let result: std::result::Result<RunConfig, _> =
            serde_json::from_str(r#"{"target_url":"https://example.com/"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_webhook_retry_status_default_policy() {
        let config: RunConfig = serde_json::from_str(r#"{"mode":"monitor"}"#).unwrap();
        assert!(config.webhook_retryable_status(429));
        assert!(config.webhook_retryable_status(503));
        assert!(!config.webhook_retryable_status(404));
    }

    #[test]
    fn test_webhook_retry_status_explicit_list() {
        let config: RunConfig =
            serde_json::from_str(r#"{"mode":"monitor","webhook_retry_status_codes":[408]}"#)
                .unwrap();
        assert!(config.webhook_retryable_status(408));
        assert!(!config.webhook_retryable_status(503));
    }
}
