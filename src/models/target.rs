// src/models/target.rs

//! Per-target resolved configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::config::{
    AggregationMode, BaselineMode, CookieSpec, EmptySnapshotPolicy, FieldSpec, RenderingMode,
    RobotsMode, RunConfig, TargetOverride, WhitespaceMode,
};

/// One target's fully-resolved options: run-level policy with per-target
/// overrides applied. Immutable within a run. Every field here that affects
/// snapshot semantics participates in the state key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSpec {
    pub url: String,
    pub method: String,
    pub body: Option<String>,
    /// Lowercased header names, sorted by the BTreeMap ordering.
    pub request_headers: BTreeMap<String, String>,
    pub cookies: Vec<CookieSpec>,
    pub rendering_mode: RenderingMode,
    pub wait_for_selector: Option<String>,
    pub wait_ms: Option<u64>,
    pub robots_mode: RobotsMode,

    pub selector: Option<String>,
    pub selector_aggregation_mode: AggregationMode,
    pub fields: Vec<FieldSpec>,
    pub ignore_json_paths: Vec<String>,
    pub ignore_selectors: Vec<String>,
    pub ignore_attributes: Vec<String>,
    pub ignore_regexes: Vec<String>,
    pub block_page_regexes: Vec<String>,
    pub whitespace_mode: WhitespaceMode,
    pub unicode_normalization: bool,

    pub min_text_length: usize,
    pub on_empty_snapshot: EmptySnapshotPolicy,
    pub min_change_ratio: f64,
    pub baseline_mode: BaselineMode,

    pub webhook_urls: Vec<String>,
}

/// Named regex presets expanded into `ignore_regexes`.
///
/// Patterns target the usual page noise: timestamps, cache busters, session
/// and CSRF tokens, view counters.
pub fn ignore_regex_preset(name: &str) -> Option<&'static [&'static str]> {
    match name {
        "timestamps" => Some(&[
            r"\b\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}(:\d{2})?(\.\d+)?(Z|[+-]\d{2}:?\d{2})?\b",
            r"\b\d{10,13}\b",
        ]),
        "session_tokens" => Some(&[
            r"(?i)\b(sessionid|session_id|sid|jsessionid|phpsessid)=[A-Za-z0-9+/=_-]+",
            r"(?i)\bcsrf[_-]?token[\x22'=:\s]+[A-Za-z0-9+/=_-]+",
        ]),
        "uuids" => Some(&[
            r"\b[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}\b",
        ]),
        "cache_busters" => Some(&[r"(?i)[?&](v|ver|version|cb|cache|t|ts|_)=[A-Za-z0-9.]+"]),
        _ => None,
    }
}

impl TargetSpec {
    /// Resolve one target against the run-level configuration.
    pub fn resolve(run: &RunConfig, target: &TargetOverride) -> Self {
        let mut ignore_regexes = target
            .ignore_regexes
            .clone()
            .unwrap_or_else(|| run.ignore_regexes.clone());
        for preset in &run.ignore_regex_presets {
            if let Some(patterns) = ignore_regex_preset(preset) {
                ignore_regexes.extend(patterns.iter().map(|p| p.to_string()));
            }
        }

        let request_headers = run
            .request_headers
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.clone()))
            .collect();

        Self {
            url: target.url.clone(),
            method: run.request_method.to_uppercase(),
            body: run.request_body.clone(),
            request_headers,
            cookies: run.cookies.clone(),
            rendering_mode: run.rendering_mode,
            wait_for_selector: run.wait_for_selector.clone(),
            wait_ms: run.wait_ms,
            robots_mode: run.robots_mode,
            selector: target.selector.clone().or_else(|| run.selector.clone()),
            selector_aggregation_mode: run.selector_aggregation_mode,
            fields: target.fields.clone().unwrap_or_else(|| run.fields.clone()),
            ignore_json_paths: target
                .ignore_json_paths
                .clone()
                .unwrap_or_else(|| run.ignore_json_paths.clone()),
            ignore_selectors: target
                .ignore_selectors
                .clone()
                .unwrap_or_else(|| run.ignore_selectors.clone()),
            ignore_attributes: target
                .ignore_attributes
                .clone()
                .unwrap_or_else(|| run.ignore_attributes.clone()),
            ignore_regexes,
            block_page_regexes: run.block_page_regexes.clone(),
            whitespace_mode: run.whitespace_mode,
            unicode_normalization: run.unicode_normalization,
            min_text_length: run.min_text_length,
            on_empty_snapshot: run.on_empty_snapshot,
            min_change_ratio: target.min_change_ratio.unwrap_or(run.min_change_ratio),
            baseline_mode: run.baseline_mode,
            webhook_urls: target
                .webhook_urls
                .clone()
                .unwrap_or_else(|| run.webhook_urls.clone()),
        }
    }

    /// Host portion of the target URL, lowercased.
    pub fn host(&self) -> Option<String> {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
    }
}
