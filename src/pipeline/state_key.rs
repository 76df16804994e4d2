// src/pipeline/state_key.rs

//! Baseline slot identifiers.
//!
//! The current-generation key hashes every input that affects snapshot
//! semantics, so a reconfigured monitor re-baselines instead of reporting
//! false diffs. The legacy key (URL + selector only) is still computed and
//! consulted read-only so pre-existing baselines migrate forward.

use serde_json::json;

use crate::models::snapshot::sha256_hex;
use crate::models::TargetSpec;
use crate::pipeline::event_id::stable_stringify;

/// Key length: 32 hex chars (truncated SHA-256).
const KEY_HEX_LEN: usize = 32;

fn truncated_hash(encoded: &str) -> String {
    let mut digest = sha256_hex(encoded);
    digest.truncate(KEY_HEX_LEN);
    digest
}

/// Current-generation state key over all snapshot-affecting inputs.
pub fn current_state_key(spec: &TargetSpec) -> String {
    let cookies: Vec<serde_json::Value> = spec
        .cookies
        .iter()
        .map(|c| json!({"name": c.name, "domain": c.domain, "path": c.path}))
        .collect();

    let body_hash = spec.body.as_deref().map(sha256_hex);

    let encoded = stable_stringify(&json!({
        "v": 2,
        "url": spec.url,
        "selector": spec.selector,
        "renderingMode": spec.rendering_mode,
        "waitForSelector": spec.wait_for_selector,
        "waitMs": spec.wait_ms,
        "headers": spec.request_headers,
        "method": spec.method,
        "bodyHash": body_hash,
        "cookies": cookies,
        "robotsMode": spec.robots_mode,
        "blockPageRegexes": spec.block_page_regexes,
        "aggregation": spec.selector_aggregation_mode,
        "whitespace": spec.whitespace_mode,
        "unicode": spec.unicode_normalization,
        "fields": spec.fields,
        "ignoreJsonPaths": spec.ignore_json_paths,
        "ignoreSelectors": spec.ignore_selectors,
        "ignoreAttributes": spec.ignore_attributes,
        "ignoreRegexes": spec.ignore_regexes,
    }));

    truncated_hash(&encoded)
}

/// Legacy key over (URL, selector) only; read for migration, never written.
pub fn legacy_state_key(url: &str, selector: Option<&str>) -> String {
    let encoded = stable_stringify(&json!({
        "v": 1,
        "url": url,
        "selector": selector,
    }));
    truncated_hash(&encoded)
}
