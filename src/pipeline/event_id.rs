// src/pipeline/event_id.rs

//! Deterministic event identifiers.
//!
//! Two id schemes:
//! - v1 for `CHANGE_DETECTED` / `BASELINE_STORED`: a pure function of the
//!   semantic transition, so retries and re-runs of the same transition carry
//!   the same id (consumers deduplicate on it).
//! - v2 for `NO_CHANGE` / `FETCH_FAILED`: additionally keyed by the run id,
//!   so heartbeats are not collapsed across runs.

use serde_json::{json, Value};

use crate::models::snapshot::sha256_hex;

/// Canonical JSON encoding: object keys sorted recursively, no whitespace.
/// Permuting input key order cannot change the output bytes.
pub fn stable_stringify(value: &Value) -> String {
    let mut out = String::new();
    write_stable(value, &mut out);
    out
}

fn write_stable(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_stable(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_stable(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// v1 id: identical for every emission of the same content transition.
pub fn change_event_id(
    event: &str,
    url: &str,
    selector: Option<&str>,
    previous_hash: Option<&str>,
    current_hash: &str,
) -> String {
    let encoded = stable_stringify(&json!({
        "v": 1,
        "event": event,
        "url": url,
        "selector": selector,
        "previousHash": previous_hash,
        "currentHash": current_hash,
    }));
    sha256_hex(&encoded)
}

/// v2 id: unique per run (or per debounced emission via `signature`).
pub fn run_scoped_event_id(
    event: &str,
    run_id: &str,
    url: &str,
    selector: Option<&str>,
    current_hash: Option<&str>,
    signature: Option<&str>,
) -> String {
    let encoded = stable_stringify(&json!({
        "v": 2,
        "event": event,
        "runId": run_id,
        "url": url,
        "selector": selector,
        "currentHash": current_hash,
        "signature": signature,
    }));
    sha256_hex(&encoded)
}
