// src/pipeline/diff.rs

//! Diff calculation for change events.
//!
//! Computes the difference between the baseline and the current snapshot:
//! whole-text change with an optional numeric delta, per-field changes for
//! fields mode, a structural JSON diff for JSON mode, a change-ratio
//! heuristic for noise suppression, and a unified patch for human readers.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::{FieldChange, JsonChange, JsonOp, Snapshot, TextChange};

/// Texts longer than this never get a numeric delta.
const DELTA_MAX_CHARS: usize = 64;

fn number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("static regex parses"))
}

/// First parseable number in a short text.
fn leading_number(text: &str) -> Option<f64> {
    if text.chars().count() > DELTA_MAX_CHARS {
        return None;
    }
    number_regex()
        .find(text)
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

/// Numeric delta between two short texts, when both contain a number.
pub fn numeric_delta(old: &str, new: &str) -> Option<f64> {
    match (leading_number(old), leading_number(new)) {
        (Some(prev), Some(curr)) => Some(curr - prev),
        _ => None,
    }
}

/// Whole-text change between two snapshots; `None` when hashes are equal.
pub fn compute_text_change(previous: &Snapshot, current: &Snapshot) -> Option<TextChange> {
    if previous.content_hash == current.content_hash {
        return None;
    }
    Some(TextChange {
        old: previous.text.clone(),
        new: current.text.clone(),
        delta: numeric_delta(&previous.text, &current.text),
    })
}

/// Approximate change ratio via common-prefix/suffix trimming.
///
/// Returns `(changed_old + changed_new) / (|old| + |new|)`, and 0 when the
/// inputs are equal or both empty.
pub fn approx_change_ratio(old: &str, new: &str) -> f64 {
    if old == new {
        return 0.0;
    }
    let old_chars: Vec<char> = old.chars().collect();
    let new_chars: Vec<char> = new.chars().collect();
    let total = old_chars.len() + new_chars.len();
    if total == 0 {
        return 0.0;
    }

    let mut prefix = 0usize;
    let max_prefix = old_chars.len().min(new_chars.len());
    while prefix < max_prefix && old_chars[prefix] == new_chars[prefix] {
        prefix += 1;
    }

    let mut suffix = 0usize;
    let max_suffix = max_prefix - prefix;
    while suffix < max_suffix
        && old_chars[old_chars.len() - 1 - suffix] == new_chars[new_chars.len() - 1 - suffix]
    {
        suffix += 1;
    }

    let changed_old = old_chars.len() - prefix - suffix;
    let changed_new = new_chars.len() - prefix - suffix;
    (changed_old + changed_new) as f64 / total as f64
}

/// Escape one reference token per RFC 6901.
fn escape_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn path_is_ignored(path: &str, ignore: &[String]) -> bool {
    ignore
        .iter()
        .any(|p| path == p || path.starts_with(&format!("{p}/")))
}

/// Structural JSON diff with RFC 6901 paths, sorted by path.
///
/// Object keys are visited in sorted order; arrays compare by index with
/// add/remove at the tail on length mismatch. Subtrees at or below an ignore
/// pointer never appear in the output.
pub fn diff_json(previous: &Value, current: &Value, ignore: &[String]) -> Vec<JsonChange> {
    let mut changes = Vec::new();
    diff_value(previous, current, String::new(), ignore, &mut changes);
    changes.sort_by(|a, b| a.path.cmp(&b.path));
    changes
}

fn diff_value(
    previous: &Value,
    current: &Value,
    path: String,
    ignore: &[String],
    out: &mut Vec<JsonChange>,
) {
    if path_is_ignored(&path, ignore) {
        return;
    }
    match (previous, current) {
        (Value::Object(prev), Value::Object(curr)) => {
            let keys: BTreeSet<&String> = prev.keys().chain(curr.keys()).collect();
            for key in keys {
                let child_path = format!("{path}/{}", escape_token(key));
                match (prev.get(key), curr.get(key)) {
                    (Some(p), Some(c)) => diff_value(p, c, child_path, ignore, out),
                    (Some(p), None) => push_change(out, child_path, JsonOp::Remove, Some(p), None, ignore),
                    (None, Some(c)) => push_change(out, child_path, JsonOp::Add, None, Some(c), ignore),
                    (None, None) => {}
                }
            }
        }
        (Value::Array(prev), Value::Array(curr)) => {
            let shared = prev.len().min(curr.len());
            for index in 0..shared {
                let child_path = format!("{path}/{index}");
                diff_value(&prev[index], &curr[index], child_path, ignore, out);
            }
            for (index, item) in prev.iter().enumerate().skip(shared) {
                let child_path = format!("{path}/{index}");
                push_change(out, child_path, JsonOp::Remove, Some(item), None, ignore);
            }
            for (index, item) in curr.iter().enumerate().skip(shared) {
                let child_path = format!("{path}/{index}");
                push_change(out, child_path, JsonOp::Add, None, Some(item), ignore);
            }
        }
        (p, c) => {
            if p != c {
                push_change(out, path, JsonOp::Replace, Some(p), Some(c), ignore);
            }
        }
    }
}

fn push_change(
    out: &mut Vec<JsonChange>,
    path: String,
    op: JsonOp,
    old: Option<&Value>,
    new: Option<&Value>,
    ignore: &[String],
) {
    if path_is_ignored(&path, ignore) {
        return;
    }
    out.push(JsonChange {
        path,
        op,
        old: old.cloned(),
        new: new.cloned(),
    });
}

fn coerce_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Per-field diff of two fields-mode texts (stable stringified maps).
pub fn compute_fields_change(
    previous_text: &str,
    current_text: &str,
) -> Result<BTreeMap<String, FieldChange>> {
    let previous: Value = serde_json::from_str(previous_text)?;
    let current: Value = serde_json::from_str(current_text)?;
    let (previous, current) = match (previous.as_object(), current.as_object()) {
        (Some(p), Some(c)) => (p.clone(), c.clone()),
        _ => {
            return Err(AppError::validation(
                "fields snapshots must be JSON objects",
            ))
        }
    };

    let keys: BTreeSet<&String> = previous.keys().chain(current.keys()).collect();
    let mut changes = BTreeMap::new();

    for key in keys {
        let old = previous.get(key).map(coerce_string).unwrap_or_default();
        let new = current.get(key).map(coerce_string).unwrap_or_default();
        if old == new {
            continue;
        }
        let delta = numeric_delta(&old, &new);
        changes.insert(key.clone(), FieldChange { old, new, delta });
    }

    Ok(changes)
}

/// Short human line describing a change.
pub fn summarize(
    change: &TextChange,
    fields: Option<&BTreeMap<String, FieldChange>>,
    json: Option<&[JsonChange]>,
) -> String {
    if let Some(fields) = fields {
        if !fields.is_empty() {
            let parts: Vec<String> = fields
                .iter()
                .take(3)
                .map(|(name, c)| format!("{name}: {} -> {}", c.old, c.new))
                .collect();
            let suffix = if fields.len() > 3 {
                format!(" (+{} more)", fields.len() - 3)
            } else {
                String::new()
            };
            return format!("{}{}", parts.join(", "), suffix);
        }
    }

    if let Some(json) = json {
        if !json.is_empty() {
            let paths: Vec<&str> = json.iter().take(3).map(|c| c.path.as_str()).collect();
            let suffix = if json.len() > 3 {
                format!(" (+{} more)", json.len() - 3)
            } else {
                String::new()
            };
            return format!("{} change(s): {}{}", json.len(), paths.join(", "), suffix);
        }
    }

    match change.delta {
        Some(delta) => format!("content changed (delta {delta})"),
        None => {
            let ratio = approx_change_ratio(&change.old, &change.new);
            format!("content changed (~{:.0}% different)", ratio * 100.0)
        }
    }
}

/// Minimal unified diff: one hunk around the changed line range.
pub fn unified_patch(old: &str, new: &str) -> String {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();

    let mut prefix = 0usize;
    let max_prefix = old_lines.len().min(new_lines.len());
    while prefix < max_prefix && old_lines[prefix] == new_lines[prefix] {
        prefix += 1;
    }

    let mut suffix = 0usize;
    let max_suffix = max_prefix - prefix;
    while suffix < max_suffix
        && old_lines[old_lines.len() - 1 - suffix] == new_lines[new_lines.len() - 1 - suffix]
    {
        suffix += 1;
    }

    let old_changed = &old_lines[prefix..old_lines.len() - suffix];
    let new_changed = &new_lines[prefix..new_lines.len() - suffix];

    let mut patch = String::from("--- previous\n+++ current\n");
    patch.push_str(&format!(
        "@@ -{},{} +{},{} @@\n",
        prefix + 1,
        old_changed.len(),
        prefix + 1,
        new_changed.len()
    ));
    for line in old_changed {
        patch.push('-');
        patch.push_str(line);
        patch.push('\n');
    }
    for line in new_changed {
        patch.push('+');
        patch.push_str(line);
        patch.push('\n');
    }
    patch
}
