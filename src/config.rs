// src/config.rs

//! Configuration loading and validation.
//!
//! The run document is JSON; loading is strict (unknown top-level keys are
//! rejected by the model) and `validate_config` rejects documents that would
//! fail mid-run: unparseable URLs and selectors, bad regexes, out-of-range
//! numbers. The `validate` subcommand runs the same check standalone.

use std::io::Read;
use std::path::Path;

use scraper::Selector;

use crate::error::{AppError, Result};
use crate::models::target::ignore_regex_preset;
use crate::models::{Mode, RunConfig};
use crate::pipeline::resolve_targets;

/// Load the configuration document from a file path, or stdin for `-`.
pub fn load_config(path: &str) -> Result<RunConfig> {
    let raw = if path == "-" {
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        std::fs::read_to_string(Path::new(path))
            .map_err(|e| AppError::config(format!("cannot read config {path}: {e}")))?
    };

    let config: RunConfig = serde_json::from_str(&raw)
        .map_err(|e| AppError::config(format!("invalid config document: {e}")))?;
    Ok(config)
}

fn check_selector(raw: &str, context: &str) -> Result<()> {
    Selector::parse(raw)
        .map(|_| ())
        .map_err(|e| AppError::selector(raw, format!("{context}: {e:?}")))
}

fn check_regex(raw: &str, context: &str) -> Result<()> {
    regex::Regex::new(raw)
        .map(|_| ())
        .map_err(|e| AppError::validation(format!("{context} '{raw}': {e}")))
}

fn check_url(raw: &str, context: &str) -> Result<()> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| AppError::validation(format!("{context} '{raw}': {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(AppError::validation(format!(
            "{context} '{raw}': unsupported scheme '{other}'"
        ))),
    }
}

/// Reject documents that cannot possibly run.
pub fn validate_config(config: &RunConfig) -> Result<()> {
    if config.mode == Mode::Monitor {
        // Resolves and implicitly checks that at least one target exists.
        let targets = resolve_targets(config)?;
        for target in &targets {
            check_url(&target.url, "target URL")?;
            if let Some(selector) = &target.selector {
                check_selector(selector, "selector")?;
            }
            for raw in &target.ignore_selectors {
                check_selector(raw, "ignore_selectors entry")?;
            }
            for field in &target.fields {
                if field.name.trim().is_empty() {
                    return Err(AppError::validation("field with empty name"));
                }
                check_selector(&field.selector, "field selector")?;
            }
            for raw in &target.ignore_regexes {
                check_regex(raw, "ignore_regexes entry")?;
            }
            for raw in &target.block_page_regexes {
                check_regex(raw, "block_page_regexes entry")?;
            }
            for pointer in &target.ignore_json_paths {
                if !pointer.starts_with('/') {
                    return Err(AppError::validation(format!(
                        "ignore_json_paths entry '{pointer}' is not a JSON pointer"
                    )));
                }
            }
        }
    }

    for preset in &config.ignore_regex_presets {
        if ignore_regex_preset(preset).is_none() {
            return Err(AppError::validation(format!(
                "unknown ignore_regex_presets entry '{preset}'"
            )));
        }
    }

    for url in &config.webhook_urls {
        check_url(url, "webhook URL")?;
    }

    if !(0.0..=1.0).contains(&config.min_change_ratio) {
        return Err(AppError::validation(format!(
            "min_change_ratio {} outside [0, 1]",
            config.min_change_ratio
        )));
    }

    if config.max_concurrency == 0 {
        return Err(AppError::validation("max_concurrency must be at least 1"));
    }

    if config.max_redirects > 20 {
        return Err(AppError::validation("max_redirects above 20"));
    }

    reqwest::Method::from_bytes(config.request_method.as_bytes())
        .map_err(|_| AppError::validation(format!("invalid request_method '{}'", config.request_method)))?;
    reqwest::Method::from_bytes(config.webhook_method_or_post().as_bytes())
        .map_err(|_| AppError::validation(format!("invalid webhook_method '{}'", config.webhook_method)))?;

    Ok(())
}
