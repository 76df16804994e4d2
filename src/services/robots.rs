// src/services/robots.rs

//! robots.txt fetching, parsing, and per-host caching.
//!
//! Rules for the configured user-agent (falling back to `*`) are evaluated
//! with longest-pattern-wins semantics; `*` wildcards and `$` end anchors are
//! supported. A robots.txt that cannot be fetched fails open.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use crate::error::{AppError, Result};

const ROBOTS_TIMEOUT: Duration = Duration::from_secs(10);
const ROBOTS_MAX_BYTES: usize = 512 * 1024;

/// Parsed rules for one user-agent group.
#[derive(Debug, Default, Clone)]
pub struct RobotsRules {
    /// (allow, pattern) pairs in file order.
    rules: Vec<(bool, String)>,
}

/// Match one robots pattern against a path. Supports `*` and a trailing `$`.
fn pattern_matches(pattern: &str, path: &str) -> bool {
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(p) => (p, true),
        None => (pattern, false),
    };

    let parts: Vec<&str> = pattern.split('*').collect();
    let mut pos = 0usize;

    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !path[pos..].starts_with(part) {
                return false;
            }
            pos += part.len();
        } else {
            match path[pos..].find(part) {
                Some(found) => pos += found + part.len(),
                None => return false,
            }
        }
    }

    if anchored {
        // A trailing `*` absorbs the rest of the path.
        if parts.last().map(|p| p.is_empty()).unwrap_or(false) {
            return true;
        }
        pos == path.len()
    } else {
        true
    }
}

impl RobotsRules {
    /// Parse a robots.txt body, keeping the group that best matches
    /// `user_agent` (longest agent-token substring match; `*` as fallback).
    pub fn parse(content: &str, user_agent: &str) -> Self {
        let agent_token = user_agent
            .split('/')
            .next()
            .unwrap_or(user_agent)
            .to_lowercase();

        let mut groups: Vec<(Vec<String>, Vec<(bool, String)>)> = Vec::new();
        let mut current_agents: Vec<String> = Vec::new();
        let mut current_rules: Vec<(bool, String)> = Vec::new();
        let mut in_rules = false;

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let value = value.trim().to_string();

            match key.as_str() {
                "user-agent" => {
                    if in_rules {
                        groups.push((
                            std::mem::take(&mut current_agents),
                            std::mem::take(&mut current_rules),
                        ));
                        in_rules = false;
                    }
                    current_agents.push(value.to_lowercase());
                }
                "allow" | "disallow" => {
                    in_rules = true;
                    if !value.is_empty() {
                        current_rules.push((key == "allow", value));
                    }
                }
                _ => {}
            }
        }
        if !current_agents.is_empty() || !current_rules.is_empty() {
            groups.push((current_agents, current_rules));
        }

        // Pick the group whose agent token matches ours most specifically.
        let mut best: Option<(usize, &Vec<(bool, String)>)> = None;
        let mut fallback: Option<&Vec<(bool, String)>> = None;
        for (agents, rules) in &groups {
            for agent in agents {
                if agent == "*" {
                    fallback.get_or_insert(rules);
                } else if agent_token.contains(agent.as_str()) || agent.contains(&agent_token) {
                    let specificity = agent.len();
                    if best.map(|(s, _)| specificity > s).unwrap_or(true) {
                        best = Some((specificity, rules));
                    }
                }
            }
        }

        let rules = best
            .map(|(_, r)| r.clone())
            .or_else(|| fallback.cloned())
            .unwrap_or_default();

        Self { rules }
    }

    /// Whether a path (with query) may be fetched.
    pub fn allowed(&self, path: &str) -> bool {
        let mut verdict = true;
        let mut best_len = 0usize;

        for (allow, pattern) in &self.rules {
            if pattern_matches(pattern, path) {
                let len = pattern.len();
                // Longest match wins; on a tie, allow wins.
                if len > best_len || (len == best_len && *allow) {
                    best_len = len;
                    verdict = *allow;
                }
            }
        }

        verdict
    }
}

/// Per-host robots.txt cache for one run.
pub struct RobotsCache {
    client: reqwest::Client,
    user_agent: String,
    cache: Mutex<HashMap<String, Arc<RobotsRules>>>,
}

impl RobotsCache {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(ROBOTS_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            user_agent: user_agent.to_string(),
            cache: Mutex::new(HashMap::new()),
        })
    }

    async fn rules_for(&self, url: &Url) -> Arc<RobotsRules> {
        let origin = format!(
            "{}://{}",
            url.scheme(),
            url.host_str().unwrap_or_default()
        );

        let mut cache = self.cache.lock().await;
        if let Some(rules) = cache.get(&origin) {
            return Arc::clone(rules);
        }

        let robots_url = format!("{origin}/robots.txt");
        let rules = match self.client.get(&robots_url).send().await {
            Ok(response) if response.status().is_success() => {
                match response.text().await {
                    Ok(mut text) => {
                        text.truncate(ROBOTS_MAX_BYTES);
                        RobotsRules::parse(&text, &self.user_agent)
                    }
                    Err(_) => RobotsRules::default(),
                }
            }
            // Missing or unreachable robots.txt fails open.
            _ => {
                debug!(url = %robots_url, "robots.txt unavailable, failing open");
                RobotsRules::default()
            }
        };

        let rules = Arc::new(rules);
        cache.insert(origin, Arc::clone(&rules));
        rules
    }

    /// Fail with `RobotsDisallowed` when the URL's path is excluded.
    pub async fn check(&self, url: &Url) -> Result<()> {
        let rules = self.rules_for(url).await;
        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }

        if rules.allowed(&path) {
            Ok(())
        } else {
            Err(AppError::RobotsDisallowed {
                url: url.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
User-agent: *\n\
Disallow: /private/\n\
Allow: /private/ok\n\
Disallow: /tmp/*.bak\n\
Disallow: /exact$\n\
\n\
User-agent: sentinel\n\
Disallow: /sentinel-only/\n";

    #[test]
    fn test_wildcard_group_rules() {
        let rules = RobotsRules::parse(SAMPLE, "otherbot/1.0");
        assert!(!rules.allowed("/private/page"));
        assert!(rules.allowed("/public/page"));
    }

    #[test]
    fn test_longest_match_wins() {
        let rules = RobotsRules::parse(SAMPLE, "otherbot/1.0");
        assert!(rules.allowed("/private/ok/deeper"));
        assert!(!rules.allowed("/private/other"));
    }

    #[test]
    fn test_specific_agent_group_preferred() {
        let rules = RobotsRules::parse(SAMPLE, "sentinel/0.1");
        assert!(!rules.allowed("/sentinel-only/x"));
        // The specific group replaces the wildcard group entirely.
        assert!(rules.allowed("/private/page"));
    }

    #[test]
    fn test_star_wildcard_in_path() {
        let rules = RobotsRules::parse(SAMPLE, "otherbot/1.0");
        assert!(!rules.allowed("/tmp/old.bak"));
        assert!(rules.allowed("/tmp/old.txt"));
    }

    #[test]
    fn test_dollar_anchor() {
        let rules = RobotsRules::parse(SAMPLE, "otherbot/1.0");
        assert!(!rules.allowed("/exact"));
        assert!(rules.allowed("/exact/sub"));
    }

    #[test]
    fn test_empty_robots_allows_all() {
        let rules = RobotsRules::parse("", "anybot");
        assert!(rules.allowed("/anything"));
    }

    #[test]
    fn test_pattern_matcher() {
        assert!(pattern_matches("/a/*/c", "/a/b/c"));
        assert!(pattern_matches("/a", "/a/b"));
        assert!(!pattern_matches("/a$", "/a/b"));
        assert!(pattern_matches("/a$", "/a"));
        assert!(pattern_matches("/*.php", "/index.php"));
    }
}
