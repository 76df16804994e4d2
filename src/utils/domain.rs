// src/utils/domain.rs

//! Hostname allow/deny policy with wildcard-suffix matching.

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// A host allow/deny policy.
///
/// Patterns: exact (`example.com`), suffix wildcard (`*.example.com`, strict
/// subdomains only), or leading dot (`.example.com`, same semantics). The
/// denylist is evaluated before the allowlist; an empty allowlist admits any
/// host not denied. Errors cite the rule that matched (or the allowlist that
/// did not).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainPolicy {
    pub allowlist: Vec<String>,
    pub denylist: Vec<String>,
}

/// Match one pattern against a lowercased host.
fn pattern_matches(pattern: &str, host: &str) -> bool {
    let pattern = pattern.trim().to_lowercase();
    if pattern.is_empty() {
        return false;
    }

    if let Some(suffix) = pattern.strip_prefix("*.") {
        return host != suffix && host.ends_with(suffix) && {
            // Strict subdomain: the character before the suffix must be a dot.
            host.len() > suffix.len() && host.as_bytes()[host.len() - suffix.len() - 1] == b'.'
        };
    }
    if let Some(suffix) = pattern.strip_prefix('.') {
        return host != suffix
            && host.ends_with(suffix)
            && host.len() > suffix.len()
            && host.as_bytes()[host.len() - suffix.len() - 1] == b'.';
    }

    host == pattern
}

impl DomainPolicy {
    pub fn new(allowlist: Vec<String>, denylist: Vec<String>) -> Self {
        Self {
            allowlist,
            denylist,
        }
    }

    /// Check a host against the policy.
    pub fn check(&self, host: &str) -> Result<()> {
        let host = host.to_lowercase();

        for rule in &self.denylist {
            if pattern_matches(rule, &host) {
                return Err(AppError::domain(&host, format!("denylist rule '{rule}'")));
            }
        }

        if self.allowlist.is_empty() {
            return Ok(());
        }

        for rule in &self.allowlist {
            if pattern_matches(rule, &host) {
                return Ok(());
            }
        }

        Err(AppError::domain(
            &host,
            format!("no allowlist rule matches (allowlist: {:?})", self.allowlist),
        ))
    }

    /// Check the host of a URL string.
    pub fn check_url(&self, url: &str) -> Result<()> {
        let parsed = url::Url::parse(url)?;
        let host = parsed
            .host_str()
            .ok_or_else(|| AppError::domain(url, "URL has no host"))?;
        self.check(host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(pattern_matches("example.com", "example.com"));
        assert!(!pattern_matches("example.com", "www.example.com"));
        assert!(!pattern_matches("example.com", "notexample.com"));
    }

    #[test]
    fn test_wildcard_is_strict_subdomain() {
        assert!(pattern_matches("*.example.com", "www.example.com"));
        assert!(pattern_matches("*.example.com", "a.b.example.com"));
        assert!(!pattern_matches("*.example.com", "example.com"));
        assert!(!pattern_matches("*.example.com", "badexample.com"));
    }

    #[test]
    fn test_leading_dot_same_semantics() {
        assert!(pattern_matches(".example.com", "www.example.com"));
        assert!(!pattern_matches(".example.com", "example.com"));
        assert!(!pattern_matches(".example.com", "badexample.com"));
    }

    #[test]
    fn test_deny_before_allow() {
        let policy = DomainPolicy::new(
            vec!["*.example.com".into()],
            vec!["evil.example.com".into()],
        );
        assert!(policy.check("good.example.com").is_ok());
        assert!(policy.check("evil.example.com").is_err());
    }

    #[test]
    fn test_empty_allowlist_admits_everything_not_denied() {
        let policy = DomainPolicy::new(vec![], vec!["blocked.com".into()]);
        assert!(policy.check("anything.net").is_ok());
        assert!(policy.check("blocked.com").is_err());
    }

    #[test]
    fn test_nonempty_allowlist_is_exclusive() {
        let policy = DomainPolicy::new(vec!["example.com".into()], vec![]);
        assert!(policy.check("example.com").is_ok());
        assert!(policy.check("other.com").is_err());
    }

    #[test]
    fn test_error_cites_rule() {
        let policy = DomainPolicy::new(vec![], vec![".internal.net".into()]);
        let err = policy.check("db.internal.net").unwrap_err();
        assert!(err.to_string().contains(".internal.net"));
    }

    #[test]
    fn test_case_insensitive() {
        let policy = DomainPolicy::new(vec!["Example.COM".into()], vec![]);
        assert!(policy.check("EXAMPLE.com").is_ok());
    }
}
