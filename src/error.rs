// src/error.rs

//! Unified error handling for the monitor.

use std::fmt;

use thiserror::Error;

/// Result type alias for monitor operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
///
/// Every variant the pipeline can see maps to a specific event record; only
/// configuration and store errors are fatal for a whole run.
#[derive(Error, Debug)]
pub enum AppError {
    /// URL failed the SSRF safety checks
    #[error("unsafe URL {url}: {reason}")]
    UrlSafety { url: String, reason: String },

    /// Host rejected by the domain allow/deny policy
    #[error("domain policy rejected {host}: {rule}")]
    DomainPolicy { host: String, rule: String },

    /// HTTP request returned a non-success status
    #[error("HTTP status {status}")]
    Http { status: u16, message: Option<String> },

    /// Response body exceeded the configured size cap
    #[error("response exceeded {limit} bytes")]
    ResponseTooLarge { limit: u64 },

    /// Redirect chain exceeded the configured hop limit
    #[error("redirect chain exceeded {limit} hops")]
    TooManyRedirects { limit: u32 },

    /// Normalized text was empty or below the minimum length
    #[error("empty snapshot: {text_length} chars (minimum {min_text_length})")]
    EmptySnapshot {
        text_length: usize,
        min_text_length: usize,
    },

    /// A field-extraction selector matched no nodes
    #[error("field '{field}' extraction failed: {message}")]
    FieldExtraction { field: String, message: String },

    /// A block-page pattern matched the fetched content
    #[error("block page detected: pattern '{pattern}' matched")]
    BlockPage { pattern: String },

    /// Webhook delivery failed terminally
    #[error("webhook delivery failed after {attempts} attempt(s): {message}")]
    WebhookDelivery {
        status: Option<u16>,
        attempts: u32,
        duration_ms: u64,
        message: String,
    },

    /// robots.txt disallows fetching this URL
    #[error("robots.txt disallows: {url}")]
    RobotsDisallowed { url: String },

    /// Request exceeded its wall-clock deadline
    #[error("timeout fetching {url}")]
    Timeout { url: String },

    /// Retry loop ran out of time budget before the first attempt
    #[error("retry time budget exceeded before any attempt")]
    RetryBudget,

    /// Payload could not be reduced below the byte limit
    #[error("payload limit error: {0}")]
    Payload(String),

    /// HTTP transport failure
    #[error("HTTP error: {0}")]
    Request(#[from] reqwest::Error),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// CSS selector parsing failed
    #[error("invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("validation error: {0}")]
    Validation(String),

    /// State store operation failed
    #[error("store error: {0}")]
    Store(String),
}

impl AppError {
    /// Create a safety error for a URL.
    pub fn safety(url: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::UrlSafety {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a domain policy error citing the matching rule.
    pub fn domain(host: impl Into<String>, rule: impl fmt::Display) -> Self {
        Self::DomainPolicy {
            host: host.into(),
            rule: rule.to_string(),
        }
    }

    /// Create an HTTP status error.
    pub fn http(status: u16) -> Self {
        Self::Http {
            status,
            message: None,
        }
    }

    /// Create an HTTP status error with context.
    pub fn http_with(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: Some(message.into()),
        }
    }

    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a store error.
    pub fn store(message: impl fmt::Display) -> Self {
        Self::Store(message.to_string())
    }

    /// Whether a failed attempt with this error is worth retrying.
    ///
    /// 429 and 5xx statuses, network failures, and timeouts are transient;
    /// everything else (safety, policy, size cap, malformed content) is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 429 || (500..=599).contains(status),
            Self::Request(e) => e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
            Self::Timeout { .. } => true,
            Self::WebhookDelivery { status, .. } => match status {
                Some(s) => *s == 429 || (500..=599).contains(s),
                None => true,
            },
            _ => false,
        }
    }

    /// Stable error name used in event payloads.
    pub fn name(&self) -> &'static str {
        match self {
            Self::UrlSafety { .. } => "UrlSafetyError",
            Self::DomainPolicy { .. } => "DomainPolicyError",
            Self::Http { .. } => "HttpError",
            Self::ResponseTooLarge { .. } => "ResponseTooLargeError",
            Self::TooManyRedirects { .. } => "TooManyRedirectsError",
            Self::EmptySnapshot { .. } => "EmptySnapshotError",
            Self::FieldExtraction { .. } => "FieldExtractionError",
            Self::BlockPage { .. } => "BlockPageError",
            Self::WebhookDelivery { .. } => "WebhookDeliveryError",
            Self::RobotsDisallowed { .. } => "RobotsDisallowedError",
            Self::Timeout { .. } => "TimeoutError",
            Self::RetryBudget => "RetryBudgetError",
            Self::Payload(_) => "PayloadLimitError",
            Self::Request(_) => "NetworkError",
            Self::Io(_) => "IoError",
            Self::Json(_) => "JsonError",
            Self::Url(_) => "UrlParseError",
            Self::Selector { .. } => "SelectorError",
            Self::Config(_) => "ConfigError",
            Self::Validation(_) => "ValidationError",
            Self::Store(_) => "StoreError",
        }
    }

    /// HTTP status attached to this error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::WebhookDelivery { status, .. } => *status,
            Self::Request(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
