// src/services/webhook.rs

//! Signed, idempotent webhook delivery with retries and fan-out.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::models::{DeliveryMode, RunConfig};
use crate::utils::redact::clip_excerpt;
use crate::utils::retry::{with_retries, RetryPolicy};
use crate::utils::{DomainPolicy, UrlSafetyGuard};

type HmacSha256 = Hmac<Sha256>;

/// Max bytes of a non-2xx response body kept for diagnostics.
const DIAGNOSTIC_BODY_CAP: usize = 4096;

/// Compute the `x-sentinel-signature` value: HMAC-SHA256 over
/// `"{timestamp}.{body}"`, hex-encoded with a scheme prefix.
pub fn sign_payload(secret: &str, timestamp: i64, body: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(format!("{timestamp}.{body}").as_bytes());
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// One outbound webhook request, fully assembled.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub url: String,
    pub method: String,
    pub content_type: String,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    pub timeout: Duration,
}

/// Terminal response of one webhook attempt.
#[derive(Debug, Clone)]
pub struct WebhookResponse {
    pub status: u16,
    pub body_excerpt: String,
}

/// Transport seam; the HTTP implementation below posts with manual redirects,
/// and tests substitute recording fakes.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn send(&self, request: &WebhookRequest) -> Result<WebhookResponse>;
}

/// Production transport over reqwest.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookTransport for HttpTransport {
    async fn send(&self, request: &WebhookRequest) -> Result<WebhookResponse> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| AppError::config(format!("invalid webhook method '{}'", request.method)))?;

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout)
            .header(reqwest::header::CONTENT_TYPE, request.content_type.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let mut response = builder.body(request.body.clone()).send().await?;
        let status = response.status().as_u16();

        let mut excerpt = String::new();
        if !(200..300).contains(&status) {
            let mut collected: Vec<u8> = Vec::new();
            while let Some(chunk) = response.chunk().await? {
                collected.extend_from_slice(&chunk);
                if collected.len() >= DIAGNOSTIC_BODY_CAP {
                    break;
                }
            }
            collected.truncate(DIAGNOSTIC_BODY_CAP);
            excerpt = clip_excerpt(&String::from_utf8_lossy(&collected), DIAGNOSTIC_BODY_CAP);
        }

        Ok(WebhookResponse {
            status,
            body_excerpt: excerpt,
        })
    }
}

/// Per-URL delivery accounting.
#[derive(Debug, Clone)]
pub struct UrlDelivery {
    pub url: String,
    pub ok: bool,
    pub status: Option<u16>,
    pub attempts: u32,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Outcome of one fan-out.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub ok: bool,
    pub results: Vec<UrlDelivery>,
}

impl DeliveryReport {
    /// Human-oriented reason string for the first failed endpoint.
    pub fn first_error(&self) -> Option<String> {
        self.results
            .iter()
            .find(|r| !r.ok)
            .and_then(|r| r.error.clone())
    }
}

/// Options distilled from the run configuration.
#[derive(Clone)]
pub struct DeliveryOptions {
    pub method: String,
    pub content_type: String,
    pub extra_headers: BTreeMap<String, String>,
    pub secret: Option<String>,
    pub mode: DeliveryMode,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub retry_status_codes: Vec<u16>,
}

impl DeliveryOptions {
    pub fn from_config(config: &RunConfig) -> Self {
        let mut retry = RetryPolicy::new(
            config.webhook_retry_max_retries,
            Duration::from_millis(config.webhook_retry_backoff_ms),
        );
        if let Some(budget) = config.webhook_retry_max_total_time_ms {
            retry = retry.with_total_time(Duration::from_millis(budget));
        }
        Self {
            method: config.webhook_method_or_post(),
            content_type: config.webhook_content_type.clone(),
            extra_headers: config.webhook_headers.clone(),
            secret: config.webhook_secret.clone(),
            mode: config.webhook_delivery_mode,
            timeout: Duration::from_secs(config.webhook_timeout_secs),
            retry,
            retry_status_codes: config.webhook_retry_status_codes.clone(),
        }
    }

    fn status_is_retryable(&self, status: u16) -> bool {
        if self.retry_status_codes.is_empty() {
            status == 429 || (500..=599).contains(&status)
        } else {
            self.retry_status_codes.contains(&status)
        }
    }
}

/// Delivers one payload to N endpoints under the configured policy.
pub struct WebhookDeliverer {
    transport: Arc<dyn WebhookTransport>,
    safety: Arc<UrlSafetyGuard>,
    domains: Arc<DomainPolicy>,
    options: DeliveryOptions,
}

impl WebhookDeliverer {
    pub fn new(
        transport: Arc<dyn WebhookTransport>,
        safety: Arc<UrlSafetyGuard>,
        domains: Arc<DomainPolicy>,
        options: DeliveryOptions,
    ) -> Self {
        Self {
            transport,
            safety,
            domains,
            options,
        }
    }

    /// Deliver `payload` to every URL; headers and signature are computed
    /// once over the single serialized body.
    pub async fn deliver(
        &self,
        event_id: &str,
        payload: &serde_json::Value,
        urls: &[String],
    ) -> DeliveryReport {
        let body = match serde_json::to_string(payload) {
            Ok(body) => body,
            Err(e) => {
                return DeliveryReport {
                    ok: false,
                    results: vec![UrlDelivery {
                        url: String::new(),
                        ok: false,
                        status: None,
                        attempts: 0,
                        duration_ms: 0,
                        error: Some(format!("payload serialization failed: {e}")),
                    }],
                };
            }
        };

        let timestamp = Utc::now().timestamp();
        let mut headers = self.options.extra_headers.clone();
        headers.insert("x-sentinel-event-id".into(), event_id.to_string());
        headers.insert("Idempotency-Key".into(), event_id.to_string());
        headers.insert("x-sentinel-timestamp".into(), timestamp.to_string());
        if let Some(secret) = &self.options.secret {
            headers.insert(
                "x-sentinel-signature".into(),
                sign_payload(secret, timestamp, &body),
            );
        }

        let deliveries = urls
            .iter()
            .map(|url| self.deliver_one(url, &headers, &body))
            .collect::<Vec<_>>();
        let results = join_all(deliveries).await;

        let ok = match self.options.mode {
            DeliveryMode::All => results.iter().all(|r| r.ok),
            DeliveryMode::Any => urls.is_empty() || results.iter().any(|r| r.ok),
        };

        DeliveryReport { ok, results }
    }

    async fn deliver_one(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: &str,
    ) -> UrlDelivery {
        let started = Instant::now();

        if let Err(e) = self.precheck(url).await {
            return UrlDelivery {
                url: url.to_string(),
                ok: false,
                status: None,
                attempts: 0,
                duration_ms: started.elapsed().as_millis() as u64,
                error: Some(e.to_string()),
            };
        }

        let request = WebhookRequest {
            url: url.to_string(),
            method: self.options.method.clone(),
            content_type: self.options.content_type.clone(),
            headers: headers.clone(),
            body: body.to_string(),
            timeout: self.options.timeout,
        };

        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_in = Arc::clone(&attempts);
        let transport = Arc::clone(&self.transport);
        let request = Arc::new(request);

        let outcome = with_retries(
            &self.options.retry,
            |e| match e {
                AppError::WebhookDelivery {
                    status: Some(status),
                    ..
                } => self.options.status_is_retryable(*status),
                other => other.is_retryable(),
            },
            move |attempt| {
                let transport = Arc::clone(&transport);
                let request = Arc::clone(&request);
                let attempts = Arc::clone(&attempts_in);
                async move {
                    attempts.store(attempt + 1, Ordering::SeqCst);
                    let response = transport.send(&request).await?;
                    if (200..300).contains(&response.status) {
                        Ok(response)
                    } else {
                        Err(AppError::WebhookDelivery {
                            status: Some(response.status),
                            attempts: attempt + 1,
                            duration_ms: 0,
                            message: clip_excerpt(&response.body_excerpt, DIAGNOSTIC_BODY_CAP),
                        })
                    }
                }
            },
        )
        .await;

        let attempts = attempts.load(Ordering::SeqCst);
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(response) => {
                info!(url, status = response.status, attempts, "webhook delivered");
                UrlDelivery {
                    url: url.to_string(),
                    ok: true,
                    status: Some(response.status),
                    attempts,
                    duration_ms,
                    error: None,
                }
            }
            Err(e) => {
                warn!(url, attempts, error = %e, "webhook delivery failed");
                UrlDelivery {
                    url: url.to_string(),
                    ok: false,
                    status: e.status_code(),
                    attempts,
                    duration_ms,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn precheck(&self, url: &str) -> Result<()> {
        self.safety.check_str(url).await?;
        self.domains.check_url(url)
    }
}
