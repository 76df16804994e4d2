// src/services/fetcher.rs

//! HTTP fetch backends.
//!
//! The `Fetcher` trait is the seam between the pipeline and the network; the
//! static client here and the rendered client in `browser` implement it, and
//! tests swap in scripted fakes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED, LOCATION};
use reqwest::{Method, StatusCode};
use tokio::time::Instant;
use tracing::debug;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{RobotsMode, RunConfig, Snapshot, TargetSpec};
use crate::services::robots::RobotsCache;
use crate::utils::{DomainPolicy, PolitenessGate, UrlSafetyGuard};

/// Shared guards consulted on every hop of every fetch.
pub struct FetchContext {
    pub safety: Arc<UrlSafetyGuard>,
    pub domains: Arc<DomainPolicy>,
    pub politeness: Arc<PolitenessGate>,
    pub robots: Arc<RobotsCache>,
    pub politeness_delay: Duration,
    pub politeness_jitter: Duration,
}

/// Result of one successful fetch attempt.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub status: u16,
    pub final_url: String,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub redirects: u32,
    pub duration_ms: u64,
    /// 304 against the stored validators; `body` is empty and the previous
    /// snapshot's text remains authoritative.
    pub not_modified: bool,
}

/// A fetch backend.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        spec: &TargetSpec,
        previous: Option<&Snapshot>,
        ctx: &FetchContext,
    ) -> Result<FetchOutcome>;
}

/// Plain HTTP client with manual redirect handling.
pub struct StaticFetcher {
    client: reqwest::Client,
    max_redirects: u32,
    max_content_bytes: u64,
    fetch_timeout: Duration,
}

impl StaticFetcher {
    /// Build the client from run configuration.
    pub fn new(config: &RunConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(config.fetch_connect_timeout_secs));

        if let Some(proxy) = &config.proxy_url {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }

        Ok(Self {
            client: builder.build()?,
            max_redirects: config.max_redirects,
            max_content_bytes: config.max_content_bytes,
            fetch_timeout: Duration::from_secs(config.fetch_timeout_secs),
        })
    }

    /// Read the response body incrementally, failing once the cap is passed.
    async fn read_capped(&self, mut response: reqwest::Response) -> Result<Vec<u8>> {
        if let Some(length) = response.content_length() {
            if length > self.max_content_bytes {
                return Err(AppError::ResponseTooLarge {
                    limit: self.max_content_bytes,
                });
            }
        }

        let mut buf: Vec<u8> = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if (buf.len() + chunk.len()) as u64 > self.max_content_bytes {
                return Err(AppError::ResponseTooLarge {
                    limit: self.max_content_bytes,
                });
            }
            buf.extend_from_slice(&chunk);
        }
        Ok(buf)
    }
}

fn header_string(headers: &reqwest::header::HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(
        &self,
        spec: &TargetSpec,
        previous: Option<&Snapshot>,
        ctx: &FetchContext,
    ) -> Result<FetchOutcome> {
        let started = Instant::now();
        let mut url = Url::parse(&spec.url)?;
        let mut method = Method::from_bytes(spec.method.as_bytes())
            .map_err(|_| AppError::config(format!("invalid HTTP method '{}'", spec.method)))?;
        let mut body = spec.body.clone();
        let mut redirects: u32 = 0;

        loop {
            // Every hop re-passes the full guard chain.
            if let Some(host) = url.host_str() {
                ctx.domains.check(host)?;
            }
            ctx.safety.check(&url).await?;
            ctx.politeness
                .wait_for_url(&url, ctx.politeness_delay, ctx.politeness_jitter)
                .await;
            if spec.robots_mode == RobotsMode::Respect {
                ctx.robots.check(&url).await?;
            }

            let remaining = self.fetch_timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err(AppError::Timeout {
                    url: url.to_string(),
                });
            }

            let mut request = self
                .client
                .request(method.clone(), url.clone())
                .timeout(remaining);
            for (name, value) in &spec.request_headers {
                request = request.header(name.as_str(), value.as_str());
            }

            // Conditional headers only on bodyless GET/HEAD re-fetches of the
            // exact URL the previous snapshot ended up at.
            let conditional = (method == Method::GET || method == Method::HEAD)
                && body.is_none()
                && previous.map(|p| p.final_url == url.as_str()).unwrap_or(false);
            if conditional {
                if let Some(prev) = previous {
                    if let Some(etag) = &prev.etag {
                        request = request.header(IF_NONE_MATCH, etag);
                    }
                    if let Some(modified) = &prev.last_modified {
                        request = request.header(IF_MODIFIED_SINCE, modified);
                    }
                }
            }
            if let Some(payload) = &body {
                request = request.body(payload.clone());
            }

            let response = request.send().await?;
            let status = response.status();

            if status.is_redirection() && status != StatusCode::NOT_MODIFIED {
                let location = header_string(response.headers(), LOCATION).ok_or_else(|| {
                    AppError::http_with(status.as_u16(), "redirect without Location header")
                })?;
                redirects += 1;
                if redirects > self.max_redirects {
                    return Err(AppError::TooManyRedirects {
                        limit: self.max_redirects,
                    });
                }

                let next = url.join(&location)?;
                debug!(from = %url, to = %next, status = status.as_u16(), "following redirect");

                match status.as_u16() {
                    // Historical client behavior: 301/302 downgrade non-GET
                    // methods; 303 always becomes a bodyless GET.
                    301 | 302 => {
                        if method != Method::GET && method != Method::HEAD {
                            method = Method::GET;
                            body = None;
                        }
                    }
                    303 => {
                        method = Method::GET;
                        body = None;
                    }
                    _ => {}
                }

                url = next;
                continue;
            }

            if status == StatusCode::NOT_MODIFIED {
                if previous.is_none() {
                    return Err(AppError::http_with(
                        304,
                        "304 Not Modified without a stored baseline",
                    ));
                }
                return Ok(FetchOutcome {
                    body: Vec::new(),
                    content_type: None,
                    status: 304,
                    final_url: url.to_string(),
                    etag: header_string(response.headers(), ETAG),
                    last_modified: header_string(response.headers(), LAST_MODIFIED),
                    redirects,
                    duration_ms: started.elapsed().as_millis() as u64,
                    not_modified: true,
                });
            }

            if !status.is_success() {
                return Err(AppError::http(status.as_u16()));
            }

            let etag = header_string(response.headers(), ETAG);
            let last_modified = header_string(response.headers(), LAST_MODIFIED);
            let content_type = header_string(response.headers(), CONTENT_TYPE);
            let final_url = response.url().to_string();
            let bytes = self.read_capped(response).await?;

            return Ok(FetchOutcome {
                body: bytes,
                content_type,
                status: status.as_u16(),
                final_url,
                etag,
                last_modified,
                redirects,
                duration_ms: started.elapsed().as_millis() as u64,
                not_modified: false,
            });
        }
    }
}
