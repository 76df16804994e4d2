// src/services/browser.rs

//! Rendered fetch backend.
//!
//! Talks to a browserless-style rendering service over HTTP instead of
//! embedding a browser: POST the target description to the service's
//! `/content` endpoint and read back the serialized DOM. The service is
//! instructed to reject non-HTTP(S) subrequests and to block the configured
//! resource types; JSON and XML responses come back as the raw body rather
//! than a rendered document.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::time::Instant;
use tracing::info;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{RobotsMode, RunConfig, Snapshot, TargetSpec};
use crate::services::fetcher::{FetchContext, FetchOutcome, Fetcher};

/// Client for the rendering service.
pub struct RenderedFetcher {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    block_resource_types: Vec<String>,
    max_content_bytes: u64,
    fetch_timeout: Duration,
}

impl RenderedFetcher {
    /// Build a rendered fetcher; requires `browserless_url` in the config.
    pub fn new(config: &RunConfig) -> Result<Self> {
        let base_url = config
            .browserless_url
            .clone()
            .ok_or_else(|| AppError::config("rendering_mode=playwright requires browserless_url"))?;

        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(Duration::from_secs(config.fetch_connect_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: config.browserless_token.clone(),
            block_resource_types: config.block_resource_types.clone(),
            max_content_bytes: config.max_content_bytes,
            fetch_timeout: Duration::from_secs(config.fetch_timeout_secs),
        })
    }

    fn endpoint(&self) -> String {
        let mut endpoint = format!("{}/content", self.base_url);
        if let Some(token) = &self.token {
            endpoint.push_str(&format!("?token={token}"));
        }
        endpoint
    }

    fn render_request(&self, spec: &TargetSpec) -> serde_json::Value {
        let mut request = json!({
            "url": spec.url,
            "gotoOptions": {
                "waitUntil": "networkidle2",
                "timeout": self.fetch_timeout.as_millis() as u64,
            },
            // Only http(s) subrequests may load; everything else aborts.
            "rejectRequestPattern": ["^(?!https?:).+"],
        });

        if let Some(ms) = spec.wait_ms {
            request["waitForTimeout"] = json!(ms);
        }
        if let Some(selector) = &spec.wait_for_selector {
            request["waitForSelector"] = json!({ "selector": selector });
        }
        if !spec.request_headers.is_empty() {
            request["setExtraHTTPHeaders"] = json!(spec.request_headers);
        }
        if !spec.cookies.is_empty() {
            request["cookies"] = json!(spec
                .cookies
                .iter()
                .map(|c| {
                    json!({
                        "name": c.name,
                        "value": c.value,
                        "domain": c.domain,
                        "path": c.path,
                    })
                })
                .collect::<Vec<_>>());
        }
        if !self.block_resource_types.is_empty() {
            request["rejectResourceTypes"] = json!(self.block_resource_types);
        }

        request
    }
}

#[async_trait]
impl Fetcher for RenderedFetcher {
    async fn fetch(
        &self,
        spec: &TargetSpec,
        _previous: Option<&Snapshot>,
        ctx: &FetchContext,
    ) -> Result<FetchOutcome> {
        let started = Instant::now();
        let url = Url::parse(&spec.url)?;

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

        let response = self
            .client
            .post(self.endpoint())
            .timeout(self.fetch_timeout)
            .json(&self.render_request(spec))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::http_with(
                status.as_u16(),
                "rendering service returned an error",
            ));
        }

        // The service reports the page it actually landed on; re-guard it.
        let final_url = response
            .headers()
            .get("x-response-url")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
            .unwrap_or_else(|| spec.url.clone());
        if final_url != spec.url {
            ctx.safety.check_str(&final_url).await?;
        }

        let content_type = response
            .headers()
            .get("x-response-content-type")
            .or_else(|| response.headers().get(reqwest::header::CONTENT_TYPE))
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        let body = response.text().await?;
        if body.len() as u64 > self.max_content_bytes {
            return Err(AppError::ResponseTooLarge {
                limit: self.max_content_bytes,
            });
        }

        info!(url = %spec.url, bytes = body.len(), "rendered fetch complete");

        Ok(FetchOutcome {
            body: body.into_bytes(),
            content_type,
            status: 200,
            final_url,
            etag: None,
            last_modified: None,
            redirects: 0,
            duration_ms: started.elapsed().as_millis() as u64,
            not_modified: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RunConfig, TargetOverride};

    fn config_with_browserless() -> RunConfig {
        serde_json::from_str(
            r##"{"mode":"monitor","browserless_url":"https://render.example.com/",
                "browserless_token":"tok","block_resource_types":["image","font"],
                "wait_for_selector":"#done","wait_ms":250}"##,
        )
        .unwrap()
    }

    #[test]
    fn test_requires_base_url() {
        let config: RunConfig = serde_json::from_str(r#"{"mode":"monitor"}"#).unwrap();
        assert!(RenderedFetcher::new(&config).is_err());
    }

    #[test]
    fn test_endpoint_carries_token() {
        let fetcher = RenderedFetcher::new(&config_with_browserless()).unwrap();
        assert_eq!(
            fetcher.endpoint(),
            "https://render.example.com/content?token=tok"
        );
    }

    #[test]
    fn test_render_request_shape() {
        let config = config_with_browserless();
        let fetcher = RenderedFetcher::new(&config).unwrap();
        let spec = crate::models::TargetSpec::resolve(
            &config,
            &TargetOverride {
                url: "https://example.com/app".into(),
                ..Default::default()
            },
        );
        let request = fetcher.render_request(&spec);
        assert_eq!(request["url"], "https://example.com/app");
        assert_eq!(request["waitForSelector"]["selector"], "#done");
        assert_eq!(request["waitForTimeout"], 250);
        assert_eq!(request["rejectResourceTypes"][0], "image");
        assert!(request["rejectRequestPattern"][0]
            .as_str()
            .unwrap()
            .contains("https?"));
    }
}


