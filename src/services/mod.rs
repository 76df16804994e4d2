// src/services/mod.rs

//! Business logic: fetch backends, robots rules, normalization, webhook delivery.

pub mod browser;
pub mod fetcher;
pub mod normalizer;
pub mod robots;
pub mod webhook;

pub use browser::RenderedFetcher;
pub use fetcher::{FetchContext, FetchOutcome, Fetcher, StaticFetcher};
pub use normalizer::{classify_content, normalize, ContentClass, Normalized};
pub use robots::RobotsCache;
pub use webhook::{
    DeliveryReport, HttpTransport, UrlDelivery, WebhookDeliverer, WebhookRequest, WebhookResponse,
    WebhookTransport,
};
