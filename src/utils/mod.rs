// src/utils/mod.rs

//! Shared utilities.

pub mod domain;
pub mod politeness;
pub mod redact;
pub mod retry;
pub mod safety;

pub use domain::DomainPolicy;
pub use politeness::PolitenessGate;
pub use redact::redact_url;
pub use retry::{with_retries, RetryPolicy};
pub use safety::UrlSafetyGuard;
