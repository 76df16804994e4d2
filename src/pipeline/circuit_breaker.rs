// src/pipeline/circuit_breaker.rs

//! Per-target webhook circuit breaker.
//!
//! A consecutive-failure counter plus an open-until timestamp, both stored in
//! the target meta. While the circuit is open no webhook HTTP request is
//! issued for that target; the cooldown expiring closes it again.

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::models::TargetMeta;

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    /// Consecutive failures that trip the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open once tripped.
    pub cooldown_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 3,
            cooldown_secs: 300,
        }
    }
}

/// Result of a circuit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    /// Open until the embedded instant.
    Open { until: DateTime<Utc> },
}

/// Webhook circuit breaker over the per-target meta counters.
#[derive(Debug, Clone, Default)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self { config }
    }

    /// Current state for a target at `now`.
    pub fn state(&self, meta: &TargetMeta, now: DateTime<Utc>) -> CircuitState {
        if !self.config.enabled {
            return CircuitState::Closed;
        }
        match meta.circuit_open_until {
            Some(until) if until > now => CircuitState::Open { until },
            _ => CircuitState::Closed,
        }
    }

    /// Whether webhook I/O is currently suppressed.
    pub fn is_open(&self, meta: &TargetMeta, now: DateTime<Utc>) -> bool {
        matches!(self.state(meta, now), CircuitState::Open { .. })
    }

    /// Record a delivery failure; trips the circuit at the threshold.
    pub fn record_failure(&self, meta: &mut TargetMeta, now: DateTime<Utc>) {
        meta.webhook_failure_count = meta.webhook_failure_count.saturating_add(1);
        if self.config.enabled && meta.webhook_failure_count >= self.config.failure_threshold {
            let until = now + ChronoDuration::seconds(self.config.cooldown_secs as i64);
            tracing::warn!(
                failures = meta.webhook_failure_count,
                open_until = %until,
                "webhook circuit opened"
            );
            meta.circuit_open_until = Some(until);
        }
    }

    /// Record a successful delivery: counter reset, circuit closed.
    pub fn record_success(&self, meta: &mut TargetMeta) {
        meta.webhook_failure_count = 0;
        meta.circuit_open_until = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::with_config(CircuitBreakerConfig {
            enabled: true,
            failure_threshold: threshold,
            cooldown_secs: 300,
        })
    }

    #[test]
    fn test_starts_closed() {
        let meta = TargetMeta::default();
        assert!(!breaker(3).is_open(&meta, Utc::now()));
    }

    #[test]
    fn test_trips_at_threshold() {
        let cb = breaker(3);
        let mut meta = TargetMeta::default();
        let now = Utc::now();

        cb.record_failure(&mut meta, now);
        cb.record_failure(&mut meta, now);
        assert!(!cb.is_open(&meta, now));

        cb.record_failure(&mut meta, now);
        assert!(cb.is_open(&meta, now));
        assert_eq!(meta.webhook_failure_count, 3);
    }

    #[test]
    fn test_cooldown_expiry_closes() {
        let cb = breaker(1);
        let mut meta = TargetMeta::default();
        let now = Utc::now();

        cb.record_failure(&mut meta, now);
        assert!(cb.is_open(&meta, now));

        let later = now + ChronoDuration::seconds(301);
        assert!(!cb.is_open(&meta, later));
    }

    #[test]
    fn test_success_resets_counter_and_closes() {
        let cb = breaker(2);
        let mut meta = TargetMeta::default();
        let now = Utc::now();

        cb.record_failure(&mut meta, now);
        cb.record_failure(&mut meta, now);
        assert!(cb.is_open(&meta, now));

        cb.record_success(&mut meta);
        assert!(!cb.is_open(&meta, now));
        assert_eq!(meta.webhook_failure_count, 0);
        assert!(meta.circuit_open_until.is_none());
    }

    #[test]
    fn test_disabled_breaker_never_opens() {
        let cb = CircuitBreaker::with_config(CircuitBreakerConfig {
            enabled: false,
            failure_threshold: 1,
            cooldown_secs: 300,
        });
        let mut meta = TargetMeta::default();
        let now = Utc::now();

        for _ in 0..5 {
            cb.record_failure(&mut meta, now);
        }
        assert!(!cb.is_open(&meta, now));
    }

    #[test]
    fn test_open_state_carries_deadline() {
        let cb = breaker(1);
        let mut meta = TargetMeta::default();
        let now = Utc::now();
        cb.record_failure(&mut meta, now);

        match cb.state(&meta, now) {
            CircuitState::Open { until } => assert!(until > now),
            CircuitState::Closed => panic!("expected open circuit"),
        }
    }
}
