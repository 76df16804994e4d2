// src/utils/politeness.rs

//! Per-host request spacing.
//!
//! Serializes same-host waiters across all workers in a run and enforces a
//! minimum delay (plus jitter) between consecutive requests to one host.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

/// Per-host slot: the earliest instant the next request may proceed.
#[derive(Default)]
struct HostSlot {
    next_allowed_at: Option<Instant>,
}

/// Politeness gate shared by all workers of a run.
///
/// Each host maps to an async mutex; tokio mutexes hand the lock to waiters
/// in FIFO order, which gives strict per-host serialization. A waiter holds
/// the lock while it sleeps until `next_allowed_at`, then reserves the next
/// slot and releases.
#[derive(Default)]
pub struct PolitenessGate {
    hosts: Mutex<HashMap<String, Arc<tokio::sync::Mutex<HostSlot>>>>,
}

impl PolitenessGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot_for(&self, host: &str) -> Arc<tokio::sync::Mutex<HostSlot>> {
        let mut hosts = self.hosts.lock().expect("politeness map lock");
        hosts
            .entry(host.to_lowercase())
            .or_insert_with(Arc::default)
            .clone()
    }

    /// Wait until this host's next slot, then reserve the one after.
    ///
    /// A zero delay returns immediately without touching the map.
    pub async fn wait(&self, host: &str, delay: Duration, jitter: Duration) {
        if delay.is_zero() {
            return;
        }

        let slot = self.slot_for(host);
        let mut guard = slot.lock().await;

        if let Some(at) = guard.next_allowed_at {
            let now = Instant::now();
            if at > now {
                tokio::time::sleep_until(at).await;
            }
        }

        let jitter = if jitter.is_zero() {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..=jitter.as_millis() as u64))
        };
        guard.next_allowed_at = Some(Instant::now() + delay + jitter);
    }

    /// Wait keyed by a URL's host; URLs without a host pass through.
    pub async fn wait_for_url(&self, url: &url::Url, delay: Duration, jitter: Duration) {
        if let Some(host) = url.host_str() {
            self.wait(host, delay, jitter).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant as StdInstant;

    #[tokio::test]
    async fn test_zero_delay_returns_immediately() {
        let gate = PolitenessGate::new();
        let start = StdInstant::now();
        gate.wait("example.com", Duration::ZERO, Duration::ZERO).await;
        gate.wait("example.com", Duration::ZERO, Duration::ZERO).await;
        assert!(start.elapsed() < Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_consecutive_waits_are_spaced() {
        let gate = PolitenessGate::new();
        let delay = Duration::from_millis(50);

        gate.wait("example.com", delay, Duration::ZERO).await;
        let first_done = StdInstant::now();
        gate.wait("example.com", delay, Duration::ZERO).await;
        let second_done = StdInstant::now();

        assert!(second_done.duration_since(first_done) >= Duration::from_millis(45));
    }

    #[tokio::test]
    async fn test_different_hosts_do_not_block_each_other() {
        let gate = Arc::new(PolitenessGate::new());
        let delay = Duration::from_millis(100);

        gate.wait("a.example.com", delay, Duration::ZERO).await;
        let start = StdInstant::now();
        gate.wait("b.example.com", delay, Duration::ZERO).await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_concurrent_same_host_serialized() {
        let gate = Arc::new(PolitenessGate::new());
        let delay = Duration::from_millis(30);
        let start = StdInstant::now();

        let mut handles = Vec::new();
        for _ in 0..3 {
            let gate = Arc::clone(&gate);
            handles.push(tokio::spawn(async move {
                gate.wait("example.com", delay, Duration::ZERO).await;
                StdInstant::now()
            }));
        }

        let mut times: Vec<StdInstant> = Vec::new();
        for handle in handles {
            times.push(handle.await.unwrap());
        }
        times.sort();

        // Three waiters, two 30ms gaps between them at minimum.
        assert!(times[2].duration_since(start) >= Duration::from_millis(55));
    }
}
