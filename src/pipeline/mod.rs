// src/pipeline/mod.rs

//! High-level operations: diffing, event identity, payload bounds, state
//! keys, the circuit breaker, the per-target state machine, the run
//! orchestrator, and dead-letter replay.

pub mod circuit_breaker;
pub mod diff;
pub mod event_id;
pub mod payload;
pub mod replay;
pub mod run;
pub mod state_key;
pub mod target;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use diff::{approx_change_ratio, compute_fields_change, compute_text_change, diff_json};
pub use event_id::{change_event_id, run_scoped_event_id, stable_stringify};
pub use payload::limit_payload_bytes;
pub use replay::{run_replay, ReplayOutcome, ReplayReport};
pub use run::{resolve_targets, run_monitor, RunReport};
pub use state_key::{current_state_key, legacy_state_key};
pub use target::{process_target, PipelineDeps, TargetResult};
