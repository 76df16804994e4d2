// src/models/mod.rs

//! Data structures shared across the monitor.

pub mod config;
pub mod event;
pub mod meta;
pub mod snapshot;
pub mod target;

pub use config::{
    AggregationMode, BaselineMode, CookieSpec, DeliveryMode, EmptySnapshotPolicy, FieldSpec, Mode,
    RenderingMode, RobotsMode, RunConfig, TargetOverride, WhitespaceMode,
};
pub use event::{Changes, ErrorInfo, Event, EventKind, FieldChange, Fingerprint, JsonChange, JsonOp, TextChange};
pub use meta::{DeadLetterRecord, RunSummary, TargetMeta, TargetOutcome};
pub use snapshot::{FetchMetrics, Snapshot, SnapshotMode};
pub use target::TargetSpec;
