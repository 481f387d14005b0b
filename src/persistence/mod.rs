//! Event sourcing and CQRS persistence layer.
//!
//! The event store is the single write-authoritative state; read models are
//! projected synchronously in the same transaction as each append and can be
//! rebuilt bit-for-bit by replaying the event stream.

pub mod checkpoint;
pub mod db;
pub mod emitter;
pub mod events;
pub mod projector;
pub mod read_models;
pub mod store;

pub use checkpoint::{
    thread_id, Checkpointer, CheckpointError, Interrupt, MemoryCheckpointer, PostgresCheckpointer,
    WorkflowSnapshot,
};
pub use emitter::EventEmitter;
pub use events::EventType;
pub use read_models::{
    AnalyzerStatsRow, EventRecord, InvestigationRow, IocStatsRow, MetricsHourlyRow,
    PendingReviewRow, RuleStatsRow, UserSettingsRow,
};
pub use store::{AppendOptions, StoreError};
