//! SocTalk: autonomous SOC agent.
//!
//! SIEM alerts are polled, correlated into investigations, and driven
//! through a durable decision graph (LLM supervisor, enrichment workers, a
//! reasoning verdict, and human-in-the-loop approval). Every state change
//! is persisted as an immutable event; read models are projected from those
//! events in the same transaction (CQRS).
//!
//! ## Architecture
//!
//! - **Polling pipeline**: bounded alert buffer, multi-key correlator,
//!   severity-ordered investigation queue
//! - **Workflow engine**: checkpointed node graph that survives restarts
//!   and suspends at human-review checkpoints
//! - **Event sourcing**: append-only store with optimistic concurrency and
//!   idempotency, synchronous CQRS projections
//! - **HIL resolver**: chat backend and REST dashboard race, first answer
//!   wins exactly once
//! - **API**: axum REST surface plus an SSE bridge fed by a database tailer

pub mod agents;
pub mod api;
pub mod config;
pub mod graph;
pub mod hil;
pub mod integrations;
pub mod llm;
pub mod orchestrator;
pub mod persistence;
pub mod polling;
pub mod types;
pub mod workers;

// Re-export the domain types most callers need
pub use types::{
    Alert, Enrichment, Investigation, Observable, Severity, Verdict, WorkflowState,
};

// Re-export the workflow engine surface
pub use graph::{ResumePayload, RunConfig, RunOutcome, WorkflowEngine};

// Re-export persistence entry points
pub use persistence::{EventEmitter, EventType, StoreError};
