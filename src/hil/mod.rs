//! Human-in-the-loop review: dual-channel (chat backend and dashboard)
//! approval with race-free resolution.

pub mod backends;
pub mod inquiry;
pub mod models;
pub mod service;

pub use models::{DecisionSource, EnrichmentSummary, HilRequest, HilResponse, MispContextSummary};
pub use service::{HilBackend, HilError, HilService};
