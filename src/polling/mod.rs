//! Alert ingestion pipeline: poll, correlate, enqueue.

pub mod correlator;
pub mod poller;
pub mod queue;

pub use correlator::AlertCorrelator;
pub use poller::AlertPoller;
pub use queue::{InvestigationQueue, QueueStats};
