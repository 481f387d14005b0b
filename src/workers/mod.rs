//! Tool workers: enrichment, SIEM forensics, threat-intel context, and
//! incident-response escalation.

pub mod cortex;
pub mod misp;
pub mod thehive;
pub mod wazuh;

pub use cortex::cortex_worker_node;
pub use misp::misp_worker_node;
pub use thehive::thehive_worker_node;
pub use wazuh::wazuh_worker_node;
