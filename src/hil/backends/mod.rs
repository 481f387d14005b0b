//! In-tree review backends. Chat integrations (Slack, Discord) are external
//! adapters implementing [`HilBackend`](super::service::HilBackend).

pub mod cli;

pub use cli::CliBackend;
