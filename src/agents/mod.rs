//! LLM decision nodes: supervisor (fast model) and verdict (reasoning
//! model).

pub mod prompts;
pub mod supervisor;
pub mod verdict;

pub use supervisor::{supervisor_node, MAX_ITERATIONS};
pub use verdict::verdict_node;
