//! Chat turn orchestration and the pieces only it uses.

pub mod budget;
pub mod orchestrator;
pub mod prompt;
pub mod router;

pub use budget::{MeteredEmbedder, UsageBudget};
pub use orchestrator::{ChatMeta, ChatRequest, ChatResponse, Orchestrator};
