//! Background subagents over any OpenAI-compatible LLM provider.
//!
//! A host agent builds one [`SubagentManager`] and registers
//! [`tools::spawn::SpawnTool`] in its own [`ToolRegistry`], calling
//! `set_context` with each incoming message's channel and chat id. Subagent
//! results come back as [`InboundMessage`]s on the [`MessageBus`]. The
//! `deputy run` command drives the same manager directly.

pub mod agent;
pub mod bus;
pub mod providers;
pub mod tools;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types
pub use agent::{SpawnRequest, SubagentManager, SubagentOptions};
pub use bus::{InboundMessage, MessageBus};
pub use providers::{LlmProvider, LlmResponse, ProviderRouter, RouterFactory, RouterSettings};
pub use tools::ToolRegistry;
