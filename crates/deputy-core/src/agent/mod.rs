pub mod r#loop;
pub mod subagent;

pub use r#loop::{ConversationLoop, LoopOutcome, LoopSettings, Transcript};
pub use subagent::{
    Origin, SpawnRequest, SubagentError, SubagentManager, SubagentOptions, TaskSnapshot, TaskState,
};
