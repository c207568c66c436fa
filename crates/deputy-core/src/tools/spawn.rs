use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::agent::subagent::{Origin, SpawnRequest, SubagentManager, SUBAGENT_TOOLS};
use crate::tools::Tool;

/// Lets the main agent delegate work to a background subagent.
pub struct SpawnTool {
    manager: Arc<SubagentManager>,
    origin: Arc<RwLock<Origin>>,
}

impl SpawnTool {
    pub fn new(manager: Arc<SubagentManager>) -> Self {
        Self {
            manager,
            origin: Arc::new(RwLock::new(Origin::default())),
        }
    }

    /// Update the origin context so subagent results route back correctly.
    pub async fn set_context(&self, channel: &str, chat_id: &str) {
        *self.origin.write().await = Origin::new(channel, chat_id);
    }
}

fn optional_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

#[async_trait]
impl Tool for SpawnTool {
    fn name(&self) -> &str {
        "spawn"
    }

    fn description(&self) -> &str {
        "Spawn a background subagent for a task that can run on its own. It works \
         with file and shell tools in the workspace and reports back when done."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "minLength": 1,
                    "description": "Detailed description of the task for the subagent"
                },
                "label": {
                    "type": "string",
                    "description": "Short label for the subagent (e.g. 'fix-tests')"
                },
                "model": {
                    "type": "string",
                    "description": "Model to use instead of the default"
                },
                "system_prompt": {
                    "type": "string",
                    "description": "System prompt replacing the default subagent prompt"
                },
                "tools": {
                    "type": "array",
                    "items": {"type": "string", "enum": SUBAGENT_TOOLS},
                    "description": "Tools the subagent may use; all when omitted"
                }
            },
            "required": ["task"]
        })
    }

    async fn execute(&self, params: Value) -> Result<String> {
        let task = params
            .get("task")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("missing required parameter: task"))?;

        let tool_names = params.get("tools").and_then(Value::as_array).map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect::<Vec<_>>()
        });
        if let Some(names) = &tool_names {
            let invalid: Vec<&str> = names
                .iter()
                .map(String::as_str)
                .filter(|n| !SUBAGENT_TOOLS.contains(n))
                .collect();
            if !invalid.is_empty() {
                return Ok(format!(
                    "Error: Invalid tools: {}. Available: {}",
                    invalid.join(", "),
                    SUBAGENT_TOOLS.join(", ")
                ));
            }
        }

        let request = SpawnRequest {
            task: task.to_string(),
            label: optional_str(&params, "label"),
            model: optional_str(&params, "model"),
            system_prompt: optional_str(&params, "system_prompt"),
            tool_names,
            origin: self.origin.read().await.clone(),
        };
        Ok(self.manager.spawn(request).await)
    }
}
