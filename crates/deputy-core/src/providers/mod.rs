//! LLM provider contract and the routing layer behind it.
//!
//! Every backend (gateway, vendor, self-hosted endpoint) is reached through
//! [`router::ProviderRouter`], which resolves a route from the static tables in
//! [`registry`] and sends an OpenAI-compatible request over a
//! [`transport::ChatTransport`].

pub mod registry;
pub mod router;
pub mod transport;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use router::{
    ConfigError, CredentialSet, ProviderFactory, ProviderRouter, Route, RouterFactory,
    RouterSettings,
};
pub use transport::{ChatTransport, HttpTransport, TransportError, TransportRequest};

/// Finish reason used for transport failures folded into a response.
pub const FINISH_ERROR: &str = "error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    /// Opaque correlation token issued by the provider.
    pub id: String,
    pub name: String,
    /// Always a JSON object.
    pub arguments: serde_json::Value,
}

impl ToolCallRequest {
    /// OpenAI wire shape; arguments travel as a JSON-encoded string.
    pub fn to_wire(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "type": "function",
            "function": {
                "name": self.name,
                "arguments": self.arguments.to_string(),
            }
        })
    }
}

/// One turn of a conversation transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Only set on assistant turns.
    pub tool_calls: Vec<ToolCallRequest>,
    /// Only set on tool turns.
    pub tool_call_id: Option<String>,
    pub name: Option<String>,
}

impl ChatMessage {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Assistant turn that records the tool calls it asked for.
    pub fn assistant_with_tools(content: impl Into<String>, calls: Vec<ToolCallRequest>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    /// Result of a single tool call, correlated by the call's id.
    pub fn tool_result(call: &ToolCallRequest, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call.id.clone()),
            name: Some(call.name.clone()),
            ..Self::plain(Role::Tool, content)
        }
    }

    pub fn to_wire(&self) -> serde_json::Value {
        let mut msg = serde_json::json!({
            "role": self.role.as_str(),
            "content": self.content,
        });
        if !self.tool_calls.is_empty() {
            msg["tool_calls"] = self.tool_calls.iter().map(ToolCallRequest::to_wire).collect();
        }
        if let Some(id) = &self.tool_call_id {
            msg["tool_call_id"] = serde_json::Value::String(id.clone());
        }
        if let Some(name) = &self.name {
            msg["name"] = serde_json::Value::String(name.clone());
        }
        msg
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Normalized result of one model turn.
///
/// Remote failures are not errors at this level: they arrive as a response
/// with `finish_reason == "error"` and a readable `content`.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub finish_reason: String,
    pub usage: Usage,
}

impl LlmResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
            finish_reason: "stop".into(),
            usage: Usage::default(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            finish_reason: FINISH_ERROR.into(),
            ..Self::text(message)
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn is_error(&self) -> bool {
        self.finish_reason == FINISH_ERROR
    }
}

/// Chat-completion capability consumed by the conversation loop.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Run one model turn. `model` falls back to [`LlmProvider::default_model`].
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[serde_json::Value],
        model: Option<&str>,
        max_tokens: u32,
        temperature: f64,
    ) -> LlmResponse;

    fn default_model(&self) -> &str;
}
