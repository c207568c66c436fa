use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Message delivered to the host agent (user input or system notices such as
/// subagent announcements).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel: String,
    pub sender_id: String,
    pub chat_id: String,
    pub content: String,
    #[serde(default)]
    pub media: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl InboundMessage {
    pub fn session_key(&self) -> String {
        format!("{}:{}", self.channel, self.chat_id)
    }

    /// Original `(channel, chat_id)` of a system message whose chat id has the
    /// form `<channel>:<chat_id>`.
    pub fn origin(&self) -> Option<(&str, &str)> {
        self.chat_id.split_once(':')
    }
}

/// Inbound queue connecting producers to the agent.
pub struct MessageBus {
    pub inbound_tx: mpsc::Sender<InboundMessage>,
    pub inbound_rx: mpsc::Receiver<InboundMessage>,
}

impl MessageBus {
    pub fn new(buffer: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(buffer);
        Self {
            inbound_tx,
            inbound_rx,
        }
    }
}
