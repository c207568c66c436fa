use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::providers::{ChatMessage, LlmProvider, LlmResponse, ToolCallRequest};
use crate::tools::{ToolError, ToolRegistry};

/// Hard bound on model turns per run.
pub const MAX_ITERATIONS: usize = 15;

/// Result used when the model never produced a tool-free answer.
pub const NO_FINAL_RESPONSE: &str = "Task completed but no final response generated.";

const PREVIEW_CHARS: usize = 200;

/// Find the largest byte index <= `max` that is a UTF-8 char boundary.
fn floor_char_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut i = max;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn preview(text: &str) -> String {
    if text.len() > PREVIEW_CHARS {
        let end = floor_char_boundary(text, PREVIEW_CHARS);
        format!("{}... ({} chars)", &text[..end], text.len())
    } else {
        text.to_string()
    }
}

/// Conversation history. Turns can be appended, never edited or removed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Per-run model parameters.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    /// `None` uses the provider's default model.
    pub model: Option<String>,
    pub max_tokens: u32,
    pub temperature: f64,
    pub max_iterations: usize,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: 4096,
            temperature: 0.7,
            max_iterations: MAX_ITERATIONS,
        }
    }
}

enum LoopState {
    Accumulating,
    AwaitingModel,
    ExecutingTools(Vec<ToolCallRequest>),
    Done { result: String, exhausted: bool },
}

#[derive(Debug)]
pub struct LoopOutcome {
    pub result: String,
    pub model_turns: usize,
    /// The iteration bound was hit before a final answer.
    pub exhausted: bool,
    pub transcript: Transcript,
}

/// Bounded tool-calling conversation against one provider and tool set.
pub struct ConversationLoop {
    provider: Arc<dyn LlmProvider>,
    tools: ToolRegistry,
    settings: LoopSettings,
}

impl ConversationLoop {
    pub fn new(provider: Arc<dyn LlmProvider>, tools: ToolRegistry, settings: LoopSettings) -> Self {
        Self {
            provider,
            tools,
            settings,
        }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Run until the model answers without tool calls or the bound is reached.
    ///
    /// Error-shaped provider responses end the run like any other answer.
    /// Tool failures abort the run and are returned to the caller.
    pub async fn run(&self, system_prompt: &str, task: &str) -> Result<LoopOutcome, ToolError> {
        let definitions = self.tools.get_definitions();
        let max = self.settings.max_iterations;
        let mut transcript = Transcript::default();
        let mut turns = 0;
        let mut state = LoopState::Accumulating;

        let (result, exhausted) = loop {
            state = match state {
                LoopState::Accumulating => {
                    transcript.push(ChatMessage::system(system_prompt));
                    transcript.push(ChatMessage::user(task));
                    LoopState::AwaitingModel
                }
                LoopState::AwaitingModel if turns >= max => {
                    warn!("Conversation reached max iterations ({max}) without final response");
                    LoopState::Done {
                        result: NO_FINAL_RESPONSE.to_string(),
                        exhausted: true,
                    }
                }
                LoopState::AwaitingModel => {
                    turns += 1;
                    debug!(
                        "LLM turn [{turns}/{max}]: {} messages, {} tools",
                        transcript.len(),
                        definitions.len()
                    );
                    let response = self
                        .provider
                        .chat(
                            transcript.messages(),
                            &definitions,
                            self.settings.model.as_deref(),
                            self.settings.max_tokens,
                            self.settings.temperature,
                        )
                        .await;
                    self.after_response(response, &mut transcript)
                }
                LoopState::ExecutingTools(calls) => {
                    for call in calls {
                        info!(
                            "Tool call [{turns}/{max}]: {}({})",
                            call.name,
                            preview(&call.arguments.to_string())
                        );
                        let output = self.tools.execute(&call.name, call.arguments.clone()).await?;
                        debug!("Tool result [{}]: {}", call.name, preview(&output));
                        transcript.push(ChatMessage::tool_result(&call, output));
                    }
                    LoopState::AwaitingModel
                }
                LoopState::Done { result, exhausted } => break (result, exhausted),
            };
        };

        Ok(LoopOutcome {
            result,
            model_turns: turns,
            exhausted,
            transcript,
        })
    }

    fn after_response(&self, response: LlmResponse, transcript: &mut Transcript) -> LoopState {
        if response.has_tool_calls() {
            let LlmResponse {
                content,
                tool_calls,
                ..
            } = response;
            transcript.push(ChatMessage::assistant_with_tools(
                content.unwrap_or_default(),
                tool_calls.clone(),
            ));
            return LoopState::ExecutingTools(tool_calls);
        }

        if response.is_error() {
            warn!(
                "Provider returned an error turn: {}",
                preview(response.content.as_deref().unwrap_or_default())
            );
        }
        let result = response
            .content
            .unwrap_or_else(|| NO_FINAL_RESPONSE.to_string());
        transcript.push(ChatMessage::assistant(result.clone()));
        LoopState::Done {
            result,
            exhausted: false,
        }
    }
}
