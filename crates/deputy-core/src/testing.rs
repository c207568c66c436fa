//! In-memory doubles shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Notify;

use crate::providers::{
    ChatMessage, ChatTransport, ConfigError, LlmProvider, LlmResponse, ProviderFactory,
    RouterFactory, TransportError, TransportRequest,
};
use crate::tools::Tool;

/// Records every request and replays queued replies in order.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    replies: Mutex<VecDeque<Result<Value, TransportError>>>,
    fallback: Mutex<Option<Value>>,
    requests: Mutex<Vec<TransportRequest>>,
    gate: Option<Arc<Notify>>,
    panic_on_call: AtomicBool,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every call waits for one `notify_one` on the returned handle.
    pub fn gated() -> (Arc<Self>, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let transport = Self {
            gate: Some(gate.clone()),
            ..Self::default()
        };
        (Arc::new(transport), gate)
    }

    pub fn panicking() -> Arc<Self> {
        let transport = Self::default();
        transport.panic_on_call.store(true, Ordering::SeqCst);
        Arc::new(transport)
    }

    pub fn push_ok(&self, body: Value) {
        self.replies.lock().unwrap().push_back(Ok(body));
    }

    pub fn push_err(&self, err: TransportError) {
        self.replies.lock().unwrap().push_back(Err(err));
    }

    /// Reply used once the queue is empty.
    pub fn set_fallback(&self, body: Value) {
        *self.fallback.lock().unwrap() = Some(body);
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> TransportRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn post_json(&self, request: &TransportRequest) -> Result<Value, TransportError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.requests.lock().unwrap().push(request.clone());
        if self.panic_on_call.load(Ordering::SeqCst) {
            panic!("scripted transport panic");
        }
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(reply) => reply,
            None => self
                .fallback
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| TransportError::Request("script exhausted".into())),
        }
    }
}

pub(crate) fn completion_json(text: &str) -> Value {
    json!({
        "choices": [{
            "message": {"role": "assistant", "content": text},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
    })
}

/// `(id, name, arguments-as-json-string)` per call.
pub(crate) fn tool_call_json(calls: &[(&str, &str, &str)]) -> Value {
    let tool_calls: Vec<Value> = calls
        .iter()
        .map(|(id, name, args)| {
            json!({
                "id": id,
                "type": "function",
                "function": {"name": name, "arguments": args}
            })
        })
        .collect();
    json!({
        "choices": [{
            "message": {"role": "assistant", "content": null, "tool_calls": tool_calls},
            "finish_reason": "tool_calls"
        }]
    })
}

/// Provider replaying canned responses and recording each transcript it saw.
pub(crate) struct ScriptedProvider {
    responses: Mutex<VecDeque<LlmResponse>>,
    fallback: Option<LlmResponse>,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<LlmResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            fallback: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Answers every call with `response`.
    pub fn repeating(response: LlmResponse) -> Self {
        Self {
            fallback: Some(response),
            ..Self::new(Vec::new())
        }
    }

    pub fn transcripts(&self) -> Vec<Vec<ChatMessage>> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        _tools: &[Value],
        _model: Option<&str>,
        _max_tokens: u32,
        _temperature: f64,
    ) -> LlmResponse {
        self.seen.lock().unwrap().push(messages.to_vec());
        let next = self.responses.lock().unwrap().pop_front();
        next.or_else(|| self.fallback.clone())
            .unwrap_or_else(|| LlmResponse::error("script exhausted"))
    }

    fn default_model(&self) -> &str {
        "scripted-model"
    }
}

pub(crate) struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the given text."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"]
        })
    }

    async fn execute(&self, params: Value) -> Result<String> {
        Ok(params["text"].as_str().unwrap_or_default().to_string())
    }
}

pub(crate) struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "explode"
    }

    fn description(&self) -> &str {
        "Always fails."
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _params: Value) -> Result<String> {
        anyhow::bail!("disk on fire")
    }
}

/// Builds routers until `succeed` creations have been made, then fails.
pub(crate) struct FlakyFactory {
    inner: RouterFactory,
    succeed: usize,
    made: AtomicUsize,
}

impl FlakyFactory {
    pub fn new(inner: RouterFactory, succeed: usize) -> Self {
        Self {
            inner,
            succeed,
            made: AtomicUsize::new(0),
        }
    }
}

impl ProviderFactory for FlakyFactory {
    fn create(&self) -> Result<Arc<dyn LlmProvider>, ConfigError> {
        if self.made.fetch_add(1, Ordering::SeqCst) >= self.succeed {
            return Err(ConfigError::MissingApiKey);
        }
        self.inner.create()
    }
}
