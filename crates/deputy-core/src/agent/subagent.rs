use std::any::Any;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::agent::r#loop::{ConversationLoop, LoopSettings, MAX_ITERATIONS};
use crate::bus::InboundMessage;
use crate::providers::{ConfigError, ProviderFactory};
use crate::tools::filesystem::{EditFileTool, ListDirTool, ReadFileTool, Sandbox, WriteFileTool};
use crate::tools::shell::ExecShellTool;
use crate::tools::{Tool, ToolError, ToolRegistry};

/// Tools a subagent can be given, by name.
pub const SUBAGENT_TOOLS: &[&str] = &["read_file", "write_file", "edit_file", "list_dir", "exec_shell"];

const LABEL_CHARS: usize = 30;

/// Where a subagent's announcement is delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub channel: String,
    pub chat_id: String,
}

impl Origin {
    pub fn new(channel: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
        }
    }

    /// `<channel>:<chat_id>`, the chat id used on system messages.
    pub fn address(&self) -> String {
        format!("{}:{}", self.channel, self.chat_id)
    }
}

impl Default for Origin {
    fn default() -> Self {
        Self::new("cli", "direct")
    }
}

/// Arguments to [`SubagentManager::spawn`]. Empty strings count as absent.
#[derive(Debug, Clone, Default)]
pub struct SpawnRequest {
    pub task: String,
    pub label: Option<String>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    /// Allowlist of tool names; `None` or empty enables the whole catalog.
    pub tool_names: Option<Vec<String>>,
    pub origin: Origin,
}

impl SpawnRequest {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            ..Self::default()
        }
    }
}

/// Immutable configuration of one spawned subagent.
#[derive(Debug, Clone)]
pub struct SubagentTask {
    pub id: String,
    pub label: String,
    pub task: String,
    pub model: String,
    pub system_prompt: String,
    pub tool_names: Option<Vec<String>>,
    pub origin: Origin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Completed,
    Failed,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        }
    }
}

struct TaskHandle {
    label: String,
    state: TaskState,
    started: Instant,
}

/// Point-in-time view of a running subagent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSnapshot {
    pub id: String,
    pub label: String,
    pub state: TaskState,
    pub elapsed: Duration,
}

#[derive(Debug, Error)]
pub enum SubagentError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error("subagent panicked: {0}")]
    Panicked(String),
    #[error("subagent task was cancelled")]
    Cancelled,
}

impl SubagentError {
    fn is_defect(&self) -> bool {
        match self {
            SubagentError::Tool(e) => e.is_defect(),
            SubagentError::Panicked(_) => true,
            _ => false,
        }
    }
}

/// Model and tool parameters shared by every subagent of a manager.
#[derive(Debug, Clone)]
pub struct SubagentOptions {
    pub max_tokens: u32,
    pub temperature: f64,
    pub max_iterations: usize,
    pub restrict_to_workspace: bool,
    pub exec_timeout_secs: u64,
}

impl Default for SubagentOptions {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.7,
            max_iterations: MAX_ITERATIONS,
            restrict_to_workspace: false,
            exec_timeout_secs: 60,
        }
    }
}

impl SubagentOptions {
    pub fn from_config(config: &deputy_config::Config) -> Self {
        Self {
            max_tokens: config.agents.defaults.max_tokens,
            temperature: config.agents.defaults.temperature,
            max_iterations: MAX_ITERATIONS,
            restrict_to_workspace: config.tools.restrict_to_workspace,
            exec_timeout_secs: config.tools.exec.timeout_secs,
        }
    }
}

/// First 30 characters of the task, with `...` when cut.
pub fn default_label(task: &str) -> String {
    match task.char_indices().nth(LABEL_CHARS) {
        Some((cut, _)) => format!("{}...", &task[..cut]),
        None => task.to_string(),
    }
}

pub fn default_system_prompt(task: &str, workspace: &Path) -> String {
    format!(
        "# Subagent\n\n\
         You were spawned by the main agent to complete one specific task.\n\n\
         ## Task\n\
         {task}\n\n\
         ## Rules\n\
         1. Stay focused: complete only the assigned task\n\
         2. Your final response is reported back to the main agent\n\
         3. Do not start conversations or take on side tasks\n\
         4. Be concise but informative\n\n\
         ## Workspace\n\
         Your workspace is at: {}\n\n\
         When the task is done, give a clear summary of what you found or did.",
        workspace.display()
    )
}

/// Announcement text delivered to the origin when a subagent finishes.
pub fn announcement(label: &str, task: &str, outcome: &Result<String, SubagentError>) -> String {
    let (status, result) = match outcome {
        Ok(text) => ("completed", text.clone()),
        Err(e) => ("failed", format!("Error: {e}")),
    };
    format!(
        "[Subagent '{label}' {status}]\n\n\
         Task: {task}\n\n\
         Result:\n{result}\n\n\
         Summarize naturally for the user. Keep brief (1-2 sentences)."
    )
}

/// Catalog tools enabled by `allow`. Unknown names are skipped.
pub fn build_tools(workspace: &Path, options: &SubagentOptions, allow: Option<&[String]>) -> ToolRegistry {
    let sandbox = Sandbox::new(workspace, options.restrict_to_workspace);
    let catalog: Vec<Box<dyn Tool>> = vec![
        Box::new(ReadFileTool::new(sandbox.clone())),
        Box::new(WriteFileTool::new(sandbox.clone())),
        Box::new(EditFileTool::new(sandbox.clone())),
        Box::new(ListDirTool::new(sandbox.clone())),
        Box::new(ExecShellTool::new(sandbox, options.exec_timeout_secs)),
    ];

    let allow = allow.filter(|names| !names.is_empty());
    if let Some(names) = allow {
        for name in names.iter().filter(|n| !SUBAGENT_TOOLS.contains(&n.as_str())) {
            debug!("Skipping unknown subagent tool '{name}'");
        }
    }

    let mut registry = ToolRegistry::new();
    for tool in catalog {
        if allow.map_or(true, |names| names.iter().any(|n| n == tool.name())) {
            registry.register(tool);
        }
    }
    registry
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Everything a background subagent needs, detached from the manager.
#[derive(Clone)]
struct Worker {
    factory: Arc<dyn ProviderFactory>,
    workspace: PathBuf,
    options: SubagentOptions,
    inbound_tx: mpsc::Sender<InboundMessage>,
    running: Arc<Mutex<HashMap<String, TaskHandle>>>,
}

impl Worker {
    async fn supervise(self, task: SubagentTask) {
        info!("Subagent {} [{}] starting", task.id, task.label);

        // Own task so a panic surfaces here as a JoinError.
        let run = tokio::spawn(self.clone().execute(task.clone()));
        let outcome = match run.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(SubagentError::Panicked(panic_message(e.into_panic()))),
            Err(_) => Err(SubagentError::Cancelled),
        };

        let state = match &outcome {
            Ok(_) => {
                info!("Subagent {} [{}] completed", task.id, task.label);
                TaskState::Completed
            }
            Err(e) if e.is_defect() => {
                error!("Subagent {} [{}] failed with a defect: {e}", task.id, task.label);
                TaskState::Failed
            }
            Err(e) => {
                warn!("Subagent {} [{}] failed: {e}", task.id, task.label);
                TaskState::Failed
            }
        };

        if let Some(mut handle) = self.running.lock().await.remove(&task.id) {
            handle.state = state;
            debug!(
                "Subagent {} {} after {:.1}s",
                task.id,
                handle.state.as_str(),
                handle.started.elapsed().as_secs_f64()
            );
        }

        self.announce(&task, &outcome).await;
    }

    async fn execute(self, task: SubagentTask) -> Result<String, SubagentError> {
        let provider = self.factory.create()?;
        let tools = build_tools(&self.workspace, &self.options, task.tool_names.as_deref());
        let settings = LoopSettings {
            model: Some(task.model.clone()),
            max_tokens: self.options.max_tokens,
            temperature: self.options.temperature,
            max_iterations: self.options.max_iterations,
        };

        let outcome = ConversationLoop::new(provider, tools, settings)
            .run(&task.system_prompt, &task.task)
            .await?;
        if outcome.exhausted {
            warn!(
                "Subagent {} used all {} model turns without a final answer",
                task.id, outcome.model_turns
            );
        }
        Ok(outcome.result)
    }

    async fn announce(&self, task: &SubagentTask, outcome: &Result<String, SubagentError>) {
        let status = if outcome.is_ok() { "ok" } else { "error" };
        let metadata = HashMap::from([
            ("subagent_id".to_string(), serde_json::Value::String(task.id.clone())),
            ("label".to_string(), serde_json::Value::String(task.label.clone())),
            ("status".to_string(), serde_json::Value::String(status.to_string())),
        ]);
        let msg = InboundMessage {
            channel: "system".to_string(),
            sender_id: "subagent".to_string(),
            chat_id: task.origin.address(),
            content: announcement(&task.label, &task.task, outcome),
            media: Vec::new(),
            metadata,
        };

        match self.inbound_tx.send(msg).await {
            Ok(()) => debug!("Subagent {} announced to {}", task.id, task.origin.address()),
            Err(e) => warn!("Failed to announce subagent {} result: {e}", task.id),
        }
    }
}

/// Spawns subagents as background tasks and tracks the running ones.
pub struct SubagentManager {
    worker: Worker,
    default_model: String,
}

impl SubagentManager {
    /// Fails when the factory cannot build a provider, so no subagent is
    /// ever spawned against an invalid configuration.
    pub fn new(
        factory: Arc<dyn ProviderFactory>,
        workspace: PathBuf,
        inbound_tx: mpsc::Sender<InboundMessage>,
        model: Option<String>,
        options: SubagentOptions,
    ) -> Result<Self, ConfigError> {
        let probe = factory.create()?;
        let default_model = model
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| probe.default_model().to_string());

        Ok(Self {
            worker: Worker {
                factory,
                workspace,
                options,
                inbound_tx,
                running: Arc::new(Mutex::new(HashMap::new())),
            },
            default_model,
        })
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn workspace(&self) -> &Path {
        &self.worker.workspace
    }

    /// Start a subagent and return an acknowledgement immediately. The result
    /// arrives later as one message on the inbound channel.
    pub async fn spawn(&self, request: SpawnRequest) -> String {
        let SpawnRequest {
            task,
            label,
            model,
            system_prompt,
            tool_names,
            origin,
        } = request;

        let mut running = self.worker.running.lock().await;
        let id = loop {
            let candidate = uuid::Uuid::new_v4().to_string()[..8].to_string();
            if !running.contains_key(&candidate) {
                break candidate;
            }
        };

        let label = label
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| default_label(&task));
        let model = model
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.default_model.clone());
        let system_prompt = system_prompt
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| default_system_prompt(&task, &self.worker.workspace));

        info!("Spawning subagent {id} ({label}) on {model}: {task}");
        let job = SubagentTask {
            id: id.clone(),
            label: label.clone(),
            task,
            model,
            system_prompt,
            tool_names,
            origin,
        };

        // Registered under the same lock, so completion always finds the entry.
        tokio::spawn(self.worker.clone().supervise(job));
        running.insert(
            id.clone(),
            TaskHandle {
                label: label.clone(),
                state: TaskState::Running,
                started: Instant::now(),
            },
        );

        format!("Subagent [{label}] started (id: {id}). Will notify on completion.")
    }

    pub async fn running_count(&self) -> usize {
        self.worker.running.lock().await.len()
    }

    pub async fn list(&self) -> Vec<TaskSnapshot> {
        let mut snapshots: Vec<TaskSnapshot> = self
            .worker
            .running
            .lock()
            .await
            .iter()
            .map(|(id, handle)| TaskSnapshot {
                id: id.clone(),
                label: handle.label.clone(),
                state: handle.state,
                elapsed: handle.started.elapsed(),
            })
            .collect();
        snapshots.sort_by(|a, b| b.elapsed.cmp(&a.elapsed));
        snapshots
    }
}
