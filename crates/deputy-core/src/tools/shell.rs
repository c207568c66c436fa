use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tokio::process::Command;

use super::filesystem::Sandbox;
use super::Tool;

const MAX_OUTPUT_CHARS: usize = 10_000;

const DENY_PATTERNS: &[&str] = &[
    r"\brm\s+-[rf]{1,2}\b",
    r"\bdel\s+/[fq]\b",
    r"\brmdir\s+/s\b",
    r"\b(format|mkfs|diskpart)\b",
    r"\bdd\s+if=",
    r">\s*/dev/sd",
    r"\b(shutdown|reboot|poweroff|halt)\b",
    r":\(\)\s*\{.*\};\s*:",
];

/// Runs `sh -c` commands in the workspace with a deny-list and a timeout.
pub struct ExecShellTool {
    sandbox: Sandbox,
    timeout: Duration,
    deny: Vec<Regex>,
    absolute_path: Regex,
}

impl ExecShellTool {
    pub fn new(sandbox: Sandbox, timeout_secs: u64) -> Self {
        Self {
            sandbox,
            timeout: Duration::from_secs(timeout_secs),
            deny: DENY_PATTERNS
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect(),
            absolute_path: Regex::new(r#"(?:^|[\s|>=])(/[^\s"'>|;]+)"#).expect("valid regex"),
        }
    }

    /// Reason the command is refused, if it is.
    fn guard(&self, command: &str, cwd: &Path) -> Option<&'static str> {
        let lower = command.to_lowercase();
        if self.deny.iter().any(|re| re.is_match(&lower)) {
            return Some("dangerous pattern detected");
        }
        if !self.sandbox.is_restricted() {
            return None;
        }

        if command.contains("../") || command.contains("..\\") {
            return Some("path traversal detected");
        }
        let outside = self
            .absolute_path
            .captures_iter(command)
            .filter_map(|cap| cap.get(1))
            .any(|m| self.sandbox.resolve(m.as_str()).is_err());
        if outside || self.sandbox.resolve(&cwd.to_string_lossy()).is_err() {
            return Some("path outside workspace");
        }
        None
    }
}

fn render_output(output: &std::process::Output) -> String {
    let mut parts = Vec::new();

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.is_empty() {
        parts.push(stdout.into_owned());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        parts.push(format!("STDERR:\n{stderr}"));
    }
    if !output.status.success() {
        parts.push(format!("Exit code: {}", output.status.code().unwrap_or(-1)));
    }

    if parts.is_empty() {
        return "(no output)".into();
    }
    let text = parts.join("\n");
    match text.char_indices().nth(MAX_OUTPUT_CHARS) {
        Some((cut, _)) => format!(
            "{}\n... (truncated, {} more chars)",
            &text[..cut],
            text[cut..].chars().count()
        ),
        None => text,
    }
}

#[async_trait]
impl Tool for ExecShellTool {
    fn name(&self) -> &str {
        "exec_shell"
    }

    fn description(&self) -> &str {
        "Run a shell command in the workspace and return stdout, stderr and the exit code."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "minLength": 1, "description": "Command passed to sh -c"},
                "working_dir": {"type": "string", "description": "Directory to run in; defaults to the workspace"}
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, params: Value) -> Result<String> {
        let command = params
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("missing required parameter: command"))?;
        let cwd = match params.get("working_dir").and_then(Value::as_str) {
            Some(dir) => match self.sandbox.resolve(dir) {
                Ok(p) => p,
                Err(e) => return Ok(format!("Error: {e}")),
            },
            None => PathBuf::from(self.sandbox.root()),
        };

        if let Some(reason) = self.guard(command, &cwd) {
            return Ok(format!("Error: Command blocked by safety guard ({reason})"));
        }

        let run = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&cwd)
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok(output)) => Ok(render_output(&output)),
            Ok(Err(e)) => Ok(format!("Error executing command: {e}")),
            Err(_) => Ok(format!(
                "Error: Command timed out after {} seconds",
                self.timeout.as_secs()
            )),
        }
    }
}
