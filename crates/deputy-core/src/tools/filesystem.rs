use std::path::{Component, Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use super::Tool;

const MAX_READ_CHARS: usize = 50_000;

/// Resolves tool paths against a workspace, optionally confining them to it.
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
    restrict: bool,
}

impl Sandbox {
    pub fn new(root: impl Into<PathBuf>, restrict: bool) -> Self {
        Self {
            root: root.into(),
            restrict,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_restricted(&self) -> bool {
        self.restrict
    }

    /// Expand `~`, anchor relative paths at the workspace root, and resolve
    /// symlinks in the existing part of the path.
    pub fn resolve(&self, raw: &str) -> std::result::Result<PathBuf, String> {
        let expanded = expand_home(raw);
        let anchored = if expanded.is_absolute() {
            expanded
        } else {
            self.root.join(expanded)
        };
        let resolved = canonical(&anchored);

        if self.restrict && !resolved.starts_with(canonical(&self.root)) {
            return Err(format!(
                "Path {raw} is outside workspace {}",
                self.root.display()
            ));
        }
        Ok(resolved)
    }
}

fn expand_home(raw: &str) -> PathBuf {
    if raw == "~" || raw.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(raw.trim_start_matches('~').trim_start_matches('/'));
        }
    }
    PathBuf::from(raw)
}

fn lexical(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonicalize the longest existing ancestor and re-append the rest, so
/// paths that do not exist yet still resolve through symlinks.
fn canonical(path: &Path) -> PathBuf {
    let normalized = lexical(path);
    let mut existing = normalized.as_path();
    let mut missing = Vec::new();
    loop {
        if let Ok(found) = existing.canonicalize() {
            return missing.iter().rev().fold(found, |acc, part| acc.join(part));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return normalized,
        }
    }
}

fn str_param<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow::anyhow!("missing required parameter: {key}"))
}

fn truncate_chars(content: String, max: usize) -> String {
    match content.char_indices().nth(max) {
        Some((cut, _)) => {
            let rest = content[cut..].chars().count();
            format!("{}\n... (truncated, {rest} more chars)", &content[..cut])
        }
        None => content,
    }
}

pub struct ReadFileTool {
    sandbox: Sandbox,
}

impl ReadFileTool {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file. Relative paths are resolved against the workspace."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File to read"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: Value) -> Result<String> {
        let path = str_param(&params, "path")?;
        let file = match self.sandbox.resolve(path) {
            Ok(p) => p,
            Err(e) => return Ok(format!("Error: {e}")),
        };

        match tokio::fs::metadata(&file).await {
            Err(_) => return Ok(format!("Error: File not found: {path}")),
            Ok(meta) if !meta.is_file() => return Ok(format!("Error: Not a file: {path}")),
            Ok(_) => {}
        }

        match tokio::fs::read_to_string(&file).await {
            Ok(content) => Ok(truncate_chars(content, MAX_READ_CHARS)),
            Err(e) => Ok(format!("Error reading file: {e}")),
        }
    }
}

pub struct WriteFileTool {
    sandbox: Sandbox,
}

impl WriteFileTool {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating parent directories as needed."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File to write"},
                "content": {"type": "string", "description": "Full new file content"}
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, params: Value) -> Result<String> {
        let path = str_param(&params, "path")?;
        let content = str_param(&params, "content")?;
        let file = match self.sandbox.resolve(path) {
            Ok(p) => p,
            Err(e) => return Ok(format!("Error: {e}")),
        };

        if let Some(parent) = file.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Ok(format!("Error creating directories: {e}"));
            }
        }
        match tokio::fs::write(&file, content).await {
            Ok(()) => Ok(format!("Wrote {} bytes to {path}", content.len())),
            Err(e) => Ok(format!("Error writing file: {e}")),
        }
    }
}

pub struct EditFileTool {
    sandbox: Sandbox,
}

impl EditFileTool {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace one exact occurrence of old_text with new_text in a file."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File to edit"},
                "old_text": {"type": "string", "minLength": 1, "description": "Exact text to replace; must occur once"},
                "new_text": {"type": "string", "description": "Replacement text"}
            },
            "required": ["path", "old_text", "new_text"]
        })
    }

    async fn execute(&self, params: Value) -> Result<String> {
        let path = str_param(&params, "path")?;
        let old_text = str_param(&params, "old_text")?;
        let new_text = str_param(&params, "new_text")?;
        let file = match self.sandbox.resolve(path) {
            Ok(p) => p,
            Err(e) => return Ok(format!("Error: {e}")),
        };

        let content = match tokio::fs::read_to_string(&file).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(format!("Error: File not found: {path}"))
            }
            Err(e) => return Ok(format!("Error reading file: {e}")),
        };

        match content.matches(old_text).count() {
            0 => Ok("Error: old_text not found in file. It must match exactly.".into()),
            1 => {
                let updated = content.replacen(old_text, new_text, 1);
                match tokio::fs::write(&file, updated).await {
                    Ok(()) => Ok(format!("Edited {path}")),
                    Err(e) => Ok(format!("Error writing file: {e}")),
                }
            }
            n => Ok(format!(
                "Error: old_text appears {n} times. Include more surrounding text to make it unique."
            )),
        }
    }
}

pub struct ListDirTool {
    sandbox: Sandbox,
}

impl ListDirTool {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List a directory. Defaults to the workspace root."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory to list"}
            }
        })
    }

    async fn execute(&self, params: Value) -> Result<String> {
        let path = params.get("path").and_then(Value::as_str).unwrap_or(".");
        let dir = match self.sandbox.resolve(path) {
            Ok(p) => p,
            Err(e) => return Ok(format!("Error: {e}")),
        };

        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(format!("Error: Directory not found: {path}"))
            }
            Err(e) => return Ok(format!("Error listing directory {path}: {e}")),
        };

        let mut entries = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            let tag = if is_dir { "[dir] " } else { "[file]" };
            entries.push(format!("{tag} {}", entry.file_name().to_string_lossy()));
        }
        entries.sort_by(|a, b| a[7..].cmp(&b[7..]));

        if entries.is_empty() {
            Ok(format!("Directory {path} is empty"))
        } else {
            Ok(entries.join("\n"))
        }
    }
}
