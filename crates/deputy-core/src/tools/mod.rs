pub mod filesystem;
pub mod shell;
pub mod spawn;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Trait for tools callable by the model.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON schema of the arguments; must be an object schema.
    fn parameters_schema(&self) -> Value;
    /// Expected problems (missing file, blocked command) are reported as
    /// `Ok` text for the model. `Err` means the tool itself broke.
    async fn execute(&self, params: Value) -> anyhow::Result<String>;
}

/// Failure at the tool-execution boundary.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    Unknown(String),
    #[error("tool '{tool}' failed: {source:#}")]
    Execution {
        tool: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("tool '{tool}' has an invalid parameter schema: {reason}")]
    InvalidSchema { tool: String, reason: String },
}

impl ToolError {
    /// Programming defects, as opposed to failures a task can run into.
    pub fn is_defect(&self) -> bool {
        matches!(self, ToolError::InvalidSchema { .. })
    }
}

/// Registry of tools, keyed by name. Definitions come out in name order.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later registrations under the same name replace earlier ones.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool definitions in OpenAI function-calling format.
    pub fn get_definitions(&self) -> Vec<Value> {
        self.tools
            .values()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name(),
                        "description": t.description(),
                        "parameters": t.parameters_schema(),
                    }
                })
            })
            .collect()
    }

    pub async fn execute(&self, name: &str, params: Value) -> Result<String, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::Unknown(name.to_string()))?;

        let schema = tool.parameters_schema();
        if schema.get("type").and_then(Value::as_str) != Some("object") {
            return Err(ToolError::InvalidSchema {
                tool: name.to_string(),
                reason: "parameters must be a JSON object schema".into(),
            });
        }

        let errors = validate_params(&params, &schema);
        if !errors.is_empty() {
            return Ok(format!(
                "Error: Invalid parameters for tool '{name}': {}",
                errors.join("; ")
            ));
        }

        tool.execute(params)
            .await
            .map_err(|source| ToolError::Execution {
                tool: name.to_string(),
                source,
            })
    }
}

/// Check arguments against a (subset of) JSON schema. Empty means valid.
fn validate_params(params: &Value, schema: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    validate_value(params, schema, "", &mut errors);
    errors
}

fn child_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn type_matches(val: &Value, expected: &str) -> bool {
    match expected {
        "object" => val.is_object(),
        "array" => val.is_array(),
        "string" => val.is_string(),
        "integer" => val.is_i64() || val.is_u64(),
        "number" => val.is_number(),
        "boolean" => val.is_boolean(),
        "null" => val.is_null(),
        _ => true,
    }
}

fn validate_value(val: &Value, schema: &Value, path: &str, errors: &mut Vec<String>) {
    let at = if path.is_empty() { "root" } else { path };

    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        if !type_matches(val, expected) {
            errors.push(format!("{at}: expected type '{expected}'"));
            return;
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(val) {
            errors.push(format!("{at}: value not in allowed enum"));
        }
    }

    if let Some(n) = val.as_f64() {
        if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
            if n < min {
                errors.push(format!("{at}: value {n} < minimum {min}"));
            }
        }
        if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
            if n > max {
                errors.push(format!("{at}: value {n} > maximum {max}"));
            }
        }
    }

    if let Some(s) = val.as_str() {
        let len = s.chars().count() as u64;
        if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
            if len < min {
                errors.push(format!("{at}: string length {len} < minLength {min}"));
            }
        }
        if let Some(max) = schema.get("maxLength").and_then(Value::as_u64) {
            if len > max {
                errors.push(format!("{at}: string length {len} > maxLength {max}"));
            }
        }
    }

    if let Some(obj) = val.as_object() {
        let required = schema.get("required").and_then(Value::as_array);
        for field in required.into_iter().flatten().filter_map(Value::as_str) {
            if !obj.contains_key(field) {
                errors.push(format!("{}: required field missing", child_path(path, field)));
            }
        }
        if let Some(props) = schema.get("properties").and_then(Value::as_object) {
            for (key, prop_schema) in props {
                if let Some(prop_val) = obj.get(key) {
                    validate_value(prop_val, prop_schema, &child_path(path, key), errors);
                }
            }
        }
    }

    if let (Some(items), Some(item_schema)) = (val.as_array(), schema.get("items")) {
        for (i, item) in items.iter().enumerate() {
            validate_value(item, item_schema, &format!("{at}[{i}]"), errors);
        }
    }
}
