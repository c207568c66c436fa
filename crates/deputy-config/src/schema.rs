use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub agents: AgentsConfig,
    pub providers: ProvidersConfig,
    pub tools: ToolsConfig,
}

impl Config {
    /// Pick the provider entry that supplies credentials for the router.
    ///
    /// An explicit `agents.defaults.provider` wins. Otherwise the first entry
    /// (in [`ProvidersConfig::ORDER`]) with a non-empty API key is used, and
    /// finally a `vllm` entry that only sets an API base.
    pub fn active_provider(&self) -> Option<(&'static str, &ProviderConfig)> {
        let wanted = self.agents.defaults.provider.trim();
        if !wanted.is_empty() {
            return ProvidersConfig::ORDER
                .iter()
                .find(|name| name.eq_ignore_ascii_case(wanted))
                .and_then(|name| self.providers.get(name).map(|cfg| (*name, cfg)));
        }

        ProvidersConfig::ORDER
            .iter()
            .find_map(|name| {
                self.providers
                    .get(name)
                    .filter(|cfg| cfg.api_key.as_deref().is_some_and(|k| !k.is_empty()))
                    .map(|cfg| (*name, cfg))
            })
            .or_else(|| {
                self.providers
                    .vllm
                    .as_ref()
                    .filter(|cfg| cfg.api_base.as_deref().is_some_and(|b| !b.is_empty()))
                    .map(|cfg| ("vllm", cfg))
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentsConfig {
    pub defaults: AgentDefaults,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentDefaults {
    pub workspace: String,
    /// Name of the `providers` entry to use. Empty means "first configured".
    pub provider: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            workspace: "~/.deputy/workspace".into(),
            provider: String::new(),
            model: String::new(),
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ProvidersConfig {
    pub openrouter: Option<ProviderConfig>,
    pub opencode: Option<ProviderConfig>,
    pub anthropic: Option<ProviderConfig>,
    pub openai: Option<ProviderConfig>,
    pub deepseek: Option<ProviderConfig>,
    pub gemini: Option<ProviderConfig>,
    pub zhipu: Option<ProviderConfig>,
    pub groq: Option<ProviderConfig>,
    pub moonshot: Option<ProviderConfig>,
    pub vllm: Option<ProviderConfig>,
}

impl ProvidersConfig {
    /// Lookup order used when no provider is selected explicitly.
    pub const ORDER: [&'static str; 10] = [
        "openrouter",
        "opencode",
        "anthropic",
        "openai",
        "deepseek",
        "gemini",
        "zhipu",
        "groq",
        "moonshot",
        "vllm",
    ];

    pub fn get(&self, name: &str) -> Option<&ProviderConfig> {
        match name {
            "openrouter" => self.openrouter.as_ref(),
            "opencode" => self.opencode.as_ref(),
            "anthropic" => self.anthropic.as_ref(),
            "openai" => self.openai.as_ref(),
            "deepseek" => self.deepseek.as_ref(),
            "gemini" => self.gemini.as_ref(),
            "zhipu" => self.zhipu.as_ref(),
            "groq" => self.groq.as_ref(),
            "moonshot" => self.moonshot.as_ref(),
            "vllm" => self.vllm.as_ref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    pub extra_headers: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolsConfig {
    /// Confine filesystem and shell tools to the workspace directory.
    pub restrict_to_workspace: bool,
    pub exec: ExecToolConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecToolConfig {
    pub timeout_secs: u64,
}

impl Default for ExecToolConfig {
    fn default() -> Self {
        Self { timeout_secs: 60 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let cfg: Config = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(cfg.agents.defaults.max_tokens, 4096);
        assert_eq!(cfg.agents.defaults.temperature, 0.7);
        assert_eq!(cfg.tools.exec.timeout_secs, 60);
        assert!(!cfg.tools.restrict_to_workspace);
        assert!(cfg.active_provider().is_none());
    }

    #[test]
    fn camel_case_keys_are_parsed() {
        let cfg: Config = serde_json::from_value(serde_json::json!({
            "agents": {"defaults": {"model": "moonshot/kimi-k2.5", "maxTokens": 2048}},
            "providers": {
                "moonshot": {
                    "apiKey": "sk-moon",
                    "apiBase": "https://api.moonshot.ai/v1",
                    "extraHeaders": {"X-Trace": "1"}
                }
            },
            "tools": {"restrictToWorkspace": true, "exec": {"timeoutSecs": 5}}
        }))
        .unwrap();

        assert_eq!(cfg.agents.defaults.model, "moonshot/kimi-k2.5");
        assert_eq!(cfg.agents.defaults.max_tokens, 2048);
        assert!(cfg.tools.restrict_to_workspace);
        assert_eq!(cfg.tools.exec.timeout_secs, 5);

        let (name, provider) = cfg.active_provider().unwrap();
        assert_eq!(name, "moonshot");
        assert_eq!(provider.api_key.as_deref(), Some("sk-moon"));
        assert_eq!(
            provider
                .extra_headers
                .as_ref()
                .and_then(|h| h.get("X-Trace"))
                .map(String::as_str),
            Some("1")
        );
    }

    #[test]
    fn active_provider_follows_lookup_order() {
        let cfg: Config = serde_json::from_value(serde_json::json!({
            "providers": {
                "groq": {"apiKey": "gsk-1"},
                "anthropic": {"apiKey": "sk-ant"},
                "openai": {"apiKey": ""}
            }
        }))
        .unwrap();
        assert_eq!(cfg.active_provider().map(|(n, _)| n), Some("anthropic"));
    }

    #[test]
    fn explicit_provider_selection_wins() {
        let cfg: Config = serde_json::from_value(serde_json::json!({
            "agents": {"defaults": {"provider": "Groq"}},
            "providers": {
                "groq": {"apiKey": "gsk-1"},
                "anthropic": {"apiKey": "sk-ant"}
            }
        }))
        .unwrap();
        assert_eq!(cfg.active_provider().map(|(n, _)| n), Some("groq"));
    }

    #[test]
    fn vllm_base_without_key_is_selected() {
        let cfg: Config = serde_json::from_value(serde_json::json!({
            "providers": {"vllm": {"apiBase": "http://localhost:8000/v1"}}
        }))
        .unwrap();
        let (name, provider) = cfg.active_provider().unwrap();
        assert_eq!(name, "vllm");
        assert!(provider.api_key.is_none());
    }
}
