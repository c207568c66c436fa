use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::registry::{self, GatewaySpec, ParamOverride, ProviderSpec, TransportKind};
use super::transport::{
    chat_completions_url, ChatTransport, HttpTransport, TransportError, TransportRequest,
};
use super::{ChatMessage, LlmProvider, LlmResponse, ToolCallRequest, Usage};

/// Invalid provider configuration. Raised only at router construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("no API key configured (set providers.<name>.apiKey in config.json)")]
    MissingApiKey,
    #[error("no default model configured (set agents.defaults.model in config.json)")]
    MissingDefaultModel,
}

/// Inputs for a [`ProviderRouter`].
#[derive(Debug, Clone, Default)]
pub struct RouterSettings {
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    pub default_model: Option<String>,
    /// Attached to every shared-transport request.
    pub extra_headers: HashMap<String, String>,
}

impl RouterSettings {
    pub fn from_config(config: &deputy_config::Config) -> Self {
        let provider = config.active_provider().map(|(_, p)| p);
        Self {
            api_key: provider.and_then(|p| p.api_key.clone()),
            api_base: provider.and_then(|p| p.api_base.clone()),
            default_model: Some(config.agents.defaults.model.clone()),
            extra_headers: provider
                .and_then(|p| p.extra_headers.clone())
                .unwrap_or_default(),
        }
    }
}

/// Credential variables a router resolved for its transports.
///
/// Follows the precedence a process-wide environment setup would: a matched
/// gateway always receives the configured key, while a vendor matched by model
/// name keeps any value already present in the environment. The environment is
/// read, never written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialSet {
    vars: BTreeMap<String, String>,
}

impl CredentialSet {
    pub fn resolve(
        api_key: &str,
        api_base: Option<&str>,
        gateway: Option<&GatewaySpec>,
        provider: Option<&ProviderSpec>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let mut vars = BTreeMap::new();

        if let Some(g) = gateway {
            vars.insert(g.env_key.to_string(), api_key.to_string());
            let base = api_base.or(g.default_api_base).unwrap_or_default();
            for &(name, template) in g.env_extras {
                vars.insert(name.to_string(), render(template, api_key, base));
            }
        } else if let Some(p) = provider {
            let key = lookup(p.env_key).unwrap_or_else(|| api_key.to_string());
            vars.insert(p.env_key.to_string(), key);
            let base = api_base.or(p.default_api_base).unwrap_or_default();
            for &(name, template) in p.env_extras {
                let value = lookup(name).unwrap_or_else(|| render(template, api_key, base));
                vars.insert(name.to_string(), value);
            }
        }

        Self { vars }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

fn render(template: &str, api_key: &str, api_base: &str) -> String {
    template
        .replace("{api_key}", api_key)
        .replace("{api_base}", api_base)
}

/// Where and how one call is sent.
#[derive(Debug, Clone)]
pub struct Route {
    pub transport: TransportKind,
    pub gateway: Option<&'static GatewaySpec>,
    pub provider: Option<&'static ProviderSpec>,
    /// Model name with routing prefix applied.
    pub model: String,
    /// Model name placed in the request body.
    pub wire_model: String,
    pub url: String,
    /// Credential variable the bearer token is read from.
    pub env_key: Option<&'static str>,
    pub overrides: Option<ParamOverride>,
}

/// Resolves `(api_key, api_base, model)` into a route per call and
/// normalizes every backend into [`LlmResponse`].
pub struct ProviderRouter {
    api_key: String,
    api_base: Option<String>,
    default_model: String,
    extra_headers: Vec<(String, String)>,
    gateway: Option<&'static GatewaySpec>,
    credentials: CredentialSet,
    transport: Arc<dyn ChatTransport>,
}

impl ProviderRouter {
    pub fn new(settings: RouterSettings) -> Result<Self, ConfigError> {
        Self::with_transport(settings, Arc::new(HttpTransport::default()))
    }

    pub fn with_transport(
        settings: RouterSettings,
        transport: Arc<dyn ChatTransport>,
    ) -> Result<Self, ConfigError> {
        Self::build(settings, transport, |name| std::env::var(name).ok())
    }

    pub(crate) fn build(
        settings: RouterSettings,
        transport: Arc<dyn ChatTransport>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let api_key = settings
            .api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;
        let default_model = settings
            .default_model
            .filter(|m| !m.trim().is_empty())
            .ok_or(ConfigError::MissingDefaultModel)?;
        let api_base = settings.api_base.filter(|b| !b.trim().is_empty());

        let gateway = registry::resolve_gateway(Some(api_key.as_str()), api_base.as_deref(), &default_model);
        let provider = registry::find_by_model(&default_model);
        let credentials =
            CredentialSet::resolve(&api_key, api_base.as_deref(), gateway, provider, lookup);

        let mut extra_headers: Vec<(String, String)> = settings.extra_headers.into_iter().collect();
        extra_headers.sort();

        info!(
            "Provider router: model={default_model}, gateway={}, provider={}",
            gateway.map_or("-", |g| g.name),
            provider.map_or("-", |p| p.name)
        );

        Ok(Self {
            api_key,
            api_base,
            default_model,
            extra_headers,
            gateway,
            credentials,
            transport,
        })
    }

    pub fn gateway(&self) -> Option<&'static GatewaySpec> {
        self.gateway
    }

    pub fn credentials(&self) -> &CredentialSet {
        &self.credentials
    }

    /// Resolve the route for `model` (or the default model).
    pub fn route(&self, model: Option<&str>) -> Route {
        let model = model
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(&self.default_model);
        let provider = registry::find_by_model(model);

        let is_direct = |g: &&'static GatewaySpec| g.transport == TransportKind::Direct;
        let direct = registry::find_gateway_by_model(model)
            .filter(is_direct)
            .or(self.gateway.filter(is_direct));

        if let Some(gateway) = direct {
            let routed = gateway.apply_prefix(model);
            let base = self
                .api_base
                .as_deref()
                .or(gateway.default_api_base)
                .unwrap_or(registry::FALLBACK_API_BASE);
            return Route {
                transport: TransportKind::Direct,
                gateway: Some(gateway),
                provider,
                wire_model: routed.clone(),
                model: routed,
                url: chat_completions_url(base),
                env_key: Some(gateway.env_key),
                overrides: registry::resolve_override(provider, Some(gateway), model).copied(),
            };
        }

        // At most one prefix: the gateway's if one matched, else the vendor's.
        let gateway = self.gateway;
        let (routed, wire_model) = match (gateway, provider) {
            (Some(g), _) => {
                let routed = g.apply_prefix(model);
                let wire = g.wire_model(&routed).to_string();
                (routed, wire)
            }
            (None, Some(p)) => {
                let routed = p.apply_prefix(model);
                let wire = p.wire_model(&routed).to_string();
                (routed, wire)
            }
            (None, None) => (model.to_string(), model.to_string()),
        };

        let base = self
            .api_base
            .as_deref()
            .or(gateway.and_then(|g| g.default_api_base))
            .or(provider.and_then(|p| p.default_api_base))
            .unwrap_or(registry::FALLBACK_API_BASE);

        Route {
            transport: TransportKind::Shared,
            gateway,
            provider,
            model: routed,
            wire_model,
            url: chat_completions_url(base),
            env_key: gateway.map(|g| g.env_key).or(provider.map(|p| p.env_key)),
            overrides: registry::resolve_override(provider, gateway, model).copied(),
        }
    }

    fn build_request(
        &self,
        route: &Route,
        messages: &[ChatMessage],
        tools: &[Value],
        max_tokens: u32,
        temperature: f64,
    ) -> TransportRequest {
        let overrides = route.overrides.unwrap_or_default();
        let mut body = serde_json::json!({
            "model": route.wire_model,
            "messages": messages.iter().map(ChatMessage::to_wire).collect::<Vec<_>>(),
            "max_tokens": overrides.max_tokens.unwrap_or(max_tokens),
            "temperature": overrides.temperature.unwrap_or(temperature),
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.to_vec());
            body["tool_choice"] = Value::String("auto".into());
        }

        let headers = match route.transport {
            TransportKind::Direct => {
                let mut headers = vec![
                    ("Content-Type".to_string(), "application/json".to_string()),
                    ("Authorization".to_string(), format!("Bearer {}", self.api_key)),
                ];
                if let Some(agent) = route.gateway.and_then(|g| g.user_agent) {
                    headers.push(("User-Agent".to_string(), agent.to_string()));
                }
                headers
            }
            TransportKind::Shared => {
                let key = route
                    .env_key
                    .and_then(|k| self.credentials.get(k))
                    .unwrap_or(&self.api_key);
                let mut headers = vec![("Authorization".to_string(), format!("Bearer {key}"))];
                headers.extend(self.extra_headers.iter().cloned());
                headers
            }
        };

        TransportRequest {
            url: route.url.clone(),
            headers,
            body,
        }
    }
}

#[async_trait]
impl LlmProvider for ProviderRouter {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[Value],
        model: Option<&str>,
        max_tokens: u32,
        temperature: f64,
    ) -> LlmResponse {
        let route = self.route(model);
        let request = self.build_request(&route, messages, tools, max_tokens, temperature);
        debug!(
            "LLM request [{:?}] {}: model={}, {} messages, {} tools, temp={}",
            route.transport,
            route.url,
            route.wire_model,
            messages.len(),
            tools.len(),
            request.body["temperature"]
        );

        match self.transport.post_json(&request).await {
            Ok(body) => {
                let reasoning_fallback = route.transport == TransportKind::Direct;
                parse_chat_completion(&body, reasoning_fallback).unwrap_or_else(|reason| {
                    warn!("Malformed LLM response from {}: {reason}", route.url);
                    LlmResponse::error(format!("Error calling LLM: {reason}"))
                })
            }
            Err(e) => {
                warn!("LLM call to {} failed: {e}", route.url);
                LlmResponse::error(failure_text(&route, &e))
            }
        }
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

fn failure_text(route: &Route, err: &TransportError) -> String {
    match (route.transport, route.gateway, err) {
        (TransportKind::Direct, Some(g), TransportError::Status { status, body }) => {
            format!("{} API error {status}: {body}", g.name)
        }
        (TransportKind::Direct, Some(g), e) => format!("Error calling {}: {e}", g.name),
        (_, _, e) => format!("Error calling LLM: {e}"),
    }
}

/// Decode tool-call arguments into a JSON object.
///
/// A JSON string holding an object decodes to that object; anything else that
/// is not already an object is preserved verbatim as `{"raw": <text>}`.
pub fn parse_arguments(raw: Option<&Value>) -> Value {
    match raw {
        None | Some(Value::Null) => serde_json::json!({}),
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(v @ Value::Object(_)) => v,
            _ => serde_json::json!({ "raw": s }),
        },
        Some(v @ Value::Object(_)) => v.clone(),
        Some(other) => serde_json::json!({ "raw": other.to_string() }),
    }
}

fn parse_tool_call(raw: &Value) -> ToolCallRequest {
    let function = raw.get("function");
    ToolCallRequest {
        id: raw
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        name: function
            .and_then(|f| f.get("name"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        arguments: parse_arguments(function.and_then(|f| f.get("arguments"))),
    }
}

fn parse_usage(raw: &Value) -> Usage {
    let count = |field: &str| raw.get(field).and_then(Value::as_u64).unwrap_or(0);
    Usage {
        prompt_tokens: count("prompt_tokens"),
        completion_tokens: count("completion_tokens"),
        total_tokens: count("total_tokens"),
    }
}

/// Parse a chat-completions body.
///
/// With `reasoning_fallback`, an empty `content` is replaced by the message's
/// `reasoning` text (reasoning models on the direct path answer that way).
pub fn parse_chat_completion(body: &Value, reasoning_fallback: bool) -> Result<LlmResponse, String> {
    let choice = body
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or("response has no choices")?;
    let message = choice
        .get("message")
        .filter(|m| m.is_object())
        .ok_or("response choice has no message")?;

    let tool_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| calls.iter().map(parse_tool_call).collect())
        .unwrap_or_default();

    let mut content = message
        .get("content")
        .and_then(Value::as_str)
        .map(str::to_string);
    if reasoning_fallback {
        let text = content.take().unwrap_or_default();
        let reasoning = message
            .get("reasoning")
            .and_then(Value::as_str)
            .filter(|r| !r.is_empty());
        content = Some(match reasoning {
            Some(r) if text.is_empty() => r.to_string(),
            _ => text,
        });
    }

    Ok(LlmResponse {
        content,
        tool_calls,
        finish_reason: choice
            .get("finish_reason")
            .and_then(Value::as_str)
            .unwrap_or("stop")
            .to_string(),
        usage: body
            .get("usage")
            .filter(|u| u.is_object())
            .map(parse_usage)
            .unwrap_or_default(),
    })
}

/// Builds a fresh provider per subagent.
pub trait ProviderFactory: Send + Sync {
    fn create(&self) -> Result<Arc<dyn LlmProvider>, ConfigError>;
}

/// [`ProviderFactory`] producing [`ProviderRouter`]s over one shared transport.
pub struct RouterFactory {
    settings: RouterSettings,
    transport: Arc<dyn ChatTransport>,
}

impl RouterFactory {
    pub fn new(settings: RouterSettings) -> Self {
        Self::with_transport(settings, Arc::new(HttpTransport::default()))
    }

    pub fn with_transport(settings: RouterSettings, transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            settings,
            transport,
        }
    }
}

impl ProviderFactory for RouterFactory {
    fn create(&self) -> Result<Arc<dyn LlmProvider>, ConfigError> {
        let router = ProviderRouter::with_transport(self.settings.clone(), self.transport.clone())?;
        Ok(Arc::new(router))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{completion_json, tool_call_json, ScriptedTransport};

    fn settings(api_key: &str, api_base: Option<&str>, model: &str) -> RouterSettings {
        RouterSettings {
            api_key: Some(api_key.into()),
            api_base: api_base.map(str::to_string),
            default_model: Some(model.into()),
            extra_headers: HashMap::new(),
        }
    }

    fn router(settings: RouterSettings, transport: &Arc<ScriptedTransport>) -> ProviderRouter {
        ProviderRouter::build(settings, transport.clone(), |_| None).unwrap()
    }

    #[test]
    fn construction_requires_key_and_model() {
        let transport = ScriptedTransport::new();
        let err = ProviderRouter::build(
            RouterSettings {
                default_model: Some("gpt-4o".into()),
                ..Default::default()
            },
            transport.clone(),
            |_| None,
        )
        .err();
        assert_eq!(err, Some(ConfigError::MissingApiKey));

        let err = ProviderRouter::build(settings("sk-1", None, "  "), transport, |_| None).err();
        assert_eq!(err, Some(ConfigError::MissingDefaultModel));
    }

    #[tokio::test]
    async fn gateway_routing_beats_vendor_match() {
        let transport = ScriptedTransport::new();
        transport.push_ok(completion_json("hi"));
        let router = router(settings("sk-or-v1-xyz", None, "anthropic/claude-sonnet-4"), &transport);

        let route = router.route(None);
        assert_eq!(route.gateway.map(|g| g.name), Some("openrouter"));
        assert_eq!(route.model, "openrouter/anthropic/claude-sonnet-4");

        let resp = router.chat(&[ChatMessage::user("hello")], &[], None, 256, 0.2).await;
        assert_eq!(resp.content.as_deref(), Some("hi"));

        let sent = transport.last_request();
        assert_eq!(sent.url, "https://openrouter.ai/api/v1/chat/completions");
        assert_eq!(sent.body["model"], "anthropic/claude-sonnet-4");
        assert_eq!(sent.header("Authorization"), Some("Bearer sk-or-v1-xyz"));
        assert!(sent.body.get("tools").is_none());
        assert_eq!(router.credentials().get("OPENROUTER_API_KEY"), Some("sk-or-v1-xyz"));
        assert!(router.credentials().get("ANTHROPIC_API_KEY").is_none());
    }

    #[tokio::test]
    async fn kimi_override_forces_temperature_once() {
        let transport = ScriptedTransport::new();
        transport.push_ok(completion_json("ok"));
        let router = router(settings("sk-moon", None, "kimi-k2.5"), &transport);

        let route = router.route(None);
        assert_eq!(route.model, "moonshot/kimi-k2.5");

        router.chat(&[ChatMessage::user("hi")], &[], None, 512, 0.7).await;
        let sent = transport.last_request();
        assert_eq!(sent.url, "https://api.moonshot.cn/v1/chat/completions");
        assert_eq!(sent.body["model"], "kimi-k2.5");
        assert_eq!(sent.body["temperature"].as_f64(), Some(1.0));
        assert_eq!(sent.body["max_tokens"], 512);
        assert_eq!(
            router.credentials().get("MOONSHOT_API_BASE"),
            Some("https://api.moonshot.cn/v1")
        );
    }

    #[test]
    fn vendor_credentials_keep_existing_environment() {
        let moonshot = registry::find_by_model("kimi-k2.5");
        let lookup = |name: &str| (name == "MOONSHOT_API_KEY").then(|| "from-env".to_string());
        let creds = CredentialSet::resolve("sk-config", None, None, moonshot, lookup);
        assert_eq!(creds.get("MOONSHOT_API_KEY"), Some("from-env"));
        assert_eq!(creds.get("MOONSHOT_API_BASE"), Some("https://api.moonshot.cn/v1"));

        let creds = CredentialSet::resolve(
            "sk-config",
            Some("https://proxy.internal/v1"),
            None,
            moonshot,
            |_| None,
        );
        assert_eq!(creds.get("MOONSHOT_API_KEY"), Some("sk-config"));
        assert_eq!(creds.get("MOONSHOT_API_BASE"), Some("https://proxy.internal/v1"));
    }

    #[test]
    fn gateway_credentials_ignore_environment() {
        let openrouter = registry::find_gateway(Some("sk-or-1"), None);
        let creds = CredentialSet::resolve("sk-or-1", None, openrouter, None, |_| {
            Some("stale".to_string())
        });
        assert_eq!(creds.get("OPENROUTER_API_KEY"), Some("sk-or-1"));
    }

    #[test]
    fn unmatched_model_has_no_credentials() {
        let creds = CredentialSet::resolve("k", None, None, None, |_| None);
        assert!(creds.is_empty());
    }

    #[tokio::test]
    async fn direct_transport_headers_and_url() {
        let transport = ScriptedTransport::new();
        transport.push_ok(completion_json("done"));
        let router = router(
            settings("sk-zen", Some("https://opencode.ai/zen/v1"), "opencode/kimi-k2.5"),
            &transport,
        );

        let tools = vec![serde_json::json!({"type": "function", "function": {"name": "read_file"}})];
        router
            .chat(&[ChatMessage::user("go")], &tools, None, 1024, 0.3)
            .await;

        let sent = transport.last_request();
        assert_eq!(sent.url, "https://opencode.ai/zen/v1/chat/completions");
        assert_eq!(sent.header("User-Agent"), Some("opencode/1.0.0"));
        assert_eq!(sent.header("Authorization"), Some("Bearer sk-zen"));
        assert_eq!(sent.body["model"], "kimi-k2.5");
        assert_eq!(sent.body["temperature"].as_f64(), Some(1.0));
        assert_eq!(sent.body["tool_choice"], "auto");
        assert_eq!(sent.body["tools"].as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn opencode_model_goes_direct_even_with_other_gateway() {
        let transport = ScriptedTransport::new();
        transport.push_ok(completion_json("done"));
        let router = router(settings("sk-or-abc", None, "openai/gpt-4o"), &transport);

        let route = router.route(Some("opencode/gemini-3-flash"));
        assert_eq!(route.transport, TransportKind::Direct);
        assert_eq!(route.wire_model, "gemini-3-flash");
        // Default model still goes through the gateway.
        assert_eq!(router.route(None).transport, TransportKind::Shared);
    }

    #[tokio::test]
    async fn direct_transport_sends_namespaced_model_intact() {
        let transport = ScriptedTransport::new();
        transport.push_ok(completion_json("done"));
        let router = router(
            settings("sk-zen", Some("https://opencode.ai/zen/v1"), "moonshotai/kimi-k2.5"),
            &transport,
        );
        router.chat(&[ChatMessage::user("go")], &[], None, 64, 0.7).await;

        let sent = transport.last_request();
        assert_eq!(sent.header("User-Agent"), Some("opencode/1.0.0"));
        assert_eq!(sent.body["model"], "moonshotai/kimi-k2.5");
    }

    #[tokio::test]
    async fn direct_base_with_suffix_is_not_doubled() {
        let transport = ScriptedTransport::new();
        transport.push_ok(completion_json("done"));
        let router = router(
            settings(
                "sk-zen",
                Some("https://opencode.ai/zen/v1/chat/completions"),
                "gemini-3-flash",
            ),
            &transport,
        );
        router.chat(&[ChatMessage::user("go")], &[], None, 64, 0.7).await;
        assert_eq!(
            transport.last_request().url,
            "https://opencode.ai/zen/v1/chat/completions"
        );
    }

    #[tokio::test]
    async fn extra_headers_attached_on_shared_path() {
        let transport = ScriptedTransport::new();
        transport.push_ok(completion_json("ok"));
        let mut s = settings("sk-ds", None, "deepseek-chat");
        s.extra_headers.insert("X-Team".into(), "research".into());
        let router = router(s, &transport);

        router.chat(&[ChatMessage::user("q")], &[], None, 64, 0.7).await;
        let sent = transport.last_request();
        assert_eq!(sent.header("X-Team"), Some("research"));
        assert_eq!(sent.url, "https://api.deepseek.com/v1/chat/completions");
        assert_eq!(sent.body["temperature"].as_f64(), Some(0.7));
    }

    #[tokio::test]
    async fn local_gateway_prefixes_once() {
        let transport = ScriptedTransport::new();
        transport.push_ok(completion_json("ok"));
        let router = router(
            settings("token", Some("http://localhost:8000/v1"), "hosted_vllm/qwen2.5"),
            &transport,
        );

        assert_eq!(router.route(None).model, "hosted_vllm/qwen2.5");
        router.chat(&[ChatMessage::user("q")], &[], None, 64, 0.7).await;
        let sent = transport.last_request();
        assert_eq!(sent.url, "http://localhost:8000/v1/chat/completions");
        assert_eq!(sent.body["model"], "qwen2.5");
    }

    #[tokio::test]
    async fn transport_failure_becomes_error_response() {
        let transport = ScriptedTransport::new();
        transport.push_err(TransportError::Request("connection refused".into()));
        let router = router(settings("sk-ds", None, "deepseek-chat"), &transport);

        let resp = router.chat(&[ChatMessage::user("q")], &[], None, 64, 0.7).await;
        assert_eq!(resp.finish_reason, "error");
        assert!(!resp.has_tool_calls());
        let text = resp.content.unwrap();
        assert!(text.contains("connection refused"));
        assert!(text.starts_with("Error calling LLM"));
    }

    #[tokio::test]
    async fn direct_status_failure_names_gateway() {
        let transport = ScriptedTransport::new();
        transport.push_err(TransportError::Status {
            status: 403,
            body: "cloudflare challenge".into(),
        });
        let router = router(settings("k", None, "opencode/kimi-k2.5"), &transport);

        let resp = router.chat(&[ChatMessage::user("q")], &[], None, 64, 0.7).await;
        assert!(resp.is_error());
        assert_eq!(
            resp.content.as_deref(),
            Some("opencode API error 403: cloudflare challenge")
        );
    }

    #[tokio::test]
    async fn malformed_body_becomes_error_response() {
        let transport = ScriptedTransport::new();
        transport.push_ok(serde_json::json!({"object": "error"}));
        let router = router(settings("sk-ds", None, "deepseek-chat"), &transport);

        let resp = router.chat(&[ChatMessage::user("q")], &[], None, 64, 0.7).await;
        assert!(resp.is_error());
        assert!(resp.content.unwrap().contains("no choices"));
    }

    #[test]
    fn arguments_decode_or_fall_back_to_raw() {
        let parsed = parse_arguments(Some(&Value::String(r#"{"path":"a.txt","n":2}"#.into())));
        assert_eq!(parsed, serde_json::json!({"path": "a.txt", "n": 2}));

        let parsed = parse_arguments(Some(&Value::String("{path: a.txt".into())));
        assert_eq!(parsed, serde_json::json!({"raw": "{path: a.txt"}));

        let parsed = parse_arguments(Some(&Value::String("[1, 2]".into())));
        assert_eq!(parsed, serde_json::json!({"raw": "[1, 2]"}));

        let already = serde_json::json!({"query": "rust"});
        assert_eq!(parse_arguments(Some(&already)), already);
        assert_eq!(parse_arguments(None), serde_json::json!({}));
    }

    #[test]
    fn parse_tolerates_missing_usage_and_tool_calls() {
        let body = serde_json::json!({
            "choices": [{"message": {"content": "plain"}}]
        });
        let resp = parse_chat_completion(&body, false).unwrap();
        assert_eq!(resp.content.as_deref(), Some("plain"));
        assert_eq!(resp.finish_reason, "stop");
        assert_eq!(resp.usage, Usage::default());
        assert!(resp.tool_calls.is_empty());
    }

    #[test]
    fn parse_reads_tool_calls_and_usage() {
        let mut body = tool_call_json(&[("call_1", "read_file", r#"{"path":"x"}"#)]);
        body["usage"] = serde_json::json!({"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15});
        let resp = parse_chat_completion(&body, false).unwrap();

        assert!(resp.content.is_none());
        assert_eq!(resp.finish_reason, "tool_calls");
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].id, "call_1");
        assert_eq!(resp.tool_calls[0].arguments["path"], "x");
        assert_eq!(resp.usage.total_tokens, 15);
    }

    #[test]
    fn reasoning_substitutes_empty_content() {
        let body = serde_json::json!({
            "choices": [{
                "message": {"content": "", "reasoning": "The answer is 4."},
                "finish_reason": "stop"
            }]
        });
        let resp = parse_chat_completion(&body, true).unwrap();
        assert_eq!(resp.content.as_deref(), Some("The answer is 4."));

        let body = serde_json::json!({
            "choices": [{"message": {"content": "4", "reasoning": "2+2"}}]
        });
        let resp = parse_chat_completion(&body, true).unwrap();
        assert_eq!(resp.content.as_deref(), Some("4"));
    }

    #[tokio::test]
    async fn reasoning_only_reply_on_direct_path() {
        let transport = ScriptedTransport::new();
        transport.push_ok(serde_json::json!({
            "choices": [{"message": {"content": null, "reasoning": "thought it through"}}]
        }));
        let router = router(settings("k", None, "opencode/glm-4.7"), &transport);
        let resp = router.chat(&[ChatMessage::user("q")], &[], None, 64, 0.7).await;
        assert_eq!(resp.content.as_deref(), Some("thought it through"));
    }
}
