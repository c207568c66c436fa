//! Static routing tables for gateways and vendor providers.
//!
//! Several entries can match the same string (a model name may mention both a
//! vendor and a gateway), so both tables are ordered and lookups always return
//! the first match. Gateways take priority over vendor providers.

/// How a matched route reaches the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Generic OpenAI-compatible path with per-call credentials and headers.
    Shared,
    /// Bespoke path with fixed identifying headers.
    Direct,
}

/// Request parameters forced for matching models.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ParamOverride {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

/// (lowercase substring of the model name, forced parameters)
pub type ModelOverride = (&'static str, ParamOverride);

/// (variable name, template using `{api_key}` / `{api_base}`)
pub type EnvExtra = (&'static str, &'static str);

const KIMI_TEMPERATURE: ModelOverride = (
    "kimi-k2.5",
    ParamOverride {
        temperature: Some(1.0),
        max_tokens: None,
    },
);

/// An intermediary endpoint fronting many models.
#[derive(Debug)]
pub struct GatewaySpec {
    pub name: &'static str,
    /// Credential variable this gateway reads.
    pub env_key: &'static str,
    /// Self-hosted: claims any configured base no earlier gateway claimed.
    pub is_local: bool,
    /// Routing prefix applied to model names. Empty means none.
    pub route_prefix: &'static str,
    /// Drop `model_prefix` from the model before routing.
    pub strip_model_prefix: bool,
    pub key_prefix: Option<&'static str>,
    pub base_keyword: Option<&'static str>,
    /// Models addressed as `<model_prefix>...` are routed here regardless of credentials.
    pub model_prefix: Option<&'static str>,
    pub transport: TransportKind,
    pub user_agent: Option<&'static str>,
    pub model_overrides: &'static [ModelOverride],
    pub env_extras: &'static [EnvExtra],
    pub default_api_base: Option<&'static str>,
}

/// A direct vendor, recognised from the model name.
#[derive(Debug)]
pub struct ProviderSpec {
    pub name: &'static str,
    pub keywords: &'static [&'static str],
    pub env_key: &'static str,
    pub route_prefix: &'static str,
    /// Model prefixes that already route correctly and must not be re-prefixed.
    pub skip_prefixes: &'static [&'static str],
    pub model_overrides: &'static [ModelOverride],
    pub env_extras: &'static [EnvExtra],
    pub default_api_base: Option<&'static str>,
}

pub static GATEWAYS: &[GatewaySpec] = &[
    GatewaySpec {
        name: "openrouter",
        env_key: "OPENROUTER_API_KEY",
        is_local: false,
        route_prefix: "openrouter",
        strip_model_prefix: false,
        key_prefix: Some("sk-or-"),
        base_keyword: Some("openrouter"),
        model_prefix: None,
        transport: TransportKind::Shared,
        user_agent: None,
        model_overrides: &[],
        env_extras: &[],
        default_api_base: Some("https://openrouter.ai/api/v1"),
    },
    GatewaySpec {
        name: "opencode",
        env_key: "OPENAI_API_KEY",
        is_local: false,
        route_prefix: "",
        strip_model_prefix: true,
        key_prefix: None,
        base_keyword: Some("opencode.ai"),
        model_prefix: Some("opencode/"),
        transport: TransportKind::Direct,
        user_agent: Some("opencode/1.0.0"),
        model_overrides: &[KIMI_TEMPERATURE],
        env_extras: &[],
        default_api_base: Some("https://opencode.ai/zen/v1"),
    },
    GatewaySpec {
        name: "vllm",
        env_key: "OPENAI_API_KEY",
        is_local: true,
        route_prefix: "hosted_vllm",
        strip_model_prefix: false,
        key_prefix: None,
        base_keyword: None,
        model_prefix: None,
        transport: TransportKind::Shared,
        user_agent: None,
        model_overrides: &[],
        env_extras: &[],
        default_api_base: None,
    },
];

pub static PROVIDERS: &[ProviderSpec] = &[
    ProviderSpec {
        name: "deepseek",
        keywords: &["deepseek"],
        env_key: "DEEPSEEK_API_KEY",
        route_prefix: "",
        skip_prefixes: &[],
        model_overrides: &[],
        env_extras: &[],
        default_api_base: Some("https://api.deepseek.com/v1"),
    },
    ProviderSpec {
        name: "anthropic",
        keywords: &["anthropic", "claude"],
        env_key: "ANTHROPIC_API_KEY",
        route_prefix: "",
        skip_prefixes: &[],
        model_overrides: &[],
        env_extras: &[],
        default_api_base: Some("https://api.anthropic.com/v1"),
    },
    ProviderSpec {
        name: "openai",
        keywords: &["openai", "gpt"],
        env_key: "OPENAI_API_KEY",
        route_prefix: "",
        skip_prefixes: &[],
        model_overrides: &[],
        env_extras: &[],
        default_api_base: Some("https://api.openai.com/v1"),
    },
    ProviderSpec {
        name: "gemini",
        keywords: &["gemini"],
        env_key: "GEMINI_API_KEY",
        route_prefix: "gemini",
        skip_prefixes: &[],
        model_overrides: &[],
        env_extras: &[],
        default_api_base: Some("https://generativelanguage.googleapis.com/v1beta/openai"),
    },
    ProviderSpec {
        name: "zhipu",
        keywords: &["zhipu", "glm", "zai"],
        env_key: "ZHIPUAI_API_KEY",
        route_prefix: "zai",
        skip_prefixes: &["zhipu/", "zai/"],
        model_overrides: &[],
        env_extras: &[],
        default_api_base: Some("https://open.bigmodel.cn/api/paas/v4"),
    },
    ProviderSpec {
        name: "groq",
        keywords: &["groq"],
        env_key: "GROQ_API_KEY",
        route_prefix: "",
        skip_prefixes: &[],
        model_overrides: &[],
        env_extras: &[],
        default_api_base: Some("https://api.groq.com/openai/v1"),
    },
    ProviderSpec {
        name: "moonshot",
        keywords: &["moonshot", "kimi"],
        env_key: "MOONSHOT_API_KEY",
        route_prefix: "moonshot",
        skip_prefixes: &[],
        model_overrides: &[KIMI_TEMPERATURE],
        env_extras: &[("MOONSHOT_API_BASE", "{api_base}")],
        default_api_base: Some("https://api.moonshot.cn/v1"),
    },
];

/// Default endpoint when neither configuration nor a matched spec names one.
pub const FALLBACK_API_BASE: &str = "https://api.openai.com/v1";

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// `prefix/model`, unless the model already carries that prefix.
fn with_prefix(prefix: &str, model: &str) -> String {
    if prefix.is_empty() || has_segment(model, prefix) {
        model.to_string()
    } else {
        format!("{prefix}/{model}")
    }
}

fn has_segment(model: &str, prefix: &str) -> bool {
    model
        .strip_prefix(prefix)
        .is_some_and(|rest| rest.starts_with('/'))
}

fn strip_segment<'a>(model: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() {
        return None;
    }
    model.strip_prefix(prefix)?.strip_prefix('/')
}

fn strip_prefix_ignore_case<'a>(model: &'a str, prefix: &str) -> Option<&'a str> {
    let head = model.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &model[prefix.len()..])
}

fn find_override(overrides: &'static [ModelOverride], model: &str) -> Option<&'static ParamOverride> {
    let lower = model.to_lowercase();
    overrides
        .iter()
        .find(|(pattern, _)| lower.contains(pattern))
        .map(|(_, params)| params)
}

impl GatewaySpec {
    /// Whether the configured credentials identify this gateway.
    pub fn matches(&self, api_key: Option<&str>, api_base: Option<&str>) -> bool {
        let api_key = present(api_key);
        let api_base = present(api_base);

        let key_hit = matches!((self.key_prefix, api_key), (Some(p), Some(k)) if k.starts_with(p));
        let base_hit =
            matches!((self.base_keyword, api_base), (Some(kw), Some(b)) if b.contains(kw));
        let local_hit = self.is_local && api_base.is_some();

        key_hit || base_hit || local_hit
    }

    /// Whether a model name addresses this gateway explicitly.
    pub fn claims_model(&self, model: &str) -> bool {
        self.model_prefix
            .is_some_and(|p| model.to_lowercase().starts_with(p))
    }

    /// Model name as this gateway routes it. Idempotent.
    pub fn apply_prefix(&self, model: &str) -> String {
        if self.strip_model_prefix {
            if let Some(bare) = self.model_prefix.and_then(|p| strip_prefix_ignore_case(model, p)) {
                return with_prefix(self.route_prefix, bare);
            }
        }
        with_prefix(self.route_prefix, model)
    }

    /// Model name sent upstream once the routing prefix has done its job.
    pub fn wire_model<'a>(&self, routed: &'a str) -> &'a str {
        strip_segment(routed, self.route_prefix).unwrap_or(routed)
    }
}

impl ProviderSpec {
    pub fn matches_model(&self, model: &str) -> bool {
        let lower = model.to_lowercase();
        self.keywords.iter().any(|k| lower.contains(k))
    }

    /// Model name as this provider routes it. Idempotent.
    pub fn apply_prefix(&self, model: &str) -> String {
        if self.skip_prefixes.iter().any(|p| model.starts_with(p)) {
            return model.to_string();
        }
        with_prefix(self.route_prefix, model)
    }

    /// Model name sent upstream, without any routing or vendor prefix.
    pub fn wire_model<'a>(&self, routed: &'a str) -> &'a str {
        if let Some(rest) = strip_segment(routed, self.route_prefix) {
            return rest;
        }
        if let Some(rest) = self.skip_prefixes.iter().find_map(|p| routed.strip_prefix(p)) {
            return rest;
        }
        strip_segment(routed, self.name).unwrap_or(routed)
    }
}

/// First gateway (in table order) identified by the credential or endpoint.
pub fn find_gateway(api_key: Option<&str>, api_base: Option<&str>) -> Option<&'static GatewaySpec> {
    GATEWAYS.iter().find(|g| g.matches(api_key, api_base))
}

/// First gateway a model name addresses explicitly (e.g. `opencode/...`).
pub fn find_gateway_by_model(model: &str) -> Option<&'static GatewaySpec> {
    GATEWAYS.iter().find(|g| g.claims_model(model))
}

/// Gateway for a router: credentials or the default model, whichever entry
/// comes first in the table.
pub fn resolve_gateway(
    api_key: Option<&str>,
    api_base: Option<&str>,
    model: &str,
) -> Option<&'static GatewaySpec> {
    GATEWAYS
        .iter()
        .find(|g| g.matches(api_key, api_base) || g.claims_model(model))
}

/// First vendor whose keywords appear in the model name (case-insensitive).
pub fn find_by_model(model: &str) -> Option<&'static ProviderSpec> {
    PROVIDERS.iter().find(|p| p.matches_model(model))
}

/// The single override for a model: provider entries first, then gateway
/// entries, first match wins.
pub fn resolve_override(
    provider: Option<&'static ProviderSpec>,
    gateway: Option<&'static GatewaySpec>,
    model: &str,
) -> Option<&'static ParamOverride> {
    provider
        .and_then(|p| find_override(p.model_overrides, model))
        .or_else(|| gateway.and_then(|g| find_override(g.model_overrides, model)))
}
