use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use sentinel_types::{ModelInfo, ProviderInfo};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub url: Option<String>,
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    pub default_provider: Option<String>,
}

pub const SUPPORTED_PROVIDER_IDS: [&str; 8] = [
    "openai",
    "openrouter",
    "anthropic",
    "gemini",
    "ollama",
    "groq",
    "mistral",
    "together",
];

#[async_trait]
pub trait Provider: Send + Sync {
    fn info(&self) -> ProviderInfo;
    async fn complete(&self, prompt: &str, model_override: Option<&str>) -> anyhow::Result<String>;
}

#[derive(Clone)]
pub struct ProviderRegistry {
    providers: Arc<[Arc<dyn Provider>]>,
    default_provider: Option<String>,
}

impl ProviderRegistry {
    pub fn new(config: ProvidersConfig) -> Self {
        let providers = build_providers(&config);
        Self {
            providers: providers.into(),
            default_provider: config.default_provider,
        }
    }

    /// Registry over an explicit provider list, first entry is the default.
    pub fn from_providers(providers: Vec<Arc<dyn Provider>>) -> Self {
        Self {
            providers: providers.into(),
            default_provider: None,
        }
    }

    pub async fn default_complete(&self, prompt: &str) -> anyhow::Result<String> {
        let provider = self.select_provider()?;
        tracing::debug!(provider = %provider.info().id, "dispatching completion");
        provider.complete(prompt, None).await
    }

    /// Configured default when it exists, otherwise the first provider.
    fn select_provider(&self) -> anyhow::Result<Arc<dyn Provider>> {
        let providers = &self.providers;
        if let Some(default_id) = &self.default_provider {
            if let Some(provider) = providers.iter().find(|p| &p.info().id == default_id) {
                return Ok(provider.clone());
            }
        };

        let Some(provider) = providers.first() else {
            anyhow::bail!("No provider configured.");
        };
        Ok(provider.clone())
    }
}

/// OpenAI-compatible endpoints: id, display name, base url, default model,
/// and the env var consulted when the config carries no key.
const OPENAI_COMPATIBLE: [(&str, &str, &str, &str, Option<&str>); 7] = [
    ("ollama", "Ollama", "http://127.0.0.1:11434/v1", "llama3.1:8b", None),
    ("openai", "OpenAI", "https://api.openai.com/v1", "gpt-4o-mini", Some("OPENAI_API_KEY")),
    (
        "openrouter",
        "OpenRouter",
        "https://openrouter.ai/api/v1",
        "openai/gpt-4o-mini",
        Some("OPENROUTER_API_KEY"),
    ),
    (
        "gemini",
        "Google Gemini",
        "https://generativelanguage.googleapis.com/v1beta/openai",
        "gemini-2.0-flash",
        Some("GEMINI_API_KEY"),
    ),
    (
        "groq",
        "Groq",
        "https://api.groq.com/openai/v1",
        "llama-3.1-8b-instant",
        Some("GROQ_API_KEY"),
    ),
    (
        "mistral",
        "Mistral",
        "https://api.mistral.ai/v1",
        "mistral-small-latest",
        Some("MISTRAL_API_KEY"),
    ),
    (
        "together",
        "Together",
        "https://api.together.xyz/v1",
        "meta-llama/Llama-3.1-8B-Instruct-Turbo",
        Some("TOGETHER_API_KEY"),
    ),
];

fn build_providers(config: &ProvidersConfig) -> Vec<Arc<dyn Provider>> {
    let mut providers: Vec<Arc<dyn Provider>> = OPENAI_COMPATIBLE
        .iter()
        .filter_map(|&(id, name, default_url, default_model, key_env)| {
            let entry = config.providers.get(id)?;
            let provider: Arc<dyn Provider> = Arc::new(OpenAICompatibleProvider {
                id: id.to_string(),
                name: name.to_string(),
                base_url: normalize_base(entry.url.as_deref().unwrap_or(default_url)),
                api_key: key_env.and_then(|env_name| resolve_api_key(entry, env_name)),
                default_model: entry
                    .default_model
                    .clone()
                    .unwrap_or_else(|| default_model.to_string()),
                client: Client::new(),
            });
            Some(provider)
        })
        .collect();

    if let Some(anthropic) = config.providers.get("anthropic") {
        providers.push(Arc::new(AnthropicProvider {
            api_key: resolve_api_key(anthropic, "ANTHROPIC_API_KEY"),
            base_url: normalize_plain_base(
                anthropic
                    .url
                    .as_deref()
                    .unwrap_or("https://api.anthropic.com/v1"),
            ),
            default_model: anthropic
                .default_model
                .clone()
                .unwrap_or_else(|| "claude-3-5-sonnet-latest".to_string()),
            client: Client::new(),
        }));
    }

    if providers.is_empty() {
        providers.push(Arc::new(LocalEchoProvider));
    }

    providers
}

fn resolve_api_key(entry: &ProviderConfig, env_name: &str) -> Option<String> {
    entry
        .api_key
        .as_deref()
        .filter(|key| !is_placeholder_api_key(key))
        .map(str::to_string)
        .or_else(|| {
            std::env::var(env_name)
                .ok()
                .filter(|v| !v.trim().is_empty())
        })
}

fn is_placeholder_api_key(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("x")
        || trimmed.eq_ignore_ascii_case("placeholder")
}

/// Used when nothing is configured. Its output is never valid structured
/// JSON, so adapters fail closed instead of inventing suggestions.
struct LocalEchoProvider;

#[async_trait]
impl Provider for LocalEchoProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: "local".to_string(),
            name: "Local Echo".to_string(),
            models: vec![ModelInfo {
                id: "echo-1".to_string(),
                provider_id: "local".to_string(),
                display_name: "Echo Model".to_string(),
                context_window: 8192,
            }],
        }
    }

    async fn complete(
        &self,
        prompt: &str,
        _model_override: Option<&str>,
    ) -> anyhow::Result<String> {
        Ok(format!("Echo: {prompt}"))
    }
}

struct OpenAICompatibleProvider {
    id: String,
    name: String,
    base_url: String,
    api_key: Option<String>,
    default_model: String,
    client: Client,
}

#[async_trait]
impl Provider for OpenAICompatibleProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            models: vec![ModelInfo {
                id: self.default_model.clone(),
                provider_id: self.id.clone(),
                display_name: self.default_model.clone(),
                context_window: 128_000,
            }],
        }
    }

    async fn complete(&self, prompt: &str, model_override: Option<&str>) -> anyhow::Result<String> {
        let model = model_override
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(self.default_model.as_str());
        let url = format!("{}/chat/completions", self.base_url);
        let mut req = self.client.post(url).json(&json!({
            "model": model,
            "messages": [{"role":"user","content": prompt}],
            "stream": false,
        }));
        if self.id == "openrouter" {
            req = req.header("X-Title", "Project Sentinel");
        }
        if let Some(api_key) = &self.api_key {
            req = req.bearer_auth(api_key);
        }
        let response = req.send().await?;
        let status = response.status();
        let value: Value = response.json().await?;

        if !status.is_success() {
            let detail = extract_openai_error(&value)
                .unwrap_or_else(|| format!("provider request failed with status {}", status));
            anyhow::bail!(detail);
        }

        if let Some(detail) = extract_openai_error(&value) {
            anyhow::bail!(detail);
        }

        if let Some(text) = extract_openai_text(&value) {
            return Ok(text);
        }

        let body_preview = truncate_for_error(&value.to_string(), 500);
        anyhow::bail!(
            "provider returned no completion content for model `{}` (response: {})",
            model,
            body_preview
        );
    }
}

struct AnthropicProvider {
    api_key: Option<String>,
    base_url: String,
    default_model: String,
    client: Client,
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: "anthropic".to_string(),
            name: "Anthropic".to_string(),
            models: vec![ModelInfo {
                id: self.default_model.clone(),
                provider_id: "anthropic".to_string(),
                display_name: self.default_model.clone(),
                context_window: 200_000,
            }],
        }
    }

    async fn complete(&self, prompt: &str, model_override: Option<&str>) -> anyhow::Result<String> {
        let model = model_override
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(self.default_model.as_str());
        let mut req = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("anthropic-version", "2023-06-01")
            .json(&json!({
                "model": model,
                "max_tokens": 2048,
                "messages": [{"role":"user","content": prompt}],
            }));
        if let Some(key) = &self.api_key {
            req = req.header("x-api-key", key);
        }
        let response = req.send().await?;
        let status = response.status();
        let value: Value = response.json().await?;
        if !status.is_success() {
            let detail = extract_openai_error(&value)
                .unwrap_or_else(|| format!("provider request failed with status {}", status));
            anyhow::bail!(detail);
        }
        let Some(text) = value["content"][0]["text"].as_str() else {
            anyhow::bail!(
                "provider returned no completion content for model `{}` (response: {})",
                model,
                truncate_for_error(&value.to_string(), 500)
            );
        };
        Ok(text.to_string())
    }
}

fn normalize_base(input: &str) -> String {
    let trimmed = input.trim_end_matches('/');
    if trimmed.ends_with("/v1") || trimmed.ends_with("/openai") {
        trimmed.to_string()
    } else {
        format!("{}/v1", trimmed)
    }
}

fn normalize_plain_base(input: &str) -> String {
    input.trim_end_matches('/').to_string()
}

fn truncate_for_error(input: &str, max_len: usize) -> String {
    if input.len() <= max_len {
        return input.to_string();
    }
    let mut cut = max_len;
    while !input.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &input[..cut])
}

fn collect_text_fragments(value: &Value, out: &mut String) {
    match value {
        Value::String(s) => out.push_str(s),
        Value::Array(arr) => {
            for item in arr {
                collect_text_fragments(item, out);
            }
        }
        Value::Object(map) => {
            if let Some(text) = map.get("text").and_then(|v| v.as_str()) {
                out.push_str(text);
            }
            if let Some(text) = map.get("output_text").and_then(|v| v.as_str()) {
                out.push_str(text);
            }
            if let Some(content) = map.get("content") {
                collect_text_fragments(content, out);
            }
            if let Some(message) = map.get("message") {
                collect_text_fragments(message, out);
            }
        }
        _ => {}
    }
}

fn extract_openai_text(value: &Value) -> Option<String> {
    let mut out = String::new();

    if let Some(choice) = value.get("choices").and_then(|v| v.get(0)) {
        collect_text_fragments(choice, &mut out);
        if !out.trim().is_empty() {
            return Some(out);
        }
    }

    if let Some(output) = value.get("output") {
        collect_text_fragments(output, &mut out);
        if !out.trim().is_empty() {
            return Some(out);
        }
    }

    if let Some(text) = value.get("output_text").and_then(|v| v.as_str()) {
        return Some(text.to_string());
    }

    None
}

fn extract_openai_error(value: &Value) -> Option<String> {
    value
        .get("error")
        .and_then(|v| v.get("message"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        })
}

/// Pulls the first JSON object out of a model completion. Accepts a bare
/// object, a fenced ```json block, or an object embedded in prose.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after_fence[body_start..];
        if let Some(end) = body.find("```") {
            if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(body[..end].trim())
            {
                return Some(value);
            }
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&trimmed[start..=end]) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(
        provider_ids: &[&str],
        default_provider: Option<&str>,
        include_openai_key: bool,
    ) -> ProvidersConfig {
        let mut providers = HashMap::new();
        for id in provider_ids {
            let api_key = if *id == "openai" && include_openai_key {
                Some("sk-test".to_string())
            } else {
                None
            };
            providers.insert(
                (*id).to_string(),
                ProviderConfig {
                    api_key,
                    url: None,
                    default_model: Some(format!("{id}-model")),
                },
            );
        }
        ProvidersConfig {
            providers,
            default_provider: default_provider.map(|s| s.to_string()),
        }
    }

    #[test]
    fn uses_configured_default_provider() {
        let registry =
            ProviderRegistry::new(cfg(&["openai", "gemini"], Some("gemini"), true));
        let provider = registry.select_provider().expect("provider");
        assert_eq!(provider.info().id, "gemini");
    }

    #[test]
    fn falls_back_to_first_provider_when_default_provider_missing() {
        let registry = ProviderRegistry::new(cfg(&["openai"], Some("anthropic"), true));
        let provider = registry.select_provider().expect("provider");
        assert_eq!(provider.info().id, "openai");
    }

    #[test]
    fn empty_registry_has_nothing_to_select() {
        let registry = ProviderRegistry::from_providers(Vec::new());
        let err = registry.select_provider().err().expect("expected error");
        assert_eq!(err.to_string(), "No provider configured.");
    }

    #[tokio::test]
    async fn empty_config_falls_back_to_local_echo() {
        let registry = ProviderRegistry::new(ProvidersConfig::default());
        let reply = registry.default_complete("ping").await.expect("reply");
        assert_eq!(reply, "Echo: ping");
        assert!(extract_json_object(&reply).is_none());
    }

    #[test]
    fn extract_json_object_handles_fenced_and_embedded_output() {
        let fenced = "Here you go:\n```json\n{\"a\": 1}\n```\nthanks";
        assert_eq!(extract_json_object(fenced), Some(json!({"a": 1})));

        let embedded = "Result => {\"b\": [1, 2]} <= done";
        assert_eq!(extract_json_object(embedded), Some(json!({"b": [1, 2]})));

        assert_eq!(extract_json_object("[1, 2, 3]"), None);
        assert_eq!(extract_json_object("no json here"), None);
    }

    #[test]
    fn normalize_base_keeps_openai_compat_suffixes() {
        assert_eq!(
            normalize_base("https://api.openai.com/v1/"),
            "https://api.openai.com/v1"
        );
        assert_eq!(
            normalize_base("https://generativelanguage.googleapis.com/v1beta/openai"),
            "https://generativelanguage.googleapis.com/v1beta/openai"
        );
        assert_eq!(normalize_base("http://localhost:8080"), "http://localhost:8080/v1");
    }

    #[test]
    fn extract_openai_text_reads_first_choice() {
        let value = json!({
            "choices": [{"message": {"role": "assistant", "content": "hello"}}]
        });
        assert_eq!(extract_openai_text(&value).as_deref(), Some("hello"));
        assert_eq!(
            extract_openai_error(&json!({"error": {"message": "bad key"}})).as_deref(),
            Some("bad key")
        );
    }
}
