use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::fs;

use crate::log_store::{DEFAULT_CLIENT_LOG_CAPACITY, DEFAULT_SERVER_LOG_CAPACITY};

pub const DEFAULT_DISPLAY_CAP: usize = 100;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_PROJECT_CONTEXT: &str =
    "A web application for project monitoring and AI-assisted task management.";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub url: Option<String>,
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub client_capacity: usize,
    pub server_capacity: usize,
    pub display_cap: usize,
    pub poll_interval_ms: u64,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            client_capacity: DEFAULT_CLIENT_LOG_CAPACITY,
            server_capacity: DEFAULT_SERVER_LOG_CAPACITY,
            display_cap: DEFAULT_DISPLAY_CAP,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl LogSettings {
    /// Polling period, never shorter than 100ms.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(100))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    pub default_provider: Option<String>,
    #[serde(default)]
    pub logs: LogSettings,
    pub project_context: Option<String>,
}

impl AppConfig {
    pub fn project_context(&self) -> &str {
        self.project_context
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_PROJECT_CONTEXT)
    }
}

#[derive(Debug, Clone, Default)]
struct ConfigLayers {
    global: Value,
    project: Value,
    env: Value,
    cli: Value,
}

/// JSON configuration merged from global file, project file, environment and
/// CLI overrides, later layers winning.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    layers: ConfigLayers,
}

impl ConfigStore {
    pub async fn new(path: impl AsRef<Path>, cli_overrides: Option<Value>) -> anyhow::Result<Self> {
        let project_path = path.as_ref().to_path_buf();
        let global_path = resolve_global_config_path();
        Self::with_global_path(project_path, global_path, cli_overrides).await
    }

    pub async fn with_global_path(
        project_path: PathBuf,
        global_path: PathBuf,
        cli_overrides: Option<Value>,
    ) -> anyhow::Result<Self> {
        let global = read_json_file(&global_path).await?;
        let project = read_json_file(&project_path).await?;

        let layers = ConfigLayers {
            global,
            project,
            env: env_layer(),
            cli: cli_overrides.unwrap_or_else(empty_object),
        };
        tracing::debug!(
            project = %project_path.display(),
            global = %global_path.display(),
            "configuration layers loaded"
        );
        Ok(Self { layers })
    }

    pub fn get(&self) -> AppConfig {
        match serde_json::from_value(self.merged()) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(error = %err, "invalid configuration, using defaults");
                AppConfig::default()
            }
        }
    }

    fn merged(&self) -> Value {
        let mut merged = empty_object();
        for layer in [
            &self.layers.global,
            &self.layers.project,
            &self.layers.env,
            &self.layers.cli,
        ] {
            deep_merge(&mut merged, layer);
        }
        merged
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

async fn read_json_file(path: &Path) -> anyhow::Result<Value> {
    if !path.exists() {
        return Ok(empty_object());
    }
    let raw = fs::read_to_string(path).await?;
    match serde_json::from_str::<Value>(&raw) {
        Ok(value) if value.is_object() => Ok(value),
        Ok(_) | Err(_) => {
            tracing::warn!(path = %path.display(), "ignoring unreadable config file");
            Ok(empty_object())
        }
    }
}

fn resolve_global_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("SENTINEL_GLOBAL_CONFIG") {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("sentinel").join("config.json");
    }
    PathBuf::from(".sentinel/global_config.json")
}

fn env_layer() -> Value {
    let mut root = empty_object();

    for (var, key) in [
        ("SENTINEL_CLIENT_LOG_CAPACITY", "client_capacity"),
        ("SENTINEL_SERVER_LOG_CAPACITY", "server_capacity"),
        ("SENTINEL_DISPLAY_CAP", "display_cap"),
        ("SENTINEL_POLL_INTERVAL_MS", "poll_interval_ms"),
    ] {
        if let Some(n) = std::env::var(var).ok().and_then(|raw| parse_positive(&raw)) {
            deep_merge(&mut root, &json!({ "logs": { key: n } }));
        }
    }
    if let Ok(context) = std::env::var("SENTINEL_PROJECT_CONTEXT") {
        if !context.trim().is_empty() {
            deep_merge(&mut root, &json!({ "project_context": context }));
        }
    }

    add_openai_env(
        &mut root,
        "openai",
        "OPENAI_API_KEY",
        "https://api.openai.com/v1",
        "gpt-4o-mini",
    );
    add_openai_env(
        &mut root,
        "openrouter",
        "OPENROUTER_API_KEY",
        "https://openrouter.ai/api/v1",
        "openai/gpt-4o-mini",
    );
    add_openai_env(
        &mut root,
        "groq",
        "GROQ_API_KEY",
        "https://api.groq.com/openai/v1",
        "llama-3.1-8b-instant",
    );
    add_openai_env(
        &mut root,
        "mistral",
        "MISTRAL_API_KEY",
        "https://api.mistral.ai/v1",
        "mistral-small-latest",
    );
    add_openai_env(
        &mut root,
        "gemini",
        "GEMINI_API_KEY",
        "https://generativelanguage.googleapis.com/v1beta/openai",
        "gemini-2.0-flash",
    );
    add_openai_env(
        &mut root,
        "anthropic",
        "ANTHROPIC_API_KEY",
        "https://api.anthropic.com/v1",
        "claude-3-5-haiku-latest",
    );
    if let Ok(ollama_url) = std::env::var("OLLAMA_URL") {
        if !ollama_url.trim().is_empty() {
            deep_merge(
                &mut root,
                &json!({ "providers": { "ollama": { "url": ollama_url } } }),
            );
        }
    }

    root
}

fn parse_positive(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok().filter(|n| *n > 0)
}

fn add_openai_env(root: &mut Value, provider: &str, key_env: &str, default_url: &str, model: &str) {
    let Ok(api_key) = std::env::var(key_env) else {
        return;
    };
    if api_key.trim().is_empty() {
        return;
    }
    deep_merge(
        root,
        &json!({
            "providers": {
                provider: {
                    "api_key": api_key,
                    "url": default_url,
                    "default_model": model
                }
            }
        }),
    );
}

pub fn deep_merge(base: &mut Value, overlay: &Value) {
    if overlay.is_null() {
        return;
    }
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                if value.is_null() {
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_value, overlay_value) => {
            *base_value = overlay_value.clone();
        }
    }
}

impl From<ProviderConfig> for sentinel_providers::ProviderConfig {
    fn from(value: ProviderConfig) -> Self {
        Self {
            api_key: value.api_key,
            url: value.url,
            default_model: value.default_model,
        }
    }
}

impl From<AppConfig> for sentinel_providers::ProvidersConfig {
    fn from(value: AppConfig) -> Self {
        Self {
            providers: value
                .providers
                .into_iter()
                .map(|(k, v)| (k, v.into()))
                .collect(),
            default_provider: value.default_provider,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deep_merge_overlays_nested_keys_and_skips_nulls() {
        let mut base = json!({"logs": {"display_cap": 100, "server_capacity": 200}});
        deep_merge(
            &mut base,
            &json!({"logs": {"display_cap": 25, "server_capacity": null}}),
        );
        assert_eq!(base, json!({"logs": {"display_cap": 25, "server_capacity": 200}}));
    }

    #[test]
    fn defaults_match_observed_capacities() {
        let config = AppConfig::default();
        assert_eq!(config.logs.client_capacity, 100);
        assert_eq!(config.logs.server_capacity, 200);
        assert_eq!(config.logs.display_cap, 100);
        assert_eq!(config.logs.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.project_context(), DEFAULT_PROJECT_CONTEXT);
    }

    #[test]
    fn partial_log_settings_keep_remaining_defaults() {
        let config: AppConfig =
            serde_json::from_value(json!({"logs": {"display_cap": 10}})).expect("config");
        assert_eq!(config.logs.display_cap, 10);
        assert_eq!(config.logs.client_capacity, 100);
    }

    #[test]
    fn blank_project_context_falls_back_to_default() {
        let config = AppConfig {
            project_context: Some("   ".to_string()),
            ..AppConfig::default()
        };
        assert_eq!(config.project_context(), DEFAULT_PROJECT_CONTEXT);
    }

    #[tokio::test]
    async fn layers_merge_in_order_and_cli_wins() {
        let dir = tempfile::tempdir().expect("tempdir");
        let global = dir.path().join("global.json");
        let project = dir.path().join("project.json");
        fs::write(&global, r#"{"logs": {"display_cap": 40, "server_capacity": 300}}"#)
            .await
            .expect("write global");
        fs::write(&project, r#"{"logs": {"display_cap": 30}, "default_provider": "ollama"}"#)
            .await
            .expect("write project");

        let store = ConfigStore::with_global_path(
            project,
            global,
            Some(json!({"logs": {"display_cap": 20}})),
        )
        .await
        .expect("store");
        let config = store.get();

        assert_eq!(config.logs.display_cap, 20);
        assert_eq!(config.logs.server_capacity, 300);
        assert_eq!(config.default_provider.as_deref(), Some("ollama"));
    }

    #[tokio::test]
    async fn missing_or_corrupt_files_fall_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let project = dir.path().join("project.json");
        fs::write(&project, "not json").await.expect("write");

        let store = ConfigStore::with_global_path(project, dir.path().join("absent.json"), None)
            .await
            .expect("store");
        assert_eq!(store.get().logs.client_capacity, 100);
        assert!(!dir.path().join("absent.json").exists());
    }

    #[tokio::test]
    async fn project_file_supplies_project_context() {
        let dir = tempfile::tempdir().expect("tempdir");
        let project = dir.path().join("project.json");
        fs::write(&project, r#"{"project_context": "Inventory tracker"}"#)
            .await
            .expect("write");

        let store = ConfigStore::with_global_path(project, dir.path().join("g.json"), None)
            .await
            .expect("store");
        assert_eq!(store.get().project_context(), "Inventory tracker");
    }
}
