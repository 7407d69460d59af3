use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use sentinel_core::{AppConfig, ConfigStore, DEFAULT_ENGINE_HOST, DEFAULT_ENGINE_PORT};
use sentinel_feed::{render_grooming, render_refined_issue, SentinelClient};
use sentinel_observability::{
    canonical_logs_dir_from_root, emit_event, init_process_logging, redact_text, ObservabilityEvent,
    ProcessKind,
};
use sentinel_providers::SUPPORTED_PROVIDER_IDS;
use sentinel_server::{serve, AppState};
use sentinel_types::{details_from_value, GroomingInput, LogLevel, RefineIdeaInput};
use tracing::info;

mod feed;

const LOG_RETENTION_DAYS: u64 = 14;

#[derive(Parser, Debug)]
#[command(name = "sentinel-engine")]
#[command(about = "Project Sentinel log server, live feed and AI helpers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP log server.
    Serve {
        #[arg(long, alias = "host", default_value = DEFAULT_ENGINE_HOST)]
        hostname: String,
        #[arg(long, default_value_t = DEFAULT_ENGINE_PORT)]
        port: u16,
        #[arg(long)]
        state_dir: Option<String>,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        config: Option<String>,
    },
    /// Follow the merged client/server log feed.
    Feed {
        #[arg(long, env = "SENTINEL_URL", default_value = "http://127.0.0.1:3000")]
        url: String,
        /// Print the current feed and exit.
        #[arg(long, default_value_t = false)]
        once: bool,
        /// Start with polling and live merges paused.
        #[arg(long, default_value_t = false)]
        paused: bool,
        #[arg(long)]
        state_dir: Option<String>,
        #[arg(long)]
        config: Option<String>,
    },
    /// Append one entry to the server log.
    Log {
        #[arg(long, env = "SENTINEL_URL", default_value = "http://127.0.0.1:3000")]
        url: String,
        #[arg(long, default_value = "info")]
        level: String,
        message: String,
        /// JSON object attached to the entry.
        #[arg(long)]
        details: Option<String>,
    },
    /// Turn a rough idea into an issue draft.
    Idea {
        #[arg(long, env = "SENTINEL_URL", default_value = "http://127.0.0.1:3000")]
        url: String,
        text: String,
        #[arg(long)]
        context: Option<String>,
    },
    /// Suggest labels, comments and task order from a code review summary.
    Groom {
        #[arg(long, env = "SENTINEL_URL", default_value = "http://127.0.0.1:3000")]
        url: String,
        summary: String,
        #[arg(long = "task")]
        tasks: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            hostname,
            port,
            state_dir,
            api_key,
            provider,
            model,
            config,
        } => {
            let state_dir = resolve_state_dir(state_dir);
            let logs_dir = canonical_logs_dir_from_root(&state_dir);
            let (_log_guard, log_info) =
                init_process_logging(ProcessKind::Engine, &logs_dir, LOG_RETENTION_DAYS)?;
            if let Some(key) = api_key.as_deref() {
                info!("api key supplied on the command line: {}", redact_text(key));
            }
            let overrides = build_cli_overrides(api_key, provider, model)?;
            emit_event(
                tracing::Level::INFO,
                ProcessKind::Engine,
                ObservabilityEvent {
                    event: "logging.initialized",
                    component: "engine.main",
                    status: Some("ok"),
                    detail: Some("engine jsonl logging initialized"),
                    ..Default::default()
                },
            );
            info!("engine logging initialized: {:?}", log_info);

            let addr: SocketAddr = format!("{hostname}:{port}")
                .parse()
                .context("invalid hostname or port")?;
            let config_path = resolve_config_path(&state_dir, config);
            info!(
                "starting sentinel-engine on http://{addr} state_dir={} config_path={}",
                state_dir.display(),
                config_path.display()
            );
            let config = ConfigStore::new(&config_path, overrides).await?.get();
            let state = AppState::from_config(&config).await;
            serve(addr, state).await?;
        }
        Command::Feed {
            url,
            once,
            paused,
            state_dir,
            config,
        } => {
            let state_dir = resolve_state_dir(state_dir);
            let logs_dir = canonical_logs_dir_from_root(&state_dir);
            let (_log_guard, _) =
                init_process_logging(ProcessKind::Feed, &logs_dir, LOG_RETENTION_DAYS)?;
            let config = load_config(&state_dir, config).await?;
            let client = SentinelClient::new(url)?;
            feed::run(client, &config.logs, feed::FeedOptions { once, paused }).await?;
        }
        Command::Log {
            url,
            level,
            message,
            details,
        } => {
            let (_log_guard, _) =
                init_process_logging(ProcessKind::Cli, &cli_logs_dir(), LOG_RETENTION_DAYS)?;
            let level = match parse_level(&level) {
                Ok(parsed) => parsed,
                Err(err) => {
                    cli_event(
                        tracing::Level::WARN,
                        ObservabilityEvent {
                            event: "cli.log.rejected",
                            status: Some("rejected"),
                            error_code: Some("UNKNOWN_LEVEL"),
                            log_level: Some(level.trim()),
                            ..Default::default()
                        },
                    );
                    return Err(err);
                }
            };
            let details = details.as_deref().map(parse_details).transpose()?;
            let client = SentinelClient::new(url)?;
            client.push_log(&message, level, details).await?;
            cli_event(
                tracing::Level::INFO,
                ObservabilityEvent {
                    event: "cli.log.sent",
                    status: Some("ok"),
                    log_level: Some(level.as_str()),
                    ..Default::default()
                },
            );
            println!("Log added successfully");
        }
        Command::Idea { url, text, context } => {
            let (_log_guard, _) =
                init_process_logging(ProcessKind::Cli, &cli_logs_dir(), LOG_RETENTION_DAYS)?;
            let client = SentinelClient::new(url)?;
            let result = client
                .refine_idea(&RefineIdeaInput {
                    idea_text: text,
                    project_context: context,
                })
                .await?;
            report_action("cli.idea", result.error.as_deref());
            match (result.success, result.data) {
                (true, Some(issue)) => print_lines(render_refined_issue(&issue)),
                _ => anyhow::bail!(
                    "{}",
                    result.error.unwrap_or_else(|| "idea refinement failed".to_string())
                ),
            }
        }
        Command::Groom {
            url,
            summary,
            tasks,
        } => {
            let (_log_guard, _) =
                init_process_logging(ProcessKind::Cli, &cli_logs_dir(), LOG_RETENTION_DAYS)?;
            let client = SentinelClient::new(url)?;
            let result = client
                .suggest_grooming(&GroomingInput {
                    code_review_summary: summary,
                    current_tasks: tasks.clone(),
                })
                .await?;
            report_action("cli.groom", result.error.as_deref());
            match (result.success, result.data) {
                (true, Some(output)) => print_lines(render_grooming(&output, &tasks)),
                _ => anyhow::bail!(
                    "{}",
                    result.error.unwrap_or_else(|| "task grooming failed".to_string())
                ),
            }
        }
    }

    Ok(())
}

fn cli_logs_dir() -> PathBuf {
    canonical_logs_dir_from_root(&resolve_state_dir(None))
}

fn cli_event(level: tracing::Level, event: ObservabilityEvent<'_>) {
    emit_event(
        level,
        ProcessKind::Cli,
        ObservabilityEvent {
            component: "engine.cli",
            ..event
        },
    );
}

fn report_action(flow: &str, error: Option<&str>) {
    let (level, status) = match error {
        Some(_) => (tracing::Level::WARN, "failed"),
        None => (tracing::Level::INFO, "ok"),
    };
    cli_event(
        level,
        ObservabilityEvent {
            event: "cli.action.completed",
            flow: Some(flow),
            status: Some(status),
            detail: error,
            ..Default::default()
        },
    );
}

fn print_lines(lines: Vec<String>) {
    for line in lines {
        println!("{line}");
    }
}

async fn load_config(state_dir: &Path, flag: Option<String>) -> anyhow::Result<AppConfig> {
    let config_path = resolve_config_path(state_dir, flag);
    Ok(ConfigStore::new(config_path, None).await?.get())
}

fn build_cli_overrides(
    api_key: Option<String>,
    provider: Option<String>,
    model: Option<String>,
) -> anyhow::Result<Option<serde_json::Value>> {
    let provider = normalize_and_validate_provider(provider)?;

    if api_key.is_none() && provider.is_none() && model.is_none() {
        return Ok(None);
    }
    let mut root = serde_json::Map::new();

    if let Some(p) = &provider {
        root.insert(
            "default_provider".to_string(),
            serde_json::Value::String(p.clone()),
        );
    }

    // key and model without a provider target openai
    let target_provider = provider.as_deref().unwrap_or("openai");

    if api_key.is_some() || model.is_some() {
        let mut provider_config = serde_json::Map::new();
        if let Some(k) = api_key {
            provider_config.insert("api_key".to_string(), serde_json::Value::String(k));
        }
        if let Some(m) = model {
            provider_config.insert("default_model".to_string(), serde_json::Value::String(m));
        }

        let mut providers = serde_json::Map::new();
        providers.insert(
            target_provider.to_string(),
            serde_json::Value::Object(provider_config),
        );
        root.insert(
            "providers".to_string(),
            serde_json::Value::Object(providers),
        );
    }

    Ok(Some(serde_json::Value::Object(root)))
}

fn normalize_and_validate_provider(provider: Option<String>) -> anyhow::Result<Option<String>> {
    let Some(provider) = provider else {
        return Ok(None);
    };
    let normalized = provider.trim().to_lowercase();
    if normalized.is_empty() {
        anyhow::bail!(
            "provider cannot be empty. supported providers: {}",
            SUPPORTED_PROVIDER_IDS.join(", ")
        );
    }
    if SUPPORTED_PROVIDER_IDS.contains(&normalized.as_str()) {
        return Ok(Some(normalized));
    }
    anyhow::bail!(
        "unsupported provider `{}`. supported providers: {}",
        provider,
        SUPPORTED_PROVIDER_IDS.join(", ")
    );
}

fn parse_level(raw: &str) -> anyhow::Result<LogLevel> {
    Ok(raw.parse::<LogLevel>()?)
}

fn parse_details(raw: &str) -> anyhow::Result<serde_json::Map<String, serde_json::Value>> {
    let value: serde_json::Value =
        serde_json::from_str(raw).context("details must be valid JSON")?;
    details_from_value(value).context("details must be a JSON object")
}

fn resolve_state_dir(flag: Option<String>) -> PathBuf {
    if let Some(dir) = flag {
        return PathBuf::from(dir);
    }
    if let Ok(dir) = std::env::var("SENTINEL_STATE_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::data_local_dir()
        .map(|dir| dir.join("sentinel"))
        .unwrap_or_else(|| PathBuf::from(".sentinel"))
}

fn resolve_config_path(state_dir: &Path, flag: Option<String>) -> PathBuf {
    flag.map(PathBuf::from)
        .unwrap_or_else(|| state_dir.join("config.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn build_cli_overrides_targets_selected_provider() {
        let overrides = build_cli_overrides(
            Some("sk-test".to_string()),
            Some("openrouter".to_string()),
            Some("google/gemini-2.5-flash".to_string()),
        )
        .expect("overrides")
        .expect("some");

        assert_eq!(overrides["default_provider"], "openrouter");
        assert_eq!(
            overrides["providers"]["openrouter"]["api_key"],
            json!("sk-test")
        );
        assert_eq!(
            overrides["providers"]["openrouter"]["default_model"],
            json!("google/gemini-2.5-flash")
        );
    }

    #[test]
    fn build_cli_overrides_defaults_model_and_key_to_openai_without_provider() {
        let overrides = build_cli_overrides(
            Some("sk-test".to_string()),
            None,
            Some("gpt-4o-mini".to_string()),
        )
        .expect("overrides")
        .expect("some");

        assert!(overrides.get("default_provider").is_none());
        assert_eq!(overrides["providers"]["openai"]["api_key"], json!("sk-test"));
    }

    #[test]
    fn no_flags_means_no_overrides() {
        assert!(build_cli_overrides(None, None, None)
            .expect("overrides")
            .is_none());
    }

    #[test]
    fn provider_validation_is_case_insensitive_and_rejects_typos() {
        let provider =
            normalize_and_validate_provider(Some(" Gemini ".to_string())).expect("provider");
        assert_eq!(provider.as_deref(), Some("gemini"));

        let err = normalize_and_validate_provider(Some("openruter".to_string())).unwrap_err();
        assert!(err.to_string().contains("unsupported provider `openruter`"));
    }

    #[test]
    fn log_level_flag_must_be_known() {
        assert_eq!(parse_level("Warning").expect("level"), LogLevel::Warning);
        let err = parse_level("critical").unwrap_err();
        assert!(err.to_string().contains("unknown level `critical`"));
    }

    #[test]
    fn details_flag_must_be_an_object() {
        let details = parse_details(r#"{"path": "/logs"}"#).expect("details");
        assert_eq!(details["path"], "/logs");
        assert!(parse_details("[1, 2]").is_err());
        assert!(parse_details("{not json").is_err());
    }

    #[test]
    fn config_flag_overrides_state_dir_default() {
        let dir = PathBuf::from("/tmp/sentinel-state");
        assert_eq!(
            resolve_config_path(&dir, None),
            PathBuf::from("/tmp/sentinel-state/config.json")
        );
        assert_eq!(
            resolve_config_path(&dir, Some("custom.json".to_string())),
            PathBuf::from("custom.json")
        );
    }
}
