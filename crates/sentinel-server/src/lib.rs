use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use sentinel_core::{AppConfig, AssistService, ServerLogStore, StructuredGenerator};
use sentinel_providers::ProviderRegistry;

mod http;

pub use http::{app_router, serve, serve_listener};

/// Shared request-handler context. Cloning is cheap; every clone points at
/// the same log store.
#[derive(Clone)]
pub struct AppState {
    pub logs: ServerLogStore,
    pub assist: AssistService,
    pub started_at_ms: u64,
}

impl AppState {
    pub fn new(logs: ServerLogStore, assist: AssistService) -> Self {
        Self {
            logs,
            assist,
            started_at_ms: now_ms(),
        }
    }

    /// Builds the store and adapters from configuration and seeds the
    /// startup entries.
    pub async fn from_config(config: &AppConfig) -> Self {
        let logs = ServerLogStore::new(config.logs.server_capacity);
        logs.seed_startup_entries().await;
        let providers = ProviderRegistry::new(config.clone().into());
        let generator: Arc<dyn StructuredGenerator> = Arc::new(providers);
        let assist = AssistService::new(generator, logs.clone())
            .with_default_project_context(config.project_context());
        Self::new(logs, assist)
    }

    pub fn uptime_ms(&self) -> u64 {
        now_ms().saturating_sub(self.started_at_ms)
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
