use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use sentinel_types::{
    ActionResult, GroomingInput, GroomingOutput, LogDetails, LogLevel, LogRecord,
    RefineIdeaInput, RefineIdeaOutput,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("{0}")]
    Transport(String),
    #[error("server responded with {status}: {reason}")]
    Status { status: u16, reason: String },
    #[error("invalid log payload: {0}")]
    Decode(String),
}

/// Anything the feed can pull the remote log window from.
#[async_trait]
pub trait RemoteLogSource: Send + Sync {
    async fn fetch_logs(&self) -> Result<Vec<LogRecord>, FetchError>;
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Clone)]
pub struct SentinelClient {
    base_url: String,
    client: Client,
}

impl SentinelClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn check_health(&self) -> Result<Value> {
        let url = format!("{}/global/health", self.base_url);
        let resp = self.client.get(&url).send().await?.error_for_status()?;
        Ok(resp.json::<Value>().await?)
    }

    pub async fn list_logs(&self) -> Result<Vec<LogRecord>, FetchError> {
        let url = format!("{}/api/logs", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| FetchError::Transport(describe_transport(&err)))?;
        let status = resp.status();
        if !status.is_success() {
            let reason = resp
                .json::<ErrorBody>()
                .await
                .map(|body| body.error)
                .unwrap_or_else(|_| status.canonical_reason().unwrap_or("error").to_string());
            return Err(FetchError::Status {
                status: status.as_u16(),
                reason,
            });
        }
        resp.json::<Vec<LogRecord>>()
            .await
            .map_err(|err| FetchError::Decode(err.to_string()))
    }

    pub async fn push_log(
        &self,
        message: &str,
        level: LogLevel,
        details: Option<LogDetails>,
    ) -> Result<()> {
        let url = format!("{}/api/logs", self.base_url);
        let mut body = json!({ "message": message, "level": level.as_str() });
        if let Some(details) = details {
            body["details"] = Value::Object(details);
        }
        let resp = self.client.post(&url).json(&body).send().await?;
        if resp.status() != StatusCode::CREATED {
            let status = resp.status();
            let reason = resp
                .json::<ErrorBody>()
                .await
                .map(|body| body.error)
                .unwrap_or_default();
            anyhow::bail!("log rejected ({status}): {reason}");
        }
        Ok(())
    }

    pub async fn refine_idea(
        &self,
        input: &RefineIdeaInput,
    ) -> Result<ActionResult<RefineIdeaOutput>> {
        let url = format!("{}/api/ideas/refine", self.base_url);
        let resp = self.client.post(&url).json(input).send().await?;
        read_action_result(resp).await
    }

    pub async fn suggest_grooming(
        &self,
        input: &GroomingInput,
    ) -> Result<ActionResult<GroomingOutput>> {
        let url = format!("{}/api/grooming/suggest", self.base_url);
        let resp = self.client.post(&url).json(input).send().await?;
        read_action_result(resp).await
    }
}

#[async_trait]
impl RemoteLogSource for SentinelClient {
    async fn fetch_logs(&self) -> Result<Vec<LogRecord>, FetchError> {
        self.list_logs().await
    }
}

/// Adapter endpoints answer with an `ActionResult` on success and on
/// generation failure; validation errors use the plain error envelope.
async fn read_action_result<T: DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<ActionResult<T>> {
    let status = resp.status();
    let body = resp.json::<Value>().await?;
    if let Ok(result) = serde_json::from_value::<ActionResult<T>>(body.clone()) {
        return Ok(result);
    }
    match serde_json::from_value::<ErrorBody>(body) {
        Ok(err) => Ok(ActionResult::failed(err.error)),
        Err(_) => anyhow::bail!("unexpected response ({status})"),
    }
}

fn describe_transport(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "request timed out".to_string()
    } else if err.is_connect() {
        "server unreachable".to_string()
    } else {
        err.to_string()
    }
}
