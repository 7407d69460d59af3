//! Idea refinement and post-review grooming suggestions.
//!
//! Each operation makes exactly one call to a [`StructuredGenerator`] and
//! accepts the result only if it deserializes into the full output type.
//! Every invocation leaves one receipt entry and then exactly one success or
//! error entry in the server log store.

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::Level;

use sentinel_observability::{emit_event, preview_text, ObservabilityEvent, ProcessKind};
use sentinel_providers::{extract_json_object, ProviderRegistry};
use sentinel_types::{
    details_from_value, GroomingInput, GroomingOutput, LogLevel, RefineIdeaInput,
    RefineIdeaOutput,
};

use crate::config::DEFAULT_PROJECT_CONTEXT;
use crate::log_store::ServerLogStore;

const AUDIT_PREVIEW_CHARS: usize = 80;
const REFINE_FLOW: &str = "refineIdea";
const GROOMING_FLOW: &str = "suggestTaskGrooming";

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub flow: &'static str,
    pub prompt: String,
    /// JSON Schema the response object must satisfy.
    pub schema: Value,
}

#[async_trait]
pub trait StructuredGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> anyhow::Result<Value>;
}

#[async_trait]
impl StructuredGenerator for ProviderRegistry {
    async fn generate(&self, request: &GenerationRequest) -> anyhow::Result<Value> {
        let schema = serde_json::to_string_pretty(&request.schema)?;
        let prompt = format!(
            "{}\n\nRespond with a single JSON object that matches this JSON Schema exactly. \
             Do not add fields and do not wrap it in prose.\n{}",
            request.prompt, schema
        );
        let completion = self.default_complete(&prompt).await?;
        extract_json_object(&completion)
            .ok_or_else(|| anyhow::anyhow!("model response did not contain a JSON object"))
    }
}

#[derive(Debug, Error)]
pub enum AssistError {
    #[error("generation failed: {0}")]
    Generation(String),
    #[error("generated output did not match the expected shape: {0}")]
    InvalidOutput(String),
}

impl AssistError {
    pub fn code(&self) -> &'static str {
        match self {
            AssistError::Generation(_) => "GENERATION_FAILED",
            AssistError::InvalidOutput(_) => "INVALID_OUTPUT",
        }
    }
}

#[derive(Clone)]
pub struct AssistService {
    generator: Arc<dyn StructuredGenerator>,
    audit: ServerLogStore,
    default_project_context: String,
}

impl AssistService {
    pub fn new(generator: Arc<dyn StructuredGenerator>, audit: ServerLogStore) -> Self {
        Self {
            generator,
            audit,
            default_project_context: DEFAULT_PROJECT_CONTEXT.to_string(),
        }
    }

    pub fn with_default_project_context(mut self, context: impl Into<String>) -> Self {
        self.default_project_context = context.into();
        self
    }

    pub fn default_project_context(&self) -> &str {
        &self.default_project_context
    }

    pub async fn refine_idea(
        &self,
        input: RefineIdeaInput,
    ) -> Result<RefineIdeaOutput, AssistError> {
        let idea_preview = preview_text(&input.idea_text, AUDIT_PREVIEW_CHARS);
        self.record_audit(
            format!("New idea received: \"{idea_preview}\""),
            LogLevel::Action,
            json!({ "flow": REFINE_FLOW }),
        )
        .await;

        let context = input
            .project_context
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(self.default_project_context.as_str());
        let prompt = format!(
            "You turn user-submitted ideas into well-structured GitHub issues.\n\
             Given the project description and the idea below, write an issue title, \
             a detailed issue body, relevant labels (for example \"feature request\", \
             \"bug\" or \"enhancement\") and a suitable milestone.\n\n\
             Project description: {context}\n\
             Idea: {}",
            input.idea_text
        );

        match self
            .generate_validated::<RefineIdeaOutput>(REFINE_FLOW, prompt)
            .await
        {
            Ok(output) => {
                self.record_audit(
                    format!("Idea refined: \"{}\"", output.issue_title),
                    LogLevel::Success,
                    json!({
                        "flow": REFINE_FLOW,
                        "issueTitle": output.issue_title,
                        "labels": output.labels,
                        "milestone": output.milestone,
                    }),
                )
                .await;
                Ok(output)
            }
            Err(err) => {
                self.record_audit(
                    format!("Error refining idea: {err}"),
                    LogLevel::Error,
                    json!({
                        "flow": REFINE_FLOW,
                        "ideaPreview": idea_preview,
                        "ideaLength": input.idea_text.chars().count(),
                    }),
                )
                .await;
                Err(err)
            }
        }
    }

    pub async fn suggest_grooming(
        &self,
        input: GroomingInput,
    ) -> Result<GroomingOutput, AssistError> {
        let summary_length = input.code_review_summary.chars().count();
        let task_count = input.current_tasks.len();
        self.record_audit(
            "Task grooming requested.",
            LogLevel::Action,
            json!({
                "flow": GROOMING_FLOW,
                "summaryLength": summary_length,
                "taskCount": task_count,
            }),
        )
        .await;

        let tasks = input
            .current_tasks
            .iter()
            .enumerate()
            .map(|(i, task)| format!("{i}. {task}"))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "You suggest how to groom a backlog after a code review.\n\n\
             Code review summary:\n{}\n\n\
             Current tasks (0-based index, then text):\n{tasks}\n\n\
             Suggest labels, comments, and a new ordering of the tasks. Return the \
             ordering as 0-based indices into the current task list.",
            input.code_review_summary
        );

        match self
            .generate_validated::<GroomingOutput>(GROOMING_FLOW, prompt)
            .await
        {
            Ok(output) => {
                self.record_audit(
                    "Task grooming suggestions generated.",
                    LogLevel::Success,
                    json!({
                        "flow": GROOMING_FLOW,
                        "labelCount": output.suggested_labels.len(),
                        "commentCount": output.suggested_comments.len(),
                        "suggestedTaskOrder": output.suggested_task_order,
                    }),
                )
                .await;
                Ok(output)
            }
            Err(err) => {
                self.record_audit(
                    format!("Error generating task grooming suggestions: {err}"),
                    LogLevel::Error,
                    json!({
                        "flow": GROOMING_FLOW,
                        "summaryLength": summary_length,
                        "taskCount": task_count,
                    }),
                )
                .await;
                Err(err)
            }
        }
    }

    async fn generate_validated<T>(&self, flow: &'static str, prompt: String) -> Result<T, AssistError>
    where
        T: DeserializeOwned + JsonSchema,
    {
        let schema = serde_json::to_value(schemars::schema_for!(T))
            .map_err(|err| AssistError::Generation(err.to_string()))?;
        let request = GenerationRequest {
            flow,
            prompt,
            schema,
        };

        let result = match self.generator.generate(&request).await {
            Ok(value) => serde_json::from_value::<T>(value)
                .map_err(|err| AssistError::InvalidOutput(err.to_string())),
            Err(err) => Err(AssistError::Generation(format!("{err:#}"))),
        };

        match &result {
            Ok(_) => emit_event(
                Level::INFO,
                ProcessKind::Engine,
                ObservabilityEvent {
                    event: "assist.generate",
                    component: "assist",
                    flow: Some(flow),
                    status: Some("ok"),
                    ..Default::default()
                },
            ),
            Err(err) => {
                let detail = err.to_string();
                emit_event(
                    Level::WARN,
                    ProcessKind::Engine,
                    ObservabilityEvent {
                        event: "assist.generate",
                        component: "assist",
                        flow: Some(flow),
                        status: Some("failed"),
                        error_code: Some(err.code()),
                        detail: Some(&detail),
                        ..Default::default()
                    },
                )
            }
        }
        result
    }

    async fn record_audit(&self, message: impl Into<String>, level: LogLevel, details: Value) {
        self.audit
            .append(message, level, details_from_value(details))
            .await;
    }
}
