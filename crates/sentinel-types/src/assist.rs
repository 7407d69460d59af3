use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RefineIdeaInput {
    #[serde(alias = "idea")]
    pub idea_text: String,
    #[serde(default, alias = "projectDescription")]
    pub project_context: Option<String>,
}

/// Issue draft produced from a free-text idea.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RefineIdeaOutput {
    /// Title of the generated issue.
    pub issue_title: String,
    /// Detailed description for the issue.
    pub issue_body: String,
    /// Labels to apply, e.g. "enhancement" or "bug".
    pub labels: Vec<String>,
    /// Milestone the issue should be assigned to.
    pub milestone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GroomingInput {
    pub code_review_summary: String,
    pub current_tasks: Vec<String>,
}

/// Post-review grooming suggestions for a task list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GroomingOutput {
    /// Labels to apply to the tasks.
    pub suggested_labels: Vec<String>,
    /// Comments to add to the tasks.
    pub suggested_comments: Vec<String>,
    /// Suggested order as 0-based indices into the input task list.
    pub suggested_task_order: Vec<usize>,
}

impl GroomingOutput {
    pub fn is_empty(&self) -> bool {
        self.suggested_labels.is_empty()
            && self.suggested_comments.is_empty()
            && self.suggested_task_order.is_empty()
    }
}

/// Envelope returned by the adapter endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionResult<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ActionResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// One row of a suggested task ordering.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReorderedTask {
    /// 0-based position in the suggested order.
    pub position: usize,
    /// Index the adapter pointed at.
    pub source_index: usize,
    /// `None` when `source_index` is outside the input list.
    pub task: Option<String>,
}

impl ReorderedTask {
    pub fn moved(&self) -> bool {
        self.task.is_some() && self.position != self.source_index
    }
}
