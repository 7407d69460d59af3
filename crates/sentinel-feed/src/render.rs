use std::collections::HashSet;

use chrono::{DateTime, Utc};
use crossterm::style::{StyledContent, Stylize};

use sentinel_types::{
    GroomingOutput, LogLevel, LogRecord, RefineIdeaOutput, ReorderedTask,
};

use crate::coordinator::FeedSnapshot;

/// "just now", "5 seconds ago", "1 minute ago", ...
pub fn relative_age(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = now.signed_duration_since(timestamp).num_seconds();
    if secs < 5 {
        return "just now".to_string();
    }
    let (value, unit) = match secs {
        s if s < 60 => (s, "second"),
        s if s < 3_600 => (s / 60, "minute"),
        s if s < 86_400 => (s / 3_600, "hour"),
        s => (s / 86_400, "day"),
    };
    if value == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{value} {unit}s ago")
    }
}

fn styled(text: String, level: LogLevel) -> StyledContent<String> {
    match level {
        LogLevel::Info => text.blue(),
        LogLevel::Warning => text.yellow(),
        LogLevel::Error => text.red(),
        LogLevel::Success => text.green(),
        LogLevel::Action => text.magenta(),
        LogLevel::Debug => text.dark_grey(),
        LogLevel::Unknown => text.reset(),
    }
}

/// One record as terminal lines: the headline, then indented details.
pub fn render_record(record: &LogRecord, now: DateTime<Utc>, color: bool) -> Vec<String> {
    let headline = format!(
        "{} [{}] {} ({}) {}",
        record.glyph(),
        record.origin_label(),
        record.timestamp.format("%H:%M:%S"),
        relative_age(record.timestamp, now),
        record.message
    );
    let mut lines = vec![if color {
        styled(headline, record.level).to_string()
    } else {
        headline
    }];

    if let Some(details) = record.details.as_ref().filter(|d| !d.is_empty()) {
        let pretty = serde_json::to_string_pretty(details).unwrap_or_default();
        lines.extend(pretty.lines().map(|line| format!("    {line}")));
    }
    lines
}

pub fn render_task_order(rows: &[ReorderedTask]) -> Vec<String> {
    rows.iter()
        .map(|row| {
            let position = row.position + 1;
            match &row.task {
                Some(task) if row.moved() => {
                    format!("{position}. {task} (was #{})", row.source_index + 1)
                }
                Some(task) => format!("{position}. {task}"),
                None => format!("{position}. (missing task #{})", row.source_index + 1),
            }
        })
        .collect()
}

pub fn render_refined_issue(issue: &RefineIdeaOutput) -> Vec<String> {
    let mut lines = vec![format!("Title:     {}", issue.issue_title)];
    if !issue.labels.is_empty() {
        lines.push(format!("Labels:    {}", issue.labels.join(", ")));
    }
    lines.push(format!("Milestone: {}", issue.milestone));
    lines.push(String::new());
    lines.extend(issue.issue_body.lines().map(str::to_string));
    lines
}

pub fn render_grooming(output: &GroomingOutput, tasks: &[String]) -> Vec<String> {
    if output.is_empty() {
        return vec!["No grooming suggestions.".to_string()];
    }
    let mut lines = Vec::new();
    if !output.suggested_labels.is_empty() {
        lines.push(format!("Labels: {}", output.suggested_labels.join(", ")));
    }
    if !output.suggested_comments.is_empty() {
        lines.push("Comments:".to_string());
        lines.extend(output.suggested_comments.iter().map(|c| format!("  - {c}")));
    }
    if !output.suggested_task_order.is_empty() {
        lines.push("Suggested order:".to_string());
        let rows = sentinel_core::apply_task_order(tasks, &output.suggested_task_order);
        lines.extend(render_task_order(&rows).into_iter().map(|l| format!("  {l}")));
    }
    lines
}

/// Turns successive feed snapshots into append-only terminal output.
pub struct FeedPrinter {
    color: bool,
    shown: HashSet<String>,
    paused: bool,
    error: Option<String>,
    clears: u64,
}

impl FeedPrinter {
    pub fn new(color: bool) -> Self {
        Self {
            color,
            shown: HashSet::new(),
            paused: false,
            error: None,
            clears: 0,
        }
    }

    pub fn render_update(&mut self, snapshot: &FeedSnapshot, now: DateTime<Utc>) -> Vec<String> {
        let mut lines = Vec::new();

        if snapshot.paused != self.paused {
            self.paused = snapshot.paused;
            lines.push(if snapshot.paused {
                "-- feed paused --".to_string()
            } else {
                "-- feed resumed --".to_string()
            });
        }
        if snapshot.error != self.error {
            if let Some(error) = &snapshot.error {
                let line = format!("!! {error}");
                lines.push(if self.color { line.red().to_string() } else { line });
            }
            self.error = snapshot.error.clone();
        }

        if snapshot.clears != self.clears {
            self.clears = snapshot.clears;
            self.shown.clear();
            lines.push("-- feed cleared --".to_string());
        }

        let current = snapshot
            .records
            .iter()
            .map(|r| r.id.clone())
            .collect::<HashSet<_>>();
        for record in &snapshot.records {
            if !self.shown.contains(&record.id) {
                lines.extend(render_record(record, now, self.color));
            }
        }
        self.shown = current;
        lines
    }
}
