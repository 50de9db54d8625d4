use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::providers::OutputFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum EntryStatus {
    Pending,
    Running,
    Success,
    Failed,
    Timeout,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::Running => "running",
            EntryStatus::Success => "success",
            EntryStatus::Failed => "failed",
            EntryStatus::Timeout => "timeout",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EntryStatus::Success | EntryStatus::Failed | EntryStatus::Timeout
        )
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Task {
    pub task_id: String,
    pub filename: String,
    #[ts(type = "number")]
    pub file_size: u64,
    pub output_format: OutputFormat,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_duration_seconds: Option<f64>,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ComparisonEntry {
    pub library_name: String,
    pub status: EntryStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    /// Set iff `status` is `success`.
    #[serde(default)]
    pub output_ref: Option<String>,
    #[serde(default)]
    #[ts(type = "number | null")]
    pub output_size_bytes: Option<u64>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl ComparisonEntry {
    pub fn pending(library_name: impl Into<String>) -> Self {
        Self {
            library_name: library_name.into(),
            status: EntryStatus::Pending,
            started_at: None,
            duration_seconds: None,
            output_ref: None,
            output_size_bytes: None,
            error_message: None,
        }
    }
}

/// A task together with its entries, as one consistent read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TaskSnapshot {
    #[serde(flatten)]
    pub task: Task,
    pub entries: Vec<ComparisonEntry>,
}

impl TaskSnapshot {
    pub fn entry(&self, library: &str) -> Option<&ComparisonEntry> {
        self.entries
            .iter()
            .find(|entry| entry.library_name == library)
    }
}

/// One page of tasks, newest first, with the paging actually applied.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[ts(export)]
pub struct TaskPage {
    pub tasks: Vec<TaskSnapshot>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

/// Terminal outcome recorded by `complete_entry`.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryCompletion {
    pub status: EntryStatus,
    pub duration_seconds: f64,
    pub output_ref: Option<String>,
    pub output_size_bytes: Option<u64>,
    pub error_message: Option<String>,
}

impl EntryCompletion {
    pub fn success(duration_seconds: f64, output_ref: String, output_size_bytes: u64) -> Self {
        Self {
            status: EntryStatus::Success,
            duration_seconds,
            output_ref: Some(output_ref),
            output_size_bytes: Some(output_size_bytes),
            error_message: None,
        }
    }

    pub fn failed(duration_seconds: f64, error: impl Into<String>) -> Self {
        Self {
            status: EntryStatus::Failed,
            duration_seconds,
            output_ref: None,
            output_size_bytes: None,
            error_message: Some(error.into()),
        }
    }

    pub fn timed_out(duration_seconds: f64, error: impl Into<String>) -> Self {
        Self {
            status: EntryStatus::Timeout,
            ..Self::failed(duration_seconds, error)
        }
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if !self.status.is_terminal() {
            return Err(format!("entry cannot complete as '{}'", self.status));
        }
        let success = self.status == EntryStatus::Success;
        if success != self.output_ref.is_some() {
            return Err("output_ref must be present exactly when the entry succeeded".to_string());
        }
        if !success
            && self
                .error_message
                .as_deref()
                .is_none_or(|message| message.trim().is_empty())
        {
            return Err("unsuccessful entries require an error message".to_string());
        }
        Ok(())
    }
}
