use std::{collections::BTreeMap, path::PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::io::{load_or_default, write_json_file};
use super::{
    ComparisonEntry, EntryCompletion, EntryStatus, StorageResult, StoreError, Task, TaskPage,
    TaskSnapshot, TaskStatus, TaskStore, WriteOutcome,
};
use crate::providers::OutputFormat;

const MAX_PAGE_SIZE: usize = 200;
const INTERRUPTED: &str = "interrupted by restart";
const ORCHESTRATION_FAILED: &str = "orchestration failed";

#[derive(Clone, Debug)]
pub struct JsonTaskStoreConfig {
    pub working_dir: PathBuf,
    pub namespace: String,
}

impl JsonTaskStoreConfig {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            namespace: "comparisons".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TaskRecord {
    task: Task,
    #[serde(default)]
    entries: Vec<ComparisonEntry>,
}

impl TaskRecord {
    fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            task: self.task.clone(),
            entries: self.entries.clone(),
        }
    }

    fn entry_mut(&mut self, library: &str) -> Option<&mut ComparisonEntry> {
        self.entries
            .iter_mut()
            .find(|entry| entry.library_name == library)
    }

    fn finish(&mut self, status: TaskStatus, now: DateTime<Utc>, error: Option<String>) {
        let began = self.task.started_at.unwrap_or(self.task.created_at);
        self.task.status = status;
        self.task.completed_at = Some(now);
        self.task.total_duration_seconds = Some(seconds_between(began, now));
        self.task.error_message = error;
    }

    /// Fails every non-terminal entry so a failed task never owns live entries.
    fn sweep_entries(&mut self, reason: &str, now: DateTime<Utc>) {
        for entry in &mut self.entries {
            if entry.status.is_terminal() {
                continue;
            }
            entry.duration_seconds = Some(
                entry
                    .started_at
                    .map(|started| seconds_between(started, now))
                    .unwrap_or(0.0),
            );
            entry.status = EntryStatus::Failed;
            entry.output_ref = None;
            entry.output_size_bytes = None;
            entry.error_message = Some(format!("comparison aborted: {reason}"));
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TaskTable {
    #[serde(default)]
    tasks: BTreeMap<String, TaskRecord>,
}

/// Task records kept in memory and written through to a JSON file on every mutation.
pub struct JsonTaskStore {
    file_path: PathBuf,
    data: RwLock<TaskTable>,
}

impl JsonTaskStore {
    pub fn new(config: JsonTaskStoreConfig) -> Self {
        let file_path = config
            .working_dir
            .join(format!("task_store_{}.json", config.namespace));
        Self {
            file_path,
            data: RwLock::new(TaskTable::default()),
        }
    }

    pub fn file_path(&self) -> &PathBuf {
        &self.file_path
    }

    async fn persist(&self, table: &TaskTable) -> StorageResult<()> {
        write_json_file(&self.file_path, table).await
    }

    /// Applies `mutate` to a copy of the task and swaps it in once the table is persisted.
    /// A failed write leaves the in-memory record untouched.
    async fn mutate<F>(&self, task_id: &str, mutate: F) -> StorageResult<WriteOutcome>
    where
        F: FnOnce(&mut TaskRecord) -> StorageResult<WriteOutcome> + Send,
    {
        let mut table = self.data.write().await;
        let Some(current) = table.tasks.get(task_id) else {
            debug!(task_id = %task_id, "Write ignored: task missing");
            return Ok(WriteOutcome::TaskMissing);
        };

        let mut updated = current.clone();
        let outcome = mutate(&mut updated)?;
        if !outcome.is_applied() {
            return Ok(outcome);
        }

        let previous = table.tasks.insert(task_id.to_string(), updated);
        if let Err(err) = self.persist(&table).await {
            if let Some(previous) = previous {
                table.tasks.insert(task_id.to_string(), previous);
            }
            return Err(err);
        }
        Ok(outcome)
    }
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds().max(0) as f64 / 1000.0
}

#[async_trait]
impl TaskStore for JsonTaskStore {
    async fn initialize(&self) -> StorageResult<()> {
        let mut loaded: TaskTable = load_or_default(&self.file_path).await?;
        let now = Utc::now();

        let mut interrupted = 0usize;
        for record in loaded.tasks.values_mut() {
            if !record.task.status.is_terminal() {
                record.sweep_entries(INTERRUPTED, now);
                record.finish(TaskStatus::Failed, now, Some(INTERRUPTED.to_string()));
                interrupted += 1;
            }
        }

        let mut table = self.data.write().await;
        *table = loaded;
        if interrupted > 0 {
            warn!(count = interrupted, "Resolved interrupted comparison tasks to failed");
            self.persist(&table).await?;
        }

        info!(
            path = %self.file_path.display(),
            tasks = table.tasks.len(),
            "Task store initialized"
        );
        Ok(())
    }

    async fn finalize(&self) -> StorageResult<()> {
        let table = self.data.read().await;
        self.persist(&table).await
    }

    async fn create_task(
        &self,
        task_id: &str,
        filename: &str,
        file_size: u64,
        output_format: OutputFormat,
    ) -> StorageResult<Task> {
        let mut table = self.data.write().await;
        if table.tasks.contains_key(task_id) {
            return Err(StoreError::TaskExists(task_id.to_string()));
        }

        let task = Task {
            task_id: task_id.to_string(),
            filename: filename.to_string(),
            file_size,
            output_format,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            total_duration_seconds: None,
            error_message: None,
        };
        table.tasks.insert(
            task_id.to_string(),
            TaskRecord {
                task: task.clone(),
                entries: Vec::new(),
            },
        );
        if let Err(err) = self.persist(&table).await {
            table.tasks.remove(task_id);
            return Err(err);
        }
        Ok(task)
    }

    async fn add_entries(&self, task_id: &str, libraries: &[String]) -> StorageResult<WriteOutcome> {
        self.mutate(task_id, |record| {
            if record.task.status.is_terminal() {
                return Ok(WriteOutcome::Ignored);
            }
            let mut added = false;
            for library in libraries {
                if record.entry_mut(library).is_none() {
                    record.entries.push(ComparisonEntry::pending(library.clone()));
                    added = true;
                }
            }
            Ok(if added {
                WriteOutcome::Applied
            } else {
                WriteOutcome::Ignored
            })
        })
        .await
    }

    async fn start_task(&self, task_id: &str) -> StorageResult<WriteOutcome> {
        self.mutate(task_id, |record| {
            if record.task.status != TaskStatus::Pending {
                return Ok(WriteOutcome::Ignored);
            }
            record.task.status = TaskStatus::Running;
            record.task.started_at = Some(Utc::now());
            Ok(WriteOutcome::Applied)
        })
        .await
    }

    async fn start_entry(&self, task_id: &str, library: &str) -> StorageResult<WriteOutcome> {
        self.mutate(task_id, |record| {
            let now = Utc::now();
            if record.task.status == TaskStatus::Pending {
                record.task.status = TaskStatus::Running;
                record.task.started_at = Some(now);
            }
            let entry = record.entry_mut(library).ok_or_else(|| {
                StoreError::InvalidTransition(format!(
                    "task '{task_id}' has no entry for library '{library}'"
                ))
            })?;
            if entry.status != EntryStatus::Pending {
                return Ok(WriteOutcome::Ignored);
            }
            entry.status = EntryStatus::Running;
            entry.started_at = Some(now);
            Ok(WriteOutcome::Applied)
        })
        .await
    }

    async fn complete_entry(
        &self,
        task_id: &str,
        library: &str,
        completion: EntryCompletion,
    ) -> StorageResult<WriteOutcome> {
        completion.validate().map_err(StoreError::InvalidTransition)?;

        self.mutate(task_id, |record| {
            let entry = record.entry_mut(library).ok_or_else(|| {
                StoreError::InvalidTransition(format!(
                    "task '{task_id}' has no entry for library '{library}'"
                ))
            })?;
            if entry.status.is_terminal() {
                debug!(task_id = %task_id, library = %library, "Entry already completed");
                return Ok(WriteOutcome::Ignored);
            }

            entry.status = completion.status;
            entry.duration_seconds = Some(completion.duration_seconds);
            entry.output_ref = completion.output_ref;
            entry.output_size_bytes = completion.output_size_bytes;
            entry.error_message = completion.error_message;
            Ok(WriteOutcome::Applied)
        })
        .await
    }

    async fn complete_task(&self, task_id: &str, status: TaskStatus) -> StorageResult<WriteOutcome> {
        if !status.is_terminal() {
            return Err(StoreError::InvalidTransition(format!(
                "task cannot complete as '{status}'"
            )));
        }

        self.mutate(task_id, |record| {
            if record.task.status.is_terminal() {
                return Ok(WriteOutcome::Ignored);
            }

            let now = Utc::now();
            match status {
                TaskStatus::Completed => {
                    if let Some(open) = record
                        .entries
                        .iter()
                        .find(|entry| !entry.status.is_terminal())
                    {
                        return Err(StoreError::InvalidTransition(format!(
                            "entry '{}' of task '{task_id}' is still {}",
                            open.library_name, open.status
                        )));
                    }
                    record.finish(TaskStatus::Completed, now, None);
                }
                _ => {
                    record.sweep_entries(ORCHESTRATION_FAILED, now);
                    record.finish(TaskStatus::Failed, now, Some(ORCHESTRATION_FAILED.to_string()));
                }
            }
            Ok(WriteOutcome::Applied)
        })
        .await
    }

    async fn fail_task(&self, task_id: &str, reason: &str) -> StorageResult<WriteOutcome> {
        self.mutate(task_id, |record| {
            if record.task.status.is_terminal() {
                return Ok(WriteOutcome::Ignored);
            }
            let now = Utc::now();
            record.sweep_entries(reason, now);
            record.finish(TaskStatus::Failed, now, Some(reason.to_string()));
            Ok(WriteOutcome::Applied)
        })
        .await
    }

    async fn get_task_with_entries(&self, task_id: &str) -> StorageResult<TaskSnapshot> {
        let table = self.data.read().await;
        table
            .tasks
            .get(task_id)
            .map(TaskRecord::snapshot)
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))
    }

    async fn delete_task(&self, task_id: &str) -> StorageResult<bool> {
        let mut table = self.data.write().await;
        let Some(removed) = table.tasks.remove(task_id) else {
            return Ok(false);
        };
        if let Err(err) = self.persist(&table).await {
            table.tasks.insert(task_id.to_string(), removed);
            return Err(err);
        }
        Ok(true)
    }

    async fn list_tasks(&self, page: usize, page_size: usize) -> StorageResult<TaskPage> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);

        let table = self.data.read().await;
        let mut records: Vec<&TaskRecord> = table.tasks.values().collect();
        records.sort_by(|a, b| {
            b.task
                .created_at
                .cmp(&a.task.created_at)
                .then_with(|| a.task.task_id.cmp(&b.task.task_id))
        });

        let total = records.len();
        let tasks = records
            .into_iter()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .map(TaskRecord::snapshot)
            .collect();
        Ok(TaskPage {
            tasks,
            total,
            page,
            page_size,
        })
    }
}
