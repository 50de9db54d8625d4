use async_trait::async_trait;
use thiserror::Error;

use crate::{error::ErrorKind, providers::OutputFormat};

pub mod io;
pub mod manager;
pub mod results;
pub mod tasks;
pub mod types;

pub use io::*;
pub use manager::StorageManager;
pub use results::{FsResultStore, FsResultStoreConfig, StoredResult};
pub use tasks::{JsonTaskStore, JsonTaskStoreConfig};
pub use types::*;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task '{0}' not found")]
    TaskNotFound(String),

    #[error("no result stored for library '{library}' in task '{task_id}'")]
    ResultNotFound { task_id: String, library: String },

    #[error("task '{0}' already exists")]
    TaskExists(String),

    #[error("result for library '{library}' in task '{task_id}' is already stored")]
    ResultExists { task_id: String, library: String },

    #[error("invalid storage key '{0}'")]
    InvalidKey(String),

    #[error("invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("storage io failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("archive creation failed: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("storage worker failed: {0}")]
    Worker(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::TaskNotFound(_) | StoreError::ResultNotFound { .. } => ErrorKind::NotFound,
            StoreError::InvalidKey(_) => ErrorKind::InvalidParameter,
            _ => ErrorKind::Internal,
        }
    }
}

pub type StorageResult<T> = Result<T, StoreError>;

/// Result of a write addressed to a task that may have been deleted or finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// The record was already in a terminal state; nothing changed.
    Ignored,
    TaskMissing,
}

impl WriteOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, WriteOutcome::Applied)
    }
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn initialize(&self) -> StorageResult<()>;
    async fn finalize(&self) -> StorageResult<()>;

    async fn create_task(
        &self,
        task_id: &str,
        filename: &str,
        file_size: u64,
        output_format: OutputFormat,
    ) -> StorageResult<Task>;

    /// Bulk-creates `pending` entries. Libraries that already have an entry are skipped.
    async fn add_entries(&self, task_id: &str, libraries: &[String]) -> StorageResult<WriteOutcome>;

    /// `pending → running` for the task itself.
    async fn start_task(&self, task_id: &str) -> StorageResult<WriteOutcome>;

    async fn start_entry(&self, task_id: &str, library: &str) -> StorageResult<WriteOutcome>;

    /// Terminal and write-once: a second completion for the same key is ignored.
    async fn complete_entry(
        &self,
        task_id: &str,
        library: &str,
        completion: EntryCompletion,
    ) -> StorageResult<WriteOutcome>;

    /// Only once per task. `completed` requires every entry to be terminal; `failed`
    /// resolves open entries to `failed`.
    async fn complete_task(&self, task_id: &str, status: TaskStatus) -> StorageResult<WriteOutcome>;

    /// `complete_task(failed)` carrying the orchestration error as the reason.
    async fn fail_task(&self, task_id: &str, reason: &str) -> StorageResult<WriteOutcome>;

    async fn get_task_with_entries(&self, task_id: &str) -> StorageResult<TaskSnapshot>;

    /// Returns whether a task was removed.
    async fn delete_task(&self, task_id: &str) -> StorageResult<bool>;

    /// `page` starts at 1; `page_size` is clamped to the store's maximum.
    async fn list_tasks(&self, page: usize, page_size: usize) -> StorageResult<TaskPage>;
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn initialize(&self) -> StorageResult<()>;
    async fn finalize(&self) -> StorageResult<()>;

    async fn save(
        &self,
        task_id: &str,
        library: &str,
        content: &[u8],
        format: OutputFormat,
    ) -> StorageResult<StoredResult>;

    async fn get(&self, task_id: &str, library: &str, format: OutputFormat)
    -> StorageResult<Vec<u8>>;

    async fn delete_task_results(&self, task_id: &str) -> StorageResult<()>;

    /// ZIP archive with every successful entry's content plus `metadata.json`.
    async fn bundle(&self, snapshot: &TaskSnapshot) -> StorageResult<Vec<u8>>;
}
