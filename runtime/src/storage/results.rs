use std::{
    io::{Cursor, Write},
    path::PathBuf,
};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::fs;
use tracing::{debug, info};
use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

use super::io::{path_segment, remove_dir_if_exists, write_bytes_atomic};
use super::{EntryStatus, ResultStore, StorageResult, StoreError, TaskSnapshot};
use crate::{providers::OutputFormat, utils::compute_hash_id};

pub const METADATA_ENTRY: &str = "metadata.json";

#[derive(Clone, Debug)]
pub struct FsResultStoreConfig {
    pub working_dir: PathBuf,
}

impl FsResultStoreConfig {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResult {
    /// `result-<sha256 of the content>`.
    pub output_ref: String,
    pub size_bytes: u64,
    pub path: PathBuf,
}

/// Conversion outputs laid out as `<working_dir>/results/<task_id>/<library>.<ext>`.
pub struct FsResultStore {
    root: PathBuf,
}

impl FsResultStore {
    pub fn new(config: FsResultStoreConfig) -> Self {
        Self {
            root: config.working_dir.join("results"),
        }
    }

    fn task_dir(&self, task_id: &str) -> StorageResult<PathBuf> {
        Ok(self.root.join(path_segment(task_id)?))
    }

    fn result_path(&self, task_id: &str, library: &str, format: OutputFormat) -> StorageResult<PathBuf> {
        let file_name = format!("{}.{}", path_segment(library)?, format.extension());
        Ok(self.task_dir(task_id)?.join(file_name))
    }
}

#[async_trait]
impl ResultStore for FsResultStore {
    async fn initialize(&self) -> StorageResult<()> {
        fs::create_dir_all(&self.root).await?;
        info!(path = %self.root.display(), "Result store initialized");
        Ok(())
    }

    async fn finalize(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn save(
        &self,
        task_id: &str,
        library: &str,
        content: &[u8],
        format: OutputFormat,
    ) -> StorageResult<StoredResult> {
        let path = self.result_path(task_id, library, format)?;
        if fs::try_exists(&path).await? {
            return Err(StoreError::ResultExists {
                task_id: task_id.to_string(),
                library: library.to_string(),
            });
        }

        write_bytes_atomic(&path, content).await?;
        let stored = StoredResult {
            output_ref: compute_hash_id(content, "result-"),
            size_bytes: content.len() as u64,
            path,
        };
        debug!(
            task_id = %task_id,
            library = %library,
            bytes = stored.size_bytes,
            "Stored conversion result"
        );
        Ok(stored)
    }

    async fn get(
        &self,
        task_id: &str,
        library: &str,
        format: OutputFormat,
    ) -> StorageResult<Vec<u8>> {
        let path = self.result_path(task_id, library, format)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::ResultNotFound {
                    task_id: task_id.to_string(),
                    library: library.to_string(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn delete_task_results(&self, task_id: &str) -> StorageResult<()> {
        remove_dir_if_exists(&self.task_dir(task_id)?).await
    }

    async fn bundle(&self, snapshot: &TaskSnapshot) -> StorageResult<Vec<u8>> {
        let task = &snapshot.task;
        let format = task.output_format;

        let mut files = Vec::new();
        for entry in &snapshot.entries {
            if entry.status != EntryStatus::Success {
                continue;
            }
            let bytes = self.get(&task.task_id, &entry.library_name, format).await?;
            files.push((format!("{}.{}", entry.library_name, format.extension()), bytes));
        }

        let metadata = serde_json::to_vec_pretty(&json!({
            "task_id": task.task_id,
            "filename": task.filename,
            "file_size": task.file_size,
            "output_format": format,
            "status": task.status,
            "created_at": task.created_at,
            "started_at": task.started_at,
            "completed_at": task.completed_at,
            "total_duration_seconds": task.total_duration_seconds,
            "error_message": task.error_message,
            "bundled_at": Utc::now(),
            "entries": snapshot.entries,
        }))?;

        tokio::task::spawn_blocking(move || write_archive(files, metadata))
            .await
            .map_err(|err| StoreError::Worker(err.to_string()))?
    }
}

fn write_archive(files: Vec<(String, Vec<u8>)>, metadata: Vec<u8>) -> StorageResult<Vec<u8>> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

    for (name, bytes) in files {
        writer.start_file(name, options)?;
        writer.write_all(&bytes)?;
    }
    writer.start_file(METADATA_ENTRY, options)?;
    writer.write_all(&metadata)?;

    Ok(writer.finish()?.into_inner())
}
