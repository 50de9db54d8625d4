use std::{collections::HashMap, path::Path, sync::Arc, time::Duration};

use tokio::{sync::Mutex, task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ComparisonScheduler, Upload, normalize_libraries, scheduler::RunOutcome};
use crate::{
    chunkers::{ChunkParams, ChunkerRegistry, ChunkingResult},
    config::ComparisonConfig,
    error::{StractError, StractResult},
    providers::{ConvertedContent, ConverterRegistry, OutputFormat},
    storage::{EntryStatus, ResultStore, StoreError, TaskPage, TaskSnapshot, TaskStore},
    utils::generate_task_id,
};

/// Input for [`ComparisonService::submit`].
#[derive(Debug, Clone)]
pub struct SubmitComparison {
    pub upload: Upload,
    pub libraries: Vec<String>,
    pub format: OutputFormat,
}

/// Output of a single conversion.
#[derive(Debug, Clone)]
pub struct Conversion {
    pub library: String,
    pub format: OutputFormat,
    pub content: ConvertedContent,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone)]
pub struct ConvertAndChunk {
    pub conversion: Conversion,
    pub chunking: ChunkingResult,
}

/// A stored result fetched for one library of a task.
#[derive(Debug, Clone)]
pub struct StoredContent {
    pub library: String,
    pub format: OutputFormat,
    pub bytes: Vec<u8>,
}

struct RunningComparison {
    cancel: CancellationToken,
    handle: JoinHandle<RunOutcome>,
}

/// Entry point for comparisons and one-off conversions shared by the HTTP layer and the CLI.
pub struct ComparisonService {
    config: ComparisonConfig,
    converters: Arc<ConverterRegistry>,
    chunkers: Arc<ChunkerRegistry>,
    tasks: Arc<dyn TaskStore>,
    results: Arc<dyn ResultStore>,
    scheduler: Arc<ComparisonScheduler>,
    running: Arc<Mutex<HashMap<String, RunningComparison>>>,
    shutdown: CancellationToken,
}

impl ComparisonService {
    pub fn new(
        config: ComparisonConfig,
        converters: Arc<ConverterRegistry>,
        chunkers: Arc<ChunkerRegistry>,
        tasks: Arc<dyn TaskStore>,
        results: Arc<dyn ResultStore>,
    ) -> Self {
        let scheduler = Arc::new(ComparisonScheduler::new(
            converters.clone(),
            tasks.clone(),
            results.clone(),
        ));
        Self {
            config,
            converters,
            chunkers,
            tasks,
            results,
            scheduler,
            running: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn max_libraries(&self) -> usize {
        self.config.max_libraries
    }

    /// Validates the request, creates the task and starts the run in the background.
    /// Returns the task as created, before any conversion has started.
    pub async fn submit(&self, request: SubmitComparison) -> StractResult<TaskSnapshot> {
        let SubmitComparison {
            upload,
            libraries,
            format,
        } = request;

        upload.validate()?;
        let libraries = normalize_libraries(libraries);
        if libraries.is_empty() {
            return Err(StractError::InvalidRequest(
                "at least one library must be selected".to_string(),
            ));
        }
        if libraries.len() > self.config.max_libraries {
            return Err(StractError::InvalidRequest(format!(
                "at most {} libraries can be compared at once, got {}",
                self.config.max_libraries,
                libraries.len()
            )));
        }
        if self.shutdown.is_cancelled() {
            return Err(StractError::Orchestration("service is shutting down".to_string()));
        }

        let input = upload.stage().await?;
        let task_id = generate_task_id();
        self.tasks
            .create_task(&task_id, &upload.filename, upload.size(), format)
            .await?;
        let snapshot = self.tasks.get_task_with_entries(&task_id).await?;

        let cancel = self.shutdown.child_token();
        let scheduler = self.scheduler.clone();
        let running = self.running.clone();
        let run_id = task_id.clone();
        let run_cancel = cancel.clone();

        // Holding the lock across spawn keeps the run from deregistering before it is registered.
        let mut registry = self.running.lock().await;
        let handle = tokio::spawn(async move {
            let outcome = scheduler
                .run_comparison(&run_id, input, &libraries, format, run_cancel)
                .await;
            running.lock().await.remove(&run_id);
            outcome
        });
        registry.insert(task_id.clone(), RunningComparison { cancel, handle });
        drop(registry);

        info!(task_id = %task_id, filename = %upload.filename, "Comparison task submitted");
        Ok(snapshot)
    }

    pub async fn task(&self, task_id: &str) -> StractResult<TaskSnapshot> {
        Ok(self.tasks.get_task_with_entries(task_id).await?)
    }

    pub async fn list(&self, page: usize, page_size: usize) -> StractResult<TaskPage> {
        Ok(self.tasks.list_tasks(page, page_size).await?)
    }

    /// Polls until the task reaches a terminal state.
    pub async fn wait(&self, task_id: &str, poll: Duration) -> StractResult<TaskSnapshot> {
        loop {
            let snapshot = self.task(task_id).await?;
            if snapshot.task.status.is_terminal() {
                return Ok(snapshot);
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Content stored for `library`; only successful entries have any.
    pub async fn result(&self, task_id: &str, library: &str) -> StractResult<StoredContent> {
        let snapshot = self.task(task_id).await?;
        let not_found = || {
            StractError::Store(StoreError::ResultNotFound {
                task_id: task_id.to_string(),
                library: library.to_string(),
            })
        };

        let entry = snapshot.entry(library).ok_or_else(not_found)?;
        if entry.status != EntryStatus::Success {
            return Err(not_found());
        }

        let format = snapshot.task.output_format;
        let bytes = self.results.get(task_id, library, format).await?;
        Ok(StoredContent {
            library: library.to_string(),
            format,
            bytes,
        })
    }

    /// ZIP bundle of the task's results and the archive's file name.
    pub async fn bundle(&self, task_id: &str) -> StractResult<(String, Vec<u8>)> {
        let snapshot = self.task(task_id).await?;
        let archive = self.results.bundle(&snapshot).await?;
        Ok((format!("comparison-{task_id}.zip"), archive))
    }

    /// Cancels an in-flight run, then removes the task and its stored results.
    /// Unknown tasks are a no-op; returns whether a task was removed.
    pub async fn delete(&self, task_id: &str) -> StractResult<bool> {
        let running = self.running.lock().await.remove(task_id);
        if let Some(run) = running {
            run.cancel.cancel();
            if let Err(err) = run.handle.await {
                warn!(task_id = %task_id, error = %err, "Comparison run ended abnormally");
            }
        }

        let removed = self.tasks.delete_task(task_id).await?;
        self.results.delete_task_results(task_id).await?;
        if removed {
            info!(task_id = %task_id, "Comparison task deleted");
        } else {
            debug!(task_id = %task_id, "Delete requested for unknown task");
        }
        Ok(removed)
    }

    /// Cancels every in-flight run and waits for them to unwind.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let runs: Vec<(String, RunningComparison)> = self.running.lock().await.drain().collect();
        for (task_id, run) in runs {
            if let Err(err) = run.handle.await {
                warn!(task_id = %task_id, error = %err, "Comparison run ended abnormally");
            }
        }
    }

    pub async fn convert_path(
        &self,
        library: &str,
        path: &Path,
        format: OutputFormat,
    ) -> StractResult<Conversion> {
        let started = Instant::now();
        let content = self.converters.convert(library, path, format).await?;
        Ok(Conversion {
            library: library.to_string(),
            format,
            content,
            duration_seconds: started.elapsed().as_secs_f64(),
        })
    }

    pub async fn convert_upload(
        &self,
        upload: &Upload,
        library: &str,
        format: OutputFormat,
    ) -> StractResult<Conversion> {
        upload.validate()?;
        // Unknown or unavailable libraries fail before anything touches the disk.
        self.converters.get(library)?;
        let input = upload.stage().await?;
        self.convert_path(library, &input, format).await
    }

    pub async fn chunk(
        &self,
        chunker: &str,
        text: String,
        params: &ChunkParams,
    ) -> StractResult<ChunkingResult> {
        Ok(self.chunkers.chunk(chunker, text, params).await?)
    }

    /// Converts, then chunks the textual view of the converted content.
    pub async fn convert_and_chunk(
        &self,
        upload: &Upload,
        library: &str,
        format: OutputFormat,
        chunker: &str,
        params: &ChunkParams,
    ) -> StractResult<ConvertAndChunk> {
        self.chunkers.get(chunker)?;
        let conversion = self.convert_upload(upload, library, format).await?;
        let text = conversion.content.as_text().into_owned();
        let chunking = self.chunk(chunker, text, params).await?;
        Ok(ConvertAndChunk {
            conversion,
            chunking,
        })
    }

    pub async fn convert_and_chunk_path(
        &self,
        path: &Path,
        library: &str,
        format: OutputFormat,
        chunker: &str,
        params: &ChunkParams,
    ) -> StractResult<ConvertAndChunk> {
        self.chunkers.get(chunker)?;
        let conversion = self.convert_path(library, path, format).await?;
        let text = conversion.content.as_text().into_owned();
        let chunking = self.chunk(chunker, text, params).await?;
        Ok(ConvertAndChunk {
            conversion,
            chunking,
        })
    }
}
