use std::{path::Path, sync::Arc};

use futures::future::join_all;
use tempfile::TempPath;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::{StractError, StractResult},
    providers::{ConverterRegistry, OutputFormat, ProviderError},
    storage::{
        EntryCompletion, ResultStore, TaskStatus, TaskStore, WriteOutcome,
    },
};

/// How a background run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed,
    Cancelled,
    /// The task was deleted while the run was in flight.
    TaskGone,
}

/// Drives every conversion of one comparison task and keeps both stores in step.
pub struct ComparisonScheduler {
    converters: Arc<ConverterRegistry>,
    tasks: Arc<dyn TaskStore>,
    results: Arc<dyn ResultStore>,
}

impl ComparisonScheduler {
    pub fn new(
        converters: Arc<ConverterRegistry>,
        tasks: Arc<dyn TaskStore>,
        results: Arc<dyn ResultStore>,
    ) -> Self {
        Self {
            converters,
            tasks,
            results,
        }
    }

    /// Runs the comparison to completion. `input` is removed on every exit path.
    ///
    /// Individual library failures are recorded on their entries; only errors in
    /// the orchestration itself resolve the task to `failed`.
    pub async fn run_comparison(
        &self,
        task_id: &str,
        input: TempPath,
        libraries: &[String],
        format: OutputFormat,
        cancel: CancellationToken,
    ) -> RunOutcome {
        let started = Instant::now();
        let driven = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.drive(task_id, &input, libraries, format) => Some(result),
        };
        drop(input);

        let outcome = match driven {
            None => {
                info!(task_id = %task_id, "Comparison cancelled");
                return RunOutcome::Cancelled;
            }
            Some(Ok(WriteOutcome::TaskMissing)) => RunOutcome::TaskGone,
            Some(Ok(_)) => match self.tasks.complete_task(task_id, TaskStatus::Completed).await {
                Ok(WriteOutcome::TaskMissing) => RunOutcome::TaskGone,
                Ok(_) => RunOutcome::Completed,
                Err(err) => self.fail(task_id, StractError::from(err)).await,
            },
            Some(Err(err)) => self.fail(task_id, err).await,
        };

        info!(
            task_id = %task_id,
            outcome = ?outcome,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Comparison finished"
        );
        outcome
    }

    async fn fail(&self, task_id: &str, err: StractError) -> RunOutcome {
        error!(task_id = %task_id, error = %err, "Comparison orchestration failed");
        let mut source = std::error::Error::source(&err);
        let mut depth = 0;
        while let Some(cause) = source {
            depth += 1;
            error!(task_id = %task_id, cause_depth = depth, cause = %cause, "caused by");
            source = cause.source();
        }

        match self.tasks.fail_task(task_id, &err.to_string()).await {
            Ok(WriteOutcome::TaskMissing) => RunOutcome::TaskGone,
            Ok(_) => RunOutcome::Failed,
            Err(status_err) => {
                error!(task_id = %task_id, error = %status_err, "Failed to mark comparison as failed");
                RunOutcome::Failed
            }
        }
    }

    /// Returns `TaskMissing` when the task disappeared before the run could record anything.
    async fn drive(
        &self,
        task_id: &str,
        input: &Path,
        libraries: &[String],
        format: OutputFormat,
    ) -> StractResult<WriteOutcome> {
        if self.tasks.start_task(task_id).await? == WriteOutcome::TaskMissing {
            return Ok(WriteOutcome::TaskMissing);
        }
        if self.tasks.add_entries(task_id, libraries).await? == WriteOutcome::TaskMissing {
            return Ok(WriteOutcome::TaskMissing);
        }

        let metadata = tokio::fs::metadata(input).await.map_err(|err| {
            StractError::Orchestration(format!(
                "cannot read input file {}: {err}",
                input.display()
            ))
        })?;
        if !metadata.is_file() {
            return Err(StractError::Orchestration(format!(
                "input {} is not a regular file",
                input.display()
            )));
        }

        info!(task_id = %task_id, libraries = ?libraries, format = %format, "Starting comparison");

        let runs = libraries
            .iter()
            .map(|library| self.convert_one(task_id, input, library, format));
        let settled = join_all(runs).await;

        let mut first_error = None;
        for result in settled {
            if let Err(err) = result {
                warn!(task_id = %task_id, error = %err, "Comparison entry bookkeeping failed");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(WriteOutcome::Applied),
        }
    }

    async fn convert_one(
        &self,
        task_id: &str,
        input: &Path,
        library: &str,
        format: OutputFormat,
    ) -> StractResult<()> {
        if self.tasks.start_entry(task_id, library).await? == WriteOutcome::TaskMissing {
            return Ok(());
        }
        let started = Instant::now();

        let converted = self.converters.convert(library, input, format).await;
        let elapsed = started.elapsed().as_secs_f64();

        let mut saved = false;
        let completion = match converted {
            Ok(content) => match content.into_bytes() {
                Ok(bytes) => match self.results.save(task_id, library, &bytes, format).await {
                    Ok(stored) => {
                        saved = true;
                        EntryCompletion::success(elapsed, stored.output_ref, stored.size_bytes)
                    }
                    Err(err) => EntryCompletion::failed(elapsed, format!("failed to store result: {err}")),
                },
                Err(err) => EntryCompletion::failed(elapsed, format!("failed to encode result: {err}")),
            },
            Err(err @ ProviderError::Timeout { .. }) => EntryCompletion::timed_out(elapsed, err.to_string()),
            Err(err) => EntryCompletion::failed(elapsed, err.to_string()),
        };

        let status = completion.status;
        match self.tasks.complete_entry(task_id, library, completion).await? {
            WriteOutcome::Applied => {
                info!(
                    task_id = %task_id,
                    library = %library,
                    status = %status,
                    duration_seconds = elapsed,
                    "Comparison entry finished"
                );
            }
            WriteOutcome::Ignored => {
                debug!(task_id = %task_id, library = %library, "Entry was already complete");
            }
            WriteOutcome::TaskMissing => {
                debug!(task_id = %task_id, library = %library, "Task deleted during conversion");
                if saved {
                    self.results.delete_task_results(task_id).await?;
                }
            }
        }
        Ok(())
    }
}
