use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use futures::{StreamExt, future::join_all, stream};
use regex::Regex;
use serde::Serialize;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::{
    error::{StractError, StractResult},
    providers::{ConverterRegistry, OutputFormat},
    storage::write_json_file,
};

pub const BATCH_REPORT: &str = "batch_report.json";
pub const BATCH_COMPARISON_REPORT: &str = "batch_comparison_report.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Success,
    Failed,
    /// Failed while `skip_errors` was set.
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchFileResult {
    pub status: BatchStatus,
    pub error: Option<String>,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchStatistics {
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Summary written to `batch_report.json` after a batch conversion.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub input_directory: PathBuf,
    pub output_directory: PathBuf,
    pub library: String,
    pub format: OutputFormat,
    pub timestamp: DateTime<Utc>,
    pub total_files: usize,
    pub statistics: BatchStatistics,
    pub files: BTreeMap<String, BatchFileResult>,
}

impl BatchReport {
    pub fn success_rate(&self) -> f64 {
        percentage(self.statistics.success, self.total_files)
    }
}

/// One batch conversion run with a single library.
#[derive(Debug, Clone)]
pub struct BatchConvert {
    pub library: String,
    pub format: OutputFormat,
    pub output_dir: PathBuf,
    pub parallel: usize,
    pub skip_errors: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LibraryOutcome {
    pub status: BatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary written to `batch_comparison_report.json`.
#[derive(Debug, Clone, Serialize)]
pub struct BatchComparisonReport {
    pub input_directory: PathBuf,
    pub libraries: Vec<String>,
    pub format: OutputFormat,
    pub timestamp: DateTime<Utc>,
    pub total_files: usize,
    /// File name → library → outcome.
    pub results: BTreeMap<String, BTreeMap<String, LibraryOutcome>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LibrarySummary {
    pub library: String,
    pub successes: usize,
    pub success_rate: f64,
    pub average_size_kb: f64,
}

impl BatchComparisonReport {
    /// Success rate and mean output size per library, in request order.
    pub fn summaries(&self) -> Vec<LibrarySummary> {
        self.libraries
            .iter()
            .map(|library| {
                let sizes: Vec<u64> = self
                    .results
                    .values()
                    .filter_map(|outcomes| outcomes.get(library))
                    .filter(|outcome| outcome.status == BatchStatus::Success)
                    .map(|outcome| outcome.size_bytes.unwrap_or_default())
                    .collect();
                let successes = sizes.len();
                let average_size_kb = if successes == 0 {
                    0.0
                } else {
                    sizes.iter().sum::<u64>() as f64 / successes as f64 / 1024.0
                };
                LibrarySummary {
                    library: library.clone(),
                    successes,
                    success_rate: percentage(successes, self.total_files),
                    average_size_kb,
                }
            })
            .collect()
    }
}

fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

/// Translates a shell-style file name pattern (`*`, `?`) into an anchored regex.
fn glob_regex(pattern: &str) -> StractResult<Regex> {
    let translated = regex::escape(pattern)
        .replace(r"\*", ".*")
        .replace(r"\?", ".");
    Regex::new(&format!("^{translated}$")).map_err(|err| {
        StractError::InvalidRequest(format!("invalid file pattern '{pattern}': {err}"))
    })
}

/// PDFs directly inside `dir` whose names match `pattern`, sorted by path.
pub async fn discover_pdfs(
    dir: &Path,
    pattern: &str,
    max_files: Option<usize>,
) -> StractResult<Vec<PathBuf>> {
    let matcher = glob_regex(pattern)?;
    let mut entries = fs::read_dir(dir).await.map_err(|err| {
        StractError::InvalidRequest(format!("cannot read directory {}: {err}", dir.display()))
    })?;

    let mut found = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|err| StractError::Orchestration(format!("directory listing failed: {err}")))?
    {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        let is_pdf = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
        if !is_pdf || !matcher.is_match(name) {
            continue;
        }
        if entry.file_type().await.is_ok_and(|kind| kind.is_file()) {
            found.push(path);
        }
    }

    found.sort();
    if let Some(limit) = max_files {
        found.truncate(limit);
    }
    debug!(dir = %dir.display(), pattern = %pattern, files = found.len(), "Discovered PDFs");
    Ok(found)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Converts every file with one library, at most `parallel` at a time, writing
/// `<stem>.<ext>` outputs and `batch_report.json` into the output directory.
pub async fn convert_batch(
    converters: &ConverterRegistry,
    input_dir: &Path,
    files: &[PathBuf],
    request: &BatchConvert,
) -> StractResult<BatchReport> {
    converters.get(&request.library)?;
    fs::create_dir_all(&request.output_dir).await.map_err(|err| {
        StractError::Orchestration(format!(
            "cannot create output directory {}: {err}",
            request.output_dir.display()
        ))
    })?;

    info!(
        library = %request.library,
        format = %request.format,
        files = files.len(),
        parallel = request.parallel,
        "Starting batch conversion"
    );

    let settled: Vec<(String, BatchFileResult)> = stream::iter(files)
        .map(|file| async move {
            let result = convert_file(converters, file, request).await;
            (file_name(file), result)
        })
        .buffer_unordered(request.parallel.max(1))
        .collect()
        .await;

    let mut statistics = BatchStatistics::default();
    let mut results = BTreeMap::new();
    for (name, result) in settled {
        match result.status {
            BatchStatus::Success => statistics.success += 1,
            BatchStatus::Failed => statistics.failed += 1,
            BatchStatus::Skipped => statistics.skipped += 1,
        }
        results.insert(name, result);
    }

    let report = BatchReport {
        input_directory: absolute(input_dir),
        output_directory: absolute(&request.output_dir),
        library: request.library.clone(),
        format: request.format,
        timestamp: Utc::now(),
        total_files: files.len(),
        statistics,
        files: results,
    };
    write_json_file(&request.output_dir.join(BATCH_REPORT), &report).await?;

    info!(
        library = %request.library,
        success = report.statistics.success,
        failed = report.statistics.failed,
        skipped = report.statistics.skipped,
        "Batch conversion finished"
    );
    Ok(report)
}

async fn convert_file(
    converters: &ConverterRegistry,
    file: &Path,
    request: &BatchConvert,
) -> BatchFileResult {
    let failure = |error: String| {
        warn!(
            file = %file.display(),
            library = %request.library,
            error = %error,
            "Batch conversion failed"
        );
        BatchFileResult {
            status: if request.skip_errors {
                BatchStatus::Skipped
            } else {
                BatchStatus::Failed
            },
            error: Some(error),
            size_bytes: 0,
        }
    };

    let bytes = match converters
        .convert(&request.library, file, request.format)
        .await
        .map_err(|err| err.to_string())
        .and_then(|content| content.into_bytes().map_err(|err| err.to_string()))
    {
        Ok(bytes) => bytes,
        Err(error) => return failure(error),
    };

    let stem = file
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let target = request
        .output_dir
        .join(format!("{stem}.{}", request.format.extension()));
    if let Err(err) = fs::write(&target, &bytes).await {
        return failure(format!("failed to write {}: {err}", target.display()));
    }

    debug!(
        file = %file.display(),
        output = %target.display(),
        bytes = bytes.len(),
        "Converted file"
    );
    BatchFileResult {
        status: BatchStatus::Success,
        error: None,
        size_bytes: bytes.len() as u64,
    }
}

/// Runs every library on every file and records output sizes, writing
/// `batch_comparison_report.json` into `output_dir`. Outputs are not kept.
pub async fn compare_batch(
    converters: &ConverterRegistry,
    input_dir: &Path,
    files: &[PathBuf],
    libraries: &[String],
    format: OutputFormat,
    output_dir: &Path,
) -> StractResult<BatchComparisonReport> {
    for library in libraries {
        converters.get(library)?;
    }
    fs::create_dir_all(output_dir).await.map_err(|err| {
        StractError::Orchestration(format!(
            "cannot create output directory {}: {err}",
            output_dir.display()
        ))
    })?;

    let mut results = BTreeMap::new();
    for file in files {
        info!(file = %file.display(), "Comparing libraries on file");
        let runs = libraries.iter().map(|library| async move {
            let outcome = match converters.convert(library, file, format).await {
                Ok(content) => match content.into_bytes() {
                    Ok(bytes) => LibraryOutcome {
                        status: BatchStatus::Success,
                        size_bytes: Some(bytes.len() as u64),
                        error: None,
                    },
                    Err(err) => LibraryOutcome {
                        status: BatchStatus::Failed,
                        size_bytes: None,
                        error: Some(err.to_string()),
                    },
                },
                Err(err) => {
                    warn!(
                        file = %file.display(),
                        library = %library,
                        error = %err,
                        "Conversion failed"
                    );
                    LibraryOutcome {
                        status: BatchStatus::Failed,
                        size_bytes: None,
                        error: Some(err.to_string()),
                    }
                }
            };
            (library.clone(), outcome)
        });
        let outcomes: BTreeMap<String, LibraryOutcome> = join_all(runs).await.into_iter().collect();
        results.insert(file_name(file), outcomes);
    }

    let report = BatchComparisonReport {
        input_directory: absolute(input_dir),
        libraries: libraries.to_vec(),
        format,
        timestamp: Utc::now(),
        total_files: files.len(),
        results,
    };
    write_json_file(&output_dir.join(BATCH_COMPARISON_REPORT), &report).await?;
    Ok(report)
}
