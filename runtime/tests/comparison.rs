use std::{
    io::{Cursor, Read},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use pdfstract::{
    AppState,
    chunkers::{ChunkParams, ChunkerRegistry},
    comparison::{
        BatchConvert, BatchStatus, ComparisonScheduler, SubmitComparison, Upload,
        batch::{BATCH_COMPARISON_REPORT, BATCH_REPORT, compare_batch, convert_batch, discover_pdfs},
        scheduler::RunOutcome,
    },
    config::AppConfig,
    error::ErrorKind,
    providers::{ConvertedContent, Converter, ConverterRegistry, OutputFormat, ProviderError},
    storage::{
        EntryStatus, FsResultStore, FsResultStoreConfig, JsonTaskStore, JsonTaskStoreConfig,
        ResultStore, StorageManager, TaskStatus, TaskStore,
    },
};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use zip::ZipArchive;

/// Test double with a scripted outcome.
struct Scripted {
    name: &'static str,
    delay: Duration,
    outcome: Result<String, String>,
}

impl Scripted {
    fn ok(name: &'static str, content: String) -> Arc<Self> {
        Arc::new(Self {
            name,
            delay: Duration::ZERO,
            outcome: Ok(content),
        })
    }

    fn failing(name: &'static str, message: &str) -> Arc<Self> {
        Arc::new(Self {
            name,
            delay: Duration::ZERO,
            outcome: Err(message.to_string()),
        })
    }

    fn slow(name: &'static str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name,
            delay,
            outcome: Ok("eventually".to_string()),
        })
    }
}

#[async_trait]
impl Converter for Scripted {
    fn name(&self) -> &str {
        self.name
    }

    fn available(&self) -> bool {
        true
    }

    async fn convert(
        &self,
        file_path: &Path,
        _format: OutputFormat,
    ) -> Result<ConvertedContent, ProviderError> {
        assert!(file_path.exists(), "staged input must exist while converting");
        tokio::time::sleep(self.delay).await;
        self.outcome
            .clone()
            .map(ConvertedContent::Text)
            .map_err(ProviderError::ConversionFailed)
    }
}

/// Test double that remembers the path it was asked to convert.
#[derive(Default)]
struct Recording {
    seen: Mutex<Option<PathBuf>>,
}

impl Recording {
    fn seen(&self) -> Option<PathBuf> {
        self.seen.lock().expect("recording lock").clone()
    }
}

#[async_trait]
impl Converter for Recording {
    fn name(&self) -> &str {
        "rec"
    }

    fn available(&self) -> bool {
        true
    }

    async fn convert(
        &self,
        file_path: &Path,
        _format: OutputFormat,
    ) -> Result<ConvertedContent, ProviderError> {
        *self.seen.lock().expect("recording lock") = Some(file_path.to_path_buf());
        Ok(ConvertedContent::Text("recorded".to_string()))
    }
}

struct Harness {
    _dir: TempDir,
    state: Arc<AppState>,
    recorder: Arc<Recording>,
    _storage: StorageManager,
}

async fn harness(timeout: Duration) -> anyhow::Result<Harness> {
    let dir = TempDir::new()?;
    let config = AppConfig {
        working_dir: dir.path().to_path_buf(),
        ..AppConfig::default()
    };

    let mut converters = ConverterRegistry::new(timeout);
    converters.register(Scripted::ok("a", "a".repeat(100)));
    converters.register(Scripted::failing("b", "engine crashed"));
    converters.register(Scripted::slow("slow", Duration::from_secs(30)));
    converters.register(Scripted::ok(
        "md",
        "# Heading\n\nFirst paragraph here. Second sentence follows.".to_string(),
    ));
    let recorder = Arc::new(Recording::default());
    converters.register(recorder.clone());

    let chunkers = ChunkerRegistry::with_defaults(Duration::from_secs(10));
    let (state, storage) =
        AppState::with_registries(config, Arc::new(converters), Arc::new(chunkers)).await?;
    Ok(Harness {
        _dir: dir,
        state,
        recorder,
        _storage: storage,
    })
}

fn pdf(name: &str) -> Upload {
    Upload::new(name, b"%PDF-1.4\n%fake\n".to_vec())
}

fn request(libraries: &[&str]) -> SubmitComparison {
    SubmitComparison {
        upload: pdf("paper.pdf"),
        libraries: libraries.iter().map(|name| name.to_string()).collect(),
        format: OutputFormat::Markdown,
    }
}

#[tokio::test]
async fn mixed_outcomes_complete_the_task() -> anyhow::Result<()> {
    let harness = harness(Duration::from_secs(5)).await?;
    let service = &harness.state.comparisons;

    let submitted = service.submit(request(&["a", "b"])).await?;
    assert_eq!(submitted.task.status, TaskStatus::Pending);
    assert_eq!(submitted.task.filename, "paper.pdf");

    let snapshot = service
        .wait(&submitted.task.task_id, Duration::from_millis(20))
        .await?;
    assert_eq!(snapshot.task.status, TaskStatus::Completed);
    assert!(snapshot.task.error_message.is_none());

    let a = snapshot.entry("a").expect("entry a");
    assert_eq!(a.status, EntryStatus::Success);
    assert_eq!(a.output_size_bytes, Some(100));
    assert!(a.output_ref.as_deref().is_some_and(|r| r.starts_with("result-")));

    let b = snapshot.entry("b").expect("entry b");
    assert_eq!(b.status, EntryStatus::Failed);
    assert!(b.error_message.as_deref().is_some_and(|m| m.contains("engine crashed")));

    let stored = service.result(&snapshot.task.task_id, "a").await?;
    assert_eq!(stored.bytes, "a".repeat(100).into_bytes());
    let missing = service
        .result(&snapshot.task.task_id, "b")
        .await
        .expect_err("failed entries have no result");
    assert_eq!(missing.kind(), ErrorKind::NotFound);

    let (name, archive) = service.bundle(&snapshot.task.task_id).await?;
    assert_eq!(name, format!("comparison-{}.zip", snapshot.task.task_id));
    let mut zip = ZipArchive::new(Cursor::new(archive))?;
    let mut names: Vec<String> = zip.file_names().map(str::to_string).collect();
    names.sort();
    assert_eq!(names, ["a.md", "metadata.json"]);
    let mut content = String::new();
    zip.by_name("a.md")?.read_to_string(&mut content)?;
    assert_eq!(content.len(), 100);

    Ok(())
}

#[tokio::test]
async fn timeout_is_isolated_to_its_entry() -> anyhow::Result<()> {
    let harness = harness(Duration::from_millis(200)).await?;
    let service = &harness.state.comparisons;

    let submitted = service.submit(request(&["slow", "a"])).await?;
    let snapshot = service
        .wait(&submitted.task.task_id, Duration::from_millis(20))
        .await?;

    assert_eq!(snapshot.task.status, TaskStatus::Completed);
    let slow = snapshot.entry("slow").expect("entry slow");
    assert_eq!(slow.status, EntryStatus::Timeout);
    assert!(slow.output_ref.is_none());
    assert!(slow.error_message.is_some());
    assert_eq!(
        snapshot.entry("a").map(|entry| entry.status),
        Some(EntryStatus::Success)
    );

    Ok(())
}

#[tokio::test]
async fn deleting_a_running_task_cancels_it() -> anyhow::Result<()> {
    let harness = harness(Duration::from_secs(60)).await?;
    let service = &harness.state.comparisons;

    let submitted = service.submit(request(&["slow"])).await?;
    let task_id = submitted.task.task_id;

    let started = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let snapshot = service.task(&task_id).await?;
            if snapshot
                .entry("slow")
                .is_some_and(|entry| entry.status == EntryStatus::Running)
            {
                return anyhow::Ok(());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(matches!(started, Ok(Ok(()))), "entry never started");

    assert!(service.delete(&task_id).await?);
    let gone = service.task(&task_id).await.expect_err("task removed");
    assert_eq!(gone.kind(), ErrorKind::NotFound);

    assert!(!service.delete(&task_id).await?);
    assert!(!service.delete("task-unknown").await?);

    Ok(())
}

#[tokio::test]
async fn submit_rejects_invalid_requests() -> anyhow::Result<()> {
    let harness = harness(Duration::from_secs(5)).await?;
    let service = &harness.state.comparisons;
    assert_eq!(service.max_libraries(), 3);

    let too_many = service
        .submit(request(&["a", "b", "md", "slow"]))
        .await
        .expect_err("over the library cap");
    assert_eq!(too_many.kind(), ErrorKind::InvalidParameter);

    let none = service
        .submit(request(&[" ", ""]))
        .await
        .expect_err("no libraries");
    assert_eq!(none.kind(), ErrorKind::InvalidParameter);

    let mut not_pdf = request(&["a"]);
    not_pdf.upload = Upload::new("notes.txt", b"hello".to_vec());
    let err = service.submit(not_pdf).await.expect_err("not a pdf");
    assert!(err.to_string().contains("Only PDF files are supported"));

    let mut empty = request(&["a"]);
    empty.upload = Upload::new("empty.pdf", Vec::new());
    let err = service.submit(empty).await.expect_err("empty upload");
    assert_eq!(err.kind(), ErrorKind::InvalidParameter);

    let listed = service.list(1, 20).await?;
    assert!(listed.tasks.is_empty());
    assert_eq!(listed.total, 0);

    Ok(())
}

#[tokio::test]
async fn duplicate_libraries_are_collapsed() -> anyhow::Result<()> {
    let harness = harness(Duration::from_secs(5)).await?;
    let service = &harness.state.comparisons;

    let submitted = service.submit(request(&["a", "a, a", "b"])).await?;
    let snapshot = service
        .wait(&submitted.task.task_id, Duration::from_millis(20))
        .await?;
    let names: Vec<&str> = snapshot
        .entries
        .iter()
        .map(|entry| entry.library_name.as_str())
        .collect();
    assert_eq!(names, ["a", "b"]);

    Ok(())
}

#[tokio::test]
async fn convert_and_chunk_uses_converted_text() -> anyhow::Result<()> {
    let harness = harness(Duration::from_secs(5)).await?;
    let service = &harness.state.comparisons;

    let mut params = ChunkParams::new();
    params.insert("chunk_size".to_string(), json!(30));
    params.insert("min_characters_per_sentence".to_string(), json!(1));

    let result = service
        .convert_and_chunk(
            &pdf("paper.pdf"),
            "md",
            OutputFormat::Markdown,
            "sentence",
            &params,
        )
        .await?;
    assert_eq!(result.conversion.library, "md");
    assert!(result.conversion.duration_seconds >= 0.0);
    assert_eq!(result.chunking.chunker_name(), "sentence");
    assert!(result.chunking.total_chunks() >= 2);
    let text = result.conversion.content.as_text().into_owned();
    for chunk in result.chunking.chunks() {
        let span: String = text
            .chars()
            .skip(chunk.start_index)
            .take(chunk.end_index - chunk.start_index)
            .collect();
        assert_eq!(span, chunk.text);
    }

    let unknown_chunker = service
        .convert_and_chunk(&pdf("paper.pdf"), "md", OutputFormat::Markdown, "nope", &params)
        .await
        .expect_err("unknown chunker");
    assert_eq!(unknown_chunker.kind(), ErrorKind::NotFound);

    let unknown_library = service
        .convert_upload(&pdf("paper.pdf"), "nope", OutputFormat::Markdown)
        .await
        .expect_err("unknown library");
    assert_eq!(unknown_library.kind(), ErrorKind::NotFound);

    Ok(())
}

#[tokio::test]
async fn unregistered_library_fails_only_its_entry() -> anyhow::Result<()> {
    let harness = harness(Duration::from_secs(5)).await?;
    let service = &harness.state.comparisons;

    let submitted = service.submit(request(&["a", "ghost"])).await?;
    let snapshot = service
        .wait(&submitted.task.task_id, Duration::from_millis(20))
        .await?;

    assert_eq!(snapshot.task.status, TaskStatus::Completed);
    assert_eq!(
        snapshot.entry("a").map(|entry| entry.status),
        Some(EntryStatus::Success)
    );
    let ghost = snapshot.entry("ghost").expect("entry ghost");
    assert_eq!(ghost.status, EntryStatus::Failed);
    assert!(ghost.output_ref.is_none());
    assert!(ghost.error_message.as_deref().is_some_and(|m| m.contains("not found")));

    Ok(())
}

#[tokio::test]
async fn staged_input_is_removed_once_the_run_settles() -> anyhow::Result<()> {
    let harness = harness(Duration::from_secs(5)).await?;
    let service = &harness.state.comparisons;

    let submitted = service.submit(request(&["rec"])).await?;
    let snapshot = service
        .wait(&submitted.task.task_id, Duration::from_millis(20))
        .await?;
    assert_eq!(snapshot.task.status, TaskStatus::Completed);

    let staged = harness.recorder.seen().expect("converter saw the staged file");
    assert_eq!(staged.extension().and_then(|ext| ext.to_str()), Some("pdf"));
    // The run drops its staged file before recording the final status.
    assert!(!staged.exists());

    Ok(())
}

#[tokio::test]
async fn missing_input_fails_the_task_and_its_entries() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let tasks = Arc::new(JsonTaskStore::new(JsonTaskStoreConfig::new(dir.path())));
    tasks.initialize().await?;
    let results = Arc::new(FsResultStore::new(FsResultStoreConfig::new(dir.path())));
    results.initialize().await?;

    let mut converters = ConverterRegistry::new(Duration::from_secs(5));
    converters.register(Scripted::ok("a", "content".to_string()));
    converters.register(Scripted::ok("c", "content".to_string()));
    let scheduler = ComparisonScheduler::new(Arc::new(converters), tasks.clone(), results.clone());

    tasks
        .create_task("task-gone", "paper.pdf", 10, OutputFormat::Markdown)
        .await?;
    let input = tempfile::NamedTempFile::new()?.into_temp_path();
    std::fs::remove_file(&input)?;

    let libraries = vec!["a".to_string(), "c".to_string()];
    let outcome = scheduler
        .run_comparison(
            "task-gone",
            input,
            &libraries,
            OutputFormat::Markdown,
            CancellationToken::new(),
        )
        .await;
    assert_eq!(outcome, RunOutcome::Failed);

    let snapshot = tasks.get_task_with_entries("task-gone").await?;
    assert_eq!(snapshot.task.status, TaskStatus::Failed);
    assert!(snapshot.task.completed_at.is_some());
    assert!(
        snapshot
            .task
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("cannot read input file"))
    );
    assert_eq!(snapshot.entries.len(), 2);
    for entry in &snapshot.entries {
        assert_eq!(entry.status, EntryStatus::Failed);
        assert!(entry.output_ref.is_none());
        assert!(entry.error_message.as_deref().is_some_and(|m| m.contains("aborted")));
    }

    Ok(())
}

fn write_inputs(dir: &Path) -> anyhow::Result<()> {
    for name in ["a1.pdf", "a2.pdf", "b1.pdf"] {
        std::fs::write(dir.join(name), b"%PDF-1.4\n%fake\n")?;
    }
    std::fs::write(dir.join("notes.txt"), b"not a pdf")?;
    std::fs::create_dir(dir.join("nested.pdf"))?;
    Ok(())
}

fn names(files: &[PathBuf]) -> Vec<String> {
    files
        .iter()
        .filter_map(|file| file.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}

#[tokio::test]
async fn discovery_filters_by_pattern_and_limit() -> anyhow::Result<()> {
    let input = TempDir::new()?;
    write_inputs(input.path())?;

    let all = discover_pdfs(input.path(), "*.pdf", None).await?;
    assert_eq!(names(&all), ["a1.pdf", "a2.pdf", "b1.pdf"]);

    let prefixed = discover_pdfs(input.path(), "a*.pdf", None).await?;
    assert_eq!(names(&prefixed), ["a1.pdf", "a2.pdf"]);

    let limited = discover_pdfs(input.path(), "*.pdf", Some(1)).await?;
    assert_eq!(names(&limited), ["a1.pdf"]);

    let text = discover_pdfs(input.path(), "*.txt", None).await?;
    assert!(text.is_empty());

    let missing = discover_pdfs(&input.path().join("absent"), "*.pdf", None)
        .await
        .expect_err("directory must exist");
    assert_eq!(missing.kind(), ErrorKind::InvalidParameter);

    Ok(())
}

#[tokio::test]
async fn batch_writes_outputs_and_a_report() -> anyhow::Result<()> {
    let harness = harness(Duration::from_secs(5)).await?;
    let converters = &harness.state.converters;
    let input = TempDir::new()?;
    write_inputs(input.path())?;
    let files = discover_pdfs(input.path(), "*.pdf", None).await?;

    let out = input.path().join("out");
    let request = BatchConvert {
        library: "a".to_string(),
        format: OutputFormat::Markdown,
        output_dir: out.clone(),
        parallel: 2,
        skip_errors: false,
    };
    let report = convert_batch(converters, input.path(), &files, &request).await?;
    assert_eq!(report.total_files, 3);
    assert_eq!(report.statistics.success, 3);
    assert_eq!(report.success_rate(), 100.0);
    assert_eq!(std::fs::read_to_string(out.join("a1.md"))?, "a".repeat(100));
    assert!(out.join("b1.md").exists());

    let saved: Value = serde_json::from_slice(&std::fs::read(out.join(BATCH_REPORT))?)?;
    assert_eq!(saved["library"], "a");
    assert_eq!(saved["format"], "markdown");
    assert_eq!(saved["statistics"]["success"], 3);
    assert_eq!(saved["files"]["a2.pdf"]["status"], "success");
    assert_eq!(saved["files"]["a2.pdf"]["size_bytes"], 100);

    let failing = BatchConvert {
        library: "b".to_string(),
        output_dir: input.path().join("failed"),
        ..request.clone()
    };
    let report = convert_batch(converters, input.path(), &files, &failing).await?;
    assert_eq!(report.statistics.failed, 3);
    assert_eq!(report.statistics.skipped, 0);
    let entry = &report.files["b1.pdf"];
    assert_eq!(entry.status, BatchStatus::Failed);
    assert!(entry.error.as_deref().is_some_and(|m| m.contains("engine crashed")));

    let skipping = BatchConvert {
        skip_errors: true,
        ..failing
    };
    let report = convert_batch(converters, input.path(), &files, &skipping).await?;
    assert_eq!(report.statistics.skipped, 3);
    assert_eq!(report.statistics.failed, 0);

    let unknown = BatchConvert {
        library: "ghost".to_string(),
        ..request
    };
    let err = convert_batch(converters, input.path(), &files, &unknown)
        .await
        .expect_err("unknown library");
    assert_eq!(err.kind(), ErrorKind::NotFound);

    Ok(())
}

#[tokio::test]
async fn batch_compare_summarises_each_library() -> anyhow::Result<()> {
    let harness = harness(Duration::from_secs(5)).await?;
    let converters = &harness.state.converters;
    let input = TempDir::new()?;
    write_inputs(input.path())?;
    let files = discover_pdfs(input.path(), "*.pdf", Some(2)).await?;

    let out = input.path().join("report");
    let libraries = vec!["a".to_string(), "b".to_string()];
    let report = compare_batch(
        converters,
        input.path(),
        &files,
        &libraries,
        OutputFormat::Markdown,
        &out,
    )
    .await?;

    assert_eq!(report.total_files, 2);
    assert_eq!(report.results["a1.pdf"]["a"].size_bytes, Some(100));
    assert_eq!(report.results["a1.pdf"]["b"].status, BatchStatus::Failed);

    let summaries = report.summaries();
    assert_eq!(summaries[0].library, "a");
    assert_eq!(summaries[0].successes, 2);
    assert_eq!(summaries[0].success_rate, 100.0);
    assert!((summaries[0].average_size_kb - 100.0 / 1024.0).abs() < 1e-9);
    assert_eq!(summaries[1].successes, 0);
    assert_eq!(summaries[1].average_size_kb, 0.0);

    let saved: Value = serde_json::from_slice(&std::fs::read(out.join(BATCH_COMPARISON_REPORT))?)?;
    assert_eq!(saved["total_files"], 2);
    assert_eq!(saved["results"]["a2.pdf"]["a"]["status"], "success");
    assert!(saved["results"]["a2.pdf"]["b"]["error"].is_string());

    let err = compare_batch(
        converters,
        input.path(),
        &files,
        &["a".to_string(), "ghost".to_string()],
        OutputFormat::Markdown,
        &out,
    )
    .await
    .expect_err("unknown library");
    assert_eq!(err.kind(), ErrorKind::NotFound);

    Ok(())
}
