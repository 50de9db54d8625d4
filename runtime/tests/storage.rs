use std::io::{Cursor, Read};

use pdfstract::{
    providers::OutputFormat,
    storage::{
        EntryCompletion, EntryStatus, FsResultStore, FsResultStoreConfig, JsonTaskStore,
        JsonTaskStoreConfig, ResultStore, StoreError, TaskStatus, TaskStore, WriteOutcome,
    },
};
use tempfile::TempDir;
use zip::ZipArchive;

fn temp_working_dir() -> TempDir {
    TempDir::new().expect("create temp dir")
}

async fn open_tasks(dir: &TempDir) -> anyhow::Result<JsonTaskStore> {
    let store = JsonTaskStore::new(JsonTaskStoreConfig::new(dir.path()));
    store.initialize().await?;
    Ok(store)
}

async fn open_results(dir: &TempDir) -> anyhow::Result<FsResultStore> {
    let store = FsResultStore::new(FsResultStoreConfig::new(dir.path()));
    store.initialize().await?;
    Ok(store)
}

fn libraries(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

#[tokio::test]
async fn task_lifecycle_persists_across_reopen() -> anyhow::Result<()> {
    let dir = temp_working_dir();
    let store = open_tasks(&dir).await?;

    let task = store
        .create_task("task-1", "paper.pdf", 1024, OutputFormat::Markdown)
        .await?;
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(task.started_at.is_none());

    assert_eq!(
        store.add_entries("task-1", &libraries(&["a", "b"])).await?,
        WriteOutcome::Applied
    );
    assert_eq!(store.start_task("task-1").await?, WriteOutcome::Applied);
    assert_eq!(store.start_entry("task-1", "a").await?, WriteOutcome::Applied);
    assert_eq!(store.start_entry("task-1", "b").await?, WriteOutcome::Applied);

    store
        .complete_entry(
            "task-1",
            "a",
            EntryCompletion::success(1.5, "result-abc".to_string(), 100),
        )
        .await?;
    store
        .complete_entry("task-1", "b", EntryCompletion::failed(0.2, "boom"))
        .await?;
    assert_eq!(
        store.complete_task("task-1", TaskStatus::Completed).await?,
        WriteOutcome::Applied
    );

    let reopened = open_tasks(&dir).await?;
    let snapshot = reopened.get_task_with_entries("task-1").await?;
    assert_eq!(snapshot.task.status, TaskStatus::Completed);
    assert!(snapshot.task.completed_at.is_some());
    assert!(snapshot.task.total_duration_seconds.is_some());
    assert_eq!(snapshot.entries.len(), 2);

    let a = snapshot.entry("a").expect("entry a");
    assert_eq!(a.status, EntryStatus::Success);
    assert_eq!(a.output_ref.as_deref(), Some("result-abc"));
    assert_eq!(a.output_size_bytes, Some(100));

    let b = snapshot.entry("b").expect("entry b");
    assert_eq!(b.status, EntryStatus::Failed);
    assert!(b.output_ref.is_none());
    assert_eq!(b.error_message.as_deref(), Some("boom"));

    Ok(())
}

#[tokio::test]
async fn entry_completion_is_write_once() -> anyhow::Result<()> {
    let dir = temp_working_dir();
    let store = open_tasks(&dir).await?;
    store
        .create_task("task-1", "paper.pdf", 10, OutputFormat::Text)
        .await?;
    store.add_entries("task-1", &libraries(&["a"])).await?;
    store.start_entry("task-1", "a").await?;

    let first = store
        .complete_entry("task-1", "a", EntryCompletion::timed_out(300.0, "timed out"))
        .await?;
    let second = store
        .complete_entry(
            "task-1",
            "a",
            EntryCompletion::success(1.0, "result-late".to_string(), 5),
        )
        .await?;
    assert_eq!(first, WriteOutcome::Applied);
    assert_eq!(second, WriteOutcome::Ignored);

    let snapshot = store.get_task_with_entries("task-1").await?;
    let entry = snapshot.entry("a").expect("entry a");
    assert_eq!(entry.status, EntryStatus::Timeout);
    assert!(entry.output_ref.is_none());

    Ok(())
}

#[tokio::test]
async fn completion_must_be_consistent() -> anyhow::Result<()> {
    let dir = temp_working_dir();
    let store = open_tasks(&dir).await?;
    store
        .create_task("task-1", "paper.pdf", 10, OutputFormat::Text)
        .await?;
    store.add_entries("task-1", &libraries(&["a"])).await?;

    let mut missing_error = EntryCompletion::failed(1.0, "x");
    missing_error.error_message = None;
    let err = store
        .complete_entry("task-1", "a", missing_error)
        .await
        .expect_err("failure without a message is rejected");
    assert!(matches!(err, StoreError::InvalidTransition(_)));

    let err = store
        .complete_task("task-1", TaskStatus::Completed)
        .await
        .expect_err("open entries block completion");
    assert!(matches!(err, StoreError::InvalidTransition(_)));

    Ok(())
}

#[tokio::test]
async fn failing_a_task_resolves_open_entries() -> anyhow::Result<()> {
    let dir = temp_working_dir();
    let store = open_tasks(&dir).await?;
    store
        .create_task("task-1", "paper.pdf", 10, OutputFormat::Markdown)
        .await?;
    store.add_entries("task-1", &libraries(&["a", "b"])).await?;
    store.start_entry("task-1", "a").await?;
    store
        .complete_entry(
            "task-1",
            "a",
            EntryCompletion::success(0.5, "result-a".to_string(), 3),
        )
        .await?;

    assert_eq!(
        store.fail_task("task-1", "disk full").await?,
        WriteOutcome::Applied
    );
    assert_eq!(
        store.complete_task("task-1", TaskStatus::Completed).await?,
        WriteOutcome::Ignored
    );

    let snapshot = store.get_task_with_entries("task-1").await?;
    assert_eq!(snapshot.task.status, TaskStatus::Failed);
    assert_eq!(snapshot.task.error_message.as_deref(), Some("disk full"));
    assert_eq!(snapshot.entry("a").map(|e| e.status), Some(EntryStatus::Success));
    let b = snapshot.entry("b").expect("entry b");
    assert_eq!(b.status, EntryStatus::Failed);
    assert!(b.error_message.as_deref().is_some_and(|m| m.contains("disk full")));

    Ok(())
}

#[tokio::test]
async fn writes_to_deleted_tasks_report_missing() -> anyhow::Result<()> {
    let dir = temp_working_dir();
    let store = open_tasks(&dir).await?;
    store
        .create_task("task-1", "paper.pdf", 10, OutputFormat::Markdown)
        .await?;
    store.add_entries("task-1", &libraries(&["a"])).await?;

    assert!(store.delete_task("task-1").await?);
    assert!(!store.delete_task("task-1").await?);
    assert!(!store.delete_task("never-existed").await?);

    assert_eq!(
        store.start_entry("task-1", "a").await?,
        WriteOutcome::TaskMissing
    );
    assert_eq!(
        store
            .complete_entry("task-1", "a", EntryCompletion::failed(0.1, "late"))
            .await?,
        WriteOutcome::TaskMissing
    );
    assert!(matches!(
        store.get_task_with_entries("task-1").await,
        Err(StoreError::TaskNotFound(_))
    ));

    Ok(())
}

#[tokio::test]
async fn list_pages_newest_first() -> anyhow::Result<()> {
    let dir = temp_working_dir();
    let store = open_tasks(&dir).await?;
    for index in 0..5 {
        store
            .create_task(
                &format!("task-{index}"),
                "paper.pdf",
                10,
                OutputFormat::Markdown,
            )
            .await?;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let first = store.list_tasks(1, 2).await?;
    assert_eq!(first.total, 5);
    assert_eq!((first.page, first.page_size), (1, 2));
    let ids: Vec<&str> = first.tasks.iter().map(|s| s.task.task_id.as_str()).collect();
    assert_eq!(ids, ["task-4", "task-3"]);

    let last = store.list_tasks(3, 2).await?;
    assert_eq!(last.tasks.len(), 1);
    assert_eq!(last.tasks[0].task.task_id, "task-0");

    let beyond = store.list_tasks(10, 2).await?;
    assert!(beyond.tasks.is_empty());
    assert_eq!(beyond.total, 5);

    Ok(())
}

#[tokio::test]
async fn list_reports_the_paging_it_applied() -> anyhow::Result<()> {
    let dir = temp_working_dir();
    let store = open_tasks(&dir).await?;
    store
        .create_task("only", "paper.pdf", 10, OutputFormat::Markdown)
        .await?;

    let far = store.list_tasks(usize::MAX, 200).await?;
    assert!(far.tasks.is_empty());
    assert_eq!(far.total, 1);
    assert_eq!(far.page, usize::MAX);

    let clamped = store.list_tasks(0, 1000).await?;
    assert_eq!((clamped.page, clamped.page_size), (1, 200));
    assert_eq!(clamped.tasks.len(), 1);

    let smallest = store.list_tasks(1, 0).await?;
    assert_eq!(smallest.page_size, 1);

    Ok(())
}

#[tokio::test]
async fn failed_write_leaves_memory_unchanged() -> anyhow::Result<()> {
    let dir = temp_working_dir();
    let store = open_tasks(&dir).await?;
    store
        .create_task("task-1", "paper.pdf", 10, OutputFormat::Markdown)
        .await?;

    // A directory in place of the JSON file makes every later write fail.
    std::fs::remove_file(store.file_path())?;
    std::fs::create_dir(store.file_path())?;
    std::fs::write(store.file_path().join("occupied"), b"x")?;

    assert!(store.start_task("task-1").await.is_err());
    let snapshot = store.get_task_with_entries("task-1").await?;
    assert_eq!(snapshot.task.status, TaskStatus::Pending);
    assert!(snapshot.task.started_at.is_none());

    assert!(store.delete_task("task-1").await.is_err());
    assert!(store.get_task_with_entries("task-1").await.is_ok());

    assert!(
        store
            .create_task("task-2", "other.pdf", 10, OutputFormat::Markdown)
            .await
            .is_err()
    );
    assert_eq!(store.list_tasks(1, 20).await?.total, 1);

    Ok(())
}

#[tokio::test]
async fn restart_fails_interrupted_tasks() -> anyhow::Result<()> {
    let dir = temp_working_dir();
    {
        let store = open_tasks(&dir).await?;
        store
            .create_task("pending", "a.pdf", 1, OutputFormat::Markdown)
            .await?;
        store
            .create_task("running", "b.pdf", 1, OutputFormat::Markdown)
            .await?;
        store.add_entries("running", &libraries(&["a"])).await?;
        store.start_entry("running", "a").await?;
        store
            .create_task("done", "c.pdf", 1, OutputFormat::Markdown)
            .await?;
        store.complete_task("done", TaskStatus::Completed).await?;
    }

    let store = open_tasks(&dir).await?;
    for task_id in ["pending", "running"] {
        let snapshot = store.get_task_with_entries(task_id).await?;
        assert_eq!(snapshot.task.status, TaskStatus::Failed, "{task_id}");
        assert!(snapshot.task.error_message.is_some());
        assert!(snapshot.entries.iter().all(|e| e.status.is_terminal()));
    }
    let done = store.get_task_with_entries("done").await?;
    assert_eq!(done.task.status, TaskStatus::Completed);
    assert!(done.task.error_message.is_none());

    Ok(())
}

#[tokio::test]
async fn result_store_is_write_once_and_scoped_per_task() -> anyhow::Result<()> {
    let dir = temp_working_dir();
    let results = open_results(&dir).await?;

    let stored = results
        .save("task-1", "a", b"# Title", OutputFormat::Markdown)
        .await?;
    assert!(stored.output_ref.starts_with("result-"));
    assert_eq!(stored.size_bytes, 7);
    assert!(stored.path.ends_with("results/task-1/a.md"));

    let again = results
        .save("task-1", "a", b"other", OutputFormat::Markdown)
        .await;
    assert!(matches!(again, Err(StoreError::ResultExists { .. })));

    assert_eq!(
        results.get("task-1", "a", OutputFormat::Markdown).await?,
        b"# Title"
    );
    assert!(matches!(
        results.get("task-1", "b", OutputFormat::Markdown).await,
        Err(StoreError::ResultNotFound { .. })
    ));
    assert!(matches!(
        results.save("../escape", "a", b"x", OutputFormat::Text).await,
        Err(StoreError::InvalidKey(_))
    ));

    results.delete_task_results("task-1").await?;
    results.delete_task_results("task-1").await?;
    assert!(matches!(
        results.get("task-1", "a", OutputFormat::Markdown).await,
        Err(StoreError::ResultNotFound { .. })
    ));

    Ok(())
}

#[tokio::test]
async fn bundle_holds_successful_results_and_metadata() -> anyhow::Result<()> {
    let dir = temp_working_dir();
    let tasks = open_tasks(&dir).await?;
    let results = open_results(&dir).await?;

    tasks
        .create_task("task-1", "paper.pdf", 64, OutputFormat::Markdown)
        .await?;
    tasks.add_entries("task-1", &libraries(&["a", "b"])).await?;
    let stored = results
        .save("task-1", "a", b"# From a", OutputFormat::Markdown)
        .await?;
    tasks
        .complete_entry(
            "task-1",
            "a",
            EntryCompletion::success(0.3, stored.output_ref, stored.size_bytes),
        )
        .await?;
    tasks
        .complete_entry("task-1", "b", EntryCompletion::failed(0.1, "crashed"))
        .await?;
    tasks.complete_task("task-1", TaskStatus::Completed).await?;

    let snapshot = tasks.get_task_with_entries("task-1").await?;
    let archive = results.bundle(&snapshot).await?;
    let mut zip = ZipArchive::new(Cursor::new(archive))?;

    let mut names: Vec<String> = zip.file_names().map(str::to_string).collect();
    names.sort();
    assert_eq!(names, ["a.md", "metadata.json"]);

    let mut content = String::new();
    zip.by_name("a.md")?.read_to_string(&mut content)?;
    assert_eq!(content, "# From a");

    let mut metadata = String::new();
    zip.by_name("metadata.json")?.read_to_string(&mut metadata)?;
    let metadata: serde_json::Value = serde_json::from_str(&metadata)?;
    assert_eq!(metadata["task_id"], "task-1");
    assert_eq!(metadata["status"], "completed");
    assert_eq!(metadata["entries"].as_array().map(Vec::len), Some(2));

    Ok(())
}
