#![cfg(unix)]

use std::path::Path;

use pdfstract::{
    config::{CommandProviderConfig, PrepareCommandConfig},
    error::ErrorKind,
    providers::{
        CommandConverter, ConvertedContent, Converter, LopdfConverter, OutputFormat,
        PreparationStatus,
    },
};
use tempfile::TempDir;

fn cat_config(prepare: Option<PrepareCommandConfig>) -> CommandProviderConfig {
    CommandProviderConfig {
        name: "cat-md".to_string(),
        program: "cat".to_string(),
        args: vec!["{input}".to_string()],
        output_file: None,
        native_format: OutputFormat::Markdown,
        supported_formats: vec![OutputFormat::Markdown, OutputFormat::Json, OutputFormat::Text],
        prepare,
    }
}

fn prepare_with(program: &str, ready_marker: Option<&Path>) -> PrepareCommandConfig {
    PrepareCommandConfig {
        program: program.to_string(),
        args: Vec::new(),
        ready_marker: ready_marker.map(Path::to_path_buf),
    }
}

#[tokio::test]
async fn command_output_is_rendered_per_format() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let input = dir.path().join("paper.pdf");
    std::fs::write(&input, "# Title\n\nSome **bold** and *quiet* words.")?;

    let converter = CommandConverter::new(cat_config(None));
    assert!(converter.available());
    assert_eq!(converter.preparation_status(), PreparationStatus::NotRequired);

    let markdown = converter.convert(&input, OutputFormat::Markdown).await?;
    assert_eq!(
        markdown,
        ConvertedContent::Text("# Title\n\nSome **bold** and *quiet* words.".to_string())
    );

    let text = converter.convert(&input, OutputFormat::Text).await?;
    assert_eq!(
        text,
        ConvertedContent::Text("Title\n\nSome bold and quiet words.".to_string())
    );

    let ConvertedContent::Json(json) = converter.convert(&input, OutputFormat::Json).await? else {
        panic!("json output expected");
    };
    assert_eq!(json["library"], "cat-md");
    assert_eq!(json["format"], "markdown");
    assert!(json["content"].as_str().is_some_and(|c| c.starts_with("# Title")));

    Ok(())
}

#[tokio::test]
async fn missing_program_is_unavailable() -> anyhow::Result<()> {
    let config = CommandProviderConfig {
        program: "pdfstract-no-such-tool".to_string(),
        ..cat_config(None)
    };
    let converter = CommandConverter::new(config);
    assert!(!converter.available());
    assert!(
        converter
            .unavailable_reason()
            .is_some_and(|reason| reason.contains("pdfstract-no-such-tool"))
    );

    let err = converter
        .convert(Path::new("/nonexistent.pdf"), OutputFormat::Text)
        .await
        .expect_err("nothing to run");
    assert_eq!(err.kind(), ErrorKind::Unavailable);

    Ok(())
}

#[tokio::test]
async fn prepare_records_a_ready_marker() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let marker = dir.path().join("models").join("ready");
    let config = cat_config(Some(prepare_with("true", Some(&marker))));

    let converter = CommandConverter::new(config.clone());
    assert!(converter.requires_preparation());
    assert_eq!(converter.preparation_status(), PreparationStatus::NotStarted);

    converter.prepare().await?;
    assert_eq!(converter.preparation_status(), PreparationStatus::Ready);
    assert!(marker.exists());

    let restarted = CommandConverter::new(config);
    assert_eq!(restarted.preparation_status(), PreparationStatus::Ready);

    Ok(())
}

#[tokio::test]
async fn unwritable_marker_does_not_fail_prepare() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let blocker = dir.path().join("occupied");
    std::fs::write(&blocker, b"file, not a directory")?;
    let marker = blocker.join("ready");

    let converter = CommandConverter::new(cat_config(Some(prepare_with("true", Some(&marker)))));
    converter.prepare().await?;
    assert_eq!(converter.preparation_status(), PreparationStatus::Ready);
    assert!(!marker.exists());

    Ok(())
}

#[tokio::test]
async fn failed_prepare_reports_the_error() -> anyhow::Result<()> {
    let converter = CommandConverter::new(cat_config(Some(prepare_with("false", None))));

    let err = converter.prepare().await.expect_err("prepare exits non-zero");
    assert_eq!(err.kind(), ErrorKind::PreparationFailed);
    assert_eq!(converter.preparation_status(), PreparationStatus::Failed);
    assert!(converter.preparation_error().is_some());

    Ok(())
}

#[tokio::test]
async fn lopdf_rejects_files_that_are_not_pdfs() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let input = dir.path().join("fake.pdf");
    std::fs::write(&input, b"plain text pretending to be a pdf")?;

    let err = LopdfConverter::new()
        .convert(&input, OutputFormat::Markdown)
        .await
        .expect_err("unparseable document");
    assert_eq!(err.kind(), ErrorKind::ConversionFailed);
    assert!(err.to_string().contains("failed to parse PDF"));

    Ok(())
}
