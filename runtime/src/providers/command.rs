use std::{
    env,
    path::{Path, PathBuf},
    process::Stdio,
    sync::{LazyLock, Mutex},
};

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Value, json};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::{config::CommandProviderConfig, utils::truncate_tail};

use super::{ConvertedContent, Converter, OutputFormat, PreparationStatus, ProviderError};

const MAX_ERROR_CHARS: usize = 800;

static HEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^#+\s+").expect("valid regex"));
static BOLD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*(.*?)\*\*").expect("valid regex"));
static ITALIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*(.*?)\*").expect("valid regex"));

#[derive(Debug, Clone)]
struct PreparationState {
    status: PreparationStatus,
    error: Option<String>,
}

/// Drives an extraction engine through its command line tool
/// (`marker_single`, `docling`, `mineru`, `paddleocr`, ...).
pub struct CommandConverter {
    config: CommandProviderConfig,
    program: Option<PathBuf>,
    preparation: Mutex<PreparationState>,
}

impl CommandConverter {
    pub fn new(config: CommandProviderConfig) -> Self {
        let program = resolve_program(&config.program);

        let status = match &config.prepare {
            None => PreparationStatus::NotRequired,
            Some(prepare) => match &prepare.ready_marker {
                Some(marker) if marker.exists() => PreparationStatus::Ready,
                _ => PreparationStatus::NotStarted,
            },
        };

        Self {
            config,
            program,
            preparation: Mutex::new(PreparationState {
                status,
                error: None,
            }),
        }
    }

    fn set_preparation(&self, status: PreparationStatus, error: Option<String>) {
        if let Ok(mut state) = self.preparation.lock() {
            state.status = status;
            state.error = error;
        }
    }

    fn render(&self, raw: String, format: OutputFormat) -> ConvertedContent {
        let native = self.config.native_format;
        match format {
            OutputFormat::Json => match serde_json::from_str::<Value>(&raw) {
                Ok(value) if native == OutputFormat::Json => ConvertedContent::Json(value),
                _ => ConvertedContent::Json(json!({
                    "content": raw,
                    "format": native.as_str(),
                    "library": self.config.name,
                })),
            },
            OutputFormat::Text if native == OutputFormat::Markdown => {
                ConvertedContent::Text(markdown_to_text(&raw))
            }
            _ => ConvertedContent::Text(raw),
        }
    }
}

#[async_trait]
impl Converter for CommandConverter {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn available(&self) -> bool {
        self.program.is_some()
    }

    fn unavailable_reason(&self) -> Option<String> {
        if self.program.is_some() {
            None
        } else {
            Some(format!("program '{}' not found on PATH", self.config.program))
        }
    }

    fn requires_preparation(&self) -> bool {
        self.config.prepare.is_some()
    }

    fn preparation_status(&self) -> PreparationStatus {
        self.preparation
            .lock()
            .map(|state| state.status)
            .unwrap_or(PreparationStatus::Failed)
    }

    fn preparation_error(&self) -> Option<String> {
        self.preparation
            .lock()
            .ok()
            .and_then(|state| state.error.clone())
    }

    async fn prepare(&self) -> Result<(), ProviderError> {
        let Some(prepare) = &self.config.prepare else {
            return Ok(());
        };

        let program = resolve_program(&prepare.program).ok_or_else(|| {
            ProviderError::PreparationFailed {
                name: self.config.name.clone(),
                message: format!("program '{}' not found on PATH", prepare.program),
            }
        })?;

        self.set_preparation(PreparationStatus::Downloading, None);
        info!(converter = %self.config.name, program = %program.display(), "Downloading converter models");

        let output = Command::new(&program)
            .args(&prepare.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        let failure = match output {
            Ok(output) if output.status.success() => None,
            Ok(output) => Some(format!(
                "{} exited with {}: {}",
                prepare.program,
                output.status,
                truncate_tail(&String::from_utf8_lossy(&output.stderr), MAX_ERROR_CHARS)
            )),
            Err(err) => Some(format!("failed to launch {}: {err}", prepare.program)),
        };

        match failure {
            None => {
                if let Some(marker) = &prepare.ready_marker {
                    if let Err(err) = write_ready_marker(marker).await {
                        warn!(
                            converter = %self.config.name,
                            marker = %marker.display(),
                            error = %err,
                            "Failed to record preparation; models will be fetched again after restart"
                        );
                    }
                }
                self.set_preparation(PreparationStatus::Ready, None);
                Ok(())
            }
            Some(message) => {
                self.set_preparation(PreparationStatus::Failed, Some(message.clone()));
                Err(ProviderError::PreparationFailed {
                    name: self.config.name.clone(),
                    message,
                })
            }
        }
    }

    fn supports_format(&self, format: OutputFormat) -> bool {
        self.config.supported_formats.contains(&format)
    }

    async fn convert(
        &self,
        file_path: &Path,
        format: OutputFormat,
    ) -> Result<ConvertedContent, ProviderError> {
        let program = self.program.as_ref().ok_or_else(|| ProviderError::Unavailable {
            name: self.config.name.clone(),
            reason: format!("program '{}' not found on PATH", self.config.program),
        })?;

        let output_dir = tempfile::TempDir::new().map_err(|err| {
            ProviderError::ConversionFailed(format!("failed to create output directory: {err}"))
        })?;
        let placeholders = Placeholders::new(file_path, output_dir.path(), format);
        let args: Vec<String> = self
            .config
            .args
            .iter()
            .map(|arg| placeholders.apply(arg))
            .collect();

        debug!(converter = %self.config.name, program = %program.display(), ?args, "Running converter");

        let output = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| {
                ProviderError::ConversionFailed(format!(
                    "failed to launch {}: {err}",
                    self.config.program
                ))
            })?;

        if !output.status.success() {
            return Err(ProviderError::ConversionFailed(format!(
                "{} exited with {}: {}",
                self.config.program,
                output.status,
                truncate_tail(&String::from_utf8_lossy(&output.stderr), MAX_ERROR_CHARS)
            )));
        }

        let raw = match &self.config.output_file {
            Some(template) => {
                let path = PathBuf::from(placeholders.apply(template));
                tokio::fs::read_to_string(&path).await.map_err(|err| {
                    ProviderError::ConversionFailed(format!(
                        "expected output {} was not produced: {err}",
                        path.display()
                    ))
                })?
            }
            None => String::from_utf8_lossy(&output.stdout).into_owned(),
        };

        Ok(self.render(raw, format))
    }
}

struct Placeholders {
    input: String,
    output_dir: String,
    stem: String,
    format: &'static str,
}

impl Placeholders {
    fn new(input: &Path, output_dir: &Path, format: OutputFormat) -> Self {
        Self {
            input: input.to_string_lossy().into_owned(),
            output_dir: output_dir.to_string_lossy().into_owned(),
            stem: input
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| "input".to_string()),
            format: format.as_str(),
        }
    }

    fn apply(&self, template: &str) -> String {
        template
            .replace("{input}", &self.input)
            .replace("{output_dir}", &self.output_dir)
            .replace("{stem}", &self.stem)
            .replace("{format}", self.format)
    }
}

async fn write_ready_marker(marker: &Path) -> std::io::Result<()> {
    if let Some(parent) = marker.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(marker, b"ready").await
}

/// Drops heading markers and emphasis, keeping the words.
pub fn markdown_to_text(markdown: &str) -> String {
    let text = HEADING.replace_all(markdown, "");
    let text = BOLD.replace_all(&text, "$1");
    ITALIC.replace_all(&text, "$1").into_owned()
}

fn resolve_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let paths = env::var_os("PATH")?;
    env::split_paths(&paths).find_map(|dir| {
        let full = dir.join(program);
        if full.is_file() {
            return Some(full);
        }
        if cfg!(windows) {
            let exe = dir.join(format!("{program}.exe"));
            if exe.is_file() {
                return Some(exe);
            }
        }
        None
    })
}
