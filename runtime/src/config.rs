use std::{env, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::fs;
use tracing::info;

use crate::providers::OutputFormat;

pub const DEFAULT_CONFIG_PATH: &str = "config/app.yaml";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
    #[serde(default)]
    pub comparison: ComparisonConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            working_dir: default_working_dir(),
            comparison: ComparisonConfig::default(),
            providers: ProvidersConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_upload_mb: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ComparisonConfig {
    /// Upper bound on libraries accepted by a single comparison task.
    pub max_libraries: usize,
    pub conversion_timeout_secs: u64,
    pub chunk_timeout_secs: u64,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            max_libraries: 3,
            conversion_timeout_secs: 300,
            chunk_timeout_secs: 60,
        }
    }
}

impl ComparisonConfig {
    pub fn conversion_timeout(&self) -> Duration {
        Duration::from_secs(self.conversion_timeout_secs)
    }

    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_secs(self.chunk_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default = "enabled")]
    pub lopdf: bool,
    #[serde(default)]
    pub commands: Vec<CommandProviderConfig>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            lopdf: true,
            commands: Vec::new(),
        }
    }
}

/// An extraction engine driven through its command line tool.
///
/// `args` and `output_file` accept the placeholders `{input}`, `{output_dir}`,
/// `{stem}` and `{format}`.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandProviderConfig {
    pub name: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// File the tool writes its result to; stdout is used when absent.
    #[serde(default)]
    pub output_file: Option<String>,
    /// Format the tool emits natively.
    #[serde(default = "markdown")]
    pub native_format: OutputFormat,
    #[serde(default = "all_formats")]
    pub supported_formats: Vec<OutputFormat>,
    #[serde(default)]
    pub prepare: Option<PrepareCommandConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrepareCommandConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Path whose existence means models were already fetched by an earlier run.
    #[serde(default)]
    pub ready_marker: Option<PathBuf>,
}

fn default_working_dir() -> PathBuf {
    PathBuf::from("data")
}

fn enabled() -> bool {
    true
}

fn markdown() -> OutputFormat {
    OutputFormat::Markdown
}

fn all_formats() -> Vec<OutputFormat> {
    vec![OutputFormat::Markdown, OutputFormat::Json, OutputFormat::Text]
}

pub async fn load_config() -> Result<AppConfig> {
    let explicit = env::var("APP_CONFIG_PATH").ok();
    let path = config_path();

    if explicit.is_none() && !path.exists() {
        info!(path = %path.display(), "No configuration file found, using defaults");
        return Ok(AppConfig::default());
    }

    let contents = fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: AppConfig = serde_yaml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    info!(path = %path.display(), "Configuration loaded from disk");
    Ok(config)
}

fn config_path() -> PathBuf {
    env::var("APP_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}
