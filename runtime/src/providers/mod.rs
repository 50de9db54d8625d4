use std::{borrow::Cow, fmt, path::Path, str::FromStr, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use ts_rs::TS;

use crate::error::ErrorKind;

pub mod command;
pub mod pdf_text;
pub mod registry;

pub use command::CommandConverter;
pub use pdf_text::LopdfConverter;
pub use registry::{ConverterRegistry, PrepareOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum OutputFormat {
    Markdown,
    Json,
    Text,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Markdown => "markdown",
            OutputFormat::Json => "json",
            OutputFormat::Text => "text",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Markdown => "md",
            OutputFormat::Json => "json",
            OutputFormat::Text => "txt",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            "json" => Ok(OutputFormat::Json),
            "text" | "txt" => Ok(OutputFormat::Text),
            other => Err(format!(
                "invalid output format '{other}'. supported: markdown, json, text"
            )),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum PreparationStatus {
    NotStarted,
    Downloading,
    Ready,
    Failed,
    NotRequired,
}

/// What a provider hands back: rendered text or a structured document.
#[derive(Debug, Clone, PartialEq)]
pub enum ConvertedContent {
    Text(String),
    Json(Value),
}

impl ConvertedContent {
    pub fn into_bytes(self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            ConvertedContent::Text(text) => Ok(text.into_bytes()),
            ConvertedContent::Json(value) => serde_json::to_vec_pretty(&value),
        }
    }

    /// Text view used for chunking; JSON documents contribute their `content` field.
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            ConvertedContent::Text(text) => Cow::Borrowed(text),
            ConvertedContent::Json(value) => match value.get("content").and_then(Value::as_str) {
                Some(content) => Cow::Borrowed(content),
                None => Cow::Owned(value.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("converter '{0}' not found")]
    NotFound(String),

    #[error("converter '{name}' is not available: {reason}")]
    Unavailable { name: String, reason: String },

    #[error("preparation of '{name}' failed: {message}")]
    PreparationFailed { name: String, message: String },

    #[error("converter '{name}' does not support format '{format}'")]
    UnsupportedFormat { name: String, format: OutputFormat },

    #[error("conversion with '{name}' timed out after {:.1}s", .timeout.as_secs_f64())]
    Timeout { name: String, timeout: Duration },

    #[error("conversion failed: {0}")]
    ConversionFailed(String),
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::NotFound(_) => ErrorKind::NotFound,
            ProviderError::Unavailable { .. } => ErrorKind::Unavailable,
            ProviderError::PreparationFailed { .. } => ErrorKind::PreparationFailed,
            ProviderError::UnsupportedFormat { .. } => ErrorKind::ConversionFailed,
            ProviderError::Timeout { .. } => ErrorKind::Timeout,
            ProviderError::ConversionFailed(_) => ErrorKind::ConversionFailed,
        }
    }
}

/// Capability every extraction engine adapter exposes to the registry.
#[async_trait]
pub trait Converter: Send + Sync {
    fn name(&self) -> &str;

    fn available(&self) -> bool;

    fn unavailable_reason(&self) -> Option<String> {
        None
    }

    fn requires_preparation(&self) -> bool {
        false
    }

    fn preparation_status(&self) -> PreparationStatus {
        PreparationStatus::NotRequired
    }

    fn preparation_error(&self) -> Option<String> {
        None
    }

    /// One-time model download or warm-up. The registry serialises calls.
    async fn prepare(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    fn supports_format(&self, _format: OutputFormat) -> bool {
        true
    }

    async fn convert(
        &self,
        file_path: &Path,
        format: OutputFormat,
    ) -> Result<ConvertedContent, ProviderError>;
}

#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct ProviderInfo {
    pub name: String,
    pub available: bool,
    pub error: Option<String>,
    pub requires_preparation: bool,
    pub preparation_status: PreparationStatus,
    pub preparation_error: Option<String>,
}
