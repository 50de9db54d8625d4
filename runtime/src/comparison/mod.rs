use std::io::Write;

use tempfile::TempPath;

use crate::error::{StractError, StractResult};

pub mod batch;
pub mod scheduler;
pub mod service;

pub use batch::{BatchComparisonReport, BatchConvert, BatchReport, BatchStatus};
pub use scheduler::ComparisonScheduler;
pub use service::{ComparisonService, Conversion, ConvertAndChunk, SubmitComparison};

/// An uploaded document held in memory until it is staged to disk.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn validate(&self) -> StractResult<()> {
        if !self.filename.to_ascii_lowercase().ends_with(".pdf") {
            return Err(StractError::InvalidRequest(
                "Only PDF files are supported".to_string(),
            ));
        }
        if self.bytes.is_empty() {
            return Err(StractError::InvalidRequest("uploaded file is empty".to_string()));
        }
        Ok(())
    }

    /// Writes the upload to a temp file removed when the returned path is dropped.
    pub async fn stage(&self) -> StractResult<TempPath> {
        let bytes = self.bytes.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<TempPath> {
            let mut file = tempfile::Builder::new()
                .prefix("pdfstract-")
                .suffix(".pdf")
                .tempfile()?;
            file.write_all(&bytes)?;
            file.flush()?;
            Ok(file.into_temp_path())
        })
        .await
        .map_err(|err| StractError::Orchestration(format!("staging worker failed: {err}")))?
        .map_err(|err| StractError::Orchestration(format!("failed to stage upload: {err}")))
    }
}

/// Trims, drops blanks and removes duplicates while keeping first-seen order.
pub fn normalize_libraries<I, S>(libraries: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = Vec::<String>::new();
    for library in libraries {
        for name in library.as_ref().split(',') {
            let name = name.trim();
            if !name.is_empty() && !seen.iter().any(|existing| existing == name) {
                seen.push(name.to_string());
            }
        }
    }
    seen
}
