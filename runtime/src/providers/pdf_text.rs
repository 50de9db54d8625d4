use std::path::{Path, PathBuf};

use async_trait::async_trait;
use lopdf::Document;
use serde_json::json;
use tracing::debug;

use super::{ConvertedContent, Converter, OutputFormat, ProviderError};

const NAME: &str = "lopdf";

struct PageText {
    page: u32,
    text: String,
}

/// Reads the embedded text layer; scanned documents without one are rejected.
#[derive(Debug, Default, Clone)]
pub struct LopdfConverter;

impl LopdfConverter {
    pub fn new() -> Self {
        Self
    }

    fn extract_pages(path: &Path) -> Result<Vec<PageText>, ProviderError> {
        let document = Document::load(path)
            .map_err(|err| ProviderError::ConversionFailed(format!("failed to parse PDF: {err}")))?;

        let mut pages = Vec::new();
        for page in document.get_pages().keys().copied() {
            let text = match document.extract_text(&[page]) {
                Ok(text) => text,
                Err(err) => {
                    debug!(page, error = %err, "Page has no extractable text");
                    String::new()
                }
            };
            pages.push(PageText {
                page,
                text: text.trim().to_string(),
            });
        }

        if pages.iter().all(|page| page.text.is_empty()) {
            return Err(ProviderError::ConversionFailed(
                "document has no extractable text layer".to_string(),
            ));
        }

        Ok(pages)
    }

    fn render(pages: Vec<PageText>, format: OutputFormat) -> ConvertedContent {
        match format {
            OutputFormat::Markdown => {
                let body = pages
                    .iter()
                    .filter(|page| !page.text.is_empty())
                    .map(|page| format!("## Page {}\n\n{}", page.page, page.text))
                    .collect::<Vec<_>>()
                    .join("\n\n");
                ConvertedContent::Text(body)
            }
            OutputFormat::Text => ConvertedContent::Text(join_pages(&pages)),
            OutputFormat::Json => {
                let content = join_pages(&pages);
                let pages = pages
                    .iter()
                    .map(|page| json!({ "page": page.page, "text": page.text }))
                    .collect::<Vec<_>>();
                ConvertedContent::Json(json!({
                    "library": NAME,
                    "format": "text",
                    "pages": pages,
                    "content": content,
                }))
            }
        }
    }
}

fn join_pages(pages: &[PageText]) -> String {
    pages
        .iter()
        .map(|page| page.text.as_str())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[async_trait]
impl Converter for LopdfConverter {
    fn name(&self) -> &str {
        NAME
    }

    fn available(&self) -> bool {
        true
    }

    async fn convert(
        &self,
        file_path: &Path,
        format: OutputFormat,
    ) -> Result<ConvertedContent, ProviderError> {
        let path: PathBuf = file_path.to_path_buf();
        let pages = tokio::task::spawn_blocking(move || Self::extract_pages(&path))
            .await
            .map_err(|err| {
                ProviderError::ConversionFailed(format!("extraction worker failed: {err}"))
            })??;

        debug!(pages = pages.len(), format = %format, "Extracted PDF text layer");
        Ok(Self::render(pages, format))
    }
}
