use std::{sync::Arc, time::Duration};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::{
    ChunkParams, Chunker, ChunkerError, ChunkingResult, FastChunker, ParameterSchema,
    RecursiveChunker, SentenceChunker, TableChunker, TokenChunker, validate_params,
};

#[derive(Debug, Clone, Serialize)]
pub struct ChunkerInfo {
    pub name: String,
    pub available: bool,
    pub description: String,
    pub parameters: ParameterSchema,
    pub error: Option<String>,
}

/// Name → chunking strategy table, resolved once at startup.
pub struct ChunkerRegistry {
    chunkers: Vec<Arc<dyn Chunker>>,
    chunk_timeout: Duration,
}

impl ChunkerRegistry {
    pub fn new(chunk_timeout: Duration) -> Self {
        Self {
            chunkers: Vec::new(),
            chunk_timeout,
        }
    }

    /// Registry holding the built-in strategies.
    pub fn with_defaults(chunk_timeout: Duration) -> Self {
        let mut registry = Self::new(chunk_timeout);
        registry.register(Arc::new(TokenChunker));
        registry.register(Arc::new(SentenceChunker));
        registry.register(Arc::new(RecursiveChunker));
        registry.register(Arc::new(TableChunker));
        registry.register(Arc::new(FastChunker));
        registry
    }

    pub fn register(&mut self, chunker: Arc<dyn Chunker>) {
        if chunker.available() {
            info!(chunker = %chunker.name(), "Registered chunker");
        } else {
            warn!(
                chunker = %chunker.name(),
                reason = %chunker.unavailable_reason().unwrap_or_default(),
                "Chunker is not available"
            );
        }

        match self
            .chunkers
            .iter_mut()
            .find(|existing| existing.name() == chunker.name())
        {
            Some(existing) => *existing = chunker,
            None => self.chunkers.push(chunker),
        }
    }

    pub fn list(&self) -> Vec<ChunkerInfo> {
        self.chunkers
            .iter()
            .map(|chunker| {
                let available = chunker.available();
                ChunkerInfo {
                    name: chunker.name().to_string(),
                    available,
                    description: chunker.description().to_string(),
                    parameters: chunker.parameter_schema(),
                    error: if available {
                        None
                    } else {
                        chunker.unavailable_reason()
                    },
                }
            })
            .collect()
    }

    fn available_names(&self) -> String {
        self.chunkers
            .iter()
            .filter(|chunker| chunker.available())
            .map(|chunker| chunker.name())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Chunker>, ChunkerError> {
        let chunker = self
            .chunkers
            .iter()
            .find(|chunker| chunker.name() == name)
            .cloned()
            .ok_or_else(|| ChunkerError::NotFound {
                name: name.to_string(),
                available: self.available_names(),
            })?;

        if !chunker.available() {
            return Err(ChunkerError::Unavailable {
                name: name.to_string(),
                reason: chunker
                    .unavailable_reason()
                    .unwrap_or_else(|| "dependencies not installed".to_string()),
            });
        }
        Ok(chunker)
    }

    /// Validates `params`, then runs the strategy on the blocking pool under the
    /// chunk timeout.
    pub async fn chunk(
        &self,
        name: &str,
        text: String,
        params: &ChunkParams,
    ) -> Result<ChunkingResult, ChunkerError> {
        let chunker = self.get(name)?;
        let validated = validate_params(&chunker.parameter_schema(), params)?;

        let text: Arc<str> = Arc::from(text);
        let worker_text = text.clone();
        let worker_params = validated.clone();
        let worker = tokio::task::spawn_blocking(move || chunker.chunk(&worker_text, &worker_params));

        let chunks = match tokio::time::timeout(self.chunk_timeout, worker).await {
            Ok(Ok(result)) => result?,
            Ok(Err(err)) => return Err(ChunkerError::Failed(format!("chunking worker failed: {err}"))),
            Err(_) => {
                return Err(ChunkerError::Timeout {
                    timeout: self.chunk_timeout,
                });
            }
        };

        let result = ChunkingResult::new(name, validated, chunks, &text);
        debug!(
            chunker = %name,
            chunks = result.total_chunks(),
            tokens = result.total_tokens(),
            "Chunked text"
        );
        Ok(result)
    }
}
