use std::{collections::BTreeMap, ops::Range, time::Duration};

use serde::Serialize;
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::error::ErrorKind;

pub mod fast;
pub mod recursive;
pub mod registry;
pub mod sentence;
pub mod table;
pub mod token;
pub mod tokenizer;

pub use fast::FastChunker;
pub use recursive::RecursiveChunker;
pub use registry::{ChunkerInfo, ChunkerRegistry};
pub use sentence::SentenceChunker;
pub use table::TableChunker;
pub use token::TokenChunker;
pub use tokenizer::{Tokenizer, TokenizerKind};

pub type ChunkParams = Map<String, Value>;
pub type ParameterSchema = BTreeMap<String, ParamSpec>;

#[derive(Debug, Clone, Error)]
pub enum ChunkerError {
    #[error("chunker '{name}' not found. available chunkers: {available}")]
    NotFound { name: String, available: String },

    #[error("chunker '{name}' is not available: {reason}")]
    Unavailable { name: String, reason: String },

    #[error("invalid parameter '{name}': {message}")]
    InvalidParameter { name: String, message: String },

    #[error("chunking timed out after {:.1}s", .timeout.as_secs_f64())]
    Timeout { timeout: Duration },

    #[error("chunking failed: {0}")]
    Failed(String),
}

impl ChunkerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChunkerError::NotFound { .. } => ErrorKind::NotFound,
            ChunkerError::Unavailable { .. } => ErrorKind::Unavailable,
            ChunkerError::InvalidParameter { .. } => ErrorKind::InvalidParameter,
            ChunkerError::Timeout { .. } => ErrorKind::Timeout,
            ChunkerError::Failed(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn invalid(name: &str, message: impl Into<String>) -> Self {
        ChunkerError::InvalidParameter {
            name: name.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    pub text: String,
    /// Character offset of the first character in the source text.
    pub start_index: usize,
    /// Character offset one past the last character.
    pub end_index: usize,
    pub token_count: usize,
    pub metadata: Map<String, Value>,
}

/// Chunks plus totals fixed at construction.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkingResult {
    chunks: Vec<Chunk>,
    chunker_name: String,
    parameters: ChunkParams,
    total_chunks: usize,
    total_tokens: usize,
    original_length: usize,
}

impl ChunkingResult {
    pub fn new(
        chunker_name: impl Into<String>,
        parameters: ChunkParams,
        chunks: Vec<Chunk>,
        original_text: &str,
    ) -> Self {
        let total_chunks = chunks.len();
        let total_tokens = chunks.iter().map(|chunk| chunk.token_count).sum();
        Self {
            chunks,
            chunker_name: chunker_name.into(),
            parameters,
            total_chunks,
            total_tokens,
            original_length: original_text.chars().count(),
        }
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn chunker_name(&self) -> &str {
        &self.chunker_name
    }

    pub fn parameters(&self) -> &ChunkParams {
        &self.parameters
    }

    pub fn total_chunks(&self) -> usize {
        self.total_chunks
    }

    pub fn total_tokens(&self) -> usize {
        self.total_tokens
    }

    pub fn original_length(&self) -> usize {
        self.original_length
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParamSpec {
    #[serde(rename = "type")]
    pub kind: ParamType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    pub description: String,
    pub required: bool,
    #[serde(rename = "enum", skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
}

impl ParamSpec {
    fn with(kind: ParamType, description: &str, default: Option<Value>) -> Self {
        Self {
            kind,
            default,
            description: description.to_string(),
            required: false,
            allowed: Vec::new(),
            minimum: None,
        }
    }

    pub fn integer(description: &str, default: i64) -> Self {
        Self::with(ParamType::Integer, description, Some(json!(default)))
    }

    pub fn string(description: &str, default: &str) -> Self {
        Self::with(ParamType::String, description, Some(json!(default)))
    }

    pub fn boolean(description: &str, default: bool) -> Self {
        Self::with(ParamType::Boolean, description, Some(json!(default)))
    }

    /// A parameter the caller must always supply.
    pub fn required(kind: ParamType, description: &str) -> Self {
        let mut spec = Self::with(kind, description, None);
        spec.required = true;
        spec
    }

    pub fn min(mut self, minimum: f64) -> Self {
        self.minimum = Some(minimum);
        self
    }

    pub fn one_of(mut self, values: &[&str]) -> Self {
        self.allowed = values.iter().map(|value| json!(value)).collect();
        self
    }

    fn coerce(&self, name: &str, value: &Value) -> Result<Value, ChunkerError> {
        let coerced = match (self.kind, value) {
            (ParamType::String, Value::String(_)) => Some(value.clone()),
            (ParamType::Integer, Value::Number(number)) => number
                .as_i64()
                .or_else(|| {
                    number
                        .as_f64()
                        .filter(|float| float.fract() == 0.0)
                        .map(|float| float as i64)
                })
                .map(Value::from),
            (ParamType::Integer, Value::String(raw)) => raw.trim().parse::<i64>().ok().map(Value::from),
            (ParamType::Number, Value::Number(_)) => Some(value.clone()),
            (ParamType::Number, Value::String(raw)) => raw
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(|float| serde_json::Number::from_f64(float).map(Value::Number)),
            (ParamType::Boolean, Value::Bool(_)) => Some(value.clone()),
            (ParamType::Boolean, Value::String(raw)) => match raw.trim() {
                "true" | "1" | "yes" => Some(Value::Bool(true)),
                "false" | "0" | "no" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        };

        coerced.ok_or_else(|| {
            ChunkerError::invalid(name, format!("expected {:?}, got {value}", self.kind).to_lowercase())
        })
    }

    fn check(&self, name: &str, value: &Value) -> Result<(), ChunkerError> {
        if let (Some(number), Some(minimum)) = (value.as_f64(), self.minimum) {
            if number < minimum {
                return Err(ChunkerError::invalid(
                    name,
                    format!("must be >= {minimum}, got {value}"),
                ));
            }
        }

        if !self.allowed.is_empty() && !self.allowed.contains(value) {
            let allowed = self
                .allowed
                .iter()
                .map(Value::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            return Err(ChunkerError::invalid(
                name,
                format!("must be one of [{allowed}], got {value}"),
            ));
        }

        Ok(())
    }
}

/// Applies defaults and checks every declared constraint. Undeclared keys are dropped.
pub fn validate_params(
    schema: &ParameterSchema,
    params: &ChunkParams,
) -> Result<ChunkParams, ChunkerError> {
    let mut validated = ChunkParams::new();

    for (name, spec) in schema {
        match params.get(name).filter(|value| !value.is_null()) {
            Some(value) => {
                let value = spec.coerce(name, value)?;
                spec.check(name, &value)?;
                validated.insert(name.clone(), value);
            }
            None => match &spec.default {
                Some(default) => {
                    validated.insert(name.clone(), default.clone());
                }
                None if spec.required => {
                    return Err(ChunkerError::invalid(name, "required parameter not provided"));
                }
                None => {}
            },
        }
    }

    Ok(validated)
}

/// A splitting strategy. Implementations are synchronous; the registry runs them
/// on the blocking pool.
pub trait Chunker: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn available(&self) -> bool {
        true
    }

    fn unavailable_reason(&self) -> Option<String> {
        None
    }

    fn parameter_schema(&self) -> ParameterSchema;

    /// `params` has already been validated against [`Chunker::parameter_schema`].
    fn chunk(&self, text: &str, params: &ChunkParams) -> Result<Vec<Chunk>, ChunkerError>;
}

pub(crate) fn param_usize(params: &ChunkParams, name: &str) -> Result<usize, ChunkerError> {
    params
        .get(name)
        .and_then(Value::as_u64)
        .map(|value| value as usize)
        .ok_or_else(|| ChunkerError::invalid(name, "expected a non-negative integer"))
}

pub(crate) fn param_str<'a>(params: &'a ChunkParams, name: &str) -> Result<&'a str, ChunkerError> {
    params
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| ChunkerError::invalid(name, "expected a string"))
}

/// Maps byte offsets to character offsets.
pub(crate) struct CharOffsets {
    byte_starts: Vec<usize>,
}

impl CharOffsets {
    pub(crate) fn new(text: &str) -> Self {
        Self {
            byte_starts: text.char_indices().map(|(index, _)| index).collect(),
        }
    }

    pub(crate) fn char_index(&self, byte: usize) -> usize {
        self.byte_starts.partition_point(|&start| start < byte)
    }
}

pub(crate) fn build_chunk(
    text: &str,
    range: Range<usize>,
    offsets: &CharOffsets,
    tokenizer: &dyn Tokenizer,
    chunker: &str,
) -> Chunk {
    let slice = &text[range.clone()];
    let mut metadata = Map::new();
    metadata.insert("chunker".to_string(), json!(chunker));
    Chunk {
        text: slice.to_string(),
        start_index: offsets.char_index(range.start),
        end_index: offsets.char_index(range.end),
        token_count: tokenizer.count(slice),
        metadata,
    }
}

pub(crate) fn check_overlap(size: usize, overlap: usize) -> Result<(), ChunkerError> {
    if overlap >= size {
        return Err(ChunkerError::invalid(
            "chunk_overlap",
            format!("chunk_overlap ({overlap}) must be smaller than chunk_size ({size})"),
        ));
    }
    Ok(())
}
