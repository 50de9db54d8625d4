use super::{
    CharOffsets, Chunk, ChunkParams, Chunker, ChunkerError, ParamSpec, ParameterSchema,
    TokenizerKind, build_chunk, check_overlap, param_str, param_usize,
};

/// Fixed-size windows of tokens, optionally overlapping.
#[derive(Debug, Default, Clone)]
pub struct TokenChunker;

impl Chunker for TokenChunker {
    fn name(&self) -> &str {
        "token"
    }

    fn description(&self) -> &str {
        "Splits text into fixed-size token chunks with configurable overlap"
    }

    fn parameter_schema(&self) -> ParameterSchema {
        ParameterSchema::from([
            (
                "tokenizer".to_string(),
                ParamSpec::string("Tokenizer used to count tokens", "character")
                    .one_of(&TokenizerKind::NAMES),
            ),
            (
                "chunk_size".to_string(),
                ParamSpec::integer("Maximum tokens per chunk", 2048).min(1.0),
            ),
            (
                "chunk_overlap".to_string(),
                ParamSpec::integer("Tokens shared between consecutive chunks", 0).min(0.0),
            ),
        ])
    }

    fn chunk(&self, text: &str, params: &ChunkParams) -> Result<Vec<Chunk>, ChunkerError> {
        let tokenizer = param_str(params, "tokenizer")?.parse::<TokenizerKind>()?.build()?;
        let size = param_usize(params, "chunk_size")?;
        let overlap = param_usize(params, "chunk_overlap")?;
        check_overlap(size, overlap)?;

        let spans = tokenizer.token_spans(text);
        let offsets = CharOffsets::new(text);
        let step = size - overlap;

        let mut chunks = Vec::new();
        let mut start = 0usize;
        while start < spans.len() {
            let end = (start + size).min(spans.len());
            let range = spans[start].start..spans[end - 1].end;
            chunks.push(build_chunk(text, range, &offsets, tokenizer.as_ref(), self.name()));
            if end == spans.len() {
                break;
            }
            start += step;
        }

        Ok(chunks)
    }
}
